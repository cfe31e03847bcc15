//! Core values, facts, tokens, and errors for Discern.
//!
//! This crate provides:
//! - [`Value`] - Dynamic field values (number, string, bool, reference)
//! - [`Fact`] and [`FactId`] - Typed immutable records and their `type#id` identifiers
//! - [`Token`] - Persistent variable → fact bindings flowing through joins
//! - [`Type`] - Type descriptors for field and parameter validation
//! - [`Error`] - Rich error types with a propagation taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod fact;
pub mod token;
pub mod types;
pub mod value;

pub use error::{Error, ErrorCategory, ErrorContext, ErrorKind};
pub use fact::{Fact, FactId, RESERVED_ID_FIELD};
pub use token::{Binding, Token, TokenKey};
pub use types::Type;
pub use value::Value;

/// Result type for Discern operations.
pub type Result<T> = std::result::Result<T, Error>;
