//! Discern - Incremental RETE rule engine
//!
//! This crate re-exports all layers of the Discern system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 3: discern_engine     - Network, sharing, lifecycle, transactions, engine API
//! Layer 2: discern_language   - Rule AST, canonical forms, validation, evaluation
//! Layer 1: discern_storage    - Working memories, fact table, storage backends
//! Layer 0: discern_foundation - Core types (Value, Fact, Token, Error)
//! ```

pub use discern_engine as engine;
pub use discern_foundation as foundation;
pub use discern_language as language;
pub use discern_storage as storage;
