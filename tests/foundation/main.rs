//! Integration tests for Layer 0: Foundation
//!
//! Tests for core types: Value, Fact, Token and Error.

mod errors;
mod facts;
mod tokens;
mod values;
