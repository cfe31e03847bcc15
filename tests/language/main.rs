//! Integration tests for Layer 2: Language
//!
//! Tests for canonical forms, condition splitting, decomposition,
//! evaluation and program validation.

mod analysis;
mod evaluation;
