//! Integration tests for Layer 3: Engine
//!
//! Tests for node sharing, propagation, transactions, observers and
//! introspection through the public engine API.

mod introspection;
mod observers;
mod sharing;
mod support;
mod transactions;
