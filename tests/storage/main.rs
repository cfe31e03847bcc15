//! Integration tests for Layer 1: Storage
//!
//! Tests for working memories, the memory codec and storage backends.

mod backend;
mod memories;
