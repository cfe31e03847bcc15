//! End-to-end tests across all layers
//!
//! The worked scenarios plus property tests over random fact streams.

mod properties;
mod scenarios;
