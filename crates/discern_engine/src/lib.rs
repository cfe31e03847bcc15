//! RETE network and the public engine API for Discern.
//!
//! This crate provides:
//! - [`Engine`] - Thread-safe ingestion of programs and facts
//! - [`EngineConfig`] - Network, transaction and persistence settings
//! - [`ActionObserver`] - How rule firings leave the engine
//! - [`MetricsSnapshot`] - Counters and node-sharing gauges
//! - [`NodeInfo`] / [`NodeLifecycle`] - Introspection of the built network
//!
//! Rules compile into a shared discrimination network: one type node per
//! declared type, alpha chains for single-variable conditions, and
//! two-input join, NOT, EXISTS and aggregate nodes for the rest. Nodes with
//! the same sharing key are built once and reference-counted per rule.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod engine;
pub mod metrics;
pub mod observer;

mod builder;
mod delta;
mod env;
mod lifecycle;
mod network;
mod node;
mod plan;
mod propagate;
mod registry;
mod retro;
mod state;
mod transaction;

pub use config::{DEFAULT_MAX_FOOTPRINT, DEFAULT_TRANSACTION_TIMEOUT, EngineConfig, IngestOptions};
pub use engine::{Engine, EngineHandle};
pub use lifecycle::NodeLifecycle;
pub use metrics::MetricsSnapshot;
pub use network::NodeInfo;
pub use node::NodeKind;
pub use observer::{
    ActionContext, ActionObserver, ExecutionResult, NoopObserver, RecordingObserver,
};
