//! Node working memories and the storage interface for Discern.
//!
//! This crate provides:
//! - [`WorkingMemory`] - Per-node insertion-ordered store of facts or tokens
//!   with an optional join-key index
//! - [`Storage`] - The fact table and memory persistence contract the engine consumes
//! - [`InMemoryStorage`] - The default backend
//! - [`encode_memory`] / [`decode_memory`] - MessagePack wire form of a memory

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod backend;
pub mod codec;
pub mod memory;

pub use backend::{InMemoryStorage, Storage};
pub use codec::{decode_memory, encode_memory};
pub use memory::{IndexKey, MemoryEntry, WorkingMemory};
