//! MessagePack encoding of working memories.
//!
//! Backends persist node memories as opaque byte blobs; this is the wire
//! form they store.

use discern_foundation::{Error, ErrorKind, Result};

use crate::memory::WorkingMemory;

/// Encodes a working memory to MessagePack bytes.
///
/// # Errors
///
/// Returns a storage error if serialization fails.
pub fn encode_memory(memory: &WorkingMemory) -> Result<Vec<u8>> {
    rmp_serde::to_vec(memory)
        .map_err(|e| Error::new(ErrorKind::Storage(format!("encode memory: {e}"))))
}

/// Decodes a working memory from MessagePack bytes.
///
/// # Errors
///
/// Returns a storage error if the bytes are not a valid memory.
pub fn decode_memory(bytes: &[u8]) -> Result<WorkingMemory> {
    rmp_serde::from_slice(bytes)
        .map_err(|e| Error::new(ErrorKind::Storage(format!("decode memory: {e}"))))
}
