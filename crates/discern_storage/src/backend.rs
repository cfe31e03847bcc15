//! The storage collaborator consumed by the engine.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use tracing::trace;

use discern_foundation::{Fact, FactId, Result};

use crate::codec::{decode_memory, encode_memory};
use crate::memory::WorkingMemory;

/// Fact table plus persisted node memories.
///
/// The engine owns one backend behind its ingest lock, so methods take
/// `&mut self` for writes. Backends that perform I/O do it here; these
/// calls are the engine's only suspension points.
pub trait Storage: Send {
    /// Persists a node's working memory under the node's stable id.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the memory cannot be written.
    fn save_memory(&mut self, node_id: &str, memory: &WorkingMemory) -> Result<()>;

    /// Loads a previously saved memory.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the stored memory cannot be read.
    fn load_memory(&self, node_id: &str) -> Result<Option<WorkingMemory>>;

    /// Deletes a saved memory. Deleting an unknown node is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend fails.
    fn delete_memory(&mut self, node_id: &str) -> Result<()>;

    /// Lists node ids with a saved memory, sorted.
    fn list_nodes(&self) -> Vec<String>;

    /// Adds or replaces a fact.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend fails.
    fn add_fact(&mut self, fact: Fact) -> Result<()>;

    /// Returns a fact by internal id.
    fn get_fact(&self, id: &FactId) -> Option<Fact>;

    /// Removes a fact, returning it if it was present.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend fails.
    fn remove_fact(&mut self, id: &FactId) -> Result<Option<Fact>>;

    /// Returns every fact ordered by insertion time.
    fn all_facts(&self) -> Vec<Fact>;

    /// Number of facts.
    fn fact_count(&self) -> usize;

    /// Drops all facts and memories.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend fails.
    fn clear(&mut self) -> Result<()>;
}

/// Default in-process backend.
///
/// Memories are kept in their encoded form so that saving and loading go
/// through the same codec a durable backend would use.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    facts: IndexMap<FactId, Fact>,
    memories: BTreeMap<String, Vec<u8>>,
}

impl InMemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total encoded size of saved memories, in bytes.
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        self.memories.values().map(Vec::len).sum()
    }
}

impl Storage for InMemoryStorage {
    fn save_memory(&mut self, node_id: &str, memory: &WorkingMemory) -> Result<()> {
        let bytes = encode_memory(memory)?;
        trace!(node = node_id, bytes = bytes.len(), "saved node memory");
        self.memories.insert(node_id.to_string(), bytes);
        Ok(())
    }

    fn load_memory(&self, node_id: &str) -> Result<Option<WorkingMemory>> {
        self.memories
            .get(node_id)
            .map(|bytes| decode_memory(bytes))
            .transpose()
    }

    fn delete_memory(&mut self, node_id: &str) -> Result<()> {
        if self.memories.remove(node_id).is_some() {
            trace!(node = node_id, "deleted node memory");
        }
        Ok(())
    }

    fn list_nodes(&self) -> Vec<String> {
        self.memories.keys().cloned().collect()
    }

    fn add_fact(&mut self, fact: Fact) -> Result<()> {
        self.facts.insert(fact.internal_id().clone(), fact);
        Ok(())
    }

    fn get_fact(&self, id: &FactId) -> Option<Fact> {
        self.facts.get(id).cloned()
    }

    fn remove_fact(&mut self, id: &FactId) -> Result<Option<Fact>> {
        Ok(self.facts.shift_remove(id))
    }

    fn all_facts(&self) -> Vec<Fact> {
        let mut facts: Vec<Fact> = self.facts.values().cloned().collect();
        facts.sort_by_key(Fact::inserted_at);
        facts
    }

    fn fact_count(&self) -> usize {
        self.facts.len()
    }

    fn clear(&mut self) -> Result<()> {
        self.facts.clear();
        self.memories.clear();
        Ok(())
    }
}
