//! Node lifecycle: which rules reference which nodes.
//!
//! The manager only counts. Deciding to collect a node whose count reached
//! zero is the builder's job.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use discern_foundation::{Error, Result};

use crate::node::NodeKind;

/// Lifecycle record of one node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeLifecycle {
    /// Stable node id.
    pub node_id: Arc<str>,
    /// Node kind.
    pub kind: NodeKind,
    /// Referencing rules: id → display name, in reference order.
    pub rules: IndexMap<Arc<str>, Arc<str>>,
}

impl NodeLifecycle {
    /// Number of referencing rules.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.rules.len()
    }
}

/// Reference table keyed by node id.
#[derive(Debug, Default)]
pub(crate) struct LifecycleManager {
    records: RwLock<HashMap<Arc<str>, NodeLifecycle>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node. Registering an existing node is a no-op.
    pub fn register_node(&self, node_id: &Arc<str>, kind: NodeKind) {
        self.records
            .write()
            .entry(node_id.clone())
            .or_insert_with(|| NodeLifecycle {
                node_id: node_id.clone(),
                kind,
                rules: IndexMap::new(),
            });
    }

    /// Records that `rule_id` uses the node. Returns false when the
    /// reference already existed.
    ///
    /// # Errors
    ///
    /// Returns an internal error for an unregistered node.
    pub fn add_rule_reference(
        &self,
        node_id: &str,
        rule_id: &Arc<str>,
        rule_name: &Arc<str>,
    ) -> Result<bool> {
        let mut records = self.records.write();
        let record = records
            .get_mut(node_id)
            .ok_or_else(|| Error::internal(format!("node {node_id} is not registered")))?;
        if record.rules.contains_key(rule_id) {
            return Ok(false);
        }
        record.rules.insert(rule_id.clone(), rule_name.clone());
        Ok(true)
    }

    /// Drops `rule_id`'s reference. Returns true exactly when this removal
    /// brought the count to zero.
    ///
    /// # Errors
    ///
    /// Returns an internal error for an unregistered node.
    pub fn remove_rule_from_node(&self, node_id: &str, rule_id: &str) -> Result<bool> {
        let mut records = self.records.write();
        let record = records
            .get_mut(node_id)
            .ok_or_else(|| Error::internal(format!("node {node_id} is not registered")))?;
        let removed = record.rules.shift_remove(rule_id).is_some();
        Ok(removed && record.rules.is_empty())
    }

    /// Position and display name of `rule_id` among the node's references.
    pub fn reference(&self, node_id: &str, rule_id: &str) -> Option<(usize, Arc<str>)> {
        self.records
            .read()
            .get(node_id)
            .and_then(|record| record.rules.get_full(rule_id))
            .map(|(position, _, name)| (position, name.clone()))
    }

    /// Puts back a reference removed by [`Self::remove_rule_from_node`].
    ///
    /// # Errors
    ///
    /// Returns an internal error for an unregistered node.
    pub fn restore_reference(
        &self,
        node_id: &str,
        position: usize,
        rule_id: &Arc<str>,
        rule_name: &Arc<str>,
    ) -> Result<()> {
        let mut records = self.records.write();
        let record = records
            .get_mut(node_id)
            .ok_or_else(|| Error::internal(format!("node {node_id} is not registered")))?;
        let position = position.min(record.rules.len());
        record
            .rules
            .shift_insert(position, rule_id.clone(), rule_name.clone());
        Ok(())
    }

    /// Drops a node's record, returning it.
    pub fn unregister_node(&self, node_id: &str) -> Option<NodeLifecycle> {
        self.records.write().remove(node_id)
    }

    /// Restores a record captured by [`Self::unregister_node`].
    pub fn restore(&self, record: NodeLifecycle) {
        self.records.write().insert(record.node_id.clone(), record);
    }

    pub fn get(&self, node_id: &str) -> Option<NodeLifecycle> {
        self.records.read().get(node_id).cloned()
    }

    pub fn ref_count(&self, node_id: &str) -> usize {
        self.records
            .read()
            .get(node_id)
            .map_or(0, NodeLifecycle::ref_count)
    }
}
