//! The node arena and its indexes.
//!
//! Slots are never reused: a removed node leaves `None` behind so that a
//! rollback can put it back under the same index.

use std::collections::HashMap;
use std::sync::Arc;

use discern_foundation::{Error, ErrorKind, Result};

use crate::lifecycle::{LifecycleManager, NodeLifecycle};
use crate::metrics::NetworkGauges;
use crate::node::{Edge, Node, NodeIdx, NodeKind, NodeSpec, Port};
use crate::registry::{HashCache, SharingRegistry};

/// Introspection view of one node.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeInfo {
    /// Stable node id.
    pub id: Arc<str>,
    /// Node kind.
    pub kind: NodeKind,
    /// Printout of the node's test.
    pub condition: String,
    /// Number of referencing rules.
    pub ref_count: usize,
    /// Referencing rule ids.
    pub rules: Vec<Arc<str>>,
    /// Entries across the node's memories.
    pub memory_size: usize,
    /// Ids of the node's children.
    pub children: Vec<Arc<str>>,
}

/// A node taken out of the arena, with what is needed to put it back.
#[derive(Clone, Debug)]
pub(crate) struct DetachedNode {
    pub idx: NodeIdx,
    pub node: Node,
    /// Each incoming edge and the position it had in the parent's child list.
    pub positions: Vec<(NodeIdx, Port, usize)>,
    pub lifecycle: Option<NodeLifecycle>,
}

pub(crate) struct Network {
    nodes: Vec<Option<Node>>,
    root: NodeIdx,
    types: HashMap<Arc<str>, NodeIdx>,
    terminals: HashMap<Arc<str>, NodeIdx>,
    pub alpha: SharingRegistry,
    pub beta: SharingRegistry,
    pub cache: HashCache,
    pub lifecycle: LifecycleManager,
}

impl Network {
    pub fn new(cache_capacity: usize) -> Self {
        let root_id: Arc<str> = Arc::from("root");
        let lifecycle = LifecycleManager::new();
        lifecycle.register_node(&root_id, NodeKind::Root);
        Self {
            nodes: vec![Some(Node::new(root_id, NodeSpec::Root))],
            root: NodeIdx(0),
            types: HashMap::new(),
            terminals: HashMap::new(),
            alpha: SharingRegistry::new(),
            beta: SharingRegistry::new(),
            cache: HashCache::new(cache_capacity),
            lifecycle,
        }
    }

    pub fn root(&self) -> NodeIdx {
        self.root
    }

    pub fn node(&self, idx: NodeIdx) -> Result<&Node> {
        self.nodes
            .get(idx.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::new(ErrorKind::DetachedNode(idx.to_string())))
    }

    pub fn node_mut(&mut self, idx: NodeIdx) -> Result<&mut Node> {
        self.nodes
            .get_mut(idx.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::new(ErrorKind::DetachedNode(idx.to_string())))
    }

    pub fn contains(&self, idx: NodeIdx) -> bool {
        matches!(self.nodes.get(idx.0), Some(Some(_)))
    }

    pub fn type_node(&self, type_name: &str) -> Option<NodeIdx> {
        self.types.get(type_name).copied()
    }

    pub fn terminal(&self, rule_id: &str) -> Option<NodeIdx> {
        self.terminals.get(rule_id).copied()
    }

    /// Live nodes in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeIdx, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|node| (NodeIdx(i), node)))
    }

    pub fn find(&self, node_id: &str) -> Option<NodeIdx> {
        self.iter()
            .find(|(_, node)| node.id.as_ref() == node_id)
            .map(|(idx, _)| idx)
    }

    /// Appends a node and indexes it by kind. Alpha and beta nodes must be
    /// appended through [`Self::intern`] instead.
    pub fn push(&mut self, node: Node) -> NodeIdx {
        let idx = NodeIdx(self.nodes.len());
        self.index(idx, &node);
        self.lifecycle.register_node(&node.id, node.kind());
        self.nodes.push(Some(node));
        idx
    }

    /// Returns the shareable node registered under `id`, creating it from
    /// `spec` when absent. The flag is true for a reused node.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCascade` when `id` is already held by a node interned
    /// under a different signature.
    pub fn intern(
        &mut self,
        id: &Arc<str>,
        signature: &str,
        spec: NodeSpec,
    ) -> Result<(NodeIdx, bool)> {
        let kind = spec.kind();
        let registry = match kind {
            NodeKind::Alpha => &self.alpha,
            NodeKind::Join | NodeKind::Not | NodeKind::Exists | NodeKind::Aggregate => &self.beta,
            other => {
                return Err(Error::internal(format!("{other} nodes are not shared")));
            }
        };
        let nodes = &mut self.nodes;
        let (idx, reused) = registry.get_or_create(id, || {
            let idx = NodeIdx(nodes.len());
            nodes.push(Some(Node::new(id.clone(), spec).with_signature(signature)));
            Ok(idx)
        })?;
        if reused {
            let existing = self.node(idx)?;
            if existing.signature.as_deref() != Some(signature) {
                return Err(Error::new(ErrorKind::InvalidCascade(format!(
                    "sharing key {id} already names a node built from a different signature"
                ))));
            }
        } else {
            self.lifecycle.register_node(id, kind);
        }
        Ok((idx, reused))
    }

    fn index(&mut self, idx: NodeIdx, node: &Node) {
        match node.spec.as_ref() {
            NodeSpec::Type { type_name } => {
                self.types.insert(type_name.clone(), idx);
            }
            NodeSpec::Terminal(terminal) => {
                self.terminals.insert(terminal.rule_id.clone(), idx);
            }
            NodeSpec::Alpha(_) => self.alpha.insert(node.id.clone(), idx),
            NodeSpec::Join(_) | NodeSpec::Not(_) | NodeSpec::Exists(_) | NodeSpec::Aggregate(_) => {
                self.beta.insert(node.id.clone(), idx);
            }
            NodeSpec::Root => {}
        }
    }

    fn unindex(&mut self, node: &Node) {
        match node.spec.as_ref() {
            NodeSpec::Type { type_name } => {
                self.types.remove(type_name);
            }
            NodeSpec::Terminal(terminal) => {
                self.terminals.remove(&terminal.rule_id);
            }
            NodeSpec::Alpha(_) => {
                self.alpha.remove(&node.id);
            }
            NodeSpec::Join(_) | NodeSpec::Not(_) | NodeSpec::Exists(_) | NodeSpec::Aggregate(_) => {
                self.beta.remove(&node.id);
            }
            NodeSpec::Root => {}
        }
    }

    /// Links `parent → child`. Returns false when the edge already existed.
    pub fn link(&mut self, parent: NodeIdx, child: NodeIdx, port: Port) -> Result<bool> {
        let edge = Edge {
            target: child,
            port,
        };
        if self.node(parent)?.children.contains(&edge) {
            return Ok(false);
        }
        self.node_mut(child)?.parents.push((parent, port));
        self.node_mut(parent)?.children.push(edge);
        Ok(true)
    }

    /// Removes the edge added by the matching [`Self::link`].
    pub fn unlink(&mut self, parent: NodeIdx, child: NodeIdx, port: Port) {
        let edge = Edge {
            target: child,
            port,
        };
        if let Ok(node) = self.node_mut(parent) {
            if let Some(pos) = node.children.iter().rposition(|e| *e == edge) {
                node.children.remove(pos);
            }
        }
        if let Ok(node) = self.node_mut(child) {
            if let Some(pos) = node.parents.iter().rposition(|p| *p == (parent, port)) {
                node.parents.remove(pos);
            }
        }
    }

    /// Drops a node created in the current transaction. Its edges must
    /// already be unlinked.
    pub fn discard(&mut self, idx: NodeIdx) {
        if let Some(node) = self.nodes.get_mut(idx.0).and_then(Option::take) {
            self.unindex(&node);
            self.lifecycle.unregister_node(&node.id);
        }
    }

    /// Takes a childless node out of the network.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCascade` if the node still has children.
    pub fn detach(&mut self, idx: NodeIdx) -> Result<DetachedNode> {
        let node = self.node(idx)?;
        if !node.children.is_empty() {
            return Err(Error::new(ErrorKind::InvalidCascade(format!(
                "node {} still has {} children",
                node.id,
                node.children.len()
            ))));
        }
        let parents = node.parents.clone();
        let mut positions = Vec::with_capacity(parents.len());
        for (parent, port) in parents {
            let edge = Edge {
                target: idx,
                port,
            };
            let parent_node = self.node_mut(parent)?;
            if let Some(pos) = parent_node.children.iter().position(|e| *e == edge) {
                parent_node.children.remove(pos);
                positions.push((parent, port, pos));
            }
        }
        let node = self
            .nodes
            .get_mut(idx.0)
            .and_then(Option::take)
            .ok_or_else(|| Error::new(ErrorKind::DetachedNode(idx.to_string())))?;
        self.unindex(&node);
        let lifecycle = self.lifecycle.unregister_node(&node.id);
        Ok(DetachedNode {
            idx,
            node,
            positions,
            lifecycle,
        })
    }

    /// Puts back a node taken out by [`Self::detach`].
    pub fn reattach(&mut self, detached: DetachedNode) {
        let DetachedNode {
            idx,
            node,
            positions,
            lifecycle,
        } = detached;
        for &(parent, port, pos) in positions.iter().rev() {
            if let Ok(parent_node) = self.node_mut(parent) {
                let pos = pos.min(parent_node.children.len());
                parent_node.children.insert(pos, Edge { target: idx, port });
            }
        }
        self.index(idx, &node);
        match lifecycle {
            Some(record) => self.lifecycle.restore(record),
            None => self.lifecycle.register_node(&node.id, node.kind()),
        }
        if let Some(slot) = self.nodes.get_mut(idx.0) {
            *slot = Some(node);
        }
    }

    pub fn gauges(&self) -> NetworkGauges {
        let mut gauges = NetworkGauges {
            cache_hits: self.cache.hits(),
            cache_misses: self.cache.misses(),
            ..NetworkGauges::default()
        };
        for (_, node) in self.iter() {
            let kind = node.kind();
            match kind {
                NodeKind::Root => continue,
                NodeKind::Type => gauges.type_nodes += 1,
                NodeKind::Alpha => {
                    gauges.alpha_nodes += 1;
                    let ends_chain = node.children.iter().all(|edge| {
                        self.node(edge.target)
                            .is_ok_and(|child| child.kind() != NodeKind::Alpha)
                    });
                    if ends_chain {
                        gauges.alpha_chains += 1;
                    }
                }
                NodeKind::Join => gauges.join_nodes += 1,
                NodeKind::Not => gauges.not_nodes += 1,
                NodeKind::Exists => gauges.exists_nodes += 1,
                NodeKind::Aggregate => gauges.aggregate_nodes += 1,
                NodeKind::Terminal => gauges.terminal_nodes += 1,
            }
            if !matches!(kind, NodeKind::Type | NodeKind::Terminal) {
                gauges.rule_references += self.lifecycle.ref_count(&node.id);
            }
        }
        gauges
    }

    pub fn info(&self, node: &Node) -> NodeInfo {
        let record = self.lifecycle.get(&node.id);
        NodeInfo {
            id: node.id.clone(),
            kind: node.kind(),
            condition: node.spec.describe(),
            ref_count: record.as_ref().map_or(0, NodeLifecycle::ref_count),
            rules: record
                .map(|r| r.rules.keys().cloned().collect())
                .unwrap_or_default(),
            memory_size: node.state.size(),
            children: node
                .children
                .iter()
                .filter_map(|edge| self.node(edge.target).ok().map(|c| c.id.clone()))
                .collect(),
        }
    }
}
