//! Transactions and the undo log.
//!
//! Every change to the network, the fact table or the program state is
//! recorded as an [`UndoEntry`] before (or as) it happens. Rolling back
//! replays the tail of the log in reverse. A transaction is consumed by
//! commit or rollback, so a finished transaction cannot be reused.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::trace;

use discern_foundation::{Error, ErrorKind, Fact, FactId, Result};
use discern_language::ProgramState;
use discern_storage::WorkingMemory;

use crate::builder::RuleEntry;
use crate::config::EngineConfig;
use crate::network::DetachedNode;
use crate::node::{NodeIdx, NodeState, Port};

// =============================================================================
// Undo Entries
// =============================================================================

/// One reversible change.
#[derive(Clone, Debug)]
pub(crate) enum UndoEntry {
    /// A node was created.
    NodeAdded(NodeIdx),
    /// An edge was linked.
    EdgeAdded {
        parent: NodeIdx,
        child: NodeIdx,
        port: Port,
    },
    /// A rule started referencing a node.
    RuleReferenceAdded {
        node_id: Arc<str>,
        rule_id: Arc<str>,
    },
    /// A rule stopped referencing a node; `position` is its place in the
    /// node's reference order.
    RuleReferenceRemoved {
        node_id: Arc<str>,
        rule_id: Arc<str>,
        rule_name: Arc<str>,
        position: usize,
    },
    /// A node was collected, with everything needed to put it back.
    NodeRemoved(Box<DetachedNode>),
    /// A rule was registered.
    RuleRegistered(Arc<str>),
    /// A rule was unregistered from `position` in rule order.
    RuleUnregistered {
        rule_id: Arc<str>,
        entry: Box<RuleEntry>,
        position: usize,
    },
    /// A fact was added to the fact table.
    FactInserted(FactId),
    /// A fact was removed from the fact table.
    FactRetracted(Fact),
    /// A fact was replaced in place; holds the previous version.
    FactReplaced(Fact),
    /// A node's memory changed for the first time since the last savepoint.
    MemoryTouched { idx: NodeIdx, prior: NodeState },
    /// The program state was replaced; holds the previous one.
    ProgramReplaced(Box<ProgramState>),
    /// A stored node memory was deleted.
    StoredMemoryDeleted {
        node_id: String,
        memory: WorkingMemory,
    },
}

const ENTRY_BYTES: usize = mem::size_of::<UndoEntry>();
const FACT_BYTES: usize = 96;
const FIELD_BYTES: usize = 48;
const MEMORY_ENTRY_BYTES: usize = 64;

fn fact_bytes(fact: &Fact) -> usize {
    FACT_BYTES + fact.field_count() * FIELD_BYTES
}

fn state_bytes(state: &NodeState) -> usize {
    state.size() * MEMORY_ENTRY_BYTES
}

impl UndoEntry {
    /// Approximate heap footprint of the entry.
    pub fn footprint(&self) -> usize {
        ENTRY_BYTES
            + match self {
                Self::NodeAdded(_) | Self::EdgeAdded { .. } => 0,
                Self::RuleReferenceAdded { node_id, rule_id } => node_id.len() + rule_id.len(),
                Self::RuleReferenceRemoved {
                    node_id,
                    rule_id,
                    rule_name,
                    ..
                } => node_id.len() + rule_id.len() + rule_name.len(),
                Self::NodeRemoved(detached) => {
                    mem::size_of::<DetachedNode>() + state_bytes(&detached.node.state)
                }
                Self::RuleRegistered(rule_id) => rule_id.len(),
                Self::RuleUnregistered { rule_id, entry, .. } => {
                    rule_id.len() + mem::size_of::<RuleEntry>() + entry.nodes.len() * 8
                }
                Self::FactInserted(id) => id.as_str().len(),
                Self::FactRetracted(fact) | Self::FactReplaced(fact) => fact_bytes(fact),
                Self::MemoryTouched { prior, .. } => state_bytes(prior),
                Self::ProgramReplaced(_) => mem::size_of::<ProgramState>(),
                Self::StoredMemoryDeleted { node_id, memory } => {
                    node_id.len() + memory.len() * MEMORY_ENTRY_BYTES
                }
            }
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// Position in the undo log to roll back to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Savepoint(usize);

/// An active transaction.
#[derive(Debug)]
pub(crate) struct Transaction {
    log: Vec<UndoEntry>,
    footprint: usize,
    limit: usize,
    started: Instant,
    timeout: Option<Duration>,
    /// Log position of each node's latest memory capture.
    touched: HashMap<NodeIdx, usize>,
    /// Captures below this position belong to an earlier savepoint.
    floor: usize,
    explicit: bool,
}

impl Transaction {
    pub fn begin(config: &EngineConfig, explicit: bool) -> Self {
        Self {
            log: Vec::new(),
            footprint: 0,
            limit: config.max_transaction_footprint,
            started: Instant::now(),
            timeout: config.transaction_timeout,
            touched: HashMap::new(),
            floor: 0,
            explicit,
        }
    }

    /// Whether the caller opened this transaction with `begin_transaction`.
    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    /// Turns an implicit transaction into one the caller must finish.
    pub fn make_explicit(&mut self) {
        self.explicit = true;
    }

    /// Appends an entry. The entry is kept even when the footprint or the
    /// deadline check fails, so the rollback that follows undoes it.
    ///
    /// # Errors
    ///
    /// Returns `FootprintExceeded` or `DeadlineExceeded`.
    pub fn record(&mut self, entry: UndoEntry) -> Result<()> {
        self.footprint += entry.footprint();
        trace!(entries = self.log.len() + 1, footprint = self.footprint, "undo recorded");
        self.log.push(entry);
        if self.footprint > self.limit {
            return Err(Error::new(ErrorKind::FootprintExceeded {
                used: self.footprint,
                limit: self.limit,
            }));
        }
        self.check_deadline()
    }

    /// # Errors
    ///
    /// Returns `DeadlineExceeded` once the timeout has elapsed.
    pub fn check_deadline(&self) -> Result<()> {
        match self.timeout {
            Some(timeout) if self.started.elapsed() > timeout => {
                Err(Error::new(ErrorKind::DeadlineExceeded {
                    elapsed_ms: self.started.elapsed().as_millis(),
                }))
            }
            _ => Ok(()),
        }
    }

    /// Marks the current log position. Memories touched from here on are
    /// captured again, so rolling back to the mark restores them.
    pub fn savepoint(&mut self) -> Savepoint {
        self.floor = self.log.len();
        Savepoint(self.floor)
    }

    /// Removes and returns the entries recorded after `mark`, newest first.
    pub fn unwind_to(&mut self, mark: Savepoint) -> Vec<UndoEntry> {
        let tail: Vec<UndoEntry> = self.log.drain(mark.0.min(self.log.len())..).rev().collect();
        let mut recaptured = false;
        for entry in &tail {
            self.footprint = self.footprint.saturating_sub(entry.footprint());
            recaptured |= matches!(entry, UndoEntry::MemoryTouched { .. });
        }
        if recaptured {
            self.touched = self
                .log
                .iter()
                .enumerate()
                .filter_map(|(position, entry)| match entry {
                    UndoEntry::MemoryTouched { idx, .. } => Some((*idx, position)),
                    _ => None,
                })
                .collect();
        }
        self.floor = self.floor.min(self.log.len());
        tail
    }

    /// Every entry, newest first, consuming the transaction.
    pub fn unwind(mut self) -> Vec<UndoEntry> {
        self.unwind_to(Savepoint(0))
    }

    /// Whether a node's memory has already been captured since the last
    /// savepoint.
    pub fn is_touched(&self, idx: NodeIdx) -> bool {
        self.touched
            .get(&idx)
            .is_some_and(|&position| position >= self.floor)
    }

    /// Notes that the next recorded entry captures `idx`.
    pub fn touch(&mut self, idx: NodeIdx) {
        self.touched.insert(idx, self.log.len());
    }

    /// Nodes whose memory changed in this transaction.
    pub fn touched(&self) -> impl Iterator<Item = NodeIdx> + '_ {
        self.touched.keys().copied()
    }

    pub fn entries(&self) -> &[UndoEntry] {
        &self.log
    }

    pub fn footprint(&self) -> usize {
        self.footprint
    }
}
