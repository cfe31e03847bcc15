//! Bringing a freshly built rule up to date.
//!
//! New nodes start empty. Their left inputs are fed from whatever their
//! existing parents currently emit, then every stored fact is replayed in
//! insertion order through the part of the network above the new nodes.
//! Existing memories are read but never rewritten, and the new terminal
//! fires once for each match it ends up holding.

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use discern_foundation::Result;
use discern_storage::Storage;

use crate::metrics::EngineMetrics;
use crate::network::Network;
use crate::node::{NodeIdx, NodeKind, Port};
use crate::propagate::{Activation, Propagator, ReplayScope};
use crate::transaction::Transaction;

/// One left-input feed performed before the fact replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Feed {
    /// A node without a left parent receives the empty token.
    Seed(NodeIdx),
    /// A new node receives an existing two-input parent's outputs.
    Outputs { parent: NodeIdx, child: NodeIdx },
}

#[derive(Debug)]
pub(crate) struct Replay {
    pub scope: ReplayScope,
    pub feeds: Vec<Feed>,
    pub terminal: NodeIdx,
}

fn is_beta(kind: NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::Join | NodeKind::Not | NodeKind::Exists | NodeKind::Aggregate
    )
}

/// Works out what a replay of `created` has to touch.
///
/// # Errors
///
/// Returns `DetachedNode` if a created node is missing from the arena.
pub(crate) fn prepare(network: &Network, created: &[NodeIdx], terminal: NodeIdx) -> Result<Replay> {
    let new_nodes: HashSet<NodeIdx> = created.iter().copied().collect();

    let mut relevant = new_nodes.clone();
    let mut queue: VecDeque<NodeIdx> = created.iter().copied().collect();
    while let Some(idx) = queue.pop_front() {
        for &(parent, _) in &network.node(idx)?.parents {
            if relevant.insert(parent) {
                queue.push_back(parent);
            }
        }
    }

    let mut feeds = Vec::new();
    for &idx in created {
        let node = network.node(idx)?;
        if node.spec.beta().is_some_and(|beta| beta.seeded) {
            feeds.push(Feed::Seed(idx));
        }
        for &(parent, port) in &node.parents {
            if port != Port::Left || new_nodes.contains(&parent) {
                continue;
            }
            if is_beta(network.node(parent)?.kind()) {
                feeds.push(Feed::Outputs { parent, child: idx });
            }
        }
    }

    Ok(Replay {
        scope: ReplayScope {
            new_nodes,
            relevant,
        },
        feeds,
        terminal,
    })
}

/// Runs a prepared replay. Activations for the new terminal are appended
/// to `activations`.
///
/// # Errors
///
/// Returns any non-evaluation error raised while propagating.
pub(crate) fn run(
    replay: Replay,
    network: &mut Network,
    storage: &dyn Storage,
    txn: &mut Transaction,
    metrics: &EngineMetrics,
    activations: &mut Vec<Activation>,
) -> Result<()> {
    let Replay {
        scope,
        feeds,
        terminal,
    } = replay;
    let relevant = scope.relevant.len();
    let mut propagator =
        Propagator::new(network, storage, txn, metrics, activations).with_replay(scope);

    for feed in &feeds {
        match *feed {
            Feed::Seed(idx) => propagator.seed(idx)?,
            Feed::Outputs { parent, child } => propagator.replay_outputs(parent, child)?,
        }
    }
    let facts = storage.all_facts();
    for fact in &facts {
        propagator.insert(fact)?;
    }
    propagator.fire_all(terminal)?;

    debug!(
        feeds = feeds.len(),
        facts = facts.len(),
        relevant,
        "rule replayed"
    );
    Ok(())
}

