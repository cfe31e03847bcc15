//! Engine counters.
//!
//! Counters are monotonic and survive rollback and reset. Structural
//! gauges (node counts, sharing ratio) are computed from the network when a
//! snapshot is taken.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Monotonic counters updated by the engine.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub(crate) facts_inserted: AtomicU64,
    pub(crate) facts_retracted: AtomicU64,
    pub(crate) facts_updated: AtomicU64,
    pub(crate) updates_short_circuited: AtomicU64,
    pub(crate) activations: AtomicU64,
    pub(crate) retraction_events: AtomicU64,
    pub(crate) evaluation_errors: AtomicU64,
    pub(crate) action_failures: AtomicU64,
    pub(crate) transactions_committed: AtomicU64,
    pub(crate) transactions_rolled_back: AtomicU64,
    pub(crate) rules_added: AtomicU64,
    pub(crate) rules_removed: AtomicU64,
    pub(crate) build_time_ns: AtomicU64,
    pub(crate) last_build_time_ns: AtomicU64,
}

impl EngineMetrics {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_build(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.build_time_ns.fetch_add(nanos, Ordering::Relaxed);
        self.last_build_time_ns.store(nanos, Ordering::Relaxed);
    }

    fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Structural gauges supplied by the network.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct NetworkGauges {
    pub type_nodes: usize,
    pub alpha_nodes: usize,
    pub join_nodes: usize,
    pub not_nodes: usize,
    pub exists_nodes: usize,
    pub aggregate_nodes: usize,
    pub terminal_nodes: usize,
    pub alpha_chains: usize,
    pub rule_references: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Point-in-time view of the engine's counters and gauges.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Type nodes.
    pub type_nodes: usize,
    /// Alpha nodes, decomposed steps included.
    pub alpha_nodes: usize,
    /// Join nodes.
    pub join_nodes: usize,
    /// NOT nodes.
    pub not_nodes: usize,
    /// EXISTS nodes.
    pub exists_nodes: usize,
    /// Aggregate nodes.
    pub aggregate_nodes: usize,
    /// Terminal nodes (one per rule).
    pub terminal_nodes: usize,
    /// Alpha nodes with no alpha child, i.e. chain ends.
    pub alpha_chains: usize,
    /// Rule references divided by shared nodes; 1.0 means no sharing.
    pub sharing_ratio: f64,
    /// Hits over lookups in the canonical-string cache.
    pub hash_cache_hit_rate: f64,
    /// Facts inserted.
    pub facts_inserted: u64,
    /// Facts retracted.
    pub facts_retracted: u64,
    /// Facts updated.
    pub facts_updated: u64,
    /// Updates that changed no predicate field.
    pub updates_short_circuited: u64,
    /// Terminal activations delivered to the observer.
    pub activations: u64,
    /// Activation retractions delivered to the observer.
    pub retraction_events: u64,
    /// Predicate evaluation errors swallowed during propagation.
    pub evaluation_errors: u64,
    /// Failed action executions (argument errors, observer panics).
    pub action_failures: u64,
    /// Committed transactions.
    pub transactions_committed: u64,
    /// Rolled-back transactions.
    pub transactions_rolled_back: u64,
    /// Rules added.
    pub rules_added: u64,
    /// Rules removed.
    pub rules_removed: u64,
    /// Cumulative rule build time.
    pub total_build_time: Duration,
    /// Build time of the most recent rule.
    pub last_build_time: Duration,
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl MetricsSnapshot {
    pub(crate) fn capture(metrics: &EngineMetrics, gauges: NetworkGauges) -> Self {
        let shared = gauges.alpha_nodes
            + gauges.join_nodes
            + gauges.not_nodes
            + gauges.exists_nodes
            + gauges.aggregate_nodes;
        Self {
            type_nodes: gauges.type_nodes,
            alpha_nodes: gauges.alpha_nodes,
            join_nodes: gauges.join_nodes,
            not_nodes: gauges.not_nodes,
            exists_nodes: gauges.exists_nodes,
            aggregate_nodes: gauges.aggregate_nodes,
            terminal_nodes: gauges.terminal_nodes,
            alpha_chains: gauges.alpha_chains,
            sharing_ratio: if shared == 0 {
                1.0
            } else {
                ratio(gauges.rule_references as u64, shared as u64)
            },
            hash_cache_hit_rate: ratio(gauges.cache_hits, gauges.cache_hits + gauges.cache_misses),
            facts_inserted: EngineMetrics::load(&metrics.facts_inserted),
            facts_retracted: EngineMetrics::load(&metrics.facts_retracted),
            facts_updated: EngineMetrics::load(&metrics.facts_updated),
            updates_short_circuited: EngineMetrics::load(&metrics.updates_short_circuited),
            activations: EngineMetrics::load(&metrics.activations),
            retraction_events: EngineMetrics::load(&metrics.retraction_events),
            evaluation_errors: EngineMetrics::load(&metrics.evaluation_errors),
            action_failures: EngineMetrics::load(&metrics.action_failures),
            transactions_committed: EngineMetrics::load(&metrics.transactions_committed),
            transactions_rolled_back: EngineMetrics::load(&metrics.transactions_rolled_back),
            rules_added: EngineMetrics::load(&metrics.rules_added),
            rules_removed: EngineMetrics::load(&metrics.rules_removed),
            total_build_time: Duration::from_nanos(EngineMetrics::load(&metrics.build_time_ns)),
            last_build_time: Duration::from_nanos(EngineMetrics::load(
                &metrics.last_build_time_ns,
            )),
        }
    }
}
