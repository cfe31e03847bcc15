//! Engine configuration.

use std::time::Duration;

/// Default cap on the undo-log footprint: 100 MiB.
pub const DEFAULT_MAX_FOOTPRINT: usize = 100 * 1024 * 1024;

/// Default transaction deadline.
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration threaded through [`crate::Engine::with_config`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Undo-log footprint cap in bytes.
    pub max_transaction_footprint: usize,

    /// Deadline for an open transaction; `None` disables it.
    pub transaction_timeout: Option<Duration>,

    /// Capacity of the canonical-string to sharing-key cache.
    pub hash_cache_capacity: usize,

    /// Rewrite small `(A ∨ B) ∧ (C ∨ D)` conditions into DNF.
    pub enable_dnf: bool,

    /// Leaf ceiling for the DNF rewrite.
    pub dnf_max_leaves: usize,

    /// Order joins by estimated selectivity instead of declaration order.
    pub reorder_joins: bool,

    /// Sort a variable's alpha conditions by canonical form.
    pub normalize_alpha_order: bool,

    /// Skip propagation for updates that touch no predicate field.
    pub optimize_updates: bool,

    /// Save touched node memories to storage on commit.
    pub persist_node_memories: bool,

    /// Roll back automatically when an ingestion step fails.
    pub auto_rollback: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_transaction_footprint: DEFAULT_MAX_FOOTPRINT,
            transaction_timeout: Some(DEFAULT_TRANSACTION_TIMEOUT),
            hash_cache_capacity: 1024,
            enable_dnf: true,
            dnf_max_leaves: 16,
            reorder_joins: true,
            normalize_alpha_order: false,
            optimize_updates: true,
            persist_node_memories: false,
            auto_rollback: true,
        }
    }
}

impl EngineConfig {
    /// The most literal network: no DNF rewrite, declaration-order joins,
    /// every update propagated.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            enable_dnf: false,
            reorder_joins: false,
            optimize_updates: false,
            ..Self::default()
        }
    }

    /// Builder method to set the footprint cap.
    #[must_use]
    pub fn with_max_transaction_footprint(mut self, bytes: usize) -> Self {
        self.max_transaction_footprint = bytes;
        self
    }

    /// Builder method to set the transaction deadline.
    #[must_use]
    pub fn with_transaction_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Builder method to set the hash cache capacity.
    #[must_use]
    pub fn with_hash_cache_capacity(mut self, capacity: usize) -> Self {
        self.hash_cache_capacity = capacity;
        self
    }

    /// Builder method to enable/disable the DNF rewrite.
    #[must_use]
    pub fn with_dnf(mut self, enabled: bool) -> Self {
        self.enable_dnf = enabled;
        self
    }

    /// Builder method to set the DNF leaf ceiling.
    #[must_use]
    pub fn with_dnf_max_leaves(mut self, leaves: usize) -> Self {
        self.dnf_max_leaves = leaves;
        self
    }

    /// Builder method to enable/disable join reordering.
    #[must_use]
    pub fn with_reorder_joins(mut self, enabled: bool) -> Self {
        self.reorder_joins = enabled;
        self
    }

    /// Builder method to enable/disable alpha condition sorting.
    #[must_use]
    pub fn with_normalize_alpha_order(mut self, enabled: bool) -> Self {
        self.normalize_alpha_order = enabled;
        self
    }

    /// Builder method to enable/disable the update short-circuit.
    #[must_use]
    pub fn with_optimize_updates(mut self, enabled: bool) -> Self {
        self.optimize_updates = enabled;
        self
    }

    /// Builder method to enable/disable memory persistence.
    #[must_use]
    pub fn with_persist_node_memories(mut self, enabled: bool) -> Self {
        self.persist_node_memories = enabled;
        self
    }

    /// Builder method to enable/disable auto-rollback.
    #[must_use]
    pub fn with_auto_rollback(mut self, enabled: bool) -> Self {
        self.auto_rollback = enabled;
        self
    }
}

/// Per-call overrides for [`crate::Engine::ingest_program_with`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IngestOptions {
    /// Roll back when the program fails.
    pub auto_rollback: bool,
}

impl IngestOptions {
    /// Options that follow the engine configuration.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            auto_rollback: config.auto_rollback,
        }
    }
}
