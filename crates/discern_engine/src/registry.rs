//! Sharing registries.
//!
//! A registry interns nodes by sharing key. Lookups take a read lock;
//! creation re-checks under the write lock so that two builders racing on
//! the same key run the factory once and both receive the same node.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use sieve_cache::SieveCache;
use tracing::trace;

use discern_foundation::Result;
use discern_language::canonical::short_digest;

use crate::node::NodeIdx;

/// Canonical string → short digest cache shared by both registries.
pub(crate) struct HashCache {
    /// `None` when the configured capacity is zero.
    cache: Mutex<Option<SieveCache<String, String>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl HashCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(SieveCache::new(capacity).ok()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// `prefix_` followed by the short digest of `canonical`.
    pub fn key(&self, prefix: &str, canonical: &str) -> Arc<str> {
        let owned = canonical.to_string();
        let mut guard = self.cache.lock();
        let cached = guard.as_mut().and_then(|cache| cache.get(&owned).cloned());
        let digest = if let Some(hit) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            hit
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            let digest = short_digest(canonical);
            if let Some(cache) = guard.as_mut() {
                cache.insert(owned, digest.clone());
            }
            digest
        };
        Arc::from(format!("{prefix}_{digest}"))
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Sharing key → node.
#[derive(Debug, Default)]
pub(crate) struct SharingRegistry {
    nodes: RwLock<HashMap<Arc<str>, NodeIdx>>,
}

impl SharingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<NodeIdx> {
        self.nodes.read().get(key).copied()
    }

    /// Returns the node registered under `key`, creating it with `factory`
    /// if there is none. The flag is true when an existing node was reused.
    pub fn get_or_create(
        &self,
        key: &Arc<str>,
        factory: impl FnOnce() -> Result<NodeIdx>,
    ) -> Result<(NodeIdx, bool)> {
        if let Some(idx) = self.get(key) {
            trace!(key = %key, "registry hit");
            return Ok((idx, true));
        }
        let mut nodes = self.nodes.write();
        if let Some(idx) = nodes.get(key) {
            return Ok((*idx, true));
        }
        let idx = factory()?;
        nodes.insert(key.clone(), idx);
        Ok((idx, false))
    }

    /// Registers a node under `key` (used when restoring a removed node).
    pub fn insert(&self, key: Arc<str>, idx: NodeIdx) {
        self.nodes.write().insert(key, idx);
    }

    pub fn remove(&self, key: &str) -> Option<NodeIdx> {
        self.nodes.write().remove(key)
    }
}
