//! Per-node working memory.
//!
//! A working memory maps an entry id (a fact's internal id or a token's
//! key) to the entry, keeps insertion order, and optionally maintains a
//! secondary index by join-key value. All collections are persistent so a
//! whole memory can be snapshotted in O(1) and restored on rollback.

use std::sync::Arc;

use im::{HashMap, OrdMap, OrdSet};
use serde::{Deserialize, Serialize};

use discern_foundation::{FactId, Token, Value};

/// An entry stored in a working memory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryEntry {
    /// A fact that passed an alpha node, referenced by id.
    Fact(FactId),
    /// A partial or complete match.
    Token(Token),
}

impl MemoryEntry {
    /// Returns the id this entry is stored under.
    #[must_use]
    pub fn id(&self) -> Arc<str> {
        match self {
            Self::Fact(id) => Arc::from(id.as_str()),
            Self::Token(token) => Arc::from(token.key().as_str()),
        }
    }

    /// Returns true if the entry is, or binds, `fact`.
    #[must_use]
    pub fn contains_fact(&self, fact: &FactId) -> bool {
        match self {
            Self::Fact(id) => id == fact,
            Self::Token(token) => token.contains_fact(fact),
        }
    }

    /// Returns the token if this is a token entry.
    #[must_use]
    pub fn as_token(&self) -> Option<&Token> {
        match self {
            Self::Token(token) => Some(token),
            Self::Fact(_) => None,
        }
    }

    /// Returns the fact id if this is a fact entry.
    #[must_use]
    pub fn as_fact(&self) -> Option<&FactId> {
        match self {
            Self::Fact(id) => Some(id),
            Self::Token(_) => None,
        }
    }
}

impl From<Token> for MemoryEntry {
    fn from(token: Token) -> Self {
        Self::Token(token)
    }
}

impl From<FactId> for MemoryEntry {
    fn from(id: FactId) -> Self {
        Self::Fact(id)
    }
}

/// Composite value of the equality portion of a join condition.
///
/// Numbers are normalized to floats (with `-0.0` folded into `0.0`) so
/// that `1` and `1.0` land in the same bucket.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Serialize, Deserialize)]
pub struct IndexKey(Vec<Value>);

impl IndexKey {
    /// Builds a key from the projected values, normalizing numbers.
    #[must_use]
    pub fn new(parts: Vec<Value>) -> Self {
        Self(parts.into_iter().map(normalize).collect())
    }

    /// Returns the key parts.
    #[must_use]
    pub fn parts(&self) -> &[Value] {
        &self.0
    }
}

fn normalize(value: Value) -> Value {
    match value.as_number() {
        Some(n) if n == 0.0 => Value::Float(0.0),
        Some(n) => Value::Float(n),
        None => value,
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Slot {
    entry: MemoryEntry,
    key: Option<IndexKey>,
}

/// Indexed, insertion-ordered set of facts or tokens owned by one node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkingMemory {
    slots: OrdMap<u64, Slot>,
    positions: HashMap<Arc<str>, u64>,
    index: HashMap<IndexKey, OrdSet<u64>>,
    next_seq: u64,
}

impl WorkingMemory {
    /// Creates an empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry. Returns false if an entry with the same id was
    /// already present (the memory is left unchanged).
    pub fn add(&mut self, entry: impl Into<MemoryEntry>) -> bool {
        self.insert(entry.into(), None)
    }

    /// Adds an entry and files it under `key` in the join index.
    pub fn add_indexed(&mut self, entry: impl Into<MemoryEntry>, key: IndexKey) -> bool {
        self.insert(entry.into(), Some(key))
    }

    fn insert(&mut self, entry: MemoryEntry, key: Option<IndexKey>) -> bool {
        let id = entry.id();
        if self.positions.contains_key(&id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(key) = &key {
            let mut bucket = self.index.get(key).cloned().unwrap_or_default();
            bucket.insert(seq);
            self.index.insert(key.clone(), bucket);
        }
        self.positions.insert(id, seq);
        self.slots.insert(seq, Slot { entry, key });
        true
    }

    /// Removes the entry stored under `id`. Removing an absent id is a no-op.
    pub fn remove(&mut self, id: &str) -> Option<MemoryEntry> {
        let seq = self.positions.remove(id)?;
        self.remove_slot(seq)
    }

    fn remove_slot(&mut self, seq: u64) -> Option<MemoryEntry> {
        let slot = self.slots.remove(&seq)?;
        if let Some(key) = &slot.key {
            let now_empty = match self.index.get_mut(key) {
                Some(bucket) => {
                    bucket.remove(&seq);
                    bucket.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.index.remove(key);
            }
        }
        Some(slot.entry)
    }

    /// Removes every entry matching `predicate`, returning them in
    /// insertion order.
    pub fn remove_where(&mut self, predicate: impl Fn(&MemoryEntry) -> bool) -> Vec<MemoryEntry> {
        let doomed: Vec<(u64, Arc<str>)> = self
            .slots
            .iter()
            .filter(|(_, slot)| predicate(&slot.entry))
            .map(|(seq, slot)| (*seq, slot.entry.id()))
            .collect();
        let mut removed = Vec::with_capacity(doomed.len());
        for (seq, id) in doomed {
            self.positions.remove(&id);
            if let Some(entry) = self.remove_slot(seq) {
                removed.push(entry);
            }
        }
        removed
    }

    /// Removes every entry that is or binds `fact`.
    pub fn remove_containing(&mut self, fact: &FactId) -> Vec<MemoryEntry> {
        self.remove_where(|entry| entry.contains_fact(fact))
    }

    /// Returns the entry stored under `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&MemoryEntry> {
        let seq = self.positions.get(id)?;
        self.slots.get(seq).map(|slot| &slot.entry)
    }

    /// Returns true if an entry is stored under `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    /// Iterates entries in insertion order.
    pub fn all(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.slots.values().map(|slot| &slot.entry)
    }

    /// Iterates token entries in insertion order.
    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.all().filter_map(MemoryEntry::as_token)
    }

    /// Iterates fact entries in insertion order.
    pub fn facts(&self) -> impl Iterator<Item = &FactId> {
        self.all().filter_map(MemoryEntry::as_fact)
    }

    /// Probes the join index: entries filed under `key`, in insertion order.
    pub fn index_by<'a>(&'a self, key: &IndexKey) -> impl Iterator<Item = &'a MemoryEntry> + 'a {
        self.index
            .get(key)
            .into_iter()
            .flat_map(|bucket| bucket.iter())
            .filter_map(move |seq| self.slots.get(seq).map(|slot| &slot.entry))
    }

    /// Returns the index key an entry was filed under.
    #[must_use]
    pub fn key_of(&self, id: &str) -> Option<&IndexKey> {
        let seq = self.positions.get(id)?;
        self.slots.get(seq).and_then(|slot| slot.key.as_ref())
    }

    /// Number of distinct join-key buckets.
    #[must_use]
    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the memory holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}
