//! Field dependency index used to short-circuit updates.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Per type, how many rules read each field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct DeltaIndex {
    reads: HashMap<Arc<str>, HashMap<Arc<str>, usize>>,
}

impl DeltaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one rule's `(type, field)` reads.
    pub fn add(&mut self, reads: &BTreeSet<(Arc<str>, Arc<str>)>) {
        for (type_name, field) in reads {
            *self
                .reads
                .entry(type_name.clone())
                .or_default()
                .entry(field.clone())
                .or_insert(0) += 1;
        }
    }

    /// Removes one rule's reads.
    pub fn remove(&mut self, reads: &BTreeSet<(Arc<str>, Arc<str>)>) {
        for (type_name, field) in reads {
            let Some(fields) = self.reads.get_mut(type_name) else {
                continue;
            };
            if let Some(count) = fields.get_mut(field) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    fields.remove(field);
                }
            }
            if fields.is_empty() {
                self.reads.remove(type_name);
            }
        }
    }

    /// Whether changing `changed` on a fact of `type_name` can change any
    /// rule's outcome.
    pub fn affects(&self, type_name: &str, changed: &[Arc<str>]) -> bool {
        self.reads
            .get(type_name)
            .is_some_and(|fields| changed.iter().any(|f| fields.contains_key(f)))
    }

    /// Recomputes the index from every live rule's reads.
    pub fn rebuild<'a>(
        &mut self,
        rules: impl IntoIterator<Item = &'a BTreeSet<(Arc<str>, Arc<str>)>>,
    ) {
        self.reads.clear();
        for reads in rules {
            self.add(reads);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }
}
