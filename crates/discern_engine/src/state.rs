//! Everything the engine guards with its ingest lock.
//!
//! Every mutating method expects an active transaction and records its
//! changes into it. Commit and rollback consume the transaction.

use std::mem;
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use discern_foundation::{Error, ErrorKind, Fact, FactId, Result};
use discern_language::{FactDecl, Item, Program, ProgramState, RuleDecl};
use discern_storage::Storage;

use crate::builder::{self, RuleEntry};
use crate::config::EngineConfig;
use crate::delta::DeltaIndex;
use crate::metrics::EngineMetrics;
use crate::network::Network;
use crate::plan::plan_rule;
use crate::propagate::{Activation, Propagator};
use crate::retro;
use crate::transaction::{Savepoint, Transaction, UndoEntry};

pub(crate) struct EngineState {
    pub config: EngineConfig,
    pub network: Network,
    pub storage: Box<dyn Storage>,
    pub program: ProgramState,
    pub rules: IndexMap<Arc<str>, RuleEntry>,
    pub delta: DeltaIndex,
    pub metrics: EngineMetrics,
    pub txn: Option<Transaction>,
    /// Matches and retractions not yet delivered to the observer.
    pub activations: Vec<Activation>,
    clock: u64,
}

fn not_active() -> Error {
    Error::new(ErrorKind::TransactionNotActive)
}

impl EngineState {
    pub fn new(config: EngineConfig, storage: Box<dyn Storage>) -> Self {
        let clock = storage
            .all_facts()
            .iter()
            .map(Fact::inserted_at)
            .max()
            .unwrap_or(0);
        Self {
            network: Network::new(config.hash_cache_capacity),
            config,
            storage,
            program: ProgramState::new(),
            rules: IndexMap::new(),
            delta: DeltaIndex::new(),
            metrics: EngineMetrics::default(),
            txn: None,
            activations: Vec::new(),
            clock,
        }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// # Errors
    ///
    /// Returns `TransactionAlreadyActive` if one is open.
    pub fn begin(&mut self, explicit: bool) -> Result<()> {
        if self.txn.is_some() {
            return Err(Error::new(ErrorKind::TransactionAlreadyActive));
        }
        debug!(explicit, "transaction started");
        self.txn = Some(Transaction::begin(&self.config, explicit));
        Ok(())
    }

    pub fn in_explicit_transaction(&self) -> bool {
        self.txn.as_ref().is_some_and(Transaction::is_explicit)
    }

    fn txn(&mut self) -> Result<&mut Transaction> {
        self.txn.as_mut().ok_or_else(not_active)
    }

    fn record(&mut self, entry: UndoEntry) -> Result<()> {
        self.txn()?.record(entry)
    }

    /// # Errors
    ///
    /// Returns `TransactionNotActive` without a transaction.
    pub fn savepoint(&mut self) -> Result<Savepoint> {
        self.txn
            .as_mut()
            .map(Transaction::savepoint)
            .ok_or_else(not_active)
    }

    /// # Errors
    ///
    /// Returns `DeadlineExceeded` once the open transaction's timeout has
    /// elapsed.
    pub fn check_deadline(&self) -> Result<()> {
        self.txn
            .as_ref()
            .map_or(Ok(()), Transaction::check_deadline)
    }

    /// Keeps the current transaction open past the call that started it.
    pub fn keep_open(&mut self) {
        if let Some(txn) = self.txn.as_mut() {
            txn.make_explicit();
        }
    }

    /// Persists touched memories if configured, then ends the transaction.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotActive`, `DeadlineExceeded`, or a storage
    /// error; the transaction stays open on error.
    pub fn commit(&mut self) -> Result<()> {
        let txn = self.txn.as_ref().ok_or_else(not_active)?;
        txn.check_deadline()?;
        if self.config.persist_node_memories {
            self.persist()?;
        }
        if let Some(txn) = self.txn.take() {
            info!(
                entries = txn.entries().len(),
                footprint = txn.footprint(),
                "transaction committed"
            );
        }
        EngineMetrics::bump(&self.metrics.transactions_committed);
        Ok(())
    }

    fn persist(&mut self) -> Result<()> {
        let Some(txn) = self.txn.as_ref() else {
            return Ok(());
        };
        let mut touched: Vec<_> = txn.touched().collect();
        touched.sort_unstable();
        for idx in touched {
            let Ok(node) = self.network.node(idx) else {
                continue;
            };
            for (suffix, memory) in node.state.memories() {
                self.storage.save_memory(&format!("{}{suffix}", node.id), memory)?;
            }
        }
        for entry in txn.entries() {
            if let UndoEntry::NodeRemoved(detached) = entry {
                for (suffix, _) in detached.node.state.memories() {
                    self.storage
                        .delete_memory(&format!("{}{suffix}", detached.node.id))?;
                }
            }
        }
        Ok(())
    }

    /// Undoes the whole transaction.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotActive`, or the first storage error met while
    /// undoing; undoing continues past it.
    pub fn rollback(&mut self) -> Result<()> {
        let txn = self.txn.take().ok_or_else(not_active)?;
        let entries = txn.unwind();
        let undone = entries.len();
        let result = self.undo(entries);
        EngineMetrics::bump(&self.metrics.transactions_rolled_back);
        info!(entries = undone, "transaction rolled back");
        result
    }

    /// Undoes everything recorded after `mark`, keeping the transaction.
    ///
    /// # Errors
    ///
    /// As [`Self::rollback`].
    pub fn rollback_to(&mut self, mark: Savepoint) -> Result<()> {
        let entries = self.txn()?.unwind_to(mark);
        debug!(entries = entries.len(), "rolled back to savepoint");
        self.undo(entries)
    }

    fn undo(&mut self, entries: Vec<UndoEntry>) -> Result<()> {
        let mut first_error = None;
        for entry in entries {
            if let Err(error) = self.undo_one(entry) {
                warn!(error = %error, "undo step failed");
                first_error.get_or_insert(error);
            }
        }
        self.activations.clear();
        self.delta.rebuild(self.rules.values().map(|entry| &entry.reads));
        first_error.map_or(Ok(()), Err)
    }

    fn undo_one(&mut self, entry: UndoEntry) -> Result<()> {
        match entry {
            UndoEntry::NodeAdded(idx) => self.network.discard(idx),
            UndoEntry::EdgeAdded {
                parent,
                child,
                port,
            } => self.network.unlink(parent, child, port),
            UndoEntry::RuleReferenceAdded { node_id, rule_id } => {
                self.network
                    .lifecycle
                    .remove_rule_from_node(&node_id, &rule_id)?;
            }
            UndoEntry::RuleReferenceRemoved {
                node_id,
                rule_id,
                rule_name,
                position,
            } => self
                .network
                .lifecycle
                .restore_reference(&node_id, position, &rule_id, &rule_name)?,
            UndoEntry::NodeRemoved(detached) => self.network.reattach(*detached),
            UndoEntry::RuleRegistered(rule_id) => {
                self.rules.shift_remove(&rule_id);
            }
            UndoEntry::RuleUnregistered {
                rule_id,
                entry,
                position,
            } => {
                let position = position.min(self.rules.len());
                self.rules.shift_insert(position, rule_id, *entry);
            }
            UndoEntry::FactInserted(id) => {
                self.storage.remove_fact(&id)?;
            }
            UndoEntry::FactRetracted(fact) | UndoEntry::FactReplaced(fact) => {
                self.storage.add_fact(fact)?;
            }
            UndoEntry::MemoryTouched { idx, prior } => {
                if let Ok(node) = self.network.node_mut(idx) {
                    node.state = prior;
                }
            }
            UndoEntry::ProgramReplaced(prior) => self.program = *prior,
            UndoEntry::StoredMemoryDeleted { node_id, memory } => {
                self.storage.save_memory(&node_id, &memory)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Facts
    // =========================================================================

    /// Checks an API-supplied fact against its declared type.
    fn validate(&self, fact: &Fact) -> Result<Fact> {
        let decl = fact.fields().fold(
            FactDecl::new(fact.type_name()).with_id(fact.user_id()),
            |decl, (name, value)| decl.set(name.clone(), value.clone()),
        );
        self.program.build_fact(&decl)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn propagator(&mut self) -> Result<Propagator<'_>> {
        let txn = self.txn.as_mut().ok_or_else(not_active)?;
        Ok(Propagator::new(
            &mut self.network,
            self.storage.as_ref(),
            txn,
            &self.metrics,
            &mut self.activations,
        ))
    }

    /// Inserts a validated fact that is not yet stored.
    fn insert_validated(&mut self, fact: Fact) -> Result<()> {
        let id = fact.internal_id().clone();
        self.storage.add_fact(fact.clone())?;
        self.record(UndoEntry::FactInserted(id))?;
        EngineMetrics::bump(&self.metrics.facts_inserted);
        self.propagator()?.insert(&fact)
    }

    /// # Errors
    ///
    /// Returns `DuplicateFact` for a stored id, a semantic error for a fact
    /// that does not match its type, or a propagation failure.
    pub fn insert_fact(&mut self, fact: &Fact) -> Result<()> {
        let fact = self.validate(fact)?;
        if self.storage.get_fact(fact.internal_id()).is_some() {
            return Err(Error::new(ErrorKind::DuplicateFact(fact.internal_id().clone())));
        }
        let time = self.tick();
        self.insert_validated(fact.with_insertion_time(time))
    }

    /// # Errors
    ///
    /// Returns `UnknownFact` for an id that is not stored.
    pub fn retract_fact(&mut self, id: &FactId) -> Result<Fact> {
        if self.storage.get_fact(id).is_none() {
            return Err(Error::unknown_fact(id.clone()));
        }
        self.propagator()?.retract(id)?;
        let fact = self
            .storage
            .remove_fact(id)?
            .ok_or_else(|| Error::unknown_fact(id.clone()))?;
        self.record(UndoEntry::FactRetracted(fact.clone()))?;
        EngineMetrics::bump(&self.metrics.facts_retracted);
        Ok(fact)
    }

    /// # Errors
    ///
    /// Returns `UnknownFact` when no fact has the new fact's id, or a
    /// semantic error for a fact that does not match its type.
    pub fn update_fact(&mut self, fact: &Fact) -> Result<()> {
        let fact = self.validate(fact)?;
        self.update_validated(fact)
    }

    fn update_validated(&mut self, fact: Fact) -> Result<()> {
        let id = fact.internal_id().clone();
        let old = self
            .storage
            .get_fact(&id)
            .ok_or_else(|| Error::unknown_fact(id.clone()))?;
        let fact = fact.with_insertion_time(old.inserted_at());
        let changed = old.changed_fields(&fact);
        EngineMetrics::bump(&self.metrics.facts_updated);

        if self.config.optimize_updates && !self.delta.affects(fact.type_name(), &changed) {
            debug!(fact = %id, changed = changed.len(), "update short-circuited");
            self.storage.add_fact(fact)?;
            self.record(UndoEntry::FactReplaced(old))?;
            EngineMetrics::bump(&self.metrics.updates_short_circuited);
            return Ok(());
        }

        self.retract_fact(&id)?;
        self.insert_validated(fact)
    }

    /// Inserts a new fact or updates a stored one.
    ///
    /// # Errors
    ///
    /// As [`Self::insert_fact`] and [`Self::update_fact`].
    pub fn submit_fact(&mut self, fact: &Fact) -> Result<()> {
        let fact = self.validate(fact)?;
        self.upsert(fact)
    }

    fn upsert(&mut self, fact: Fact) -> Result<()> {
        if self.storage.get_fact(fact.internal_id()).is_some() {
            self.update_validated(fact)
        } else {
            let time = self.tick();
            self.insert_validated(fact.with_insertion_time(time))
        }
    }

    // =========================================================================
    // Rules
    // =========================================================================

    /// Builds a validated rule and replays stored facts into it.
    fn add_rule(&mut self, rule: &RuleDecl) -> Result<()> {
        let started = Instant::now();
        let plan = plan_rule(rule, &self.config)?;
        let reads = plan.reads.clone();

        let txn = self.txn.as_mut().ok_or_else(not_active)?;
        let built = builder::build_rule(&mut self.network, txn, rule, plan)?;
        let replay = retro::prepare(&self.network, &built.created, built.entry.terminal)?;
        retro::run(
            replay,
            &mut self.network,
            self.storage.as_ref(),
            txn,
            &self.metrics,
            &mut self.activations,
        )?;

        self.delta.add(&reads);
        self.rules.insert(rule.id.clone(), built.entry);
        self.record(UndoEntry::RuleRegistered(rule.id.clone()))?;

        let elapsed = started.elapsed();
        self.metrics.record_build(elapsed);
        EngineMetrics::bump(&self.metrics.rules_added);
        info!(
            rule = %rule.id,
            created = built.created.len(),
            elapsed_us = elapsed.as_micros(),
            "rule added"
        );
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `UnknownRule` for an id that is not live.
    pub fn remove_rule(&mut self, rule_id: &str) -> Result<()> {
        let Some((position, id, entry)) = self
            .rules
            .get_full(rule_id)
            .map(|(position, id, entry)| (position, id.clone(), entry.clone()))
        else {
            return Err(Error::unknown_rule(rule_id));
        };

        let txn = self.txn.as_mut().ok_or_else(not_active)?;
        let collected = builder::remove_rule(&mut self.network, txn, &id, &entry)?;

        self.rules.shift_remove(&id);
        self.delta.remove(&entry.reads);
        self.record(UndoEntry::RuleUnregistered {
            rule_id: id.clone(),
            entry: Box::new(entry),
            position,
        })?;
        let prior = self.program.clone();
        self.record(UndoEntry::ProgramReplaced(Box::new(prior)))?;
        self.program.unregister_rule(&id);

        EngineMetrics::bump(&self.metrics.rules_removed);
        info!(rule = %id, collected, "rule removed");
        Ok(())
    }

    // =========================================================================
    // Programs
    // =========================================================================

    /// Validates `program` as a whole, then applies it item by item.
    ///
    /// # Errors
    ///
    /// Returns the first validation error before anything changes, or the
    /// first error met while applying.
    pub fn ingest(&mut self, program: &Program) -> Result<()> {
        self.program.validate(program)?;
        let resets = program.items.iter().any(|item| matches!(item, Item::Reset));
        if resets && self.in_explicit_transaction() {
            return Err(Error::new(ErrorKind::TransactionAlreadyActive));
        }

        let prior = self.program.clone();
        self.record(UndoEntry::ProgramReplaced(Box::new(prior)))?;
        for item in &program.items {
            match item {
                Item::Type(decl) => self.program.declare_type(decl)?,
                Item::Action(decl) => self.program.declare_action(decl)?,
                Item::Rule(rule) => {
                    self.program.validate_rule(rule)?;
                    self.program.register_rule(rule.id.clone());
                    self.add_rule(rule)?;
                }
                Item::Fact(decl) => {
                    let fact = self.program.build_fact(decl)?;
                    self.upsert(fact)?;
                }
                Item::Retract(id) => {
                    self.retract_fact(id)?;
                }
                Item::Reset => self.clear()?,
            }
        }
        debug!(items = program.items.len(), "program applied");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `TransactionAlreadyActive` inside an explicit transaction.
    pub fn reset(&mut self) -> Result<()> {
        if self.in_explicit_transaction() {
            return Err(Error::new(ErrorKind::TransactionAlreadyActive));
        }
        self.clear()
    }

    /// Drops every rule, fact, declaration and stored memory.
    fn clear(&mut self) -> Result<()> {
        let rule_ids: Vec<Arc<str>> = self.rules.keys().rev().cloned().collect();
        for rule_id in &rule_ids {
            self.remove_rule(rule_id)?;
        }
        let facts = self.storage.all_facts();
        for fact in &facts {
            self.retract_fact(fact.internal_id())?;
        }
        let prior = mem::take(&mut self.program);
        self.record(UndoEntry::ProgramReplaced(Box::new(prior)))?;
        for node_id in self.storage.list_nodes() {
            if let Some(memory) = self.storage.load_memory(&node_id)? {
                self.storage.delete_memory(&node_id)?;
                self.record(UndoEntry::StoredMemoryDeleted { node_id, memory })?;
            }
        }
        info!(rules = rule_ids.len(), facts = facts.len(), "engine reset");
        Ok(())
    }
}
