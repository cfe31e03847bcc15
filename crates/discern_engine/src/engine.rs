//! The public engine.
//!
//! [`Engine`] is a cheap, cloneable handle to shared state. Every call
//! takes the ingest lock, runs in the open transaction (or an implicit one
//! of its own), delivers the resulting activations to the observer, and
//! drains any fact operations the observer queued through its
//! [`EngineHandle`] before returning.
//!
//! The ingest lock is re-entrant. Observers run on the submitting thread
//! with the state shared immutably: reads go straight through, fact
//! operations are queued, and anything else fails with `Reentered`.

use std::cell::{RefCell, RefMut};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, instrument, warn};

use discern_foundation::{Error, ErrorCategory, ErrorKind, Fact, FactId, Result, Token};
use discern_language::{Program, ProgramState};
use discern_storage::{InMemoryStorage, Storage};

use crate::config::{EngineConfig, IngestOptions};
use crate::lifecycle::NodeLifecycle;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::network::NodeInfo;
use crate::node::NodeState;
use crate::observer::{ActionContext, ActionObserver, ExecutionResult, NoopObserver};
use crate::propagate::{Activation, ActivationKind};
use crate::state::EngineState;

/// A fact operation queued from inside an observer.
#[derive(Debug)]
enum DeferredOp {
    Submit(Fact),
    Insert(Fact),
    Update(Fact),
    Retract(FactId),
}

struct Shared {
    /// Mutable borrows never outlive a call into engine code; observers
    /// only ever see a shared borrow.
    state: ReentrantMutex<RefCell<EngineState>>,
    deferred: Mutex<VecDeque<DeferredOp>>,
    observer: RwLock<Arc<dyn ActionObserver>>,
}

/// An incremental rule engine.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use discern_engine::{Engine, RecordingObserver};
/// use discern_foundation::{Fact, Type};
/// use discern_language::{ActionCall, ActionDecl, Expr, Program, RuleDecl, TypeDecl};
///
/// let engine = Engine::new();
/// let recorder = Arc::new(RecordingObserver::new());
/// engine.set_observer(recorder.clone());
///
/// engine
///     .ingest_program(
///         &Program::new()
///             .with_type(TypeDecl::new("Person").key("id", Type::String).field("age", Type::Number))
///             .with_action(ActionDecl::new("greet"))
///             .with_rule(
///                 RuleDecl::new("adults", ActionCall::new("greet"))
///                     .bind("p", "Person")
///                     .when(Expr::field("p", "age").gt(18)),
///             ),
///     )
///     .unwrap();
///
/// engine
///     .insert_fact(Fact::new("Person", "ada").with_field("id", "ada").with_field("age", 36))
///     .unwrap();
/// assert_eq!(recorder.fired("adults"), 1);
/// ```
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// A weak re-entry point handed to observers.
///
/// Operations submitted while the engine is busy are queued and applied
/// by the submitting thread, inside its transaction, before that
/// submission returns. Fact operations called on the [`Engine`] itself
/// from inside an observer take the same route.
#[derive(Clone, Debug, Default)]
pub struct EngineHandle {
    shared: Weak<Shared>,
}

impl EngineHandle {
    /// A handle attached to no engine; every operation fails.
    #[must_use]
    pub fn detached() -> Self {
        Self::default()
    }

    /// Queues an insert-or-update.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the engine is gone.
    pub fn submit_fact(&self, fact: Fact) -> Result<()> {
        self.enqueue(DeferredOp::Submit(fact))
    }

    /// Queues an insert.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the engine is gone.
    pub fn insert_fact(&self, fact: Fact) -> Result<()> {
        self.enqueue(DeferredOp::Insert(fact))
    }

    /// Queues an update.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the engine is gone.
    pub fn update_fact(&self, fact: Fact) -> Result<()> {
        self.enqueue(DeferredOp::Update(fact))
    }

    /// Queues a retraction.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the engine is gone.
    pub fn retract_fact(&self, id: FactId) -> Result<()> {
        self.enqueue(DeferredOp::Retract(id))
    }

    fn enqueue(&self, op: DeferredOp) -> Result<()> {
        let shared = self
            .shared
            .upgrade()
            .ok_or_else(|| Error::internal("engine has been dropped"))?;
        shared.deferred.lock().push_back(op);
        Engine { shared }.drain_after_unlock();
        Ok(())
    }
}

impl Engine {
    /// An engine with the default configuration and in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// An engine with in-memory storage.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_storage(config, Box::new(InMemoryStorage::new()))
    }

    /// An engine over a custom storage backend.
    #[must_use]
    pub fn with_storage(config: EngineConfig, storage: Box<dyn Storage>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: ReentrantMutex::new(RefCell::new(EngineState::new(config, storage))),
                deferred: Mutex::new(VecDeque::new()),
                observer: RwLock::new(Arc::new(NoopObserver)),
            }),
        }
    }

    /// Replaces the observer.
    pub fn set_observer(&self, observer: Arc<dyn ActionObserver>) {
        *self.shared.observer.write() = observer;
    }

    /// A weak handle to this engine.
    #[must_use]
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    // =========================================================================
    // Facts
    // =========================================================================

    /// Inserts a new fact or updates the stored fact with the same id.
    ///
    /// # Errors
    ///
    /// Returns a semantic error for a fact that does not match its declared
    /// type, or a transaction error.
    #[instrument(skip(self, fact), fields(fact = %fact.internal_id()))]
    pub fn submit_fact(&self, fact: Fact) -> Result<()> {
        if self.delivering() {
            return self.handle().submit_fact(fact);
        }
        let auto_rollback = self.auto_rollback();
        self.run(auto_rollback, |state| state.submit_fact(&fact))
    }

    /// Inserts a fact.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateFact` if the id is stored, a semantic error for a
    /// fact that does not match its declared type, or a transaction error.
    #[instrument(skip(self, fact), fields(fact = %fact.internal_id()))]
    pub fn insert_fact(&self, fact: Fact) -> Result<()> {
        if self.delivering() {
            return self.handle().insert_fact(fact);
        }
        let auto_rollback = self.auto_rollback();
        self.run(auto_rollback, |state| state.insert_fact(&fact))
    }

    /// Replaces a stored fact.
    ///
    /// # Errors
    ///
    /// Returns `UnknownFact` if no fact has this id, a semantic error for a
    /// fact that does not match its declared type, or a transaction error.
    #[instrument(skip(self, fact), fields(fact = %fact.internal_id()))]
    pub fn update_fact(&self, fact: Fact) -> Result<()> {
        if self.delivering() {
            return self.handle().update_fact(fact);
        }
        let auto_rollback = self.auto_rollback();
        self.run(auto_rollback, |state| state.update_fact(&fact))
    }

    /// Retracts a fact, returning it. From inside an observer the
    /// retraction is queued and the fact as currently stored is returned.
    ///
    /// # Errors
    ///
    /// Returns `UnknownFact` if no fact has this id.
    #[instrument(skip(self), fields(fact = %id))]
    pub fn retract_fact(&self, id: &FactId) -> Result<Fact> {
        if self.delivering() {
            let fact = self.fact(id).ok_or_else(|| Error::unknown_fact(id.clone()))?;
            self.handle().retract_fact(id.clone())?;
            return Ok(fact);
        }
        let auto_rollback = self.auto_rollback();
        self.run(auto_rollback, |state| state.retract_fact(id))
    }

    // =========================================================================
    // Programs and Rules
    // =========================================================================

    /// Validates and applies a program in one step.
    ///
    /// # Errors
    ///
    /// Returns the first validation or application error. The engine is
    /// rolled back to its state before the call unless auto-rollback is
    /// disabled in the configuration.
    pub fn ingest_program(&self, program: &Program) -> Result<()> {
        let options = self.read(|state| IngestOptions::from_config(&state.config));
        self.ingest_program_with(program, options)
    }

    /// As [`Self::ingest_program`] with per-call options. With
    /// `auto_rollback` off, a failed program leaves the transaction open
    /// for the caller to commit or roll back.
    ///
    /// # Errors
    ///
    /// As [`Self::ingest_program`].
    #[instrument(skip(self, program), fields(items = program.items.len()))]
    pub fn ingest_program_with(&self, program: &Program, options: IngestOptions) -> Result<()> {
        self.run(options.auto_rollback, |state| state.ingest(program))
    }

    /// Removes a rule and collects the nodes no other rule uses.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRule` if the rule is not live.
    #[instrument(skip(self))]
    pub fn remove_rule(&self, rule_id: &str) -> Result<()> {
        let auto_rollback = self.auto_rollback();
        self.run(auto_rollback, |state| state.remove_rule(rule_id))
    }

    /// Drops every rule, fact, declaration and stored memory. Counters
    /// survive.
    ///
    /// # Errors
    ///
    /// Returns `TransactionAlreadyActive` inside an explicit transaction.
    #[instrument(skip(self))]
    pub fn reset(&self) -> Result<()> {
        self.run(true, EngineState::reset)
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Opens an explicit transaction; later calls record into it.
    ///
    /// # Errors
    ///
    /// Returns `TransactionAlreadyActive` if one is open.
    #[instrument(skip(self))]
    pub fn begin_transaction(&self) -> Result<()> {
        self.write("begin_transaction", |state| state.begin(true))
    }

    /// Commits the open transaction.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotActive` without one. A commit failing on its
    /// deadline or on storage rolls the transaction back.
    #[instrument(skip(self))]
    pub fn commit(&self) -> Result<()> {
        self.write("commit", |state| {
            if state.txn.is_none() {
                return Err(Error::new(ErrorKind::TransactionNotActive));
            }
            if let Err(error) = state.commit() {
                roll_back(state);
                return Err(error);
            }
            Ok(())
        })
    }

    /// Rolls back the open transaction.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotActive` without one.
    #[instrument(skip(self))]
    pub fn rollback(&self) -> Result<()> {
        self.write("rollback", EngineState::rollback)
    }

    /// Whether a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.read(|state| state.txn.is_some())
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Counters and structural gauges.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.read(|state| MetricsSnapshot::capture(&state.metrics, state.network.gauges()))
    }

    /// Every live node, root first.
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.read(|state| {
            state
                .network
                .iter()
                .map(|(_, node)| state.network.info(node))
                .collect()
        })
    }

    /// The lifecycle record of a node.
    #[must_use]
    pub fn lifecycle(&self, node_id: &str) -> Option<NodeLifecycle> {
        self.read(|state| state.network.lifecycle.get(node_id))
    }

    /// Live rule ids in addition order.
    #[must_use]
    pub fn rule_ids(&self) -> Vec<std::sync::Arc<str>> {
        self.read(|state| state.rules.keys().cloned().collect())
    }

    /// Stored facts in insertion order.
    #[must_use]
    pub fn facts(&self) -> Vec<Fact> {
        self.read(|state| state.storage.all_facts())
    }

    /// A stored fact.
    #[must_use]
    pub fn fact(&self, id: &FactId) -> Option<Fact> {
        self.read(|state| state.storage.get_fact(id))
    }

    /// The accepted declarations.
    #[must_use]
    pub fn program(&self) -> ProgramState {
        self.read(|state| state.program.clone())
    }

    /// Complete matches currently held by a rule's terminal.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRule` if the rule is not live.
    pub fn terminal_matches(&self, rule_id: &str) -> Result<Vec<Token>> {
        self.read(|state| {
            let entry = state
                .rules
                .get(rule_id)
                .ok_or_else(|| Error::unknown_rule(rule_id))?;
            match &state.network.node(entry.terminal)?.state {
                NodeState::Terminal(memory) => Ok(memory.tokens().cloned().collect()),
                _ => Err(Error::internal(format!("rule {rule_id} has no terminal"))),
            }
        })
    }

    /// Node ids with a memory saved in storage.
    #[must_use]
    pub fn stored_memories(&self) -> Vec<String> {
        self.read(|state| state.storage.list_nodes())
    }

    // =========================================================================
    // Execution
    // =========================================================================

    fn read<T>(&self, f: impl FnOnce(&EngineState) -> T) -> T {
        let guard = self.shared.state.lock();
        let state = guard.borrow();
        f(&*state)
    }

    /// Exclusive access for operations that cannot be queued.
    fn write<T>(&self, operation: &str, f: impl FnOnce(&mut EngineState) -> Result<T>) -> Result<T> {
        let guard = self.shared.state.lock();
        let mut state = guard
            .try_borrow_mut()
            .map_err(|_| Error::reentered(operation))?;
        f(&mut *state)
    }

    /// Whether this thread is inside observer delivery.
    fn delivering(&self) -> bool {
        self.shared.state.lock().try_borrow_mut().is_err()
    }

    fn auto_rollback(&self) -> bool {
        self.read(|state| state.config.auto_rollback)
    }

    fn run<T>(
        &self,
        auto_rollback: bool,
        op: impl FnOnce(&mut EngineState) -> Result<T>,
    ) -> Result<T> {
        let result = {
            let guard = self.shared.state.lock();
            self.run_locked(&guard, auto_rollback, op)
        };
        self.drain_after_unlock();
        result
    }

    fn run_locked<T>(
        &self,
        cell: &RefCell<EngineState>,
        auto_rollback: bool,
        op: impl FnOnce(&mut EngineState) -> Result<T>,
    ) -> Result<T> {
        let (implicit, mark, outcome) = {
            let mut state = borrow_mut(cell)?;
            let implicit = state.txn.is_none();
            if implicit {
                state.begin(false)?;
            }
            let mark = state.savepoint()?;
            (implicit, mark, op(&mut *state))
        };
        let outcome = outcome.and_then(|value| self.settle(cell).map(|()| value));

        let mut state = borrow_mut(cell)?;
        let error = match outcome {
            Ok(value) if implicit => match state.commit() {
                Ok(()) => return Ok(value),
                Err(error) => {
                    roll_back(&mut state);
                    return Err(error);
                }
            },
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let fatal = matches!(
            error.kind,
            ErrorKind::FootprintExceeded { .. } | ErrorKind::DeadlineExceeded { .. }
        );
        if fatal || (implicit && auto_rollback) {
            roll_back(&mut state);
        } else if auto_rollback {
            if let Err(undo) = state.rollback_to(mark) {
                warn!(error = %undo, "savepoint rollback failed");
            }
        } else {
            state.keep_open();
        }
        Err(error)
    }

    /// Delivers activations and applies queued operations until neither
    /// produces anything new. The state is only borrowed shared while
    /// observers run.
    fn settle(&self, cell: &RefCell<EngineState>) -> Result<()> {
        loop {
            let activations = {
                let mut state = borrow_mut(cell)?;
                state.check_deadline()?;
                std::mem::take(&mut state.activations)
            };
            {
                let state = cell
                    .try_borrow()
                    .map_err(|_| Error::internal("engine state is exclusively borrowed"))?;
                for activation in activations {
                    self.dispatch(&state, activation);
                }
            }
            let deferred: Vec<DeferredOp> = self.shared.deferred.lock().drain(..).collect();
            let mut state = borrow_mut(cell)?;
            if deferred.is_empty() && state.activations.is_empty() {
                return Ok(());
            }
            for op in deferred {
                apply_deferred(&mut state, op)?;
            }
        }
    }

    fn dispatch(&self, state: &EngineState, activation: Activation) {
        let Activation {
            kind,
            terminal,
            token,
            arguments,
            error,
            duration,
        } = activation;
        let context = ActionContext {
            action_name: terminal.action.name.clone(),
            rule_id: terminal.rule_id.clone(),
            rule_name: terminal.rule_name.clone(),
            token,
            engine: self.handle(),
            timestamp: SystemTime::now(),
        };
        let observer = self.shared.observer.read().clone();

        let delivered = match kind {
            ActivationKind::Fired => {
                EngineMetrics::bump(&state.metrics.activations);
                if error.is_some() {
                    EngineMetrics::bump(&state.metrics.action_failures);
                }
                let result = ExecutionResult {
                    success: error.is_none(),
                    error,
                    duration,
                    context,
                    arguments,
                };
                panic::catch_unwind(AssertUnwindSafe(|| observer.on_action_executed(&result)))
            }
            ActivationKind::Retracted => {
                EngineMetrics::bump(&state.metrics.retraction_events);
                panic::catch_unwind(AssertUnwindSafe(|| {
                    observer.on_activation_retracted(&context);
                }))
            }
        };
        if delivered.is_err() {
            EngineMetrics::bump(&state.metrics.action_failures);
            warn!(rule = %terminal.rule_id, action = %terminal.action.name, "observer panicked");
        }
    }

    /// Applies operations queued while the lock was held elsewhere. During
    /// delivery on this thread the queue is left to the delivering call.
    fn drain_after_unlock(&self) {
        loop {
            if self.shared.deferred.lock().is_empty() {
                return;
            }
            let Some(guard) = self.shared.state.try_lock() else {
                return;
            };
            let Ok(auto_rollback) = guard.try_borrow_mut().map(|state| state.config.auto_rollback)
            else {
                return;
            };
            if let Err(error) = self.run_locked(&guard, auto_rollback, |_| Ok(())) {
                warn!(error = %error, "queued operations failed");
            }
        }
    }
}

fn borrow_mut(cell: &RefCell<EngineState>) -> Result<RefMut<'_, EngineState>> {
    cell.try_borrow_mut()
        .map_err(|_| Error::reentered("a fact or program operation"))
}

fn roll_back(state: &mut EngineState) {
    if let Err(error) = state.rollback() {
        warn!(error = %error, "rollback failed");
    }
}

/// Applies one queued operation. Errors about the fact itself are logged
/// and skipped; anything else aborts the submission.
fn apply_deferred(state: &mut EngineState, op: DeferredOp) -> Result<()> {
    debug!(op = ?op, "applying queued operation");
    let result = match &op {
        DeferredOp::Submit(fact) => state.submit_fact(fact),
        DeferredOp::Insert(fact) => state.insert_fact(fact),
        DeferredOp::Update(fact) => state.update_fact(fact),
        DeferredOp::Retract(id) => state.retract_fact(id).map(|_| ()),
    };
    match result {
        Err(error)
            if matches!(
                error.category(),
                ErrorCategory::Semantic | ErrorCategory::Lifecycle
            ) =>
        {
            warn!(op = ?op, error = %error, "queued operation skipped");
            Ok(())
        }
        other => other,
    }
}
