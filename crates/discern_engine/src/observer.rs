//! Action observers: how rule firings leave the engine.
//!
//! The engine never executes actions itself. When a terminal fires, the
//! action's arguments are evaluated against the complete token and the
//! outcome is handed to the registered [`ActionObserver`]. Observers run
//! on the submitting thread while the engine is locked; they may call
//! back into the engine through [`ActionContext::engine`], which queues
//! the request until the current propagation settles.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use discern_foundation::{Token, Value};

use crate::engine::EngineHandle;

/// Where a firing came from.
#[derive(Clone, Debug)]
pub struct ActionContext {
    /// The action the rule calls.
    pub action_name: Arc<str>,
    /// Id of the firing rule.
    pub rule_id: Arc<str>,
    /// Display name of the firing rule.
    pub rule_name: Arc<str>,
    /// The complete match.
    pub token: Token,
    /// Re-entry point into the engine.
    pub engine: EngineHandle,
    /// Wall-clock time of the firing.
    pub timestamp: SystemTime,
}

/// Outcome of one firing.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    /// Whether the arguments evaluated.
    pub success: bool,
    /// Why evaluation failed.
    pub error: Option<String>,
    /// Time spent evaluating the arguments.
    pub duration: Duration,
    /// The firing.
    pub context: ActionContext,
    /// Evaluated arguments, in declaration order.
    pub arguments: Vec<Value>,
}

/// Receives rule firings.
///
/// Implementations must be thread-safe and must not block indefinitely.
pub trait ActionObserver: Send + Sync {
    /// Called once per firing.
    fn on_action_executed(&self, result: &ExecutionResult);

    /// Called when a previously fired match stops holding.
    fn on_activation_retracted(&self, context: &ActionContext) {
        let _ = context;
    }
}

impl<F> ActionObserver for F
where
    F: Fn(&ExecutionResult) + Send + Sync,
{
    fn on_action_executed(&self, result: &ExecutionResult) {
        self(result);
    }
}

/// Ignores everything. The default observer.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl ActionObserver for NoopObserver {
    fn on_action_executed(&self, _result: &ExecutionResult) {}
}

/// Keeps every firing and retraction it sees.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    executed: Mutex<Vec<ExecutionResult>>,
    retracted: Mutex<Vec<ActionContext>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Firings seen so far, oldest first.
    #[must_use]
    pub fn results(&self) -> Vec<ExecutionResult> {
        self.executed.lock().clone()
    }

    /// Retractions seen so far, oldest first.
    #[must_use]
    pub fn retractions(&self) -> Vec<ActionContext> {
        self.retracted.lock().clone()
    }

    /// Number of firings of `rule_id`.
    #[must_use]
    pub fn fired(&self, rule_id: &str) -> usize {
        self.executed
            .lock()
            .iter()
            .filter(|r| r.context.rule_id.as_ref() == rule_id)
            .count()
    }

    /// Number of retractions of `rule_id`.
    #[must_use]
    pub fn retracted(&self, rule_id: &str) -> usize {
        self.retracted
            .lock()
            .iter()
            .filter(|c| c.rule_id.as_ref() == rule_id)
            .count()
    }

    /// Rule ids of all firings, in firing order.
    #[must_use]
    pub fn fired_rules(&self) -> Vec<Arc<str>> {
        self.executed
            .lock()
            .iter()
            .map(|r| r.context.rule_id.clone())
            .collect()
    }

    /// Forgets everything recorded.
    pub fn clear(&self) {
        self.executed.lock().clear();
        self.retracted.lock().clear();
    }
}

impl ActionObserver for RecordingObserver {
    fn on_action_executed(&self, result: &ExecutionResult) {
        self.executed.lock().push(result.clone());
    }

    fn on_activation_retracted(&self, context: &ActionContext) {
        self.retracted.lock().push(context.clone());
    }
}
