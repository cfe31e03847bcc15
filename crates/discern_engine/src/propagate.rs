//! Delta propagation.
//!
//! A [`Propagator`] walks one insert or retract through the network,
//! depth-first and in child-link order. Every memory it changes is
//! captured by the transaction before the first change. Terminal
//! activity is collected as [`Activation`]s and delivered by the engine
//! after the walk completes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use im::OrdSet;
use tracing::{trace, warn};

use discern_foundation::{Error, Fact, FactId, Result, Token, Type, Value};
use discern_language::{AggregateFunction, Environment, Expr, evaluate, evaluate_predicate};
use discern_storage::{IndexKey, MemoryEntry, Storage, WorkingMemory};

use crate::env::{FactEnv, Intermediates, TokenEnv};
use crate::metrics::EngineMetrics;
use crate::network::Network;
use crate::node::{
    AggregateGroup, AggregateSpec, BetaMemory, BetaSpec, Edge, NodeIdx, NodeKind, NodeSpec,
    NodeState, Port, TerminalSpec, from_order_bits, order_bits,
};
use crate::transaction::{Transaction, UndoEntry};

// =============================================================================
// Messages
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ActivationKind {
    Fired,
    Retracted,
}

/// Terminal activity waiting for the observer. Action arguments are
/// evaluated when the match fires.
#[derive(Clone, Debug)]
pub(crate) struct Activation {
    pub kind: ActivationKind,
    pub terminal: TerminalSpec,
    pub token: Token,
    pub arguments: Vec<Value>,
    pub error: Option<String>,
    pub duration: Duration,
}

impl Activation {
    fn fired(terminal: &TerminalSpec, token: Token, storage: &dyn Storage) -> Self {
        let started = Instant::now();
        let evaluated = TokenEnv::load(&token, storage).and_then(|env| {
            terminal
                .action
                .args
                .iter()
                .map(|arg| evaluate(arg, &env))
                .collect::<Result<Vec<Value>>>()
        });
        let (arguments, error) = match evaluated {
            Ok(arguments) => (arguments, None),
            Err(error) => (Vec::new(), Some(error.to_string())),
        };
        Self {
            kind: ActivationKind::Fired,
            terminal: terminal.clone(),
            token,
            arguments,
            error,
            duration: started.elapsed(),
        }
    }

    fn retracted(terminal: &TerminalSpec, token: Token) -> Self {
        Self {
            kind: ActivationKind::Retracted,
            terminal: terminal.clone(),
            token,
            arguments: Vec::new(),
            error: None,
            duration: Duration::ZERO,
        }
    }
}

/// What a left eviction removes.
#[derive(Clone, Debug)]
pub(crate) enum Evict {
    /// Every token binding the fact.
    Fact(FactId),
    /// Every token extending the prefix.
    Token(Token),
}

impl Evict {
    fn matches(&self, entry: &MemoryEntry) -> bool {
        match self {
            Self::Fact(fact) => entry.contains_fact(fact),
            Self::Token(prefix) => entry.as_token().is_some_and(|t| t.extends(prefix)),
        }
    }
}

/// Restricts a walk to the part of the network a new rule added.
#[derive(Clone, Debug, Default)]
pub(crate) struct ReplayScope {
    /// Nodes created by the rule.
    pub new_nodes: HashSet<NodeIdx>,
    /// New nodes and all their ancestors.
    pub relevant: HashSet<NodeIdx>,
}

/// How candidates are looked up in the opposite memory.
enum Probe {
    All,
    Bucket(IndexKey),
    Miss,
}

fn index_key(exprs: &[Expr], env: &impl Environment) -> Result<IndexKey> {
    exprs
        .iter()
        .map(|expr| evaluate(expr, env))
        .collect::<Result<Vec<Value>>>()
        .map(IndexKey::new)
}

fn store(memory: &mut WorkingMemory, entry: MemoryEntry, probe: &Probe) -> bool {
    match probe {
        Probe::Bucket(key) => memory.add_indexed(entry, key.clone()),
        Probe::All | Probe::Miss => memory.add(entry),
    }
}

fn candidates<'m>(memory: &'m WorkingMemory, probe: &Probe) -> Vec<&'m MemoryEntry> {
    match probe {
        Probe::All => memory.all().collect(),
        Probe::Bucket(key) => memory.index_by(key).collect(),
        Probe::Miss => Vec::new(),
    }
}

fn beta_memory(state: &NodeState) -> Result<&BetaMemory> {
    match state {
        NodeState::Join(memory)
        | NodeState::Quantifier { memory, .. }
        | NodeState::Aggregate { memory, .. } => Ok(memory),
        _ => Err(Error::internal("expected a two-input node")),
    }
}

fn beta_memory_mut(state: &mut NodeState) -> Result<&mut BetaMemory> {
    match state {
        NodeState::Join(memory)
        | NodeState::Quantifier { memory, .. }
        | NodeState::Aggregate { memory, .. } => Ok(memory),
        _ => Err(Error::internal("expected a two-input node")),
    }
}

fn unexpected(idx: NodeIdx, what: &str) -> Error {
    Error::internal(format!("node {idx} cannot take {what}"))
}

// =============================================================================
// Aggregate Groups
// =============================================================================

impl AggregateGroup {
    fn add(&mut self, fact: FactId, value: f64) {
        if self.contributors.contains_key(&fact) {
            return;
        }
        self.contributors.insert(fact, value);
        self.sum += value;
        let bits = order_bits(value);
        let count = self.extrema.get(&bits).copied().unwrap_or(0);
        self.extrema.insert(bits, count + 1);
    }

    fn remove(&mut self, fact: &FactId) -> bool {
        let Some(value) = self.contributors.remove(fact) else {
            return false;
        };
        self.sum -= value;
        let bits = order_bits(value);
        match self.extrema.get(&bits).copied() {
            Some(count) if count > 1 => {
                self.extrema.insert(bits, count - 1);
            }
            _ => {
                self.extrema.remove(&bits);
            }
        }
        if self.contributors.is_empty() {
            self.sum = 0.0;
        }
        true
    }

    /// Current result; `None` while undefined.
    #[allow(clippy::cast_precision_loss)]
    fn result(&self, function: AggregateFunction) -> Option<Value> {
        let count = self.contributors.len();
        match function {
            AggregateFunction::Count => Some(Value::Int(i64::try_from(count).unwrap_or(i64::MAX))),
            AggregateFunction::Sum => Some(Value::Float(self.sum)),
            AggregateFunction::Avg => (count > 0).then(|| Value::Float(self.sum / count as f64)),
            AggregateFunction::Min => self
                .extrema
                .get_min()
                .map(|(bits, _)| Value::Float(from_order_bits(*bits))),
            AggregateFunction::Max => self
                .extrema
                .get_max()
                .map(|(bits, _)| Value::Float(from_order_bits(*bits))),
        }
    }
}

// =============================================================================
// Propagator
// =============================================================================

pub(crate) struct Propagator<'a> {
    network: &'a mut Network,
    storage: &'a dyn Storage,
    txn: &'a mut Transaction,
    metrics: &'a EngineMetrics,
    activations: &'a mut Vec<Activation>,
    retracting: Option<FactId>,
    replay: Option<ReplayScope>,
}

impl<'a> Propagator<'a> {
    pub fn new(
        network: &'a mut Network,
        storage: &'a dyn Storage,
        txn: &'a mut Transaction,
        metrics: &'a EngineMetrics,
        activations: &'a mut Vec<Activation>,
    ) -> Self {
        Self {
            network,
            storage,
            txn,
            metrics,
            activations,
            retracting: None,
            replay: None,
        }
    }

    /// Limits the walk to `scope`; terminals record silently until
    /// [`Self::fire_all`].
    pub fn with_replay(mut self, scope: ReplayScope) -> Self {
        self.replay = Some(scope);
        self
    }

    // ----- entry points -----

    /// Sends a fact already in storage down from its type node.
    pub fn insert(&mut self, fact: &Fact) -> Result<()> {
        let Some(type_idx) = self.network.type_node(fact.type_name()) else {
            return Ok(());
        };
        if !self.visits(type_idx)? {
            return Ok(());
        }
        trace!(fact = %fact.internal_id(), "insert");
        let intermediates = Intermediates::new();
        for edge in self.children(type_idx)? {
            if self.visits(edge.target)? {
                self.activate_alpha(edge.target, fact, &intermediates)?;
            }
        }
        Ok(())
    }

    /// Evicts a fact everywhere. The fact must still be in storage.
    pub fn retract(&mut self, fact: &FactId) -> Result<()> {
        let Some(type_idx) = self.network.type_node(fact.type_name()) else {
            return Ok(());
        };
        trace!(fact = %fact, "retract");
        self.retracting = Some(fact.clone());
        let result = self.retract_below(type_idx, fact);
        self.retracting = None;
        result
    }

    fn retract_below(&mut self, type_idx: NodeIdx, fact: &FactId) -> Result<()> {
        for edge in self.children(type_idx)? {
            self.evict_alpha(edge.target, fact)?;
        }
        Ok(())
    }

    /// Feeds the empty token to a node with no left parent.
    pub fn seed(&mut self, idx: NodeIdx) -> Result<()> {
        self.activate_left(idx, Token::empty())
    }

    /// Feeds `child` everything `parent` currently emits.
    pub fn replay_outputs(&mut self, parent: NodeIdx, child: NodeIdx) -> Result<()> {
        for token in self.outputs(parent)? {
            self.activate_left(child, token)?;
        }
        Ok(())
    }

    /// Fires every match a terminal holds.
    pub fn fire_all(&mut self, terminal: NodeIdx) -> Result<()> {
        let node = self.network.node(terminal)?;
        let (NodeSpec::Terminal(spec), NodeState::Terminal(memory)) =
            (node.spec.as_ref(), &node.state)
        else {
            return Err(unexpected(terminal, "a replay flush"));
        };
        for token in memory.tokens() {
            self.activations
                .push(Activation::fired(spec, token.clone(), self.storage));
        }
        Ok(())
    }

    // ----- helpers -----

    fn spec(&self, idx: NodeIdx) -> Result<Arc<NodeSpec>> {
        Ok(self.network.node(idx)?.spec.clone())
    }

    fn children(&self, idx: NodeIdx) -> Result<Vec<Edge>> {
        Ok(self.network.node(idx)?.children.clone())
    }

    fn kind(&self, idx: NodeIdx) -> Result<NodeKind> {
        Ok(self.network.node(idx)?.kind())
    }

    fn state(&self, idx: NodeIdx) -> Result<&NodeState> {
        Ok(&self.network.node(idx)?.state)
    }

    /// Mutable state, captured for rollback on first use.
    fn state_mut(&mut self, idx: NodeIdx) -> Result<&mut NodeState> {
        if !self.txn.is_touched(idx) {
            let prior = self.network.node(idx)?.state.clone();
            self.txn.touch(idx);
            self.txn.record(UndoEntry::MemoryTouched { idx, prior })?;
        }
        Ok(&mut self.network.node_mut(idx)?.state)
    }

    fn visits(&self, idx: NodeIdx) -> Result<bool> {
        let Some(scope) = &self.replay else {
            return Ok(true);
        };
        if scope.new_nodes.contains(&idx) {
            return Ok(true);
        }
        Ok(scope.relevant.contains(&idx)
            && matches!(self.kind(idx)?, NodeKind::Alpha | NodeKind::Type))
    }

    /// Whether a passing fact is stored; old nodes already hold theirs.
    fn records(&self, idx: NodeIdx) -> bool {
        self.replay
            .as_ref()
            .is_none_or(|scope| scope.new_nodes.contains(&idx))
    }

    fn is_retracting(&self, fact: &FactId) -> bool {
        self.retracting.as_ref() == Some(fact)
    }

    fn touches_retracting(&self, token: &Token) -> bool {
        self.retracting
            .as_ref()
            .is_some_and(|fact| token.contains_fact(fact))
    }

    /// Logs and counts an evaluation error; anything else aborts.
    fn swallow(&self, idx: NodeIdx, error: Error) -> Result<()> {
        if error.category().aborts_ingestion() {
            return Err(error);
        }
        EngineMetrics::bump(&self.metrics.evaluation_errors);
        let node = self
            .network
            .node(idx)
            .map_or_else(|_| idx.to_string(), |n| n.id.to_string());
        warn!(node = %node, error = %error, "evaluation failed");
        Ok(())
    }

    fn check(&self, idx: NodeIdx, condition: Option<&Expr>, env: &impl Environment) -> Result<bool> {
        let Some(condition) = condition else {
            return Ok(true);
        };
        match evaluate_predicate(condition, env) {
            Ok(passed) => Ok(passed),
            Err(error) => self.swallow(idx, error).map(|()| false),
        }
    }

    fn probe(&self, idx: NodeIdx, exprs: Option<&Vec<Expr>>, env: &impl Environment) -> Result<Probe> {
        let Some(exprs) = exprs else {
            return Ok(Probe::All);
        };
        match index_key(exprs, env) {
            Ok(key) => Ok(Probe::Bucket(key)),
            Err(error) => self.swallow(idx, error).map(|()| Probe::Miss),
        }
    }

    fn right_probe(&self, idx: NodeIdx, beta: &BetaSpec, fact: &Fact) -> Result<Probe> {
        let intermediates = Intermediates::new();
        let env = FactEnv {
            variable: &beta.right_var,
            fact,
            intermediates: &intermediates,
        };
        self.probe(idx, beta.index.as_ref().map(|i| &i.right), &env)
    }

    /// Right facts a left activation should test, minus the one being
    /// retracted.
    fn right_candidates(&self, idx: NodeIdx, probe: &Probe) -> Result<Vec<FactId>> {
        let memory = beta_memory(self.state(idx)?)?;
        Ok(candidates(&memory.right, probe)
            .into_iter()
            .filter_map(MemoryEntry::as_fact)
            .filter(|fact| !self.is_retracting(fact))
            .cloned()
            .collect())
    }

    fn left_candidates(&self, idx: NodeIdx, probe: &Probe) -> Result<Vec<Token>> {
        let memory = beta_memory(self.state(idx)?)?;
        Ok(candidates(&memory.left, probe)
            .into_iter()
            .filter_map(MemoryEntry::as_token)
            .filter(|token| !self.touches_retracting(token))
            .cloned()
            .collect())
    }

    fn store_left(&mut self, idx: NodeIdx, token: &Token, probe: &Probe) -> Result<bool> {
        let memory = beta_memory_mut(self.state_mut(idx)?)?;
        Ok(store(&mut memory.left, token.clone().into(), probe))
    }

    fn store_right(&mut self, idx: NodeIdx, fact: &FactId, probe: &Probe) -> Result<bool> {
        let memory = beta_memory_mut(self.state_mut(idx)?)?;
        Ok(store(&mut memory.right, fact.clone().into(), probe))
    }

    fn remove_right(&mut self, idx: NodeIdx, fact: &FactId) -> Result<bool> {
        if !beta_memory(self.state(idx)?)?.right.contains(fact.as_str()) {
            return Ok(false);
        }
        let memory = beta_memory_mut(self.state_mut(idx)?)?;
        Ok(memory.right.remove(fact.as_str()).is_some())
    }

    /// Tests `condition` with `fact` bound on the right of `env`.
    fn check_pair(
        &self,
        idx: NodeIdx,
        beta: &BetaSpec,
        env: &mut TokenEnv,
        fact: Fact,
    ) -> Result<bool> {
        env.push(beta.right_var.clone(), fact);
        let passed = self.check(idx, beta.condition.as_ref(), &*env);
        env.pop();
        passed
    }

    fn emit(&mut self, idx: NodeIdx, token: Token) -> Result<()> {
        trace!(node = %idx, token = %token, "emit");
        for edge in self.children(idx)? {
            if self.visits(edge.target)? {
                self.activate_left(edge.target, token.clone())?;
            }
        }
        Ok(())
    }

    fn emit_evict(&mut self, idx: NodeIdx, evict: &Evict) -> Result<()> {
        for edge in self.children(idx)? {
            if self.visits(edge.target)? {
                self.evict_left(edge.target, evict)?;
            }
        }
        Ok(())
    }

    // ----- alpha -----

    fn activate_alpha(
        &mut self,
        idx: NodeIdx,
        fact: &Fact,
        intermediates: &Intermediates,
    ) -> Result<()> {
        let spec = self.spec(idx)?;
        let NodeSpec::Alpha(alpha) = spec.as_ref() else {
            return Err(unexpected(idx, "a fact"));
        };
        let mut intermediates = intermediates.clone();
        let outcome = match (&alpha.condition, &alpha.step) {
            (None, _) => Ok(true),
            (Some(condition), Some(step)) if !step.is_final => {
                let value = evaluate(
                    condition,
                    &FactEnv {
                        variable: &alpha.variable,
                        fact,
                        intermediates: &intermediates,
                    },
                );
                value.map(|value| {
                    intermediates.insert(step.result_key.clone(), value);
                    true
                })
            }
            (Some(condition), _) => evaluate_predicate(
                condition,
                &FactEnv {
                    variable: &alpha.variable,
                    fact,
                    intermediates: &intermediates,
                },
            ),
        };
        let passed = match outcome {
            Ok(passed) => passed,
            Err(error) => {
                self.swallow(idx, error)?;
                false
            }
        };
        if !passed {
            return Ok(());
        }

        let id = fact.internal_id();
        if self.records(idx) {
            if let NodeState::Alpha(memory) = self.state_mut(idx)? {
                memory.add(id.clone());
            }
        }
        for edge in self.children(idx)? {
            if !self.visits(edge.target)? {
                continue;
            }
            match (self.kind(edge.target)?, edge.port) {
                (NodeKind::Alpha, _) => self.activate_alpha(edge.target, fact, &intermediates)?,
                (_, Port::Left) => {
                    let token = Token::single(alpha.variable.clone(), id.clone());
                    self.activate_left(edge.target, token)?;
                }
                (_, Port::Right) => self.activate_right(edge.target, fact)?,
            }
        }
        Ok(())
    }

    fn evict_alpha(&mut self, idx: NodeIdx, fact: &FactId) -> Result<()> {
        let held = match self.state(idx)? {
            NodeState::Alpha(memory) => memory.contains(fact.as_str()),
            _ => return Err(unexpected(idx, "a fact eviction")),
        };
        if !held {
            return Ok(());
        }
        if let NodeState::Alpha(memory) = self.state_mut(idx)? {
            memory.remove(fact.as_str());
        }
        for edge in self.children(idx)? {
            match (self.kind(edge.target)?, edge.port) {
                (NodeKind::Alpha, _) => self.evict_alpha(edge.target, fact)?,
                (_, Port::Left) => self.evict_left(edge.target, &Evict::Fact(fact.clone()))?,
                (_, Port::Right) => self.evict_right(edge.target, fact)?,
            }
        }
        Ok(())
    }

    // ----- dispatch -----

    fn activate_left(&mut self, idx: NodeIdx, token: Token) -> Result<()> {
        let spec = self.spec(idx)?;
        match spec.as_ref() {
            NodeSpec::Join(beta) => self.join_left(idx, beta, token),
            NodeSpec::Not(beta) => self.quantifier_left(idx, beta, false, token),
            NodeSpec::Exists(beta) => self.quantifier_left(idx, beta, true, token),
            NodeSpec::Aggregate(aggregate) => self.aggregate_left(idx, aggregate, token),
            NodeSpec::Terminal(terminal) => self.terminal_left(idx, terminal, token),
            _ => Err(unexpected(idx, "a token")),
        }
    }

    fn activate_right(&mut self, idx: NodeIdx, fact: &Fact) -> Result<()> {
        let spec = self.spec(idx)?;
        match spec.as_ref() {
            NodeSpec::Join(beta) => self.join_right(idx, beta, fact),
            NodeSpec::Not(beta) => self.quantifier_right(idx, beta, false, fact),
            NodeSpec::Exists(beta) => self.quantifier_right(idx, beta, true, fact),
            NodeSpec::Aggregate(aggregate) => self.aggregate_right(idx, aggregate, fact),
            _ => Err(unexpected(idx, "a right fact")),
        }
    }

    fn evict_left(&mut self, idx: NodeIdx, evict: &Evict) -> Result<()> {
        let spec = self.spec(idx)?;
        match spec.as_ref() {
            NodeSpec::Join(_) | NodeSpec::Not(_) | NodeSpec::Exists(_) | NodeSpec::Aggregate(_) => {
                self.beta_evict_left(idx, evict)
            }
            NodeSpec::Terminal(terminal) => self.terminal_evict(idx, terminal, evict),
            _ => Err(unexpected(idx, "a token eviction")),
        }
    }

    fn evict_right(&mut self, idx: NodeIdx, fact: &FactId) -> Result<()> {
        let spec = self.spec(idx)?;
        match spec.as_ref() {
            NodeSpec::Join(_) => {
                if self.remove_right(idx, fact)? {
                    self.emit_evict(idx, &Evict::Fact(fact.clone()))?;
                }
                Ok(())
            }
            NodeSpec::Not(_) => self.quantifier_evict_right(idx, false, fact),
            NodeSpec::Exists(_) => self.quantifier_evict_right(idx, true, fact),
            NodeSpec::Aggregate(aggregate) => self.aggregate_evict_right(idx, aggregate, fact),
            _ => Err(unexpected(idx, "a right eviction")),
        }
    }

    /// Left eviction shared by every two-input node.
    fn beta_evict_left(&mut self, idx: NodeIdx, evict: &Evict) -> Result<()> {
        let hit = beta_memory(self.state(idx)?)?
            .left
            .all()
            .any(|entry| evict.matches(entry));
        if !hit {
            return Ok(());
        }
        let state = self.state_mut(idx)?;
        let removed = beta_memory_mut(state)?
            .left
            .remove_where(|entry| evict.matches(entry));
        match state {
            NodeState::Quantifier { matches, .. } => {
                for token in removed.iter().filter_map(MemoryEntry::as_token) {
                    matches.remove(token.key());
                }
            }
            NodeState::Aggregate { groups, .. } => {
                for token in removed.iter().filter_map(MemoryEntry::as_token) {
                    groups.remove(token.key());
                }
            }
            _ => {}
        }
        self.emit_evict(idx, evict)
    }

    // ----- join -----

    fn join_left(&mut self, idx: NodeIdx, beta: &BetaSpec, token: Token) -> Result<()> {
        let mut env = TokenEnv::load(&token, self.storage)?;
        let probe = self.probe(idx, beta.index.as_ref().map(|i| &i.left), &env)?;
        if !self.store_left(idx, &token, &probe)? {
            return Ok(());
        }
        for id in self.right_candidates(idx, &probe)? {
            let Some(fact) = self.storage.get_fact(&id) else {
                continue;
            };
            if self.check_pair(idx, beta, &mut env, fact)? {
                self.emit(idx, token.with_binding(beta.right_var.clone(), id))?;
            }
        }
        Ok(())
    }

    fn join_right(&mut self, idx: NodeIdx, beta: &BetaSpec, fact: &Fact) -> Result<()> {
        let id = fact.internal_id();
        let probe = self.right_probe(idx, beta, fact)?;
        if !self.store_right(idx, id, &probe)? {
            return Ok(());
        }
        for token in self.left_candidates(idx, &probe)? {
            let mut env = TokenEnv::load(&token, self.storage)?;
            if self.check_pair(idx, beta, &mut env, fact.clone())? {
                self.emit(idx, token.with_binding(beta.right_var.clone(), id.clone()))?;
            }
        }
        Ok(())
    }

    // ----- not / exists -----

    fn quantifier_left(
        &mut self,
        idx: NodeIdx,
        beta: &BetaSpec,
        exists: bool,
        token: Token,
    ) -> Result<()> {
        let mut env = TokenEnv::load(&token, self.storage)?;
        let probe = self.probe(idx, beta.index.as_ref().map(|i| &i.left), &env)?;
        if !self.store_left(idx, &token, &probe)? {
            return Ok(());
        }
        let mut matched = OrdSet::new();
        for id in self.right_candidates(idx, &probe)? {
            let Some(fact) = self.storage.get_fact(&id) else {
                continue;
            };
            if self.check_pair(idx, beta, &mut env, fact)? {
                matched.insert(id);
            }
        }
        let satisfied = matched.is_empty() != exists;
        if let NodeState::Quantifier { matches, .. } = self.state_mut(idx)? {
            matches.insert(token.key().clone(), matched);
        }
        if satisfied {
            self.emit(idx, token)?;
        }
        Ok(())
    }

    fn quantifier_right(
        &mut self,
        idx: NodeIdx,
        beta: &BetaSpec,
        exists: bool,
        fact: &Fact,
    ) -> Result<()> {
        let id = fact.internal_id();
        let probe = self.right_probe(idx, beta, fact)?;
        if !self.store_right(idx, id, &probe)? {
            return Ok(());
        }
        for token in self.left_candidates(idx, &probe)? {
            let mut env = TokenEnv::load(&token, self.storage)?;
            if !self.check_pair(idx, beta, &mut env, fact.clone())? {
                continue;
            }
            let first = match self.state_mut(idx)? {
                NodeState::Quantifier { matches, .. } => {
                    let mut set = matches.get(token.key()).cloned().unwrap_or_default();
                    let was_empty = set.is_empty();
                    set.insert(id.clone());
                    matches.insert(token.key().clone(), set);
                    was_empty
                }
                _ => false,
            };
            if !first {
                continue;
            }
            if exists {
                self.emit(idx, token)?;
            } else {
                self.emit_evict(idx, &Evict::Token(token))?;
            }
        }
        Ok(())
    }

    fn quantifier_evict_right(&mut self, idx: NodeIdx, exists: bool, fact: &FactId) -> Result<()> {
        if !self.remove_right(idx, fact)? {
            return Ok(());
        }
        let affected: Vec<Token> = match self.state(idx)? {
            NodeState::Quantifier { memory, matches } => memory
                .left
                .tokens()
                .filter(|t| matches.get(t.key()).is_some_and(|set| set.contains(fact)))
                .cloned()
                .collect(),
            _ => return Err(unexpected(idx, "a quantifier eviction")),
        };
        for token in affected {
            let emptied = match self.state_mut(idx)? {
                NodeState::Quantifier { matches, .. } => {
                    let mut set = matches.get(token.key()).cloned().unwrap_or_default();
                    set.remove(fact);
                    let emptied = set.is_empty();
                    matches.insert(token.key().clone(), set);
                    emptied
                }
                _ => false,
            };
            if !emptied || self.touches_retracting(&token) {
                continue;
            }
            if exists {
                self.emit_evict(idx, &Evict::Token(token))?;
            } else {
                self.emit(idx, token)?;
            }
        }
        Ok(())
    }

    // ----- aggregate -----

    /// The value `fact` contributes; `None` when it has no usable number.
    fn contribution(&self, idx: NodeIdx, spec: &AggregateSpec, fact: &Fact) -> Result<Option<f64>> {
        let field = match (spec.function, &spec.field) {
            (AggregateFunction::Count, _) | (_, None) => return Ok(Some(1.0)),
            (_, Some(field)) => field,
        };
        let value = match fact.get_field(field) {
            Ok(value) => value,
            Err(error) => return self.swallow(idx, error).map(|()| None),
        };
        match value.as_number() {
            Some(number) => Ok(Some(number)),
            None => self
                .swallow(idx, Error::type_mismatch(Type::Number, value.value_type()))
                .map(|()| None),
        }
    }

    fn group(&self, idx: NodeIdx, token: &Token) -> Result<AggregateGroup> {
        match self.state(idx)? {
            NodeState::Aggregate { groups, .. } => {
                Ok(groups.get(token.key()).cloned().unwrap_or_default())
            }
            _ => Err(unexpected(idx, "an aggregate group")),
        }
    }

    /// The token a group emits: the left token plus the result, if the
    /// result is defined and passes `having`.
    fn aggregate_output(
        &self,
        idx: NodeIdx,
        spec: &AggregateSpec,
        token: &Token,
        group: &AggregateGroup,
    ) -> Result<Option<Token>> {
        let Some(value) = group.result(spec.function) else {
            return Ok(None);
        };
        let candidate = token.with_value(spec.result.clone(), value);
        let Some(having) = &spec.having else {
            return Ok(Some(candidate));
        };
        let env = TokenEnv::load(&candidate, self.storage)?;
        Ok(self.check(idx, Some(having), &env)?.then_some(candidate))
    }

    /// Stores a group and replaces its emitted token if it changed.
    fn settle_group(
        &mut self,
        idx: NodeIdx,
        spec: &AggregateSpec,
        token: &Token,
        mut group: AggregateGroup,
    ) -> Result<()> {
        let next = self.aggregate_output(idx, spec, token, &group)?;
        let previous = group.emitted.take();
        group.emitted.clone_from(&next);
        if let NodeState::Aggregate { groups, .. } = self.state_mut(idx)? {
            groups.insert(token.key().clone(), group);
        }
        if previous == next {
            return Ok(());
        }
        if let Some(old) = previous {
            self.emit_evict(idx, &Evict::Token(old))?;
        }
        if let Some(new) = next {
            self.emit(idx, new)?;
        }
        Ok(())
    }

    fn aggregate_left(&mut self, idx: NodeIdx, spec: &AggregateSpec, token: Token) -> Result<()> {
        let beta = &spec.beta;
        let mut env = TokenEnv::load(&token, self.storage)?;
        let probe = self.probe(idx, beta.index.as_ref().map(|i| &i.left), &env)?;
        if !self.store_left(idx, &token, &probe)? {
            return Ok(());
        }
        let mut group = AggregateGroup::default();
        for id in self.right_candidates(idx, &probe)? {
            let Some(fact) = self.storage.get_fact(&id) else {
                continue;
            };
            if !self.check_pair(idx, beta, &mut env, fact.clone())? {
                continue;
            }
            if let Some(value) = self.contribution(idx, spec, &fact)? {
                group.add(id, value);
            }
        }
        self.settle_group(idx, spec, &token, group)
    }

    fn aggregate_right(&mut self, idx: NodeIdx, spec: &AggregateSpec, fact: &Fact) -> Result<()> {
        let beta = &spec.beta;
        let id = fact.internal_id();
        let probe = self.right_probe(idx, beta, fact)?;
        if !self.store_right(idx, id, &probe)? {
            return Ok(());
        }
        let Some(value) = self.contribution(idx, spec, fact)? else {
            return Ok(());
        };
        for token in self.left_candidates(idx, &probe)? {
            let mut env = TokenEnv::load(&token, self.storage)?;
            if !self.check_pair(idx, beta, &mut env, fact.clone())? {
                continue;
            }
            let mut group = self.group(idx, &token)?;
            group.add(id.clone(), value);
            self.settle_group(idx, spec, &token, group)?;
        }
        Ok(())
    }

    fn aggregate_evict_right(
        &mut self,
        idx: NodeIdx,
        spec: &AggregateSpec,
        fact: &FactId,
    ) -> Result<()> {
        if !self.remove_right(idx, fact)? {
            return Ok(());
        }
        let affected: Vec<Token> = match self.state(idx)? {
            NodeState::Aggregate { memory, groups } => memory
                .left
                .tokens()
                .filter(|t| {
                    groups
                        .get(t.key())
                        .is_some_and(|g| g.contributors.contains_key(fact))
                })
                .cloned()
                .collect(),
            _ => return Err(unexpected(idx, "an aggregate eviction")),
        };
        for token in affected {
            if self.touches_retracting(&token) {
                continue;
            }
            let mut group = self.group(idx, &token)?;
            if group.remove(fact) {
                self.settle_group(idx, spec, &token, group)?;
            }
        }
        Ok(())
    }

    // ----- terminal -----

    fn terminal_left(&mut self, idx: NodeIdx, terminal: &TerminalSpec, token: Token) -> Result<()> {
        let added = match self.state_mut(idx)? {
            NodeState::Terminal(memory) => memory.add(token.clone()),
            _ => return Err(unexpected(idx, "a match")),
        };
        if added && self.replay.is_none() {
            trace!(rule = %terminal.rule_id, token = %token, "match");
            self.activations
                .push(Activation::fired(terminal, token, self.storage));
        }
        Ok(())
    }

    fn terminal_evict(&mut self, idx: NodeIdx, terminal: &TerminalSpec, evict: &Evict) -> Result<()> {
        let hit = match self.state(idx)? {
            NodeState::Terminal(memory) => memory.all().any(|entry| evict.matches(entry)),
            _ => return Err(unexpected(idx, "a match eviction")),
        };
        if !hit {
            return Ok(());
        }
        let removed = match self.state_mut(idx)? {
            NodeState::Terminal(memory) => memory.remove_where(|entry| evict.matches(entry)),
            _ => Vec::new(),
        };
        if self.replay.is_some() {
            return Ok(());
        }
        for token in removed.into_iter().filter_map(|entry| match entry {
            MemoryEntry::Token(token) => Some(token),
            MemoryEntry::Fact(_) => None,
        }) {
            self.activations.push(Activation::retracted(terminal, token));
        }
        Ok(())
    }

    // ----- computed outputs -----

    /// Everything a two-input node currently emits, in left-memory order.
    fn outputs(&self, idx: NodeIdx) -> Result<Vec<Token>> {
        let node = self.network.node(idx)?;
        let mut out = Vec::new();
        match (node.spec.as_ref(), &node.state) {
            (NodeSpec::Join(beta), NodeState::Join(memory)) => {
                for token in memory.left.tokens() {
                    let probe = match (&beta.index, memory.left.key_of(token.key().as_str())) {
                        (None, _) => Probe::All,
                        (Some(_), Some(key)) => Probe::Bucket(key.clone()),
                        (Some(_), None) => Probe::Miss,
                    };
                    let mut env = TokenEnv::load(token, self.storage)?;
                    for entry in candidates(&memory.right, &probe) {
                        let Some(id) = entry.as_fact() else {
                            continue;
                        };
                        let Some(fact) = self.storage.get_fact(id) else {
                            continue;
                        };
                        if self.check_pair(idx, beta, &mut env, fact)? {
                            out.push(token.with_binding(beta.right_var.clone(), id.clone()));
                        }
                    }
                }
            }
            (NodeSpec::Not(_) | NodeSpec::Exists(_), NodeState::Quantifier { memory, matches }) => {
                let exists = matches!(node.spec.as_ref(), NodeSpec::Exists(_));
                for token in memory.left.tokens() {
                    let matched = matches.get(token.key()).is_some_and(|set| !set.is_empty());
                    if matched == exists {
                        out.push(token.clone());
                    }
                }
            }
            (NodeSpec::Aggregate(_), NodeState::Aggregate { memory, groups }) => {
                for token in memory.left.tokens() {
                    if let Some(emitted) = groups.get(token.key()).and_then(|g| g.emitted.clone()) {
                        out.push(emitted);
                    }
                }
            }
            _ => return Err(unexpected(idx, "an output replay")),
        }
        Ok(out)
    }
}
