//! Network nodes.
//!
//! Nodes live in an arena owned by [`crate::network::Network`] and refer to
//! each other by [`NodeIdx`]. A node pairs an immutable [`NodeSpec`] (what
//! it computes) with a [`NodeState`] (what it remembers). States are built
//! from persistent collections, so cloning one is O(1); transactions rely
//! on this to snapshot a memory before its first change.

use std::fmt;
use std::sync::Arc;

use im::{HashMap, OrdMap, OrdSet};

use discern_foundation::{FactId, Token, TokenKey};
use discern_language::{ActionCall, AggregateFunction, Expr, TempRef};
use discern_storage::WorkingMemory;

/// Index of a node in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdx(pub(crate) usize);

impl fmt::Display for NodeIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which input of the target an edge feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Port {
    /// Tokens (or the single input of alpha and terminal nodes).
    Left,
    /// Facts from the right-hand alpha chain.
    Right,
}

/// A directed parent → child link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Edge {
    /// The child.
    pub target: NodeIdx,
    /// The child's input.
    pub port: Port,
}

/// Node kinds, as reported by introspection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    /// Entry point of every fact.
    Root,
    /// Per-type filter.
    Type,
    /// Single-fact predicate.
    Alpha,
    /// Two-input join.
    Join,
    /// Negated sub-pattern.
    Not,
    /// Existential sub-pattern.
    Exists,
    /// Aggregation.
    Aggregate,
    /// Rule terminal.
    Terminal,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Root => "root",
            Self::Type => "type",
            Self::Alpha => "alpha",
            Self::Join => "join",
            Self::Not => "not",
            Self::Exists => "exists",
            Self::Aggregate => "aggregate",
            Self::Terminal => "terminal",
        };
        write!(f, "{name}")
    }
}

/// A decomposed arithmetic step carried by an alpha node.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct StepSpec {
    pub result_name: Arc<str>,
    pub result_key: Arc<str>,
    pub dependencies: Vec<TempRef>,
    pub is_final: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct AlphaSpec {
    pub variable: Arc<str>,
    /// `None` for a passthrough node ending an unconstrained chain.
    pub condition: Option<Expr>,
    pub step: Option<StepSpec>,
}

/// Equality conjuncts usable as a hash index on both memories.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct JoinIndex {
    pub left: Vec<Expr>,
    pub right: Vec<Expr>,
}

/// What every two-input node shares.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct BetaSpec {
    /// Variables bound by left tokens.
    pub left_vars: Vec<Arc<str>>,
    /// Variable bound by right facts.
    pub right_var: Arc<str>,
    /// Full test over the combined binding.
    pub condition: Option<Expr>,
    pub index: Option<JoinIndex>,
    /// Whether the left input is the single empty token.
    pub seeded: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct AggregateSpec {
    pub beta: BetaSpec,
    pub function: AggregateFunction,
    pub field: Option<Arc<str>>,
    pub result: Arc<str>,
    pub having: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TerminalSpec {
    pub rule_id: Arc<str>,
    pub rule_name: Arc<str>,
    pub action: ActionCall,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum NodeSpec {
    Root,
    Type { type_name: Arc<str> },
    Alpha(AlphaSpec),
    Join(BetaSpec),
    Not(BetaSpec),
    Exists(BetaSpec),
    Aggregate(AggregateSpec),
    Terminal(TerminalSpec),
}

impl NodeSpec {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Root => NodeKind::Root,
            Self::Type { .. } => NodeKind::Type,
            Self::Alpha(_) => NodeKind::Alpha,
            Self::Join(_) => NodeKind::Join,
            Self::Not(_) => NodeKind::Not,
            Self::Exists(_) => NodeKind::Exists,
            Self::Aggregate(_) => NodeKind::Aggregate,
            Self::Terminal(_) => NodeKind::Terminal,
        }
    }

    pub fn beta(&self) -> Option<&BetaSpec> {
        match self {
            Self::Join(beta) | Self::Not(beta) | Self::Exists(beta) => Some(beta),
            Self::Aggregate(spec) => Some(&spec.beta),
            _ => None,
        }
    }

    /// Printout of the node's test, for introspection.
    pub fn describe(&self) -> String {
        match self {
            Self::Root => "root".to_string(),
            Self::Type { type_name } => type_name.to_string(),
            Self::Alpha(alpha) => match (&alpha.condition, &alpha.step) {
                (None, _) => format!("{}: *", alpha.variable),
                (Some(c), Some(step)) if !step.is_final => format!("{} = {c}", step.result_name),
                (Some(c), _) => c.to_string(),
            },
            Self::Join(beta) | Self::Not(beta) | Self::Exists(beta) => beta
                .condition
                .as_ref()
                .map_or_else(|| format!("* x {}", beta.right_var), ToString::to_string),
            Self::Aggregate(spec) => format!(
                "{} := {}({}.{})",
                spec.result,
                spec.function,
                spec.beta.right_var,
                spec.field.as_deref().unwrap_or("*")
            ),
            Self::Terminal(t) => format!("{}()", t.action.name),
        }
    }
}

/// Left and right memories of a two-input node.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct BetaMemory {
    pub left: WorkingMemory,
    pub right: WorkingMemory,
}

/// Running aggregate for one left token.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct AggregateGroup {
    /// Contributing right facts and the value each contributed.
    pub contributors: OrdMap<FactId, f64>,
    pub sum: f64,
    /// Multiset of contributed values, keyed by their order-preserving bits.
    pub extrema: OrdMap<u64, usize>,
    /// The token currently emitted downstream, if any.
    pub emitted: Option<Token>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum NodeState {
    Stateless,
    Alpha(WorkingMemory),
    Join(BetaMemory),
    /// NOT and EXISTS: matching right facts per left token.
    Quantifier {
        memory: BetaMemory,
        matches: HashMap<TokenKey, OrdSet<FactId>>,
    },
    Aggregate {
        memory: BetaMemory,
        groups: HashMap<TokenKey, AggregateGroup>,
    },
    Terminal(WorkingMemory),
}

impl NodeState {
    pub fn for_spec(spec: &NodeSpec) -> Self {
        match spec {
            NodeSpec::Root | NodeSpec::Type { .. } => Self::Stateless,
            NodeSpec::Alpha(_) => Self::Alpha(WorkingMemory::new()),
            NodeSpec::Join(_) => Self::Join(BetaMemory::default()),
            NodeSpec::Not(_) | NodeSpec::Exists(_) => Self::Quantifier {
                memory: BetaMemory::default(),
                matches: HashMap::new(),
            },
            NodeSpec::Aggregate(_) => Self::Aggregate {
                memory: BetaMemory::default(),
                groups: HashMap::new(),
            },
            NodeSpec::Terminal(_) => Self::Terminal(WorkingMemory::new()),
        }
    }

    /// The memories of this state with the suffix they are stored under.
    pub fn memories(&self) -> Vec<(&'static str, &WorkingMemory)> {
        match self {
            Self::Stateless => Vec::new(),
            Self::Alpha(memory) | Self::Terminal(memory) => vec![("", memory)],
            Self::Join(memory)
            | Self::Quantifier { memory, .. }
            | Self::Aggregate { memory, .. } => {
                vec![(":left", &memory.left), (":right", &memory.right)]
            }
        }
    }

    /// Number of stored entries across all memories.
    pub fn size(&self) -> usize {
        self.memories().iter().map(|(_, m)| m.len()).sum()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Node {
    /// Stable id; for shared nodes this is the sharing key.
    pub id: Arc<str>,
    /// The full signature a shared node was interned under.
    pub signature: Option<Arc<str>>,
    pub spec: Arc<NodeSpec>,
    pub state: NodeState,
    pub children: Vec<Edge>,
    pub parents: Vec<(NodeIdx, Port)>,
}

impl Node {
    pub fn new(id: Arc<str>, spec: NodeSpec) -> Self {
        let state = NodeState::for_spec(&spec);
        Self {
            id,
            signature: None,
            spec: Arc::new(spec),
            state,
            children: Vec::new(),
            parents: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_signature(mut self, signature: &str) -> Self {
        self.signature = Some(Arc::from(signature));
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.spec.kind()
    }
}

/// Maps an `f64` to a `u64` whose unsigned order matches `f64::total_cmp`.
pub(crate) fn order_bits(value: f64) -> u64 {
    let bits = value.to_bits();
    if bits >> 63 == 1 { !bits } else { bits | (1 << 63) }
}

/// Inverse of [`order_bits`].
pub(crate) fn from_order_bits(bits: u64) -> f64 {
    if bits >> 63 == 1 {
        f64::from_bits(bits & !(1 << 63))
    } else {
        f64::from_bits(!bits)
    }
}
