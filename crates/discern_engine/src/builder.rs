//! Network construction and teardown for one rule.
//!
//! Building interns every node of a [`RulePlan`] through the sharing
//! registries, links it, and records one lifecycle reference per node.
//! Every step is written to the transaction so a failed build unwinds
//! cleanly. Removal walks the rule's nodes in reverse build order and
//! collects those whose reference count reaches zero.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, trace};

use discern_foundation::{Error, ErrorKind, Result};
use discern_language::RuleDecl;
use discern_language::canonical::canonical_string;

use crate::network::Network;
use crate::node::{
    AggregateSpec, AlphaSpec, BetaSpec, Node, NodeIdx, NodeKind, NodeSpec, Port, TerminalSpec,
};
use crate::plan::{AlphaStepPlan, BetaKindPlan, BetaPlan, ChainPlan, RulePlan};
use crate::transaction::{Transaction, UndoEntry};

/// Version tag mixed into every beta signature.
const SIGNATURE_VERSION: u32 = 1;

/// What the engine keeps per live rule.
#[derive(Clone, Debug)]
pub(crate) struct RuleEntry {
    pub decl: RuleDecl,
    /// Referenced nodes in build order.
    pub nodes: Vec<NodeIdx>,
    pub terminal: NodeIdx,
    /// `(type, field)` pairs the rule reads.
    pub reads: BTreeSet<(Arc<str>, Arc<str>)>,
}

/// Result of [`build_rule`].
#[derive(Debug)]
pub(crate) struct Built {
    pub entry: RuleEntry,
    /// Nodes this build created, in creation order.
    pub created: Vec<NodeIdx>,
}

struct Builder<'a> {
    network: &'a mut Network,
    txn: &'a mut Transaction,
    rule_id: Arc<str>,
    rule_name: Arc<str>,
    nodes: Vec<NodeIdx>,
    created: Vec<NodeIdx>,
}

/// Materializes `plan` for `rule`.
///
/// # Errors
///
/// Returns transaction limit errors, or an internal error if the arena is
/// inconsistent.
pub(crate) fn build_rule(
    network: &mut Network,
    txn: &mut Transaction,
    rule: &RuleDecl,
    plan: RulePlan,
) -> Result<Built> {
    let mut builder = Builder {
        network,
        txn,
        rule_id: rule.id.clone(),
        rule_name: Arc::from(rule.display_name()),
        nodes: Vec::new(),
        created: Vec::new(),
    };

    let mut tail = match &plan.first {
        Some(chain) => Some(builder.chain(chain)?),
        None => None,
    };
    for beta in &plan.betas {
        tail = Some(builder.beta(beta, tail)?);
    }
    let Some(tail) = tail else {
        return Err(Error::new(ErrorKind::InvalidCascade(format!(
            "rule {} has no pattern to attach to",
            rule.id
        ))));
    };
    let terminal = builder.terminal(rule, tail)?;

    debug!(
        rule = %rule.id,
        nodes = builder.nodes.len(),
        created = builder.created.len(),
        "rule built"
    );
    Ok(Built {
        entry: RuleEntry {
            decl: rule.clone(),
            nodes: builder.nodes,
            terminal,
            reads: plan.reads,
        },
        created: builder.created,
    })
}

impl Builder<'_> {
    fn record(&mut self, entry: UndoEntry) -> Result<()> {
        self.txn.record(entry)
    }

    fn created(&mut self, idx: NodeIdx) -> Result<()> {
        self.created.push(idx);
        self.record(UndoEntry::NodeAdded(idx))
    }

    fn link(&mut self, parent: NodeIdx, child: NodeIdx, port: Port) -> Result<()> {
        if self.network.link(parent, child, port)? {
            self.record(UndoEntry::EdgeAdded {
                parent,
                child,
                port,
            })?;
        }
        Ok(())
    }

    /// Adds this rule's reference to a node, once.
    fn reference(&mut self, idx: NodeIdx) -> Result<()> {
        let node_id = self.network.node(idx)?.id.clone();
        let added = self
            .network
            .lifecycle
            .add_rule_reference(&node_id, &self.rule_id, &self.rule_name)?;
        if added {
            self.nodes.push(idx);
            self.record(UndoEntry::RuleReferenceAdded {
                node_id,
                rule_id: self.rule_id.clone(),
            })?;
        }
        Ok(())
    }

    fn type_node(&mut self, type_name: &Arc<str>) -> Result<NodeIdx> {
        let idx = match self.network.type_node(type_name) {
            Some(idx) => idx,
            None => {
                let id: Arc<str> = Arc::from(format!("type_{type_name}"));
                let idx = self.network.push(Node::new(
                    id,
                    NodeSpec::Type {
                        type_name: type_name.clone(),
                    },
                ));
                self.created(idx)?;
                let root = self.network.root();
                self.link(root, idx, Port::Left)?;
                idx
            }
        };
        self.reference(idx)?;
        Ok(idx)
    }

    fn intern(&mut self, id: &Arc<str>, signature: &str, spec: NodeSpec) -> Result<NodeIdx> {
        let (idx, reused) = self.network.intern(id, signature, spec)?;
        if reused {
            trace!(node = %id, "shared");
        } else {
            self.created(idx)?;
        }
        Ok(idx)
    }

    /// Interns a variable's alpha chain and returns its last node. A chain
    /// without conditions ends in a passthrough node.
    fn chain(&mut self, chain: &ChainPlan) -> Result<NodeIdx> {
        let mut parent = self.type_node(&chain.type_name)?;
        let steps: Vec<Option<&AlphaStepPlan>> = if chain.steps.is_empty() {
            vec![None]
        } else {
            chain.steps.iter().map(Some).collect()
        };
        for step in steps {
            let parent_id = self.network.node(parent)?.id.clone();
            let (canonical, role, spec) = match step {
                None => (
                    String::new(),
                    "*".to_string(),
                    AlphaSpec {
                        variable: chain.variable.clone(),
                        condition: None,
                        step: None,
                    },
                ),
                Some(step) => {
                    let role = match &step.step {
                        Some(s) if !s.is_final => format!("step:{}", s.result_key),
                        _ => "test".to_string(),
                    };
                    (
                        canonical_string(&step.condition),
                        role,
                        AlphaSpec {
                            variable: chain.variable.clone(),
                            condition: Some(step.condition.clone()),
                            step: step.step.clone(),
                        },
                    )
                }
            };
            let signature = format!("{parent_id}|{}|{canonical}|{role}", chain.variable);
            let id = self.network.cache.key("alpha", &signature);
            let idx = self.intern(&id, &signature, NodeSpec::Alpha(spec))?;
            self.link(parent, idx, Port::Left)?;
            self.reference(idx)?;
            parent = idx;
        }
        Ok(parent)
    }

    fn beta(&mut self, plan: &BetaPlan, left: Option<NodeIdx>) -> Result<NodeIdx> {
        let right = self.chain(&plan.chain)?;
        let left = if plan.seeded { None } else { left };
        let left_id = match left {
            Some(idx) => self.network.node(idx)?.id.to_string(),
            None => "seed".to_string(),
        };
        let right_id = self.network.node(right)?.id.clone();

        let mut left_vars: Vec<&str> = plan.left_vars.iter().map(AsRef::as_ref).collect();
        left_vars.sort_unstable();
        let condition = plan
            .condition
            .as_ref()
            .map_or_else(|| "*".to_string(), canonical_string);
        let mut signature = format!(
            "version={SIGNATURE_VERSION}|kind={}|left={left_id}|right={right_id}|vars={}|rv={}|cond={condition}",
            plan.kind.prefix(),
            left_vars.join(","),
            plan.right_var(),
        );

        let beta = BetaSpec {
            left_vars: plan.left_vars.clone(),
            right_var: plan.right_var().clone(),
            condition: plan.condition.clone(),
            index: plan.index.clone(),
            seeded: plan.seeded,
        };
        let spec = match &plan.kind {
            BetaKindPlan::Join => NodeSpec::Join(beta),
            BetaKindPlan::Not => NodeSpec::Not(beta),
            BetaKindPlan::Exists => NodeSpec::Exists(beta),
            BetaKindPlan::Aggregate {
                function,
                field,
                result,
                having,
            } => {
                signature.push_str(&format!(
                    "|fn={function}|field={}|result={result}|having={}",
                    field.as_deref().unwrap_or("*"),
                    having
                        .as_ref()
                        .map_or_else(|| "*".to_string(), canonical_string)
                ));
                NodeSpec::Aggregate(AggregateSpec {
                    beta,
                    function: *function,
                    field: field.clone(),
                    result: result.clone(),
                    having: having.clone(),
                })
            }
        };

        let id = self.network.cache.key(plan.kind.prefix(), &signature);
        let idx = self.intern(&id, &signature, spec)?;
        if let Some(left) = left {
            self.link(left, idx, Port::Left)?;
        }
        self.link(right, idx, Port::Right)?;
        self.reference(idx)?;
        Ok(idx)
    }

    fn terminal(&mut self, rule: &RuleDecl, parent: NodeIdx) -> Result<NodeIdx> {
        let id: Arc<str> = Arc::from(format!("terminal_{}", rule.id));
        let idx = self.network.push(Node::new(
            id,
            NodeSpec::Terminal(TerminalSpec {
                rule_id: rule.id.clone(),
                rule_name: self.rule_name.clone(),
                action: rule.action.clone(),
            }),
        ));
        self.created(idx)?;
        self.link(parent, idx, Port::Left)?;
        self.reference(idx)?;
        Ok(idx)
    }
}

/// Drops `entry`'s references and collects every node left unreferenced.
///
/// # Errors
///
/// Returns transaction limit errors, or `InvalidCascade` if a collected
/// node still has children.
pub(crate) fn remove_rule(
    network: &mut Network,
    txn: &mut Transaction,
    rule_id: &Arc<str>,
    entry: &RuleEntry,
) -> Result<usize> {
    let mut collected = 0;
    for &idx in entry.nodes.iter().rev() {
        let Ok(node) = network.node(idx) else {
            continue;
        };
        let node_id = node.id.clone();
        let kind = node.kind();
        let Some((position, rule_name)) = network.lifecycle.reference(&node_id, rule_id) else {
            continue;
        };
        let emptied = network.lifecycle.remove_rule_from_node(&node_id, rule_id)?;
        txn.record(UndoEntry::RuleReferenceRemoved {
            node_id: node_id.clone(),
            rule_id: rule_id.clone(),
            rule_name,
            position,
        })?;
        if emptied && kind != NodeKind::Root {
            let detached = network.detach(idx)?;
            trace!(node = %node_id, "collected");
            collected += 1;
            txn.record(UndoEntry::NodeRemoved(Box::new(detached)))?;
        }
    }
    debug!(rule = %rule_id, collected, "rule removed");
    Ok(collected)
}
