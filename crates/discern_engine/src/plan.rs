//! Rule planning: from a validated [`RuleDecl`] to the chains and beta
//! nodes the builder has to materialize.
//!
//! The plan is pure data. It decides condition placement, join order and
//! arithmetic decomposition; the builder only interns what it describes.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use discern_foundation::{Error, ErrorKind, Result};
use discern_language::ast::{AggregateFunction, BinaryOperator, Expr, QuantifierKind, RuleDecl};
use discern_language::canonical::{canonical_string, rewrite_dnf};
use discern_language::split::{BetaCondition, conjuncts, split_conditions, variables_of};
use discern_language::{VarDecl, decompose, should_decompose};

use crate::config::EngineConfig;
use crate::node::{JoinIndex, StepSpec};

/// Selectivity assumed for a variable no conjunct connects to the ones
/// already joined.
const UNCONNECTED: f64 = 1.0;

/// One alpha node to intern.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct AlphaStepPlan {
    pub condition: Expr,
    pub step: Option<StepSpec>,
}

/// The alpha chain of one variable.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ChainPlan {
    pub variable: Arc<str>,
    pub type_name: Arc<str>,
    pub steps: Vec<AlphaStepPlan>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum BetaKindPlan {
    Join,
    Not,
    Exists,
    Aggregate {
        function: AggregateFunction,
        field: Option<Arc<str>>,
        result: Arc<str>,
        having: Option<Expr>,
    },
}

impl BetaKindPlan {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Not => "not",
            Self::Exists => "exists",
            Self::Aggregate { .. } => "aggregate",
        }
    }
}

/// One two-input node to intern, fed on the right by `chain`.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct BetaPlan {
    pub kind: BetaKindPlan,
    pub chain: ChainPlan,
    pub left_vars: Vec<Arc<str>>,
    pub condition: Option<Expr>,
    pub index: Option<JoinIndex>,
    pub seeded: bool,
}

impl BetaPlan {
    pub fn right_var(&self) -> &Arc<str> {
        &self.chain.variable
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RulePlan {
    /// Chain of the first joined variable; `None` when the rule has no
    /// pattern variables.
    pub first: Option<ChainPlan>,
    /// Joins, then quantifiers, then aggregates.
    pub betas: Vec<BetaPlan>,
    /// Every variable of the rule with its type.
    pub var_types: BTreeMap<Arc<str>, Arc<str>>,
    /// `(type, field)` pairs read by any predicate or aggregate.
    pub reads: BTreeSet<(Arc<str>, Arc<str>)>,
}

/// Plans a rule that already passed validation.
///
/// # Errors
///
/// Returns `InvalidCascade` when a multi-variable condition cannot be
/// placed on any join.
pub(crate) fn plan_rule(rule: &RuleDecl, config: &EngineConfig) -> Result<RulePlan> {
    let mut var_types = BTreeMap::new();
    for var in &rule.variables {
        var_types.insert(var.name.clone(), var.type_name.clone());
    }
    for quantifier in &rule.quantifiers {
        var_types.insert(
            quantifier.variable.name.clone(),
            quantifier.variable.type_name.clone(),
        );
    }
    for aggregate in &rule.aggregates {
        var_types.insert(
            aggregate.source.name.clone(),
            aggregate.source.type_name.clone(),
        );
    }

    let split = rule
        .condition
        .as_ref()
        .map(split_conditions)
        .unwrap_or_default();
    let rewrite = |expr: &Expr| {
        if config.enable_dnf {
            rewrite_dnf(expr, config.dnf_max_leaves)
        } else {
            expr.clone()
        }
    };

    let order = join_order(&rule.variables, &split.beta, config.reorder_joins);
    let decls: Vec<&VarDecl> = order.iter().filter_map(|&i| rule.variables.get(i)).collect();
    let ordered: Vec<Arc<str>> = decls.iter().map(|d| d.name.clone()).collect();

    let chain_for = |decl: &VarDecl, extra: &[Expr]| {
        let mut conditions: Vec<Expr> = split.alpha_for(&decl.name).map(rewrite).collect();
        conditions.extend(extra.iter().map(rewrite));
        plan_chain(&decl.name, &decl.type_name, conditions, config)
    };

    let constants: Vec<Expr> = split.constants().cloned().collect();
    let mut betas = Vec::new();
    let first = decls.first().map(|decl| chain_for(decl, &constants));

    let mut pending: Vec<&BetaCondition> = split.beta.iter().collect();
    for (k, decl) in decls.iter().enumerate().skip(1) {
        let available: BTreeSet<Arc<str>> = ordered.iter().take(k + 1).cloned().collect();
        let (here, rest): (Vec<&BetaCondition>, Vec<&BetaCondition>) = pending
            .into_iter()
            .partition(|c| c.variables.is_subset(&available));
        pending = rest;
        let placed: Vec<Expr> = here.iter().map(|c| rewrite(&c.expr)).collect();
        betas.push(beta_plan(
            BetaKindPlan::Join,
            chain_for(decl, &[]),
            ordered.iter().take(k).cloned().collect(),
            placed,
            false,
        ));
    }
    if let Some(stray) = pending.first() {
        return Err(Error::new(ErrorKind::InvalidCascade(format!(
            "condition {} of rule {} reads unbound variables",
            stray.expr, rule.id
        ))));
    }

    for quantifier in &rule.quantifiers {
        let (kind, condition) = match quantifier.kind {
            QuantifierKind::NotExists => (BetaKindPlan::Not, quantifier.condition.clone()),
            QuantifierKind::Exists => (BetaKindPlan::Exists, quantifier.condition.clone()),
            QuantifierKind::ForAll => (
                BetaKindPlan::Not,
                quantifier.condition.clone().map(|c| !c),
            ),
        };
        let variable = &quantifier.variable;
        let (local, residual) = split_local(condition.as_ref(), &variable.name);
        let local: Vec<Expr> = local.iter().map(rewrite).collect();
        let residual: Vec<Expr> = residual.iter().map(rewrite).collect();
        let seeded = first.is_none() && betas.is_empty();
        betas.push(beta_plan(
            kind,
            plan_chain(&variable.name, &variable.type_name, local, config),
            ordered.clone(),
            residual,
            seeded,
        ));
    }

    for aggregate in &rule.aggregates {
        let source = &aggregate.source;
        let (local, residual) = split_local(aggregate.condition.as_ref(), &source.name);
        let local: Vec<Expr> = local.iter().map(rewrite).collect();
        let residual: Vec<Expr> = residual.iter().map(rewrite).collect();
        let seeded = first.is_none() && betas.is_empty();
        betas.push(beta_plan(
            BetaKindPlan::Aggregate {
                function: aggregate.function,
                field: aggregate.field.clone(),
                result: aggregate.result.clone(),
                having: aggregate.having.clone(),
            },
            plan_chain(&source.name, &source.type_name, local, config),
            ordered.clone(),
            residual,
            seeded,
        ));
    }

    let reads = field_reads(rule, &var_types);
    Ok(RulePlan {
        first,
        betas,
        var_types,
        reads,
    })
}

fn beta_plan(
    kind: BetaKindPlan,
    chain: ChainPlan,
    left_vars: Vec<Arc<str>>,
    conditions: Vec<Expr>,
    seeded: bool,
) -> BetaPlan {
    let index = extract_index(&conditions, &chain.variable);
    BetaPlan {
        kind,
        chain,
        left_vars,
        condition: Expr::all(conditions),
        index,
        seeded,
    }
}

/// Turns a variable's conditions into alpha steps, decomposing arithmetic.
pub(crate) fn plan_chain(
    variable: &Arc<str>,
    type_name: &Arc<str>,
    mut conditions: Vec<Expr>,
    config: &EngineConfig,
) -> ChainPlan {
    if config.normalize_alpha_order {
        conditions.sort_by_cached_key(canonical_string);
    }
    let mut steps = Vec::new();
    let mut produced = HashSet::new();
    for condition in conditions {
        if !should_decompose(&condition) {
            steps.push(AlphaStepPlan {
                condition,
                step: None,
            });
            continue;
        }
        for part in decompose(&condition) {
            if !part.is_final && !produced.insert(part.result_key.clone()) {
                continue;
            }
            steps.push(AlphaStepPlan {
                condition: part.base_condition,
                step: Some(StepSpec {
                    result_name: part.result_name,
                    result_key: part.result_key,
                    dependencies: part.dependencies,
                    is_final: part.is_final,
                }),
            });
        }
    }
    ChainPlan {
        variable: variable.clone(),
        type_name: type_name.clone(),
        steps,
    }
}

/// Conjuncts readable from the quantified variable alone, and the rest.
fn split_local(condition: Option<&Expr>, variable: &str) -> (Vec<Expr>, Vec<Expr>) {
    let mut local = Vec::new();
    let mut residual = Vec::new();
    for conjunct in condition.map(conjuncts).unwrap_or_default() {
        let vars = variables_of(&conjunct);
        if vars.iter().all(|v| v.as_ref() == variable) {
            local.push(conjunct);
        } else {
            residual.push(conjunct);
        }
    }
    (local, residual)
}

fn selectivity(expr: &Expr) -> f64 {
    match expr {
        Expr::BinaryOp {
            op: BinaryOperator::Eq,
            ..
        } => 0.1,
        Expr::BinaryOp { op, .. } if op.is_comparison() => 0.3,
        _ => 0.5,
    }
}

/// Join order as indexes into `variables`. The first declared variable
/// always leads; the rest follow by the selectivity of the conjuncts that
/// connect them to what is already joined, ties broken by declaration.
pub(crate) fn join_order(
    variables: &[VarDecl],
    beta: &[BetaCondition],
    reorder: bool,
) -> Vec<usize> {
    if !reorder || variables.len() < 3 {
        return (0..variables.len()).collect();
    }
    let mut order = vec![0];
    let mut placed: BTreeSet<Arc<str>> = BTreeSet::from([variables[0].name.clone()]);
    let mut remaining: Vec<usize> = (1..variables.len()).collect();
    while !remaining.is_empty() {
        let mut best = 0;
        let mut best_score = f64::INFINITY;
        for (pos, &candidate) in remaining.iter().enumerate() {
            let name = &variables[candidate].name;
            let score = beta
                .iter()
                .filter(|c| {
                    c.variables.contains(name)
                        && c.variables.iter().all(|v| v == name || placed.contains(v))
                })
                .map(|c| selectivity(&c.expr))
                .fold(UNCONNECTED, f64::min);
            if score < best_score {
                best = pos;
                best_score = score;
            }
        }
        let chosen = remaining.remove(best);
        placed.insert(variables[chosen].name.clone());
        order.push(chosen);
    }
    order
}

/// Equality conjuncts between the left variables and the right variable.
pub(crate) fn extract_index(conditions: &[Expr], right_var: &str) -> Option<JoinIndex> {
    let is_right =
        |vars: &BTreeSet<Arc<str>>| vars.len() == 1 && vars.iter().all(|v| v.as_ref() == right_var);
    let is_left =
        |vars: &BTreeSet<Arc<str>>| !vars.is_empty() && vars.iter().all(|v| v.as_ref() != right_var);

    let mut left = Vec::new();
    let mut right = Vec::new();
    for condition in conditions {
        let Expr::BinaryOp {
            left: a,
            op: BinaryOperator::Eq,
            right: b,
        } = condition
        else {
            continue;
        };
        let (va, vb) = (variables_of(a), variables_of(b));
        if is_left(&va) && is_right(&vb) {
            left.push(a.as_ref().clone());
            right.push(b.as_ref().clone());
        } else if is_right(&va) && is_left(&vb) {
            left.push(b.as_ref().clone());
            right.push(a.as_ref().clone());
        }
    }
    (!left.is_empty()).then_some(JoinIndex { left, right })
}

fn field_reads(
    rule: &RuleDecl,
    var_types: &BTreeMap<Arc<str>, Arc<str>>,
) -> BTreeSet<(Arc<str>, Arc<str>)> {
    let mut reads = BTreeSet::new();
    let mut collect = |expr: &Expr| {
        for (object, field) in expr.field_accesses() {
            if let Some(ty) = var_types.get(&object) {
                reads.insert((ty.clone(), field));
            }
        }
    };
    if let Some(condition) = &rule.condition {
        collect(condition);
    }
    for quantifier in &rule.quantifiers {
        if let Some(condition) = &quantifier.condition {
            collect(condition);
        }
    }
    for aggregate in &rule.aggregates {
        if let Some(condition) = &aggregate.condition {
            collect(condition);
        }
    }
    for aggregate in &rule.aggregates {
        if let Some(field) = &aggregate.field {
            reads.insert((aggregate.source.type_name.clone(), field.clone()));
        }
    }
    reads
}
