//! Canonical forms, sharing keys and the DNF rewrite.
//!
//! Two expressions that differ only in the order of operands of a
//! commutative operator, or in the grouping of a uniform AND/OR chain,
//! render to the same canonical string and therefore share a node.

use std::sync::Arc;

use discern_foundation::Value;
use sha2::{Digest, Sha256};

use crate::ast::{Expr, LogicalOperator};

/// Length of the hex prefix used in node ids.
pub const SHORT_DIGEST_LEN: usize = 16;

/// Renders the canonical string of an expression.
#[must_use]
pub fn canonical_string(expr: &Expr) -> String {
    match expr {
        Expr::FieldAccess { object, field } => format!("fieldAccess({object},{field})"),
        Expr::Literal(value) => literal_form(value),
        Expr::Variable(name) => format!("variable({name})"),
        Expr::TempRef(temp) => format!("tempResult({})", temp.key),
        Expr::Not(inner) => format!("not({})", canonical_string(inner)),
        Expr::BinaryOp { left, op, right } => {
            let mut l = canonical_string(left);
            let mut r = canonical_string(right);
            if op.is_commutative() && r < l {
                std::mem::swap(&mut l, &mut r);
            }
            format!("binaryOp({l},{},{r})", op.symbol())
        }
        Expr::Logical { first, rest } => {
            if let Some(op) = uniform_op(expr) {
                let mut parts: Vec<String> = flatten(expr, op)
                    .into_iter()
                    .map(canonical_string)
                    .collect();
                parts.sort();
                let tag = match op {
                    LogicalOperator::And => "and",
                    LogicalOperator::Or => "or",
                };
                format!("{tag}([{}])", parts.join(","))
            } else {
                let mut out = format!("logicalExpr({}", canonical_string(first));
                for (op, operand) in rest {
                    out.push(',');
                    out.push_str(op.keyword());
                    out.push(',');
                    out.push_str(&canonical_string(operand));
                }
                out.push(')');
                out
            }
        }
    }
}

fn literal_form(value: &Value) -> String {
    match value {
        Value::Nil => "literal(nil)".to_string(),
        Value::Bool(b) => format!("bool({b})"),
        Value::Int(n) => format!("int({n})"),
        Value::Float(n) => format!("float({n:?})"),
        Value::String(s) => format!("literal(string:{s:?})"),
        Value::Ref(id) => format!("literal(ref:{:?})", id.as_str()),
    }
}

/// The connective of a chain whose connectives are all the same.
#[must_use]
pub fn uniform_op(expr: &Expr) -> Option<LogicalOperator> {
    let Expr::Logical { rest, .. } = expr else {
        return None;
    };
    let op = rest.first()?.0;
    rest.iter().all(|(o, _)| *o == op).then_some(op)
}

/// Operands of nested uniform `op` chains, in source order.
///
/// Anything that is not a uniform `op` chain is a single operand.
#[must_use]
pub fn flatten(expr: &Expr, op: LogicalOperator) -> Vec<&Expr> {
    match expr {
        Expr::Logical { first, rest } if uniform_op(expr) == Some(op) => {
            let mut out = flatten(first, op);
            for (_, operand) in rest {
                out.extend(flatten(operand, op));
            }
            out
        }
        _ => vec![expr],
    }
}

/// Rewrites an expression into the shape its canonical string describes:
/// commutative operands ordered, uniform chains flattened and sorted.
#[must_use]
pub fn normalize(expr: &Expr) -> Expr {
    match expr {
        Expr::BinaryOp { left, op, right } => {
            let mut l = normalize(left);
            let mut r = normalize(right);
            if op.is_commutative() && canonical_string(&r) < canonical_string(&l) {
                std::mem::swap(&mut l, &mut r);
            }
            Expr::binary(l, *op, r)
        }
        Expr::Logical { first, rest } => {
            if let Some(op) = uniform_op(expr) {
                let mut operands: Vec<(String, Expr)> = flatten(expr, op)
                    .into_iter()
                    .map(|e| {
                        let n = normalize(e);
                        (canonical_string(&n), n)
                    })
                    .collect();
                operands.sort_by(|a, b| a.0.cmp(&b.0));
                let operands = operands.into_iter().map(|(_, e)| e).collect();
                rebuild(op, operands)
            } else {
                Expr::Logical {
                    first: Box::new(normalize(first)),
                    rest: rest.iter().map(|(op, e)| (*op, normalize(e))).collect(),
                }
            }
        }
        Expr::Not(inner) => Expr::Not(Box::new(normalize(inner))),
        leaf => leaf.clone(),
    }
}

fn rebuild(op: LogicalOperator, operands: Vec<Expr>) -> Expr {
    let mut iter = operands.into_iter();
    match iter.next() {
        Some(first) => Expr::chain(first, iter.map(|e| (op, e)).collect()),
        None => Expr::Literal(Value::Bool(op == LogicalOperator::And)),
    }
}

/// Full hex SHA-256 of a canonical string.
#[must_use]
pub fn digest(canonical: &str) -> String {
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// The first [`SHORT_DIGEST_LEN`] hex digits of [`digest`].
#[must_use]
pub fn short_digest(canonical: &str) -> String {
    let mut full = digest(canonical);
    full.truncate(SHORT_DIGEST_LEN);
    full
}

/// A node key: `prefix_` followed by the short digest.
#[must_use]
pub fn sharing_key(prefix: &str, canonical: &str) -> Arc<str> {
    Arc::from(format!("{prefix}_{}", short_digest(canonical)))
}

// =============================================================================
// DNF
// =============================================================================

/// Number of non-logical leaves under the connectives of `expr`.
#[must_use]
pub fn leaf_count(expr: &Expr) -> usize {
    match expr {
        Expr::Logical { first, rest } => {
            leaf_count(first) + rest.iter().map(|(_, e)| leaf_count(e)).sum::<usize>()
        }
        _ => 1,
    }
}

/// A conjunction of at least two disjunctions: `(A ∨ B) ∧ (C ∨ D) ∧ ...`.
#[must_use]
pub fn is_dnf_candidate(expr: &Expr) -> bool {
    if uniform_op(expr) != Some(LogicalOperator::And) {
        return false;
    }
    flatten(expr, LogicalOperator::And)
        .into_iter()
        .filter(|e| uniform_op(e) == Some(LogicalOperator::Or))
        .count()
        >= 2
}

/// Distributes a candidate into an OR of ANDs.
///
/// Returns `None` when `expr` is not a candidate or has more than
/// `max_leaves` leaves.
#[must_use]
pub fn to_dnf(expr: &Expr, max_leaves: usize) -> Option<Expr> {
    if !is_dnf_candidate(expr) || leaf_count(expr) > max_leaves {
        return None;
    }
    let groups: Vec<Vec<&Expr>> = flatten(expr, LogicalOperator::And)
        .into_iter()
        .map(|e| flatten(e, LogicalOperator::Or))
        .collect();

    let mut products: Vec<Vec<&Expr>> = vec![Vec::new()];
    for group in &groups {
        let mut next = Vec::with_capacity(products.len() * group.len());
        for product in &products {
            for choice in group {
                let mut extended = product.clone();
                extended.push(*choice);
                next.push(extended);
            }
        }
        products = next;
    }

    let disjuncts = products
        .into_iter()
        .map(|conj| rebuild(LogicalOperator::And, conj.into_iter().cloned().collect()))
        .collect();
    Some(normalize(&rebuild(LogicalOperator::Or, disjuncts)))
}

/// Applies [`to_dnf`] bottom-up wherever a candidate fits under `max_leaves`.
#[must_use]
pub fn rewrite_dnf(expr: &Expr, max_leaves: usize) -> Expr {
    let rewritten = match expr {
        Expr::Logical { first, rest } => Expr::Logical {
            first: Box::new(rewrite_dnf(first, max_leaves)),
            rest: rest
                .iter()
                .map(|(op, e)| (*op, rewrite_dnf(e, max_leaves)))
                .collect(),
        },
        Expr::Not(inner) => Expr::Not(Box::new(rewrite_dnf(inner, max_leaves))),
        other => return other.clone(),
    };
    to_dnf(&rewritten, max_leaves).unwrap_or(rewritten)
}
