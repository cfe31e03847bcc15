//! Arithmetic decomposition into shareable atomic steps.
//!
//! `c.qty * 23 - 10 > 0` becomes
//!
//! ```text
//! temp_1 = c.qty * 23
//! temp_2 = temp_1 - 10
//! temp_3 = temp_2 > 0
//! ```
//!
//! Each step is keyed by the canonical form of its own operation with
//! operand steps replaced by their keys, so structurally identical
//! sub-expressions get the same key in every rule.

use std::sync::Arc;

use crate::ast::{Expr, TempRef};
use crate::canonical::{canonical_string, sharing_key};

/// One atomic step of a decomposed predicate.
#[derive(Clone, Debug, PartialEq)]
pub struct DecomposedCondition {
    /// The operation, with operand steps replaced by [`Expr::TempRef`].
    pub base_condition: Expr,
    /// Rule-local name (`temp_k`).
    pub result_name: Arc<str>,
    /// Structural key under which the result is stored.
    pub result_key: Arc<str>,
    /// Steps whose results this one reads.
    pub dependencies: Vec<TempRef>,
    /// Always true for decomposer output.
    pub is_atomic: bool,
    /// Whether this is the last step, whose truth decides the predicate.
    pub is_final: bool,
}

impl DecomposedCondition {
    /// A reference to this step's result.
    #[must_use]
    pub fn temp_ref(&self) -> TempRef {
        TempRef {
            name: self.result_name.clone(),
            key: self.result_key.clone(),
        }
    }
}

/// Number of binary operators in `expr`, the top-level comparison included.
#[must_use]
pub fn operator_count(expr: &Expr) -> usize {
    let mut count = 0;
    expr.walk(&mut |e| {
        if matches!(e, Expr::BinaryOp { .. }) {
            count += 1;
        }
    });
    count
}

/// Whether `expr` is an operator tree with more than one operator and no
/// logical connectives.
#[must_use]
pub fn should_decompose(expr: &Expr) -> bool {
    let mut logical = false;
    expr.walk(&mut |e| {
        if matches!(e, Expr::Logical { .. } | Expr::Not(_) | Expr::TempRef(_)) {
            logical = true;
        }
    });
    !logical && matches!(expr, Expr::BinaryOp { .. }) && operator_count(expr) > 1
}

/// Decomposes an operator tree into steps in post-order.
///
/// Returns an empty list when the root is not a binary operation.
/// Repeated sub-expressions produce a single step.
#[must_use]
pub fn decompose(expr: &Expr) -> Vec<DecomposedCondition> {
    let mut steps = Vec::new();
    if matches!(expr, Expr::BinaryOp { .. }) {
        visit(expr, &mut steps);
    }
    if let Some(last) = steps.last_mut() {
        last.is_final = true;
    }
    steps
}

fn visit(expr: &Expr, steps: &mut Vec<DecomposedCondition>) -> Expr {
    let Expr::BinaryOp { left, op, right } = expr else {
        return expr.clone();
    };
    let left = visit(left, steps);
    let right = visit(right, steps);
    let dependencies: Vec<TempRef> = [&left, &right]
        .into_iter()
        .filter_map(|operand| match operand {
            Expr::TempRef(temp) => Some(temp.clone()),
            _ => None,
        })
        .collect();
    let base_condition = Expr::binary(left, *op, right);
    let result_key = sharing_key("step", &canonical_string(&base_condition));

    if let Some(existing) = steps.iter().find(|s| s.result_key == result_key) {
        return Expr::TempRef(existing.temp_ref());
    }

    let step = DecomposedCondition {
        base_condition,
        result_name: Arc::from(format!("temp_{}", steps.len() + 1)),
        result_key,
        dependencies,
        is_atomic: true,
        is_final: false,
    };
    let reference = Expr::TempRef(step.temp_ref());
    steps.push(step);
    reference
}
