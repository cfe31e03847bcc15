//! Alpha/beta classification of rule conditions.
//!
//! A top-level conjunction is split into its conjuncts. Each conjunct is
//! classified by the set of object variables it reads: zero or one makes
//! it an alpha predicate, two or more a beta predicate. Conjunctions nested
//! under an OR are never split across the OR.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::ast::{Expr, LogicalOperator};
use crate::canonical::{flatten, uniform_op};

/// A predicate over at most one variable.
#[derive(Clone, Debug, PartialEq)]
pub struct AlphaCondition {
    /// The variable read, or `None` for a constant predicate.
    pub variable: Option<Arc<str>>,
    /// The predicate.
    pub expr: Expr,
}

/// A predicate relating two or more variables.
#[derive(Clone, Debug, PartialEq)]
pub struct BetaCondition {
    /// The variables read.
    pub variables: BTreeSet<Arc<str>>,
    /// The predicate.
    pub expr: Expr,
}

/// Result of [`split_conditions`]. Both lists keep source order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SplitConditions {
    /// Single-variable and constant predicates.
    pub alpha: Vec<AlphaCondition>,
    /// Multi-variable predicates.
    pub beta: Vec<BetaCondition>,
}

impl SplitConditions {
    /// Alpha predicates on `variable`, in source order.
    pub fn alpha_for<'a>(&'a self, variable: &'a str) -> impl Iterator<Item = &'a Expr> + 'a {
        self.alpha
            .iter()
            .filter(move |c| c.variable.as_deref() == Some(variable))
            .map(|c| &c.expr)
    }

    /// Predicates that read no variable.
    pub fn constants(&self) -> impl Iterator<Item = &Expr> {
        self.alpha
            .iter()
            .filter(|c| c.variable.is_none())
            .map(|c| &c.expr)
    }

    /// The beta conjuncts joined back into one predicate.
    #[must_use]
    pub fn residual_beta(&self) -> Option<Expr> {
        Expr::all(self.beta.iter().map(|c| c.expr.clone()).collect())
    }
}

/// The conjuncts of a top-level AND (nested ANDs included); otherwise the
/// expression itself.
#[must_use]
pub fn conjuncts(expr: &Expr) -> Vec<Expr> {
    if uniform_op(expr) == Some(LogicalOperator::And) {
        flatten(expr, LogicalOperator::And)
            .into_iter()
            .cloned()
            .collect()
    } else {
        vec![expr.clone()]
    }
}

/// Every variable an expression reads, as a field-access object or as a
/// bare variable.
#[must_use]
pub fn variables_of(expr: &Expr) -> BTreeSet<Arc<str>> {
    let mut vars = BTreeSet::new();
    expr.walk(&mut |e| match e {
        Expr::FieldAccess { object, .. } => {
            vars.insert(object.clone());
        }
        Expr::Variable(name) => {
            vars.insert(name.clone());
        }
        _ => {}
    });
    vars
}

/// Splits a rule condition into alpha and beta predicates.
#[must_use]
pub fn split_conditions(expr: &Expr) -> SplitConditions {
    let mut out = SplitConditions::default();
    for conjunct in conjuncts(expr) {
        let variables = variables_of(&conjunct);
        if variables.len() <= 1 {
            out.alpha.push(AlphaCondition {
                variable: variables.into_iter().next(),
                expr: conjunct,
            });
        } else {
            out.beta.push(BetaCondition {
                variables,
                expr: conjunct,
            });
        }
    }
    out
}
