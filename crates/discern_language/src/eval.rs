//! Expression evaluation.
//!
//! All arithmetic is carried out on `f64`; integers are promoted and every
//! arithmetic result is a [`Value::Float`]. Ordered comparisons are defined
//! only between numbers. `==` and `!=` compare numbers by value and
//! everything else structurally.

use std::collections::HashMap;
use std::sync::Arc;

use discern_foundation::{Error, ErrorKind, Fact, Result, Type, Value};

use crate::ast::{BinaryOperator, Expr, LogicalOperator};

/// What an expression can see while it is evaluated.
pub trait Environment {
    /// The fact bound to `variable`.
    fn fact(&self, variable: &str) -> Option<&Fact>;

    /// A computed value bound to `variable`, such as an aggregate result.
    fn value(&self, _variable: &str) -> Option<&Value> {
        None
    }

    /// The stored result of a decomposed step.
    fn intermediate(&self, _key: &str) -> Option<&Value> {
        None
    }
}

/// A self-contained [`Environment`].
#[derive(Clone, Debug, Default)]
pub struct EvalContext {
    facts: HashMap<Arc<str>, Fact>,
    values: HashMap<Arc<str>, Value>,
    intermediates: HashMap<Arc<str>, Value>,
}

impl EvalContext {
    /// An empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a fact.
    #[must_use]
    pub fn with_fact(mut self, variable: impl Into<Arc<str>>, fact: Fact) -> Self {
        self.bind_fact(variable, fact);
        self
    }

    /// Binds a fact in place.
    pub fn bind_fact(&mut self, variable: impl Into<Arc<str>>, fact: Fact) {
        self.facts.insert(variable.into(), fact);
    }

    /// Binds a computed value in place.
    pub fn bind_value(&mut self, variable: impl Into<Arc<str>>, value: Value) {
        self.values.insert(variable.into(), value);
    }

    /// Stores a step result.
    pub fn store_intermediate(&mut self, key: impl Into<Arc<str>>, value: Value) {
        self.intermediates.insert(key.into(), value);
    }

    /// Drops every step result.
    pub fn clear_intermediates(&mut self) {
        self.intermediates.clear();
    }
}

impl Environment for EvalContext {
    fn fact(&self, variable: &str) -> Option<&Fact> {
        self.facts.get(variable)
    }

    fn value(&self, variable: &str) -> Option<&Value> {
        self.values.get(variable)
    }

    fn intermediate(&self, key: &str) -> Option<&Value> {
        self.intermediates.get(key)
    }
}

/// Evaluates an expression to a value.
///
/// # Errors
///
/// Returns an evaluation error for division by zero, operand type
/// mismatches and missing fields, and a structural error when a step
/// result is absent.
pub fn evaluate<E: Environment + ?Sized>(expr: &Expr, env: &E) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::FieldAccess { object, field } => {
            let fact = env
                .fact(object)
                .ok_or_else(|| Error::unresolvable_variable(object.as_ref()))?;
            fact.get_field(field).cloned()
        }
        Expr::Variable(name) => env
            .value(name)
            .cloned()
            .or_else(|| env.fact(name).map(|f| Value::Ref(f.internal_id().clone())))
            .ok_or_else(|| Error::unresolvable_variable(name.as_ref())),
        Expr::TempRef(temp) => env
            .intermediate(&temp.key)
            .cloned()
            .ok_or_else(|| Error::missing_dependency(temp.name.as_ref())),
        Expr::BinaryOp { left, op, right } => {
            let l = evaluate(left, env)?;
            let r = evaluate(right, env)?;
            apply(*op, &l, &r)
        }
        Expr::Logical { .. } | Expr::Not(_) => evaluate_predicate(expr, env).map(Value::Bool),
    }
}

/// Evaluates an expression that must produce a boolean.
///
/// # Errors
///
/// As [`evaluate`], plus a type mismatch when the result is not a boolean.
pub fn evaluate_predicate<E: Environment + ?Sized>(expr: &Expr, env: &E) -> Result<bool> {
    match expr {
        Expr::Logical { first, rest } => evaluate_chain(first, rest, env),
        Expr::Not(inner) => Ok(!evaluate_predicate(inner, env)?),
        other => {
            let value = evaluate(other, env)?;
            value
                .as_bool()
                .ok_or_else(|| Error::type_mismatch(Type::Bool, value.value_type()))
        }
    }
}

/// AND binds tighter than OR: the chain is a disjunction of AND groups.
fn evaluate_chain<E: Environment + ?Sized>(
    first: &Expr,
    rest: &[(LogicalOperator, Expr)],
    env: &E,
) -> Result<bool> {
    let mut groups: Vec<Vec<&Expr>> = vec![vec![first]];
    for (op, operand) in rest {
        match op {
            LogicalOperator::Or => groups.push(vec![operand]),
            LogicalOperator::And => {
                if let Some(group) = groups.last_mut() {
                    group.push(operand);
                }
            }
        }
    }
    for group in groups {
        let mut holds = true;
        for operand in group {
            if !evaluate_predicate(operand, env)? {
                holds = false;
                break;
            }
        }
        if holds {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Applies a binary operator to two values.
///
/// # Errors
///
/// Returns [`ErrorKind::DivisionByZero`] for `/` or `%` by zero and a type
/// mismatch for non-numeric arithmetic or ordered comparison operands.
pub fn apply(op: BinaryOperator, left: &Value, right: &Value) -> Result<Value> {
    match op {
        BinaryOperator::Eq => Ok(Value::Bool(left.numeric_eq(right))),
        BinaryOperator::Ne => Ok(Value::Bool(!left.numeric_eq(right))),
        BinaryOperator::Lt | BinaryOperator::Le | BinaryOperator::Gt | BinaryOperator::Ge => {
            let (a, b) = numbers(left, right)?;
            Ok(Value::Bool(match op {
                BinaryOperator::Lt => a < b,
                BinaryOperator::Le => a <= b,
                BinaryOperator::Gt => a > b,
                _ => a >= b,
            }))
        }
        BinaryOperator::Add => numbers(left, right).map(|(a, b)| Value::Float(a + b)),
        BinaryOperator::Sub => numbers(left, right).map(|(a, b)| Value::Float(a - b)),
        BinaryOperator::Mul => numbers(left, right).map(|(a, b)| Value::Float(a * b)),
        BinaryOperator::Div => {
            let (a, b) = numbers(left, right)?;
            if b == 0.0 {
                return Err(Error::new(ErrorKind::DivisionByZero));
            }
            Ok(Value::Float(a / b))
        }
        BinaryOperator::Mod => {
            let (a, b) = numbers(left, right)?;
            let divisor = b.trunc();
            if divisor == 0.0 || divisor.is_nan() {
                return Err(Error::new(ErrorKind::DivisionByZero));
            }
            Ok(Value::Float(a.trunc() % divisor))
        }
    }
}

fn numbers(left: &Value, right: &Value) -> Result<(f64, f64)> {
    let a = left
        .as_number()
        .ok_or_else(|| Error::type_mismatch(Type::Number, left.value_type()))?;
    let b = right
        .as_number()
        .ok_or_else(|| Error::type_mismatch(Type::Number, right.value_type()))?;
    Ok((a, b))
}
