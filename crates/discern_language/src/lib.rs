//! Rule language model and static analysis for Discern.
//!
//! This crate provides:
//! - [`ast`] - Typed rule AST: expressions, declarations and programs
//! - [`canonical`] - Canonical strings, sharing keys and the DNF rewrite
//! - [`split`] - Alpha/beta classification of conditions
//! - [`decompose`] - Arithmetic decomposition into shareable steps
//! - [`eval`] - Expression evaluation
//! - [`validate`] - Incremental semantic validation ([`ProgramState`])
//! - [`facts`] - Fact construction and id generation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ast;
pub mod canonical;
pub mod decompose;
pub mod eval;
pub mod facts;
pub mod split;
pub mod validate;

pub use ast::{
    ActionCall, ActionDecl, AggregateDecl, AggregateFunction, BinaryOperator, Expr, FactDecl,
    FieldDecl, Item, LogicalOperator, ParamDecl, Program, Quantifier, QuantifierKind, RuleDecl,
    TempRef, TypeDecl, VarDecl,
};
pub use canonical::{canonical_string, normalize, rewrite_dnf, sharing_key};
pub use decompose::{DecomposedCondition, decompose, should_decompose};
pub use eval::{Environment, EvalContext, evaluate, evaluate_predicate};
pub use facts::{build_fact, generate_user_id};
pub use split::{AlphaCondition, BetaCondition, SplitConditions, split_conditions};
pub use validate::ProgramState;
