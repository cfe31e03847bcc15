//! Expression evaluation.

use discern_foundation::{ErrorCategory, ErrorKind, Fact, Value};
use discern_language::{
    EvalContext, Expr, LogicalOperator, decompose, evaluate, evaluate_predicate,
};
use proptest::prelude::*;

fn cart(qty: i64, discount: i64) -> EvalContext {
    EvalContext::new().with_fact(
        "c",
        Fact::new("Cart", "c1")
            .with_field("qty", qty)
            .with_field("discount", discount),
    )
}

fn cart_condition() -> Expr {
    (Expr::field("c", "qty") * 23 - 10 + Expr::field("c", "discount") * 43).gt(0)
}

/// Evaluates a decomposed condition step by step.
fn evaluate_steps(expr: &Expr, env: &mut EvalContext) -> bool {
    let steps = decompose(expr);
    for step in &steps {
        if step.is_final {
            return evaluate_predicate(&step.base_condition, env).unwrap();
        }
        let value = evaluate(&step.base_condition, env).unwrap();
        env.store_intermediate(step.result_key.clone(), value);
    }
    unreachable!("decomposition always ends in a final step")
}

#[test]
fn arithmetic_promotes_to_float() {
    let env = cart(5, 2);
    let value = evaluate(&(Expr::field("c", "qty") * 23), &env).unwrap();
    assert_eq!(value, Value::Float(115.0));
    assert!(evaluate_predicate(&cart_condition(), &env).unwrap());
}

#[test]
fn division_by_zero_is_an_evaluation_error() {
    let env = cart(5, 0);
    let error = evaluate(&(Expr::field("c", "qty") / Expr::field("c", "discount")), &env)
        .unwrap_err();
    assert!(matches!(error.kind, ErrorKind::DivisionByZero));
    assert_eq!(error.category(), ErrorCategory::Evaluation);
    assert!(!error.category().aborts_ingestion());
}

#[test]
fn missing_step_results_are_structural() {
    let steps = decompose(&cart_condition());
    let error = evaluate(&steps[1].base_condition, &cart(1, 1)).unwrap_err();
    assert!(matches!(error.kind, ErrorKind::MissingDependency(_)));
}

#[test]
fn and_binds_tighter_than_or() {
    let env = cart(5, 2);
    let qty = || Expr::field("c", "qty");
    // false AND false OR true
    let expr = qty().gt(10).and(qty().lt(0)).or(qty().equals(5));
    assert!(evaluate_predicate(&expr, &env).unwrap());
    // true OR false AND false, as one flat chain
    let flat = Expr::chain(
        qty().equals(5),
        vec![(LogicalOperator::Or, qty().gt(10)), (LogicalOperator::And, qty().lt(0))],
    );
    assert!(evaluate_predicate(&flat, &env).unwrap());
    // (true OR false) AND false
    let grouped = qty().equals(5).or(qty().gt(10)).and(qty().lt(0));
    assert!(!evaluate_predicate(&grouped, &env).unwrap());
}

#[test]
fn bare_variables_resolve_to_references_or_values() {
    let mut env = cart(1, 1);
    env.bind_value("total", Value::Float(1100.0));
    assert!(evaluate_predicate(&Expr::var("total").gt(1000), &env).unwrap());
    assert_eq!(
        evaluate(&Expr::var("c"), &env).unwrap().as_ref_id().map(|id| id.as_str()),
        Some("Cart#c1")
    );
}

#[test]
fn comparing_strings_with_numbers_fails() {
    let env = EvalContext::new().with_fact("p", Fact::new("Person", "a").with_field("name", "A"));
    let error = evaluate_predicate(&Expr::field("p", "name").gt(3), &env).unwrap_err();
    assert!(matches!(error.kind, ErrorKind::TypeMismatch { .. }));
}

proptest! {
    #[test]
    fn decomposed_evaluation_matches_direct(qty in -1000i64..1000, discount in -1000i64..1000) {
        let mut env = cart(qty, discount);
        let direct = evaluate_predicate(&cart_condition(), &env).unwrap();
        prop_assert_eq!(evaluate_steps(&cart_condition(), &mut env), direct);
    }

    #[test]
    fn shared_step_evaluates_identically(qty in -1000i64..1000) {
        let short = (Expr::field("c", "qty") * 23).gt(100);
        let mut env = cart(qty, 0);
        let direct = evaluate_predicate(&short, &env).unwrap();
        prop_assert_eq!(evaluate_steps(&short, &mut env), direct);
    }
}
