//! Canonical forms, splitting and decomposition.

use discern_language::{
    BinaryOperator, Expr, canonical_string, decompose, rewrite_dnf, sharing_key,
    should_decompose, split_conditions,
};

fn age() -> Expr {
    Expr::field("p", "age")
}

// =============================================================================
// Canonical Strings
// =============================================================================

#[test]
fn commutative_reorderings_share_a_key() {
    let a = age().gt(18).and(age().lt(65));
    let b = age().lt(65).and(age().gt(18));
    assert_eq!(canonical_string(&a), canonical_string(&b));
    assert_eq!(
        sharing_key("alpha", &canonical_string(&a)),
        sharing_key("alpha", &canonical_string(&b))
    );
}

#[test]
fn operand_order_of_comparisons_matters() {
    let a = age().gt(18);
    let b = Expr::lit(18).gt(age());
    assert_ne!(canonical_string(&a), canonical_string(&b));
}

#[test]
fn literal_types_are_distinguished() {
    assert_ne!(
        canonical_string(&age().gt(18)),
        canonical_string(&age().gt(18.0))
    );
    assert_ne!(
        canonical_string(&Expr::lit("18")),
        canonical_string(&Expr::lit(18))
    );
}

#[test]
fn encoded_operators_parse() {
    assert_eq!(BinaryOperator::parse("Kg==").unwrap(), BinaryOperator::Mul);
    assert_eq!(BinaryOperator::parse("Kw==").unwrap(), BinaryOperator::Add);
    assert_eq!(BinaryOperator::parse("LQ==").unwrap(), BinaryOperator::Sub);
    assert_eq!(BinaryOperator::parse("Lw==").unwrap(), BinaryOperator::Div);
    assert_eq!(BinaryOperator::parse("JQ==").unwrap(), BinaryOperator::Mod);
    assert!(BinaryOperator::parse("**").is_err());
}

// =============================================================================
// Splitting
// =============================================================================

#[test]
fn single_variable_conjuncts_become_alpha() {
    let condition = Expr::field("p", "id")
        .equals(Expr::field("o", "person_id"))
        .and(Expr::field("o", "amount").gt(100))
        .and(age().gt(18));
    let split = split_conditions(&condition);

    assert_eq!(split.alpha_for("o").count(), 1);
    assert_eq!(split.alpha_for("p").count(), 1);
    assert_eq!(split.beta.len(), 1);
    assert!(split.residual_beta().is_some());
}

#[test]
fn disjunctions_across_variables_stay_whole() {
    let condition = age().gt(18).or(Expr::field("o", "amount").gt(100));
    let split = split_conditions(&condition);
    assert!(split.alpha.is_empty());
    assert_eq!(split.beta.len(), 1);
}

#[test]
fn dnf_distributes_small_products() {
    let a = age().gt(1);
    let b = age().gt(2);
    let c = age().gt(3);
    let d = age().gt(4);
    let product = a.clone().or(b.clone()).and(c.clone().or(d.clone()));
    let rewritten = rewrite_dnf(&product, 16);

    let expected = a
        .clone()
        .and(c.clone())
        .or(a.and(d.clone()))
        .or(b.clone().and(c))
        .or(b.and(d));
    assert_eq!(canonical_string(&rewritten), canonical_string(&expected));
    assert_eq!(
        canonical_string(&rewrite_dnf(&product, 3)),
        canonical_string(&product)
    );
}

// =============================================================================
// Decomposition
// =============================================================================

#[test]
fn shared_prefix_steps_have_equal_keys() {
    let long = (Expr::field("c", "qty") * 23 - 10 + Expr::field("c", "discount") * 43).gt(0);
    let short = (Expr::field("c", "qty") * 23).gt(100);
    assert!(should_decompose(&long));
    assert!(should_decompose(&short));

    let long_steps = decompose(&long);
    let short_steps = decompose(&short);
    assert_eq!(long_steps.len(), 5);
    assert_eq!(short_steps.len(), 2);
    assert_eq!(long_steps[0].result_key, short_steps[0].result_key);
    assert!(long_steps.last().unwrap().is_final);
    assert!(short_steps.last().unwrap().is_final);
}

#[test]
fn steps_declare_their_dependencies() {
    let expr = (Expr::field("c", "qty") * 2 + Expr::field("c", "qty") * 3).ge(10);
    let steps = decompose(&expr);
    assert_eq!(steps.len(), 4);
    let sum = &steps[2];
    let names: Vec<&str> = sum.dependencies.iter().map(|d| d.name.as_ref()).collect();
    assert_eq!(names, vec!["temp_1", "temp_2"]);
}
