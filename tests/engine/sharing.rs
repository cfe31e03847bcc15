//! Node sharing and reference counting.

use discern_engine::NodeKind;
use discern_language::{ActionCall, Expr, Program, RuleDecl};

use crate::support::{engine, person};

fn adults(id: &str) -> RuleDecl {
    RuleDecl::new(id, ActionCall::new("notify"))
        .bind("p", "Person")
        .when(Expr::field("p", "age").gt(18))
}

fn big_orders(id: &str) -> RuleDecl {
    RuleDecl::new(id, ActionCall::new("notify"))
        .bind("p", "Person")
        .bind("o", "Order")
        .when(Expr::field("o", "owner").equals(Expr::field("p", "id")))
}

#[test]
fn identical_conditions_share_one_alpha_node() {
    let (engine, _) = engine();
    engine
        .ingest_program(&Program::new().with_rule(adults("r1")).with_rule(adults("r2")))
        .unwrap();

    let alphas: Vec<_> = engine
        .nodes()
        .into_iter()
        .filter(|n| n.kind == NodeKind::Alpha)
        .collect();
    assert_eq!(alphas.len(), 1);
    assert_eq!(alphas[0].ref_count, 2);
    assert_eq!(alphas[0].condition, "p.age > 18");

    let metrics = engine.metrics();
    assert_eq!(metrics.alpha_nodes, 1);
    assert_eq!(metrics.terminal_nodes, 2);
    assert!((metrics.sharing_ratio - 2.0).abs() < f64::EPSILON);
}

#[test]
fn commutative_operands_share() {
    let (engine, _) = engine();
    let left = RuleDecl::new("left", ActionCall::new("notify"))
        .bind("p", "Person")
        .when(Expr::field("p", "id").equals(Expr::field("p", "email")));
    let right = RuleDecl::new("right", ActionCall::new("notify"))
        .bind("p", "Person")
        .when(Expr::field("p", "email").equals(Expr::field("p", "id")));
    engine
        .ingest_program(&Program::new().with_rule(left).with_rule(right))
        .unwrap();
    assert_eq!(engine.metrics().alpha_nodes, 1);
}

#[test]
fn different_thresholds_do_not_share() {
    let (engine, _) = engine();
    let other = RuleDecl::new("seniors", ActionCall::new("notify"))
        .bind("p", "Person")
        .when(Expr::field("p", "age").gt(65));
    engine
        .ingest_program(&Program::new().with_rule(adults("r1")).with_rule(other))
        .unwrap();
    let metrics = engine.metrics();
    assert_eq!(metrics.alpha_nodes, 2);
    assert_eq!(metrics.type_nodes, 1);
    assert_eq!(metrics.alpha_chains, 2);
}

#[test]
fn identical_joins_share_one_join_node() {
    let (engine, _) = engine();
    engine
        .ingest_program(
            &Program::new()
                .with_rule(big_orders("j1"))
                .with_rule(big_orders("j2")),
        )
        .unwrap();
    let joins: Vec<_> = engine
        .nodes()
        .into_iter()
        .filter(|n| n.kind == NodeKind::Join)
        .collect();
    assert_eq!(joins.len(), 1);
    assert_eq!(joins[0].ref_count, 2);
    assert_eq!(joins[0].rules.len(), 2);
}

#[test]
fn removing_one_sharer_keeps_the_node() {
    let (engine, _) = engine();
    engine
        .ingest_program(&Program::new().with_rule(adults("r1")).with_rule(adults("r2")))
        .unwrap();

    engine.remove_rule("r1").unwrap();
    let alpha = engine
        .nodes()
        .into_iter()
        .find(|n| n.kind == NodeKind::Alpha)
        .unwrap();
    assert_eq!(alpha.ref_count, 1);
    assert_eq!(alpha.rules.len(), 1);
    assert_eq!(alpha.rules[0].as_ref(), "r2");
    assert!(engine.lifecycle("terminal_r1").is_none());

    engine.remove_rule("r2").unwrap();
    let remaining = engine.nodes();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].kind, NodeKind::Root);
    assert_eq!(engine.metrics().rules_removed, 2);
}

#[test]
fn removing_an_unknown_rule_fails() {
    let (engine, _) = engine();
    let err = engine.remove_rule("ghost").unwrap_err();
    assert!(matches!(
        err.kind,
        discern_foundation::ErrorKind::UnknownRule(_)
    ));
}

#[test]
fn later_rules_see_existing_facts_through_shared_nodes() {
    let (engine, recorder) = engine();
    engine.insert_fact(person("ada", 36)).unwrap();
    engine.insert_fact(person("kid", 9)).unwrap();

    engine
        .ingest_program(&Program::new().with_rule(adults("r1")))
        .unwrap();
    assert_eq!(recorder.fired("r1"), 1);

    engine
        .ingest_program(&Program::new().with_rule(adults("r2")))
        .unwrap();
    assert_eq!(recorder.fired("r1"), 1);
    assert_eq!(recorder.fired("r2"), 1);
    assert_eq!(engine.terminal_matches("r2").unwrap().len(), 1);
}
