//! Worked scenarios: sharing, joins, decomposition, aggregation,
//! rollback and retroactive propagation.

use std::sync::Arc;

use discern::engine::{Engine, NodeInfo, NodeKind, RecordingObserver};
use discern::foundation::{ErrorCategory, ErrorKind, Fact, FactId, Type};
use discern::language::{
    ActionCall, ActionDecl, AggregateDecl, AggregateFunction, Expr, Program, RuleDecl, TypeDecl,
    VarDecl,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn schema() -> Program {
    Program::new()
        .with_type(
            TypeDecl::new("Person")
                .key("id", Type::String)
                .field("name", Type::String)
                .field("age", Type::Number),
        )
        .with_type(
            TypeDecl::new("Order")
                .key("id", Type::String)
                .field("person_id", Type::String)
                .field("amount", Type::Number),
        )
        .with_type(
            TypeDecl::new("Cart")
                .field("qty", Type::Number)
                .field("discount", Type::Number),
        )
        .with_action(ActionDecl::new("a1"))
        .with_action(ActionDecl::new("a2"))
        .with_action(ActionDecl::new("alert"))
        .with_action(ActionDecl::new("x"))
        .with_action(ActionDecl::new("y"))
        .with_action(ActionDecl::new("fraud").param("total", Type::Number))
        .with_action(ActionDecl::new("old"))
}

fn setup() -> (Engine, Arc<RecordingObserver>) {
    let engine = Engine::new();
    let recorder = Arc::new(RecordingObserver::new());
    engine.set_observer(recorder.clone());
    engine.ingest_program(&schema()).unwrap();
    (engine, recorder)
}

fn person(id: &str, age: i64) -> Fact {
    Fact::new("Person", id)
        .with_field("id", id)
        .with_field("name", id.to_uppercase())
        .with_field("age", age)
}

fn order(id: &str, person_id: &str, amount: i64) -> Fact {
    Fact::new("Order", id)
        .with_field("id", id)
        .with_field("person_id", person_id)
        .with_field("amount", amount)
}

fn alpha_nodes_of(engine: &Engine, rule: &str) -> Vec<NodeInfo> {
    engine
        .nodes()
        .into_iter()
        .filter(|n| n.kind == NodeKind::Alpha && n.rules.iter().any(|r| r.as_ref() == rule))
        .collect()
}

// =============================================================================
// Scenario A: Alpha Sharing
// =============================================================================

#[test]
fn scenario_a_alpha_sharing() {
    let (engine, recorder) = setup();
    let adult = || Expr::field("p", "age").gt(18);
    engine
        .ingest_program(
            &Program::new()
                .with_rule(
                    RuleDecl::new("r1", ActionCall::new("a1"))
                        .bind("p", "Person")
                        .when(adult()),
                )
                .with_rule(
                    RuleDecl::new("r2", ActionCall::new("a2"))
                        .bind("p", "Person")
                        .when(adult().and(Expr::field("p", "age").lt(65))),
                ),
        )
        .unwrap();

    let shared: Vec<NodeInfo> = engine
        .nodes()
        .into_iter()
        .filter(|n| n.condition == "p.age > 18")
        .collect();
    assert_eq!(shared.len(), 1);
    assert_eq!(shared[0].ref_count, 2);

    engine.insert_fact(person("x", 40)).unwrap();
    assert_eq!(recorder.fired("r1"), 1);
    assert_eq!(recorder.fired("r2"), 1);

    engine.remove_rule("r1").unwrap();
    let node = engine
        .nodes()
        .into_iter()
        .find(|n| n.id == shared[0].id)
        .unwrap();
    assert_eq!(node.ref_count, 1);

    engine.insert_fact(person("y", 50)).unwrap();
    assert_eq!(recorder.fired("r1"), 1);
    assert_eq!(recorder.fired("r2"), 2);
}

// =============================================================================
// Scenario B: Beta Cascade With Join
// =============================================================================

#[test]
fn scenario_b_join_cascade() {
    let (engine, recorder) = setup();
    engine
        .ingest_program(
            &Program::new().with_rule(
                RuleDecl::new("big_order", ActionCall::new("alert"))
                    .bind("p", "Person")
                    .bind("o", "Order")
                    .when(
                        Expr::field("p", "id")
                            .equals(Expr::field("o", "person_id"))
                            .and(Expr::field("o", "amount").gt(100)),
                    ),
            ),
        )
        .unwrap();

    engine.insert_fact(person("p1", 30)).unwrap();
    engine.insert_fact(order("o1", "p1", 250)).unwrap();
    let results = recorder.results();
    assert_eq!(results.len(), 1);
    let token = &results[0].context.token;
    assert_eq!(token.fact_for("p"), Some(&FactId::new("Person", "p1")));
    assert_eq!(token.fact_for("o"), Some(&FactId::new("Order", "o1")));

    engine.retract_fact(&FactId::new("Order", "o1")).unwrap();
    assert_eq!(recorder.fired("big_order"), 1);
    assert_eq!(recorder.retracted("big_order"), 1);

    engine.insert_fact(order("o2", "p1", 50)).unwrap();
    assert_eq!(recorder.fired("big_order"), 1);
    assert!(engine.terminal_matches("big_order").unwrap().is_empty());
}

// =============================================================================
// Scenario C: Arithmetic Decomposition With Sharing
// =============================================================================

#[test]
fn scenario_c_decomposed_arithmetic_shares_steps() {
    let (engine, recorder) = setup();
    let qty = || Expr::field("c", "qty");
    let r1 = ((qty() * Expr::lit(23) - Expr::lit(10)) + Expr::field("c", "discount") * Expr::lit(43))
        .gt(0);
    let r2 = (qty() * Expr::lit(23)).gt(100);
    engine
        .ingest_program(
            &Program::new()
                .with_rule(RuleDecl::new("r1", ActionCall::new("x")).bind("c", "Cart").when(r1))
                .with_rule(RuleDecl::new("r2", ActionCall::new("y")).bind("c", "Cart").when(r2)),
        )
        .unwrap();

    let r1_nodes = alpha_nodes_of(&engine, "r1");
    let r2_nodes = alpha_nodes_of(&engine, "r2");
    assert_eq!(r1_nodes.len(), 5);
    assert_eq!(r2_nodes.len(), 2);
    let shared: Vec<&NodeInfo> = r1_nodes
        .iter()
        .filter(|n| r2_nodes.iter().any(|m| m.id == n.id))
        .collect();
    assert_eq!(shared.len(), 1);
    assert_eq!(shared[0].ref_count, 2);
    assert!(shared[0].condition.contains("c.qty * 23"));
    assert_eq!(engine.metrics().alpha_nodes, 6);

    engine
        .insert_fact(
            Fact::new("Cart", "c1")
                .with_field("qty", 5)
                .with_field("discount", 2),
        )
        .unwrap();
    assert_eq!(recorder.fired("r1"), 1);
    assert_eq!(recorder.fired("r2"), 1);

    engine
        .insert_fact(
            Fact::new("Cart", "c2")
                .with_field("qty", 1)
                .with_field("discount", 0),
        )
        .unwrap();
    assert_eq!(recorder.fired("r1"), 2);
    assert_eq!(recorder.fired("r2"), 1);
}

// =============================================================================
// Scenario D: Aggregation
// =============================================================================

#[test]
fn scenario_d_aggregate_fires_and_unfires() {
    let (engine, recorder) = setup();
    let sum = AggregateDecl::new(
        "sum_amounts",
        AggregateFunction::Sum,
        VarDecl::new("o", "Order"),
        Some("amount"),
    )
    .having(Expr::var("sum_amounts").gt(1000));
    engine
        .ingest_program(&Program::new().with_rule(
            RuleDecl::new("fraud", ActionCall::new("fraud").arg(Expr::var("sum_amounts")))
                .aggregate(sum),
        ))
        .unwrap();

    for (id, amount) in [("o1", 300), ("o2", 300), ("o3", 300)] {
        engine.insert_fact(order(id, "p1", amount)).unwrap();
    }
    assert_eq!(recorder.fired("fraud"), 0);

    engine.insert_fact(order("o4", "p1", 200)).unwrap();
    assert_eq!(recorder.fired("fraud"), 1);
    assert_eq!(
        recorder.results()[0].arguments,
        vec![discern::foundation::Value::Float(1100.0)]
    );

    engine.retract_fact(&FactId::new("Order", "o4")).unwrap();
    assert_eq!(recorder.retracted("fraud"), 1);
    assert_eq!(recorder.fired("fraud"), 1);

    engine.insert_fact(order("o5", "p1", 500)).unwrap();
    assert_eq!(recorder.fired("fraud"), 2);
}

// =============================================================================
// Scenario E: Transaction Rollback
// =============================================================================

#[test]
fn scenario_e_malformed_rule_rolls_back() {
    let (engine, _) = setup();
    engine
        .ingest_program(
            &Program::new().with_rule(
                RuleDecl::new("r1", ActionCall::new("a1"))
                    .bind("p", "Person")
                    .when(Expr::field("p", "age").gt(18)),
            ),
        )
        .unwrap();
    engine.insert_fact(person("x", 40)).unwrap();
    let nodes_before = engine.nodes();
    let facts_before = engine.facts();

    engine.begin_transaction().unwrap();
    let err = engine
        .ingest_program(
            &Program::new().with_rule(
                RuleDecl::new("broken", ActionCall::new("a2"))
                    .bind("g", "Ghost")
                    .when(Expr::field("g", "age").gt(1)),
            ),
        )
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UndefinedType(_)));
    assert_eq!(err.category(), ErrorCategory::Semantic);

    assert_eq!(engine.nodes(), nodes_before);
    assert_eq!(engine.facts(), facts_before);
    assert_eq!(engine.rule_ids().len(), 1);

    engine
        .ingest_program(
            &Program::new().with_rule(
                RuleDecl::new("r2", ActionCall::new("a2"))
                    .bind("p", "Person")
                    .when(Expr::field("p", "age").lt(65)),
            ),
        )
        .unwrap();
    engine.commit().unwrap();
    assert_eq!(engine.rule_ids().len(), 2);
    assert_eq!(engine.terminal_matches("r2").unwrap().len(), 1);
}

// =============================================================================
// Scenario F: Retroactive Propagation
// =============================================================================

#[test]
fn scenario_f_new_rules_see_existing_facts() {
    let (engine, recorder) = setup();
    engine
        .ingest_program(
            &Program::new().with_rule(
                RuleDecl::new("young", ActionCall::new("a1"))
                    .bind("p", "Person")
                    .when(Expr::field("p", "age").lt(10)),
            ),
        )
        .unwrap();
    for i in 0..50 {
        engine.insert_fact(person(&format!("p{i}"), i)).unwrap();
    }
    assert_eq!(recorder.fired("young"), 10);

    engine
        .ingest_program(
            &Program::new().with_rule(
                RuleDecl::new("old", ActionCall::new("old"))
                    .bind("p", "Person")
                    .when(Expr::field("p", "age").gt(30)),
            ),
        )
        .unwrap();
    assert_eq!(recorder.fired("old"), 19);
    assert_eq!(recorder.fired("young"), 10);

    let mut fired: Vec<FactId> = recorder
        .results()
        .iter()
        .filter(|r| r.context.rule_id.as_ref() == "old")
        .filter_map(|r| r.context.token.fact_for("p").cloned())
        .collect();
    fired.sort();
    fired.dedup();
    assert_eq!(fired.len(), 19);
}
