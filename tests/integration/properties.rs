//! Properties of incremental propagation over random fact streams.

use std::collections::BTreeSet;

use proptest::prelude::*;

use discern::engine::{Engine, EngineConfig, NodeInfo};
use discern::foundation::{Fact, FactId, Type};
use discern::language::{
    ActionCall, ActionDecl, AggregateDecl, AggregateFunction, Expr, Program, QuantifierKind,
    RuleDecl, TypeDecl, VarDecl,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn schema() -> Program {
    Program::new()
        .with_type(
            TypeDecl::new("Person")
                .key("id", Type::String)
                .field("age", Type::Number)
                .field("city", Type::String),
        )
        .with_type(
            TypeDecl::new("Order")
                .key("id", Type::String)
                .field("owner", Type::String)
                .field("total", Type::Number),
        )
        .with_action(ActionDecl::new("notify"))
}

fn owned() -> Expr {
    Expr::field("o", "owner").equals(Expr::field("p", "id"))
}

fn big_orders() -> RuleDecl {
    RuleDecl::new("big", ActionCall::new("notify"))
        .bind("p", "Person")
        .bind("o", "Order")
        .when(owned().and(Expr::field("o", "total").gt(100)))
}

fn rules() -> Program {
    let spend = AggregateDecl::new(
        "spent",
        AggregateFunction::Sum,
        VarDecl::new("o", "Order"),
        Some("total"),
    )
    .filter(owned())
    .having(Expr::var("spent").gt(150));
    Program::new()
        .with_rule(
            RuleDecl::new("adults", ActionCall::new("notify"))
                .bind("p", "Person")
                .when(Expr::field("p", "age").gt(18)),
        )
        .with_rule(big_orders())
        .with_rule(
            RuleDecl::new("idle", ActionCall::new("notify"))
                .bind("p", "Person")
                .quantify(QuantifierKind::NotExists, VarDecl::new("o", "Order"), Some(owned())),
        )
        .with_rule(
            RuleDecl::new("spender", ActionCall::new("notify"))
                .bind("p", "Person")
                .aggregate(spend),
        )
}

fn engine_with(config: EngineConfig, program: &Program) -> Engine {
    let engine = Engine::with_config(config.with_transaction_timeout(None));
    engine.ingest_program(&schema()).unwrap();
    engine.ingest_program(program).unwrap();
    engine
}

fn person(i: usize, age: i64) -> Fact {
    let id = format!("p{i}");
    Fact::new("Person", &id)
        .with_field("id", id.as_str())
        .with_field("age", age)
        .with_field("city", "Oslo")
}

fn order(i: usize, owner: usize, total: i64) -> Fact {
    let id = format!("o{i}");
    Fact::new("Order", &id)
        .with_field("id", id.as_str())
        .with_field("owner", format!("p{owner}"))
        .with_field("total", total)
}

/// Every terminal's matches, as sorted token keys.
fn matches(engine: &Engine) -> Vec<(String, BTreeSet<String>)> {
    engine
        .rule_ids()
        .iter()
        .map(|rule| {
            let keys = engine
                .terminal_matches(rule)
                .unwrap()
                .iter()
                .map(|t| t.key().as_str().to_string())
                .collect();
            (rule.to_string(), keys)
        })
        .collect()
}

fn snapshot(engine: &Engine) -> (Vec<NodeInfo>, Vec<(String, BTreeSet<String>)>) {
    (engine.nodes(), matches(engine))
}

fn conditions() -> Vec<Expr> {
    vec![
        Expr::field("p", "age").gt(18),
        Expr::field("p", "age").lt(65),
        Expr::field("p", "city").not_equals(Expr::lit("Lima")),
        Expr::field("p", "id").not_equals(Expr::lit("p3")),
    ]
}

fn filtered(conditions: Vec<Expr>) -> Program {
    let condition = Expr::all(conditions).unwrap_or_else(|| Expr::lit(true));
    Program::new().with_rule(
        RuleDecl::new("filtered", ActionCall::new("notify"))
            .bind("p", "Person")
            .when(condition),
    )
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn insert_then_retract_restores_state(
        ages in prop::collection::vec(0i64..100, 0..6),
        orders in prop::collection::vec((0usize..6, 0i64..200), 0..8),
        extra_age in 0i64..100,
        extra_order in (0usize..6, 0i64..200),
        person_first in any::<bool>(),
    ) {
        let engine = engine_with(EngineConfig::default(), &rules());
        for (i, age) in ages.iter().enumerate() {
            engine.insert_fact(person(i, *age)).unwrap();
        }
        for (i, (owner, total)) in orders.iter().enumerate() {
            engine.insert_fact(order(i, *owner, *total)).unwrap();
        }
        let before = snapshot(&engine);

        let (fact, id) = if person_first {
            (person(99, extra_age), FactId::new("Person", "p99"))
        } else {
            (order(99, extra_order.0, extra_order.1), FactId::new("Order", "o99"))
        };
        engine.insert_fact(fact).unwrap();
        engine.retract_fact(&id).unwrap();

        prop_assert_eq!(snapshot(&engine), before);
    }

    #[test]
    fn join_matches_equal_the_brute_force_answer(
        people in 0usize..5,
        orders in prop::collection::vec((0usize..6, 0i64..200, any::<bool>()), 0..12),
    ) {
        let engine = engine_with(EngineConfig::default(), &Program::new().with_rule(big_orders()));
        for i in 0..people {
            engine.insert_fact(person(i, 30)).unwrap();
        }
        for (i, (owner, total, _)) in orders.iter().enumerate() {
            engine.insert_fact(order(i, *owner, *total)).unwrap();
        }
        for (i, (_, _, retract)) in orders.iter().enumerate() {
            if *retract {
                engine.retract_fact(&FactId::new("Order", &format!("o{i}"))).unwrap();
            }
        }

        let actual: BTreeSet<(String, String)> = engine
            .terminal_matches("big")
            .unwrap()
            .iter()
            .map(|t| {
                let p = t.fact_for("p").map(|f| f.user_id().to_string()).unwrap_or_default();
                let o = t.fact_for("o").map(|f| f.user_id().to_string()).unwrap_or_default();
                (p, o)
            })
            .collect();
        let expected: BTreeSet<(String, String)> = orders
            .iter()
            .enumerate()
            .filter(|(_, (owner, total, retract))| !retract && *owner < people && *total > 100)
            .map(|(i, (owner, _, _))| (format!("p{owner}"), format!("o{i}")))
            .collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn condition_order_does_not_change_matches(
        shuffled in Just(conditions()).prop_shuffle(),
        ages in prop::collection::vec(0i64..100, 1..8),
    ) {
        let reference = engine_with(EngineConfig::default(), &filtered(conditions()));
        let permuted = engine_with(EngineConfig::default(), &filtered(shuffled.clone()));
        for (i, age) in ages.iter().enumerate() {
            reference.insert_fact(person(i, *age)).unwrap();
            permuted.insert_fact(person(i, *age)).unwrap();
        }
        prop_assert_eq!(matches(&reference), matches(&permuted));

        let config = EngineConfig::default().with_normalize_alpha_order(true);
        let one = engine_with(config.clone(), &filtered(conditions()));
        let two = engine_with(config, &filtered(shuffled));
        prop_assert_eq!(one.nodes(), two.nodes());
    }
}

// =============================================================================
// Composition
// =============================================================================

#[test]
fn staged_ingestion_matches_combined_ingestion() {
    let staged = engine_with(EngineConfig::default(), &Program::new().with_rule(big_orders()));
    let rest = rules()
        .items
        .into_iter()
        .filter(|item| !matches!(item, discern::language::Item::Rule(r) if r.id.as_ref() == "big"))
        .fold(Program::new(), |program, item| program.with(item));
    staged.ingest_program(&rest).unwrap();

    let combined = engine_with(EngineConfig::default(), &rules());
    for engine in [&staged, &combined] {
        engine.insert_fact(person(0, 40)).unwrap();
        engine.insert_fact(order(0, 0, 120)).unwrap();
        engine.insert_fact(order(1, 0, 60)).unwrap();
    }

    let ids = |engine: &Engine| {
        engine
            .nodes()
            .into_iter()
            .map(|n| (n.id, n.ref_count, n.memory_size))
            .collect::<BTreeSet<_>>()
    };
    assert_eq!(ids(&staged), ids(&combined));
    let sorted = |engine: &Engine| matches(engine).into_iter().collect::<BTreeSet<_>>();
    assert_eq!(sorted(&staged), sorted(&combined));
}
