//! Explicit and implicit transactions.

use std::thread;
use std::time::Duration;

use discern_engine::{Engine, EngineConfig, IngestOptions};
use discern_foundation::ErrorKind;
use discern_language::{ActionCall, Expr, FactDecl, Item, Program, RuleDecl};

use crate::support::{engine, engine_with, person, person_id, schema};

fn adults() -> Program {
    Program::new().with_rule(
        RuleDecl::new("adults", ActionCall::new("notify"))
            .bind("p", "Person")
            .when(Expr::field("p", "age").gt(18)),
    )
}

/// A program whose second item fails while being applied.
fn half_valid() -> Program {
    Program::new()
        .with_fact(FactDecl::new("Person").set("id", "p2").set("age", 30))
        .with(Item::Retract(person_id("ghost")))
}

#[test]
fn rollback_undoes_rules_and_facts() {
    let (engine, recorder) = engine();
    engine.begin_transaction().unwrap();
    engine.ingest_program(&adults()).unwrap();
    engine.insert_fact(person("ada", 36)).unwrap();
    assert!(engine.in_transaction());
    assert_eq!(recorder.fired("adults"), 1);

    engine.rollback().unwrap();
    assert!(!engine.in_transaction());
    assert!(engine.rule_ids().is_empty());
    assert!(engine.facts().is_empty());
    assert_eq!(engine.nodes().len(), 1);
    assert!(engine.program().type_decl("Person").is_some());
    assert_eq!(engine.metrics().transactions_rolled_back, 1);
}

#[test]
fn commit_keeps_everything() {
    let (engine, _) = engine();
    let committed = engine.metrics().transactions_committed;
    engine.begin_transaction().unwrap();
    engine.ingest_program(&adults()).unwrap();
    engine.insert_fact(person("ada", 36)).unwrap();
    engine.commit().unwrap();

    assert_eq!(engine.metrics().transactions_committed, committed + 1);
    assert_eq!(engine.rule_ids().len(), 1);
    assert_eq!(engine.terminal_matches("adults").unwrap().len(), 1);
}

#[test]
fn rolled_back_rule_removal_restores_matches() {
    let (engine, recorder) = engine();
    engine.ingest_program(&adults()).unwrap();
    engine.insert_fact(person("ada", 36)).unwrap();
    let before = engine.nodes();

    engine.begin_transaction().unwrap();
    engine.remove_rule("adults").unwrap();
    assert_eq!(engine.nodes().len(), 1);
    engine.rollback().unwrap();

    assert_eq!(engine.nodes(), before);
    assert_eq!(engine.terminal_matches("adults").unwrap().len(), 1);
    engine.insert_fact(person("bob", 50)).unwrap();
    assert_eq!(recorder.fired("adults"), 2);
}

#[test]
fn failed_step_inside_a_transaction_rolls_back_to_its_savepoint() {
    let (engine, _) = engine();
    engine.begin_transaction().unwrap();
    engine.insert_fact(person("p1", 20)).unwrap();

    let err = engine.ingest_program(&half_valid()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownFact(_)));
    assert!(engine.in_transaction());
    assert!(engine.fact(&person_id("p1")).is_some());
    assert!(engine.fact(&person_id("p2")).is_none());

    engine.commit().unwrap();
    assert_eq!(engine.facts().len(), 1);
}

#[test]
fn savepoint_rollback_restores_memories_touched_earlier() {
    let (engine, recorder) = engine();
    engine.ingest_program(&adults()).unwrap();
    engine.begin_transaction().unwrap();
    engine.insert_fact(person("p1", 40)).unwrap();

    assert!(engine.ingest_program(&half_valid()).is_err());
    assert_eq!(engine.facts().len(), 1);
    let matches = engine.terminal_matches("adults").unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].fact_for("p"), Some(&person_id("p1")));
    assert!(engine.nodes().iter().skip(1).all(|n| n.memory_size <= 1));
    assert_eq!(recorder.fired("adults"), 1);

    engine.commit().unwrap();
    engine.retract_fact(&person_id("p1")).unwrap();
    assert!(engine.terminal_matches("adults").unwrap().is_empty());
    assert!(engine.nodes().iter().all(|n| n.memory_size == 0));
}

#[test]
fn failed_implicit_program_leaves_no_trace() {
    let (engine, _) = engine();
    assert!(engine.ingest_program(&half_valid()).is_err());
    assert!(!engine.in_transaction());
    assert!(engine.facts().is_empty());
}

#[test]
fn disabled_auto_rollback_leaves_the_transaction_open() {
    let (engine, _) = engine();
    let err = engine
        .ingest_program_with(&half_valid(), IngestOptions { auto_rollback: false })
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownFact(_)));
    assert!(engine.in_transaction());
    assert!(engine.fact(&person_id("p2")).is_some());

    engine.rollback().unwrap();
    assert!(engine.fact(&person_id("p2")).is_none());
}

#[test]
fn footprint_overflow_aborts_the_whole_transaction() {
    let engine = Engine::with_config(EngineConfig::default().with_max_transaction_footprint(1));
    let err = engine.ingest_program(&schema()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::FootprintExceeded { limit: 1, .. }));
    assert!(engine.program().type_decl("Person").is_none());

    engine.begin_transaction().unwrap();
    let err = engine.ingest_program(&schema()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::FootprintExceeded { .. }));
    assert!(!engine.in_transaction());
}

#[test]
fn expired_transactions_cannot_commit() {
    let config = EngineConfig::default().with_transaction_timeout(Some(Duration::from_millis(50)));
    let (engine, _) = engine_with(config);
    engine.begin_transaction().unwrap();
    thread::sleep(Duration::from_millis(80));

    let err = engine.commit().unwrap_err();
    assert!(matches!(err.kind, ErrorKind::DeadlineExceeded { .. }));
    assert!(!engine.in_transaction());
}

#[test]
fn commit_and_rollback_need_a_transaction() {
    let (engine, _) = engine();
    assert!(matches!(
        engine.rollback().unwrap_err().kind,
        ErrorKind::TransactionNotActive
    ));
    assert!(matches!(
        engine.commit().unwrap_err().kind,
        ErrorKind::TransactionNotActive
    ));
}

#[test]
fn reset_clears_state_but_keeps_counters() {
    let (engine, _) = engine();
    engine.ingest_program(&adults()).unwrap();
    engine.insert_fact(person("ada", 36)).unwrap();

    engine.reset().unwrap();
    assert!(engine.rule_ids().is_empty());
    assert!(engine.facts().is_empty());
    assert_eq!(engine.nodes().len(), 1);
    assert!(engine.program().type_decl("Person").is_none());
    assert_eq!(engine.metrics().facts_inserted, 1);

    engine.ingest_program(&schema()).unwrap();
    engine.ingest_program(&adults()).unwrap();
    assert_eq!(engine.rule_ids().len(), 1);
}

#[test]
fn reset_item_is_refused_inside_a_transaction() {
    let (engine, _) = engine();
    engine.insert_fact(person("ada", 36)).unwrap();
    engine.begin_transaction().unwrap();
    let err = engine
        .ingest_program(&Program::new().with_reset())
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::TransactionAlreadyActive));
    engine.rollback().unwrap();

    engine.ingest_program(&Program::new().with_reset()).unwrap();
    assert!(engine.facts().is_empty());
}
