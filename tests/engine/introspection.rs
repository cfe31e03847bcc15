//! Node listings, lifecycle records, metrics and persisted memories.

use discern_engine::{Engine, EngineConfig, NodeKind};
use discern_language::{ActionCall, Expr, Program, RuleDecl};
use discern_storage::InMemoryStorage;

use crate::support::{engine, person, schema};

fn adults(id: &str) -> Program {
    Program::new().with_rule(
        RuleDecl::new(id, ActionCall::new("notify"))
            .bind("p", "Person")
            .when(Expr::field("p", "age").gt(18)),
    )
}

#[test]
fn nodes_are_listed_root_first() {
    let (engine, _) = engine();
    engine.ingest_program(&adults("adults")).unwrap();
    engine.insert_fact(person("ada", 36)).unwrap();

    let nodes = engine.nodes();
    let kinds: Vec<NodeKind> = nodes.iter().map(|n| n.kind).collect();
    assert_eq!(
        kinds,
        vec![NodeKind::Root, NodeKind::Type, NodeKind::Alpha, NodeKind::Terminal]
    );

    assert_eq!(nodes[0].children, vec![nodes[1].id.clone()]);
    assert_eq!(nodes[1].id.as_ref(), "type_Person");
    assert_eq!(nodes[1].condition, "Person");
    assert_eq!(nodes[2].condition, "p.age > 18");
    assert_eq!(nodes[2].memory_size, 1);
    assert_eq!(nodes[3].id.as_ref(), "terminal_adults");
    assert_eq!(nodes[3].condition, "notify()");
    assert_eq!(nodes[3].memory_size, 1);
    assert!(nodes[1..].iter().all(|n| n.rules.len() == 1));
}

#[test]
fn lifecycle_follows_rule_references() {
    let (engine, _) = engine();
    engine.ingest_program(&adults("r1")).unwrap();
    engine.ingest_program(&adults("r2")).unwrap();

    let record = engine.lifecycle("type_Person").unwrap();
    assert_eq!(record.kind, NodeKind::Type);
    assert_eq!(record.ref_count(), 2);
    let terminal = engine.lifecycle("terminal_r1").unwrap();
    assert_eq!(terminal.ref_count(), 1);

    engine.remove_rule("r1").unwrap();
    assert!(engine.lifecycle("terminal_r1").is_none());
    assert_eq!(engine.lifecycle("type_Person").unwrap().ref_count(), 1);
    assert!(engine.lifecycle("no_such_node").is_none());
}

#[test]
fn metrics_count_structure_and_work() {
    let (engine, _) = engine();
    engine.ingest_program(&adults("r1")).unwrap();
    engine.ingest_program(&adults("r2")).unwrap();
    engine.insert_fact(person("ada", 36)).unwrap();
    engine.insert_fact(person("kid", 4)).unwrap();
    engine
        .retract_fact(&discern_foundation::FactId::new("Person", "kid"))
        .unwrap();

    let metrics = engine.metrics();
    assert_eq!(metrics.type_nodes, 1);
    assert_eq!(metrics.alpha_nodes, 1);
    assert_eq!(metrics.terminal_nodes, 2);
    assert_eq!(metrics.rules_added, 2);
    assert_eq!(metrics.facts_inserted, 2);
    assert_eq!(metrics.facts_retracted, 1);
    assert_eq!(metrics.activations, 2);
    assert!(metrics.hash_cache_hit_rate > 0.0);
    assert!(metrics.last_build_time <= metrics.total_build_time);
}

#[test]
fn rule_ids_and_program_follow_ingestion() {
    let (engine, _) = engine();
    engine.ingest_program(&adults("b")).unwrap();
    engine.ingest_program(&adults("a")).unwrap();
    let ids: Vec<String> = engine.rule_ids().iter().map(ToString::to_string).collect();
    assert_eq!(ids, vec!["b", "a"]);
    assert!(engine.program().has_rule("a"));

    let err = engine.ingest_program(&adults("a")).unwrap_err();
    assert!(matches!(
        err.kind,
        discern_foundation::ErrorKind::DuplicateRule(_)
    ));
    assert!(engine.terminal_matches("zzz").is_err());
}

#[test]
fn memories_are_persisted_on_commit_when_enabled() {
    let config = EngineConfig::default().with_persist_node_memories(true);
    let engine = Engine::with_storage(config, Box::new(InMemoryStorage::new()));
    engine.ingest_program(&schema()).unwrap();
    engine.ingest_program(&adults("adults")).unwrap();
    assert!(engine.stored_memories().is_empty());

    engine.insert_fact(person("ada", 36)).unwrap();
    let stored = engine.stored_memories();
    let alpha = engine
        .nodes()
        .into_iter()
        .find(|n| n.kind == NodeKind::Alpha)
        .unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.contains(&alpha.id.to_string()));
    assert!(stored.contains(&"terminal_adults".to_string()));

    engine.remove_rule("adults").unwrap();
    assert!(engine.stored_memories().is_empty());
}

#[test]
fn memories_stay_in_process_by_default() {
    let (engine, _) = engine();
    engine.ingest_program(&adults("adults")).unwrap();
    engine.insert_fact(person("ada", 36)).unwrap();
    assert!(engine.stored_memories().is_empty());
}
