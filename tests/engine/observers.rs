//! Observer delivery and re-entry.

use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use discern_engine::{ActionObserver, EngineHandle, ExecutionResult, NoopObserver};
use discern_foundation::{ErrorKind, Fact, Type, Value};
use discern_language::{ActionCall, Expr, Program, RuleDecl, TypeDecl};

use crate::support::{engine, person, person_id};

fn adults(action: ActionCall) -> Program {
    Program::new().with_rule(
        RuleDecl::new("adults", action)
            .named("Adults")
            .bind("p", "Person")
            .when(Expr::field("p", "age").gt(18)),
    )
}

#[test]
fn context_describes_the_match() {
    let (engine, recorder) = engine();
    engine
        .ingest_program(&adults(ActionCall::new("report").arg(Expr::field("p", "age"))))
        .unwrap();
    engine.insert_fact(person("ada", 36)).unwrap();

    let results = recorder.results();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert!(result.success);
    assert!(result.error.is_none());
    assert_eq!(result.arguments, vec![Value::Int(36)]);
    assert_eq!(result.context.action_name.as_ref(), "report");
    assert_eq!(result.context.rule_id.as_ref(), "adults");
    assert_eq!(result.context.rule_name.as_ref(), "Adults");
    assert_eq!(result.context.token.fact_for("p"), Some(&person_id("ada")));
}

#[test]
fn argument_errors_fail_the_action_only() {
    let (engine, recorder) = engine();
    let broken = ActionCall::new("report").arg(Expr::field("p", "age") / Expr::lit(0));
    engine.ingest_program(&adults(broken)).unwrap();
    engine.insert_fact(person("ada", 36)).unwrap();

    let results = recorder.results();
    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert!(results[0].error.is_some());
    let metrics = engine.metrics();
    assert_eq!(metrics.activations, 1);
    assert_eq!(metrics.action_failures, 1);
    assert_eq!(engine.facts().len(), 1);
}

#[test]
fn retractions_carry_the_lost_match() {
    let (engine, recorder) = engine();
    engine.ingest_program(&adults(ActionCall::new("notify"))).unwrap();
    engine.insert_fact(person("ada", 36)).unwrap();
    engine.retract_fact(&person_id("ada")).unwrap();

    let retractions = recorder.retractions();
    assert_eq!(retractions.len(), 1);
    assert_eq!(retractions[0].rule_id.as_ref(), "adults");
    assert_eq!(retractions[0].token.fact_for("p"), Some(&person_id("ada")));
    assert_eq!(engine.metrics().retraction_events, 1);
}

#[test]
fn observers_can_chain_rules_through_the_handle() {
    let (engine, recorder) = engine();
    engine
        .ingest_program(
            &adults(ActionCall::new("notify"))
                .with_type(TypeDecl::new("Badge").key("holder", Type::String))
                .with_rule(
                    RuleDecl::new("badges", ActionCall::new("notify")).bind("b", "Badge"),
                ),
        )
        .unwrap();

    let inner = recorder.clone();
    engine.set_observer(Arc::new(move |result: &ExecutionResult| {
        inner.on_action_executed(result);
        if result.context.rule_id.as_ref() != "adults" {
            return;
        }
        if let Some(id) = result.context.token.fact_for("p") {
            let badge = Fact::new("Badge", id.user_id()).with_field("holder", id.user_id());
            result.context.engine.insert_fact(badge).unwrap();
        }
    }));

    engine.insert_fact(person("ada", 36)).unwrap();
    let fired: Vec<String> = recorder
        .fired_rules()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(fired, vec!["adults", "badges"]);
    assert_eq!(engine.facts().len(), 2);
    assert!(!engine.in_transaction());
}

#[test]
fn observers_can_call_the_engine_directly() {
    let (engine, recorder) = engine();
    engine
        .ingest_program(
            &adults(ActionCall::new("notify"))
                .with_type(TypeDecl::new("Badge").key("holder", Type::String))
                .with_rule(
                    RuleDecl::new("badges", ActionCall::new("notify")).bind("b", "Badge"),
                ),
        )
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let refused = Arc::new(Mutex::new(Vec::new()));
    let (inner, log, errors, sink) = (engine.clone(), seen.clone(), refused.clone(), recorder.clone());
    engine.set_observer(Arc::new(move |result: &ExecutionResult| {
        sink.on_action_executed(result);
        log.lock()
            .unwrap()
            .push((inner.facts().len(), inner.metrics().activations));
        if result.context.rule_id.as_ref() == "adults" {
            let badge = Fact::new("Badge", "ada").with_field("holder", "ada");
            inner.insert_fact(badge).unwrap();
            let error = inner.ingest_program(&Program::new()).unwrap_err();
            errors
                .lock()
                .unwrap()
                .push(matches!(error.kind, ErrorKind::Reentered(_)));
        }
    }));

    let worker = engine.clone();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(worker.insert_fact(person("ada", 36)));
    });
    rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();

    let fired: Vec<String> = recorder
        .fired_rules()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(fired, vec!["adults", "badges"]);
    assert_eq!(*seen.lock().unwrap(), vec![(1, 1), (2, 2)]);
    assert_eq!(*refused.lock().unwrap(), vec![true]);
    assert_eq!(engine.facts().len(), 2);
    assert!(!engine.in_transaction());
}

#[test]
fn detached_handles_refuse_work() {
    let handle = EngineHandle::detached();
    assert!(handle.insert_fact(person("ada", 36)).is_err());
    assert!(handle.retract_fact(person_id("ada")).is_err());

    let dropped = {
        let (engine, _) = engine();
        engine.handle()
    };
    assert!(dropped.update_fact(person("ada", 36)).is_err());
}

#[test]
fn replacing_the_observer_stops_delivery() {
    let (engine, recorder) = engine();
    engine.ingest_program(&adults(ActionCall::new("notify"))).unwrap();
    engine.set_observer(Arc::new(NoopObserver));
    engine.insert_fact(person("ada", 36)).unwrap();
    assert!(recorder.results().is_empty());
    assert_eq!(engine.metrics().activations, 1);
}
