//! Shared schema and fact builders.

use std::sync::Arc;

use discern_engine::{Engine, EngineConfig, RecordingObserver};
use discern_foundation::{Fact, FactId, Type};
use discern_language::{ActionDecl, Program, TypeDecl};

pub fn schema() -> Program {
    Program::new()
        .with_type(
            TypeDecl::new("Person")
                .key("id", Type::String)
                .field("age", Type::Number)
                .field("email", Type::String),
        )
        .with_type(
            TypeDecl::new("Order")
                .key("id", Type::String)
                .field("owner", Type::String)
                .field("total", Type::Number),
        )
        .with_action(ActionDecl::new("notify"))
        .with_action(ActionDecl::new("report").param("value", Type::Number))
}

pub fn engine_with(config: EngineConfig) -> (Engine, Arc<RecordingObserver>) {
    let engine = Engine::with_config(config);
    let recorder = Arc::new(RecordingObserver::new());
    engine.set_observer(recorder.clone());
    engine.ingest_program(&schema()).unwrap();
    (engine, recorder)
}

pub fn engine() -> (Engine, Arc<RecordingObserver>) {
    engine_with(EngineConfig::default())
}

pub fn person(id: &str, age: i64) -> Fact {
    Fact::new("Person", id)
        .with_field("id", id)
        .with_field("age", age)
        .with_field("email", format!("{id}@example.com"))
}

pub fn order(id: &str, owner: &str, total: i64) -> Fact {
    Fact::new("Order", id)
        .with_field("id", id)
        .with_field("owner", owner)
        .with_field("total", total)
}

pub fn person_id(id: &str) -> FactId {
    FactId::new("Person", id)
}

pub fn order_id(id: &str) -> FactId {
    FactId::new("Order", id)
}
