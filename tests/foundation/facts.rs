//! Facts and their internal ids.

use discern_foundation::{ErrorKind, Fact, FactId, RESERVED_ID_FIELD, Value};

fn person(id: &str, age: i64) -> Fact {
    Fact::new("Person", id)
        .with_field("id", id)
        .with_field("age", age)
}

#[test]
fn internal_id_is_type_and_user_id() {
    let fact = person("ada", 36);
    assert_eq!(fact.internal_id(), &FactId::new("Person", "ada"));
    assert_eq!(fact.internal_id().to_string(), "Person#ada");
    assert_eq!(FactId::parse("Person#ada").unwrap(), *fact.internal_id());
}

#[test]
fn facts_are_immutable_values() {
    let original = person("ada", 36);
    let older = original.clone().with_field("age", 37);
    assert_eq!(original.field("age"), Some(&Value::Int(36)));
    assert_eq!(older.field("age"), Some(&Value::Int(37)));
    assert_eq!(original.internal_id(), older.internal_id());
}

#[test]
fn field_access_errors() {
    let fact = person("ada", 36);
    assert!(matches!(
        fact.get_field("email").unwrap_err().kind,
        ErrorKind::MissingField { .. }
    ));
    assert!(matches!(
        fact.get_field(RESERVED_ID_FIELD).unwrap_err().kind,
        ErrorKind::ReservedField(_)
    ));
}

#[test]
fn changed_fields_of_an_update() {
    let before = person("ada", 36).with_field("city", "London");
    let after = person("ada", 37).with_field("city", "London");
    let changed = before.changed_fields(&after);
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].as_ref(), "age");
}

#[test]
fn insertion_time_is_carried() {
    let fact = person("ada", 36).with_insertion_time(7);
    assert_eq!(fact.inserted_at(), 7);
    assert_eq!(fact.field_count(), 2);
}
