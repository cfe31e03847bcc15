//! Value semantics as indexes and predicates see them.

use std::collections::HashSet;

use discern_foundation::{FactId, Type, Value};

#[test]
fn structural_and_numeric_equality_differ() {
    assert_ne!(Value::Int(1), Value::Float(1.0));
    assert!(Value::Int(1).numeric_eq(&Value::Float(1.0)));
    assert!(!Value::Float(f64::NAN).numeric_eq(&Value::Float(f64::NAN)));
    assert!(Value::from("a").numeric_eq(&Value::from("a")));
}

#[test]
fn values_key_hash_sets() {
    let set: HashSet<Value> = [
        Value::Int(1),
        Value::Int(1),
        Value::Float(1.0),
        Value::from("one"),
        Value::Bool(true),
    ]
    .into_iter()
    .collect();
    assert_eq!(set.len(), 4);
}

#[test]
fn numbers_order_across_representations() {
    assert!(Value::Int(1) < Value::Float(1.5));
    assert!(Value::Float(-0.5) < Value::Int(0));
}

#[test]
fn types_of_values() {
    assert_eq!(Value::Int(3).value_type(), Type::Number);
    assert_eq!(Value::Float(3.5).value_type(), Type::Number);
    assert_eq!(Value::from("x").value_type(), Type::String);
    assert_eq!(
        Value::from(FactId::new("Person", "a")).value_type(),
        Type::reference("Person")
    );
}

#[test]
fn declared_types_accept_values() {
    assert!(Type::Number.accepts(&Value::Int(1)));
    assert!(Type::Number.accepts(&Value::Float(1.0)));
    assert!(!Type::Number.accepts(&Value::from("1")));
    assert!(Type::Any.accepts(&Value::Nil));
    assert!(Type::reference("Person").accepts(&Value::from(FactId::new("Person", "a"))));
    assert!(!Type::reference("Person").accepts(&Value::from(FactId::new("Order", "a"))));
}

#[test]
fn plain_strings_feed_generated_ids() {
    assert_eq!(Value::Float(5.0).to_plain_string(), "5");
    assert_eq!(Value::Int(-3).to_plain_string(), "-3");
    assert_eq!(Value::from("abc").to_plain_string(), "abc");
}
