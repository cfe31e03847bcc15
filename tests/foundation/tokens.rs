//! Tokens: persistent variable bindings.

use std::collections::HashSet;

use discern_foundation::{FactId, Token, Value};

fn person(id: &str) -> FactId {
    FactId::new("Person", id)
}

fn order(id: &str) -> FactId {
    FactId::new("Order", id)
}

#[test]
fn tokens_deduplicate_by_binding_set() {
    let a = Token::single("p", person("p1")).with_binding("o", order("o1"));
    let b = Token::single("o", order("o1")).with_binding("p", person("p1"));
    let c = Token::single("p", person("p1")).with_binding("o", order("o2"));
    let set: HashSet<Token> = [a, b, c].into_iter().collect();
    assert_eq!(set.len(), 2);
}

#[test]
fn extension_shares_the_prefix() {
    let root = Token::empty();
    let one = root.with_binding("p", person("p1"));
    let two = one.with_binding("o", order("o1"));
    assert!(root.is_empty());
    assert!(two.extends(&one));
    assert!(two.extends(&root));
    assert_eq!(two.fact_for("p"), Some(&person("p1")));
    assert_eq!(
        two.bindings().map(|b| b.variable.to_string()).collect::<Vec<_>>(),
        vec!["p", "o"]
    );
}

#[test]
fn aggregate_results_ride_on_tokens() {
    let token = Token::empty().with_value("total", Value::Float(1100.0));
    assert_eq!(token.value_for("total"), Some(&Value::Float(1100.0)));
    assert_eq!(token.values().count(), 1);
    assert!(!token.contains_fact(&order("o1")));
}

#[test]
fn key_is_stable_text() {
    let a = Token::single("p", person("p1"));
    let b = Token::single("p", person("p1"));
    assert_eq!(a.key().as_str(), b.key().as_str());
    assert_eq!(a.to_string(), "{p -> Person#p1}");
}
