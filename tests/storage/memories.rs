//! Working memories.

use discern_foundation::{FactId, Token, Value};
use discern_storage::{IndexKey, MemoryEntry, WorkingMemory, decode_memory, encode_memory};

fn order(id: &str) -> FactId {
    FactId::new("Order", id)
}

fn key(owner: &str) -> IndexKey {
    IndexKey::new(vec![Value::from(owner)])
}

// =============================================================================
// Entries
// =============================================================================

#[test]
fn entries_keep_insertion_order() {
    let mut memory = WorkingMemory::new();
    for id in ["c", "a", "b"] {
        assert!(memory.add(order(id)));
    }
    let ids: Vec<&str> = memory.facts().map(FactId::user_id).collect();
    assert_eq!(ids, vec!["c", "a", "b"]);
}

#[test]
fn duplicate_ids_are_rejected() {
    let mut memory = WorkingMemory::new();
    assert!(memory.add(order("a")));
    assert!(!memory.add(order("a")));
    assert_eq!(memory.len(), 1);

    let token = Token::single("o", order("a"));
    assert!(memory.add(token.clone()));
    assert!(!memory.add(token));
    assert_eq!(memory.len(), 2);
}

#[test]
fn removal_by_containment() {
    let mut memory = WorkingMemory::new();
    memory.add(Token::single("o", order("a")).with_binding("p", FactId::new("Person", "x")));
    memory.add(Token::single("o", order("b")).with_binding("p", FactId::new("Person", "x")));
    memory.add(Token::single("o", order("c")).with_binding("p", FactId::new("Person", "y")));

    let removed = memory.remove_containing(&FactId::new("Person", "x"));
    assert_eq!(removed.len(), 2);
    assert_eq!(memory.len(), 1);
    assert!(memory.remove("nope").is_none());
}

// =============================================================================
// Join Index
// =============================================================================

#[test]
fn index_probes_return_only_the_bucket() {
    let mut memory = WorkingMemory::new();
    memory.add_indexed(order("a"), key("p1"));
    memory.add_indexed(order("b"), key("p2"));
    memory.add_indexed(order("c"), key("p1"));

    let hits: Vec<&str> = memory
        .index_by(&key("p1"))
        .filter_map(MemoryEntry::as_fact)
        .map(FactId::user_id)
        .collect();
    assert_eq!(hits, vec!["a", "c"]);
    assert_eq!(memory.index_by(&key("p3")).count(), 0);
    assert_eq!(memory.key_of(order("b").as_str()), Some(&key("p2")));
}

#[test]
fn numeric_key_parts_are_normalized() {
    assert_eq!(
        IndexKey::new(vec![Value::Int(1)]),
        IndexKey::new(vec![Value::Float(1.0)])
    );
    assert_eq!(
        IndexKey::new(vec![Value::Float(-0.0)]),
        IndexKey::new(vec![Value::Int(0)])
    );
    assert_ne!(
        IndexKey::new(vec![Value::from("1")]),
        IndexKey::new(vec![Value::Int(1)])
    );
}

#[test]
fn emptied_buckets_are_dropped() {
    let mut memory = WorkingMemory::new();
    memory.add_indexed(order("a"), key("p1"));
    memory.add_indexed(order("b"), key("p2"));
    memory.remove(order("a").as_str());
    assert_eq!(memory.index_len(), 1);
    memory.clear();
    assert!(memory.is_empty());
    assert_eq!(memory.index_len(), 0);
}

// =============================================================================
// Snapshots
// =============================================================================

#[test]
fn clones_are_independent_snapshots() {
    let mut memory = WorkingMemory::new();
    memory.add_indexed(order("a"), key("p1"));
    let snapshot = memory.clone();

    memory.add_indexed(order("b"), key("p1"));
    memory.remove(order("a").as_str());

    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.contains(order("a").as_str()));
    assert_eq!(snapshot.index_by(&key("p1")).count(), 1);
    assert_ne!(snapshot, memory);
}

#[test]
fn encoded_memories_decode_equal() {
    let mut memory = WorkingMemory::new();
    memory.add_indexed(order("a"), key("p1"));
    memory.add(Token::empty().with_value("total", Value::Float(12.5)));

    let bytes = encode_memory(&memory).unwrap();
    let decoded = decode_memory(&bytes).unwrap();
    assert_eq!(decoded, memory);
    assert_eq!(decoded.index_by(&key("p1")).count(), 1);
}
