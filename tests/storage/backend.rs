//! The storage contract, exercised through a trait object.

use discern_foundation::{Fact, FactId};
use discern_storage::{InMemoryStorage, Storage, WorkingMemory};

fn store() -> Box<dyn Storage> {
    Box::new(InMemoryStorage::new())
}

fn person(id: &str, time: u64) -> Fact {
    Fact::new("Person", id)
        .with_field("id", id)
        .with_insertion_time(time)
}

#[test]
fn fact_table_round_trip() {
    let mut storage = store();
    storage.add_fact(person("b", 2)).unwrap();
    storage.add_fact(person("a", 1)).unwrap();
    assert_eq!(storage.fact_count(), 2);

    let ids: Vec<String> = storage
        .all_facts()
        .iter()
        .map(|f| f.user_id().to_string())
        .collect();
    assert_eq!(ids, vec!["a", "b"]);

    let removed = storage.remove_fact(&FactId::new("Person", "a")).unwrap();
    assert_eq!(removed.map(|f| f.user_id().to_string()), Some("a".into()));
    assert!(storage.remove_fact(&FactId::new("Person", "a")).unwrap().is_none());
    assert!(storage.get_fact(&FactId::new("Person", "b")).is_some());
}

#[test]
fn replacing_a_fact_keeps_one_entry() {
    let mut storage = store();
    storage.add_fact(person("a", 1)).unwrap();
    storage
        .add_fact(person("a", 1).with_field("age", 40))
        .unwrap();
    assert_eq!(storage.fact_count(), 1);
    assert!(
        storage
            .get_fact(&FactId::new("Person", "a"))
            .unwrap()
            .field("age")
            .is_some()
    );
}

#[test]
fn memories_are_listed_by_node() {
    let mut storage = store();
    let mut memory = WorkingMemory::new();
    memory.add(FactId::new("Person", "a"));

    storage.save_memory("alpha_2:left", &memory).unwrap();
    storage.save_memory("alpha_1", &memory).unwrap();
    assert_eq!(storage.list_nodes(), vec!["alpha_1", "alpha_2:left"]);
    assert_eq!(storage.load_memory("alpha_1").unwrap(), Some(memory));
    assert_eq!(storage.load_memory("missing").unwrap(), None);

    storage.delete_memory("alpha_1").unwrap();
    storage.delete_memory("alpha_1").unwrap();
    assert_eq!(storage.list_nodes(), vec!["alpha_2:left"]);

    storage.clear().unwrap();
    assert!(storage.list_nodes().is_empty());
    assert_eq!(storage.fact_count(), 0);
}
