use std::sync::Arc;
use std::thread;

use crdt_events::{Aggregate, AggregateRoot, CoreError, EventStore, InMemoryEventStore, Repository};
use serde_json::{json, Value};

#[derive(Debug, Default, Clone, PartialEq)]
struct Guild {
    member_count: i64,
}

impl Aggregate for Guild {
    const AGGREGATE_TYPE: &'static str = "guild";

    fn apply(&mut self, event_type: &str, payload: &Value) -> Result<(), CoreError> {
        match event_type {
            "member_joined" => {
                self.member_count += 1;
                Ok(())
            }
            other => Err(CoreError::InvalidEvent {
                aggregate_type: String::new(),
                event_type: other.to_string(),
                reason: "unknown event type".to_string(),
            }),
        }
    }
}

/// S5 — Optimistic conflict. Two command handlers load `guild/42` at
/// version 7, each applies one event locally, and both attempt to save.
/// Exactly one succeeds; the loser reloads and resubmits successfully.
#[test]
fn concurrent_saves_at_the_same_expected_version_yield_exactly_one_winner() {
    let repo = Arc::new(Repository::new(InMemoryEventStore::new()));

    let mut seed: AggregateRoot<Guild> = AggregateRoot::new("42");
    for _ in 0..7 {
        seed.apply_change("member_joined", json!({})).unwrap();
    }
    repo.save(&mut seed).unwrap();
    assert_eq!(repo.store().current_version("guild-42").unwrap(), 7);

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let repo = repo.clone();
            thread::spawn(move || {
                let mut handler: AggregateRoot<Guild> = repo.load("42").unwrap();
                handler.apply_change("member_joined", json!({})).unwrap();
                repo.save(&mut handler)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let ok_count = results.iter().filter(|r| r.is_ok()).count();
    let conflict_count = results
        .iter()
        .filter(|r| matches!(r, Err(CoreError::Conflict { .. })))
        .count();
    assert_eq!(ok_count, 1);
    assert_eq!(conflict_count, 1);

    let mut reloaded: AggregateRoot<Guild> = repo.load("42").unwrap();
    assert_eq!(reloaded.version(), 8);
    reloaded.apply_change("member_joined", json!({})).unwrap();
    repo.save(&mut reloaded).unwrap();
    assert_eq!(repo.store().current_version("guild-42").unwrap(), 9);
}
