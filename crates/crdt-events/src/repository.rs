use std::sync::Arc;

use crate::aggregate::{Aggregate, AggregateRoot, DomainEvent};
use crate::error::CoreError;
use crate::event_store::EventStore;

/// Publishes committed events to a transport after a successful append.
/// Kept as a local trait (rather than a dependency on the bus crate) so
/// the repository stays usable without pub/sub wired in.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, topic: &str, event: &DomainEvent);
}

/// Reconstitutes aggregates by reading and folding their full event
/// stream, and persists committed changes with optimistic concurrency.
pub struct Repository<S> {
    store: S,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl<S: EventStore> Repository<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            publisher: None,
        }
    }

    pub fn with_publisher(store: S, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            store,
            publisher: Some(publisher),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn load<A: Aggregate>(&self, id: impl Into<String>) -> Result<AggregateRoot<A>, CoreError> {
        let id = id.into();
        let stream = crate::aggregate::stream_name(A::AGGREGATE_TYPE, &id);
        let events = self.store.read(&stream, 0)?;
        AggregateRoot::load_from_history(id, &events)
    }

    /// Appends `aggregate`'s pending changes with
    /// `expected_version = aggregate.version() - changes.len()`. On success,
    /// publishes each event to the configured transport, if any. A failed
    /// append is surfaced as `Conflict`; callers are expected to reload
    /// and retry.
    pub fn save<A: Aggregate>(&self, aggregate: &mut AggregateRoot<A>) -> Result<(), CoreError> {
        let changes = aggregate.commit_changes();
        if changes.is_empty() {
            return Ok(());
        }
        let expected_version = aggregate.version() - changes.len() as u64;
        let stream = crate::aggregate::stream_name(A::AGGREGATE_TYPE, aggregate.id());
        self.store.append(&stream, expected_version, &changes)?;

        if let Some(publisher) = &self.publisher {
            for event in &changes {
                publisher.publish(&stream, event);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Counter {
        value: i64,
    }

    impl Aggregate for Counter {
        const AGGREGATE_TYPE: &'static str = "counter";

        fn apply(&mut self, event_type: &str, payload: &Value) -> Result<(), CoreError> {
            match event_type {
                "incremented" => {
                    self.value += payload.get("by").and_then(Value::as_i64).unwrap_or(0);
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

    struct RecordingPublisher {
        seen: Mutex<Vec<String>>,
    }

    impl EventPublisher for RecordingPublisher {
        fn publish(&self, topic: &str, event: &DomainEvent) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{topic}:{}", event.event_type));
        }
    }

    #[test]
    fn save_persists_changes_and_publishes_each_event() {
        let publisher = Arc::new(RecordingPublisher {
            seen: Mutex::new(Vec::new()),
        });
        let repo = Repository::with_publisher(InMemoryEventStore::new(), publisher.clone());

        let mut root: AggregateRoot<Counter> = AggregateRoot::new("a-1");
        root.apply_change("incremented", json!({"by": 3})).unwrap();
        repo.save(&mut root).unwrap();

        let reloaded: AggregateRoot<Counter> = repo.load("a-1").unwrap();
        assert_eq!(reloaded.version(), 1);
        assert_eq!(reloaded.state().value, 3);
        assert_eq!(*publisher.seen.lock().unwrap(), vec!["counter-a-1:incremented"]);
    }

    #[test]
    fn concurrent_save_surfaces_conflict_and_reload_then_resubmit_succeeds() {
        let repo = Repository::new(InMemoryEventStore::new());

        let mut first: AggregateRoot<Counter> = AggregateRoot::new("agg-42");
        first.apply_change("incremented", json!({"by": 1})).unwrap();
        first.apply_change("incremented", json!({"by": 1})).unwrap();
        first.apply_change("incremented", json!({"by": 1})).unwrap();
        first.apply_change("incremented", json!({"by": 1})).unwrap();
        first.apply_change("incremented", json!({"by": 1})).unwrap();
        first.apply_change("incremented", json!({"by": 1})).unwrap();
        first.apply_change("incremented", json!({"by": 1})).unwrap();
        repo.save(&mut first).unwrap();
        assert_eq!(first.version(), 7);

        // Two handlers both load the aggregate at version 7.
        let mut handler_a: AggregateRoot<Counter> = repo.load("agg-42").unwrap();
        let mut handler_b: AggregateRoot<Counter> = repo.load("agg-42").unwrap();
        handler_a.apply_change("incremented", json!({"by": 10})).unwrap();
        handler_b.apply_change("incremented", json!({"by": 20})).unwrap();

        let a_result = repo.save(&mut handler_a);
        let b_result = repo.save(&mut handler_b);
        assert!(a_result.is_ok());
        assert!(matches!(b_result, Err(CoreError::Conflict { .. })));

        // The losing handler reloads at version 8 and resubmits successfully.
        let mut reloaded: AggregateRoot<Counter> = repo.load("agg-42").unwrap();
        assert_eq!(reloaded.version(), 8);
        reloaded.apply_change("incremented", json!({"by": 20})).unwrap();
        repo.save(&mut reloaded).unwrap();
        assert_eq!(reloaded.version(), 9);
    }
}
