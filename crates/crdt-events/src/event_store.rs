use std::collections::HashMap;
use std::sync::RwLock;

use crate::aggregate::DomainEvent;
use crate::error::CoreError;

/// Per-stream event persistence with optimistic concurrency on `append`.
pub trait EventStore: Send + Sync {
    /// Atomic within the stream. Fails with `Conflict` iff the stream's
    /// current version differs from `expected_version`.
    fn append(&self, stream: &str, expected_version: u64, events: &[DomainEvent]) -> Result<(), CoreError>;

    /// Returns events strictly after `from_version`, ordered by version.
    fn read(&self, stream: &str, from_version: u64) -> Result<Vec<DomainEvent>, CoreError>;

    fn current_version(&self, stream: &str) -> Result<u64, CoreError>;
}

/// An in-process event store backed by a `RwLock`-guarded map of streams.
/// Stands in for the external MongoDB/Redis-backed stores this core treats
/// as collaborators.
#[derive(Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<String, Vec<DomainEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for InMemoryEventStore {
    fn append(&self, stream: &str, expected_version: u64, events: &[DomainEvent]) -> Result<(), CoreError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut streams = self.streams.write().expect("event store lock poisoned");
        let entry = streams.entry(stream.to_string()).or_default();
        let actual = entry.len() as u64;
        if actual != expected_version {
            tracing::debug!(stream, expected_version, actual, "optimistic concurrency conflict");
            return Err(CoreError::Conflict {
                stream: stream.to_string(),
                expected: expected_version,
                actual,
            });
        }
        entry.extend(events.iter().cloned());
        Ok(())
    }

    fn read(&self, stream: &str, from_version: u64) -> Result<Vec<DomainEvent>, CoreError> {
        let streams = self.streams.read().expect("event store lock poisoned");
        Ok(streams
            .get(stream)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.version > from_version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn current_version(&self, stream: &str) -> Result<u64, CoreError> {
        let streams = self.streams.read().expect("event store lock poisoned");
        Ok(streams.get(stream).map(|events| events.len() as u64).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(aggregate_id: &str, version: u64) -> DomainEvent {
        DomainEvent {
            aggregate_type: "counter",
            aggregate_id: aggregate_id.to_string(),
            version,
            event_type: "incremented".to_string(),
            payload: json!({"by": 1}),
        }
    }

    #[test]
    fn append_then_read_round_trips_in_version_order() {
        let store = InMemoryEventStore::new();
        store
            .append("counter-a-1", 0, &[event("a-1", 1), event("a-1", 2)])
            .unwrap();
        assert_eq!(store.current_version("counter-a-1").unwrap(), 2);

        let events = store.read("counter-a-1", 0).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].version, 1);
        assert_eq!(events[1].version, 2);

        let tail = store.read("counter-a-1", 1).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].version, 2);
    }

    #[test]
    fn append_rejects_mismatched_expected_version() {
        let store = InMemoryEventStore::new();
        store.append("counter-a-1", 0, &[event("a-1", 1)]).unwrap();
        let err = store.append("counter-a-1", 0, &[event("a-1", 2)]).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Conflict { expected: 0, actual: 1, .. }
        ));
    }

    #[test]
    fn only_one_of_two_concurrent_appends_at_the_same_expected_version_succeeds() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(InMemoryEventStore::new());
        store.append("counter-a-1", 0, &[event("a-1", 1)]).unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || store.append("counter-a-1", 1, &[event("a-1", 2)]))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ok_count = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok_count, 1);
        assert_eq!(store.current_version("counter-a-1").unwrap(), 2);
    }
}
