use serde_json::Value;

use crate::error::CoreError;

/// An immutable record of a completed state change to one aggregate,
/// tagged with a monotonically-increasing version within its stream.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    pub aggregate_type: &'static str,
    pub aggregate_id: String,
    pub version: u64,
    pub event_type: String,
    pub payload: Value,
}

/// The per-aggregate stream name convention: `"<aggregate-type>-<aggregate-id>"`.
pub fn stream_name(aggregate_type: &str, aggregate_id: &str) -> String {
    format!("{aggregate_type}-{aggregate_id}")
}

/// The state-transition behavior of one aggregate type. Implementors hold
/// only domain fields; identity, version, and the pending-changes buffer
/// live in [`AggregateRoot`].
pub trait Aggregate: Default {
    const AGGREGATE_TYPE: &'static str;

    /// Fold one event into the aggregate's in-memory state. Unknown event
    /// types or malformed payloads are reported as `InvalidEvent`, which
    /// aborts `apply_change` or `load_from_history`.
    fn apply(&mut self, event_type: &str, payload: &Value) -> Result<(), CoreError>;
}

/// Wraps one aggregate's domain state with identity, version, and the
/// buffered list of events produced since the last commit.
#[derive(Debug, Clone)]
pub struct AggregateRoot<A> {
    id: String,
    state: A,
    version: u64,
    changes: Vec<DomainEvent>,
}

impl<A: Aggregate> AggregateRoot<A> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: A::default(),
            version: 0,
            changes: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    pub fn changes(&self) -> &[DomainEvent] {
        &self.changes
    }

    pub fn stream(&self) -> String {
        stream_name(A::AGGREGATE_TYPE, &self.id)
    }

    /// Allocates the next event version (`version + 1`, offset by the
    /// number of already-buffered changes), folds it into the aggregate's
    /// state, and appends it to the pending-changes buffer.
    pub fn apply_change(&mut self, event_type: impl Into<String>, payload: Value) -> Result<(), CoreError> {
        let event_type = event_type.into();
        self.state.apply(&event_type, &payload).map_err(|err| match err {
            CoreError::InvalidEvent { reason, .. } => CoreError::InvalidEvent {
                aggregate_type: A::AGGREGATE_TYPE.to_string(),
                event_type: event_type.clone(),
                reason,
            },
            other => other,
        })?;
        let next_version = self.version + self.changes.len() as u64 + 1;
        self.changes.push(DomainEvent {
            aggregate_type: A::AGGREGATE_TYPE,
            aggregate_id: self.id.clone(),
            version: next_version,
            event_type,
            payload,
        });
        Ok(())
    }

    /// Moves the buffered changes out for persistence, bumping `version`
    /// by the number of committed events. The aggregate's in-memory state
    /// (already updated by `apply_change`) is left unchanged.
    pub fn commit_changes(&mut self) -> Vec<DomainEvent> {
        let changes = std::mem::take(&mut self.changes);
        self.version += changes.len() as u64;
        changes
    }

    /// Rebuilds an aggregate by folding every event in `events`, advancing
    /// `version` once per event. Errors abort the fold, leaving no aggregate.
    pub fn load_from_history(id: impl Into<String>, events: &[DomainEvent]) -> Result<Self, CoreError> {
        let mut root = Self::new(id);
        for event in events {
            root.state.apply(&event.event_type, &event.payload).map_err(|err| match err {
                CoreError::InvalidEvent { reason, .. } => CoreError::InvalidEvent {
                    aggregate_type: A::AGGREGATE_TYPE.to_string(),
                    event_type: event.event_type.clone(),
                    reason,
                },
                other => other,
            })?;
            root.version = event.version;
        }
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Counter {
        value: i64,
    }

    impl Aggregate for Counter {
        const AGGREGATE_TYPE: &'static str = "counter";

        fn apply(&mut self, event_type: &str, payload: &Value) -> Result<(), CoreError> {
            match event_type {
                "incremented" => {
                    let by = payload.get("by").and_then(Value::as_i64).unwrap_or(0);
                    self.value += by;
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

    #[test]
    fn apply_change_allocates_sequential_versions_and_mutates_state() {
        let mut root: AggregateRoot<Counter> = AggregateRoot::new("a-1");
        root.apply_change("incremented", json!({"by": 3})).unwrap();
        root.apply_change("incremented", json!({"by": 4})).unwrap();

        assert_eq!(root.state().value, 7);
        assert_eq!(root.version(), 0);
        assert_eq!(root.changes().len(), 2);
        assert_eq!(root.changes()[0].version, 1);
        assert_eq!(root.changes()[1].version, 2);
    }

    #[test]
    fn commit_changes_bumps_version_and_clears_buffer() {
        let mut root: AggregateRoot<Counter> = AggregateRoot::new("a-1");
        root.apply_change("incremented", json!({"by": 1})).unwrap();
        root.apply_change("incremented", json!({"by": 1})).unwrap();
        let changes = root.commit_changes();

        assert_eq!(changes.len(), 2);
        assert_eq!(root.version(), 2);
        assert!(root.changes().is_empty());
        assert_eq!(root.state().value, 2);
    }

    #[test]
    fn load_from_history_replays_every_event() {
        let events = vec![
            DomainEvent {
                aggregate_type: Counter::AGGREGATE_TYPE,
                aggregate_id: "a-1".to_string(),
                version: 1,
                event_type: "incremented".to_string(),
                payload: json!({"by": 5}),
            },
            DomainEvent {
                aggregate_type: Counter::AGGREGATE_TYPE,
                aggregate_id: "a-1".to_string(),
                version: 2,
                event_type: "incremented".to_string(),
                payload: json!({"by": -2}),
            },
        ];
        let root: AggregateRoot<Counter> = AggregateRoot::load_from_history("a-1", &events).unwrap();
        assert_eq!(root.version(), 2);
        assert_eq!(root.state().value, 3);
    }

    #[test]
    fn load_from_history_aborts_on_invalid_event() {
        let events = vec![DomainEvent {
            aggregate_type: Counter::AGGREGATE_TYPE,
            aggregate_id: "a-1".to_string(),
            version: 1,
            event_type: "unknown".to_string(),
            payload: json!({}),
        }];
        let result: Result<AggregateRoot<Counter>, _> = AggregateRoot::load_from_history("a-1", &events);
        assert!(matches!(result, Err(CoreError::InvalidEvent { .. })));
    }
}
