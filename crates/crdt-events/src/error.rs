use thiserror::Error;

/// Error surface shared by aggregates, command dispatch, and the event store.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("optimistic concurrency conflict on stream {stream}: expected version {expected}, found {actual}")]
    Conflict {
        stream: String,
        expected: u64,
        actual: u64,
    },

    #[error("no handler registered for command type {0}")]
    NoHandler(String),

    #[error("invalid event {event_type} for aggregate {aggregate_type}: {reason}")]
    InvalidEvent {
        aggregate_type: String,
        event_type: String,
        reason: String,
    },

    #[error("unknown stream: {0}")]
    UnknownStream(String),

    #[error("operation cancelled")]
    Cancelled,
}
