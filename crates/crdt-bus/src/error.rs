use thiserror::Error;

/// Error surface for the event bus, tracker, and codec registry.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("unsupported encoding format: {0}")]
    UnsupportedFormat(String),

    #[error("subscriber {subscriber_id} not subscribed to topic {topic}")]
    NotSubscribed { topic: String, subscriber_id: String },

    #[error("bus is closed")]
    Closed,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
