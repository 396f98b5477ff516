use std::sync::Arc;

use serde_json::json;

use crdt_events::{DomainEvent, EventPublisher};

use crate::bus::EventBus;
use crate::codec_registry::{Codec, CodecRegistry};
use crate::format::EncodingFormat;

/// Bridges a [`Repository`](crdt_events::Repository) to an [`EventBus`] by
/// encoding each committed event as an envelope and publishing it to the
/// event's stream name as topic.
pub struct BusPublisher<B> {
    bus: Arc<B>,
    codec: Arc<dyn Codec>,
    format: EncodingFormat,
}

impl<B: EventBus> BusPublisher<B> {
    pub fn new(bus: Arc<B>, registry: &CodecRegistry, format: EncodingFormat) -> Self {
        let codec = registry.get(format).expect("registry always has the four built-in formats");
        Self { bus, codec, format }
    }

    fn envelope(event: &DomainEvent) -> serde_json::Value {
        json!({
            "aggregate_type": event.aggregate_type,
            "aggregate_id": event.aggregate_id,
            "version": event.version,
            "event_type": event.event_type,
            "payload": event.payload,
        })
    }
}

impl<B: EventBus> EventPublisher for BusPublisher<B> {
    fn publish(&self, topic: &str, event: &DomainEvent) {
        let envelope = Self::envelope(event);
        match self.codec.encode(&envelope) {
            Ok(bytes) => {
                if let Err(err) = self.bus.publish(topic, bytes, self.format) {
                    tracing::warn!(topic, %err, "failed to publish event to bus");
                }
            }
            Err(err) => tracing::warn!(topic, %err, "failed to encode event for bus"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn publishing_an_event_delivers_an_encoded_envelope_to_subscribers() {
        let bus = Arc::new(InMemoryBus::new());
        let registry = CodecRegistry::new();
        let publisher = BusPublisher::new(bus.clone(), &registry, EncodingFormat::Json);

        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();
        bus.subscribe(
            "counter-a-1",
            "projector",
            Arc::new(move |message| {
                let value: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
                assert_eq!(value["event_type"], "incremented");
                received_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        let event = DomainEvent {
            aggregate_type: "counter",
            aggregate_id: "a-1".to_string(),
            version: 1,
            event_type: "incremented".to_string(),
            payload: json!({"by": 1}),
        };
        publisher.publish("counter-a-1", &event);

        for _ in 0..200 {
            if received.load(Ordering::SeqCst) == 1 {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("event was not delivered");
    }
}
