use std::sync::Arc;

use crdt_bus::{EventBus, Message};

use crate::monitor::Monitor;

/// Wires a [`Monitor`] to an [`EventBus`] topic: every delivered message
/// is recorded as a received patch of its payload's byte length. Callers
/// still record `patch_applied`/`patch_rejected` themselves once they've
/// actually run the patch through a document, since the bus alone can't
/// distinguish those outcomes.
pub fn watch_topic<B: EventBus>(
    bus: &B,
    topic: &str,
    subscriber_id: &str,
    monitor: Monitor,
) -> Result<(), crdt_bus::BusError> {
    let topic_owned = topic.to_string();
    bus.subscribe(
        topic,
        subscriber_id,
        Arc::new(move |message: Message| {
            monitor.record_patch_received(&topic_owned, None, message.payload.len());
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crdt_bus::{EncodingFormat, InMemoryBus};
    use std::time::Duration;

    #[test]
    fn watched_topic_feeds_patch_received_counters() {
        let bus = InMemoryBus::new();
        let monitor = Monitor::new(crate::monitor::MonitorConfig::default());
        watch_topic(&bus, "docs", "monitor", monitor.clone()).unwrap();

        for _ in 0..3 {
            bus.publish("docs", vec![0u8; 50], EncodingFormat::Binary).unwrap();
        }

        for _ in 0..200 {
            if monitor.stats().total_patches_received == 3 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(monitor.stats().total_patches_received, 3);
    }
}
