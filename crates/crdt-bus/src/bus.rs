use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, RwLock};
use std::thread;

use crate::error::BusError;
use crate::format::EncodingFormat;

/// One delivered message: the topic it was published to, its bytes, and
/// the format those bytes are encoded in.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub format: EncodingFormat,
}

pub type SubscriberHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// A pub/sub surface with broadcast delivery: `publish` reaches every
/// subscriber registered at dispatch time; late subscribers see nothing
/// retroactively.
pub trait EventBus: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>, format: EncodingFormat) -> Result<(), BusError>;
    fn subscribe(&self, topic: &str, subscriber_id: &str, handler: SubscriberHandler) -> Result<(), BusError>;
    fn unsubscribe(&self, topic: &str, subscriber_id: &str) -> Result<(), BusError>;
    fn close(&self) -> Result<(), BusError>;
}

struct Subscriber {
    sender: mpsc::Sender<Message>,
    worker: Option<thread::JoinHandle<()>>,
}

/// One queue per (topic, subscriber) pair, each drained by its own
/// background thread, preserving FIFO delivery per subscriber. No
/// cross-topic or cross-subscriber ordering is promised.
#[derive(Default)]
pub struct InMemoryBus {
    topics: RwLock<HashMap<String, HashMap<String, Subscriber>>>,
    closed: RwLock<bool>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if *self.closed.read().expect("bus lock poisoned") {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }
}

impl EventBus for InMemoryBus {
    fn publish(&self, topic: &str, payload: Vec<u8>, format: EncodingFormat) -> Result<(), BusError> {
        self.ensure_open()?;
        let topics = self.topics.read().expect("bus lock poisoned");
        if let Some(subscribers) = topics.get(topic) {
            for (subscriber_id, subscriber) in subscribers {
                let message = Message {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                    format,
                };
                if subscriber.sender.send(message).is_err() {
                    tracing::warn!(topic, subscriber_id, "subscriber channel closed, dropping message");
                }
            }
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str, subscriber_id: &str, handler: SubscriberHandler) -> Result<(), BusError> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::channel::<Message>();
        let worker = thread::Builder::new()
            .name(format!("crdt-bus-{topic}-{subscriber_id}"))
            .spawn(move || {
                for message in rx {
                    handler(message);
                }
            })
            .expect("failed to spawn subscriber thread");

        let mut topics = self.topics.write().expect("bus lock poisoned");
        topics
            .entry(topic.to_string())
            .or_default()
            .insert(
                subscriber_id.to_string(),
                Subscriber {
                    sender: tx,
                    worker: Some(worker),
                },
            );
        Ok(())
    }

    fn unsubscribe(&self, topic: &str, subscriber_id: &str) -> Result<(), BusError> {
        let mut topics = self.topics.write().expect("bus lock poisoned");
        let subscriber = topics
            .get_mut(topic)
            .and_then(|subscribers| subscribers.remove(subscriber_id))
            .ok_or_else(|| BusError::NotSubscribed {
                topic: topic.to_string(),
                subscriber_id: subscriber_id.to_string(),
            })?;
        // Dropping the sender disconnects the channel; the worker thread's
        // `for message in rx` loop ends on its own.
        drop(subscriber.sender);
        if let Some(worker) = subscriber.worker {
            let _ = worker.join();
        }
        Ok(())
    }

    fn close(&self) -> Result<(), BusError> {
        *self.closed.write().expect("bus lock poisoned") = true;
        let mut topics = self.topics.write().expect("bus lock poisoned");
        for (_, subscribers) in topics.drain() {
            for (_, subscriber) in subscribers {
                drop(subscriber.sender);
                if let Some(worker) = subscriber.worker {
                    let _ = worker.join();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn wait_for(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not met within timeout");
    }

    #[test]
    fn publish_delivers_to_every_registered_subscriber() {
        let bus = InMemoryBus::new();
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));
        let a = count_a.clone();
        let b = count_b.clone();

        bus.subscribe("docs", "sub-a", Arc::new(move |_msg| {
            a.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        bus.subscribe("docs", "sub-b", Arc::new(move |_msg| {
            b.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        bus.publish("docs", vec![1, 2, 3], EncodingFormat::Binary).unwrap();

        wait_for(|| count_a.load(Ordering::SeqCst) == 1 && count_b.load(Ordering::SeqCst) == 1);
    }

    #[test]
    fn unsubscribe_stops_further_delivery() {
        let bus = InMemoryBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe("docs", "sub-a", Arc::new(move |_msg| {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        bus.publish("docs", vec![1], EncodingFormat::Json).unwrap();
        wait_for(|| count.load(Ordering::SeqCst) == 1);

        bus.unsubscribe("docs", "sub-a").unwrap();
        bus.publish("docs", vec![2], EncodingFormat::Json).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_unknown_subscriber_fails() {
        let bus = InMemoryBus::new();
        let err = bus.unsubscribe("docs", "ghost").unwrap_err();
        assert!(matches!(err, BusError::NotSubscribed { .. }));
    }

    #[test]
    fn publish_after_close_fails() {
        let bus = InMemoryBus::new();
        bus.close().unwrap();
        let err = bus.publish("docs", vec![1], EncodingFormat::Json).unwrap_err();
        assert!(matches!(err, BusError::Closed));
    }
}
