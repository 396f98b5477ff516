//! Pub/sub event transport: an in-memory bus, the patch tracker that
//! collapses at-least-once delivery into at-most-once document effect,
//! and the codec registry shared by both.

pub mod bus;
pub mod codec_registry;
pub mod error;
pub mod format;
pub mod publisher;
pub mod tracker;

pub use bus::{EventBus, InMemoryBus, Message, SubscriberHandler};
pub use codec_registry::{Codec, CodecRegistry, Decoder, Encoder};
pub use error::BusError;
pub use format::EncodingFormat;
pub use publisher::BusPublisher;
pub use tracker::Tracker;
