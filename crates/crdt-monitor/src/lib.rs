//! Patch-topic observability: aggregate counters and structured
//! `MonitorEvent`s dispatched to registered handlers.

pub mod bus_integration;
pub mod error;
pub mod event;
pub mod monitor;
pub mod stats;

pub use bus_integration::watch_topic;
pub use error::MonitorError;
pub use event::{MonitorEvent, MonitorEventKind, MonitorHandler};
pub use monitor::{Monitor, MonitorConfig};
pub use stats::{SessionStats, Stats};
