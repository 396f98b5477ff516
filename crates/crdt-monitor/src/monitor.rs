use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use crdt_events::CancelToken;

use crate::error::MonitorError;
use crate::event::{MonitorEvent, MonitorEventKind, MonitorHandler};
use crate::stats::{Stats, StatsAccumulator};

/// Configuration for a [`Monitor`]: the rolling window used to compute
/// `patches_per_second`, and the interval its background sampler wakes on.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    pub window: Duration,
    pub sampling_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            sampling_interval: Duration::from_millis(100),
        }
    }
}

struct Sampler {
    cancel: CancelToken,
    worker: thread::JoinHandle<()>,
}

struct Inner {
    accumulator: Mutex<StatsAccumulator>,
    handlers: RwLock<Vec<MonitorHandler>>,
    sampler: Mutex<Option<Sampler>>,
    config: MonitorConfig,
}

/// Subscribes (conceptually) to patch topics and maintains aggregate
/// counters and structured [`MonitorEvent`]s for observability. Handlers
/// are invoked synchronously, in registration order, from whichever
/// thread calls `record_*`.
///
/// `Monitor` is a cheap-to-clone handle around a shared inner state, the
/// same shape callers elsewhere in this workspace get from wrapping a
/// type in `Arc` themselves; this just builds the sharing in so the
/// sampling thread can hold its own handle without extra `Arc` nesting.
#[derive(Clone)]
pub struct Monitor(Arc<Inner>);

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        Monitor(Arc::new(Inner {
            accumulator: Mutex::new(StatsAccumulator::new(config.window)),
            handlers: RwLock::new(Vec::new()),
            sampler: Mutex::new(None),
            config,
        }))
    }

    pub fn register_handler(&self, handler: MonitorHandler) {
        self.0.handlers.write().expect("monitor handlers lock poisoned").push(handler);
    }

    fn dispatch(&self, event: MonitorEvent) {
        for handler in self.0.handlers.read().expect("monitor handlers lock poisoned").iter() {
            handler(&event);
        }
    }

    pub fn record_patch_received(&self, topic: &str, session_id: Option<u64>, patch_size: usize) {
        self.0
            .accumulator
            .lock()
            .expect("monitor accumulator lock poisoned")
            .record_received(session_id, patch_size);
        let mut event = MonitorEvent::new(MonitorEventKind::PatchReceived, topic).with_patch_size(patch_size);
        if let Some(sid) = session_id {
            event = event.with_session(sid);
        }
        self.dispatch(event);
    }

    pub fn record_patch_applied(&self, topic: &str, session_id: Option<u64>) {
        self.0
            .accumulator
            .lock()
            .expect("monitor accumulator lock poisoned")
            .record_applied(session_id);
        let mut event = MonitorEvent::new(MonitorEventKind::PatchApplied, topic);
        if let Some(sid) = session_id {
            event = event.with_session(sid);
        }
        self.dispatch(event);
    }

    pub fn record_patch_rejected(&self, topic: &str, session_id: Option<u64>, reason: impl Into<String>) {
        self.0
            .accumulator
            .lock()
            .expect("monitor accumulator lock poisoned")
            .record_rejected(session_id);
        let mut event = MonitorEvent::new(MonitorEventKind::PatchRejected, topic).with_message(reason);
        if let Some(sid) = session_id {
            event = event.with_session(sid);
        }
        self.dispatch(event);
    }

    pub fn record_conflict_detected(&self, topic: &str, message: impl Into<String>) {
        self.dispatch(MonitorEvent::new(MonitorEventKind::ConflictDetected, topic).with_message(message));
    }

    pub fn record_conflict_resolved(&self, topic: &str, message: impl Into<String>) {
        self.dispatch(MonitorEvent::new(MonitorEventKind::ConflictResolved, topic).with_message(message));
    }

    pub fn record_document_changed(&self, topic: &str) {
        self.dispatch(MonitorEvent::new(MonitorEventKind::DocumentChanged, topic));
    }

    pub fn record_error(&self, topic: &str, message: impl Into<String>) {
        self.dispatch(MonitorEvent::new(MonitorEventKind::Error, topic).with_message(message));
    }

    pub fn stats(&self) -> Stats {
        self.0.accumulator.lock().expect("monitor accumulator lock poisoned").snapshot()
    }

    /// Starts the background sampling loop, which wakes every
    /// `sampling_interval` only to purge the rolling window so idle
    /// periods don't leave stale `patches_per_second` readings; errors if
    /// already running. Safe to call again after `stop_sampling`.
    pub fn start_sampling(&self) -> Result<(), MonitorError> {
        let mut slot = self.0.sampler.lock().expect("monitor sampler lock poisoned");
        if slot.is_some() {
            tracing::debug!("start_sampling called while already sampling");
            return Err(MonitorError::AlreadySampling);
        }
        let cancel = CancelToken::new();
        let cancel_clone = cancel.clone();
        let this = self.clone();
        let interval = self.0.config.sampling_interval;
        let worker = thread::Builder::new()
            .name("crdt-monitor-sampler".to_string())
            .spawn(move || {
                while !cancel_clone.is_cancelled() {
                    thread::sleep(interval);
                    let _ = this.stats();
                }
            })
            .expect("failed to spawn monitor sampling thread");
        *slot = Some(Sampler { cancel, worker });
        tracing::debug!(interval_ms = interval.as_millis() as u64, "monitor sampling started");
        Ok(())
    }

    pub fn stop_sampling(&self) -> Result<(), MonitorError> {
        let sampler = self
            .0
            .sampler
            .lock()
            .expect("monitor sampler lock poisoned")
            .take()
            .ok_or(MonitorError::NotSampling)?;
        sampler.cancel.cancel();
        let _ = sampler.worker.join();
        tracing::debug!("monitor sampling stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S6 — Monitor statistics. Over a window, publishing 100 patches of
    /// 50 bytes each yields the documented aggregate counters.
    #[test]
    fn scenario_s6_aggregate_counters_over_a_window() {
        let monitor = Monitor::new(MonitorConfig {
            window: Duration::from_secs(1),
            sampling_interval: Duration::from_millis(50),
        });
        for _ in 0..100 {
            monitor.record_patch_received("docs", None, 50);
        }
        let stats = monitor.stats();
        assert_eq!(stats.total_patches_received, 100);
        assert_eq!(stats.average_patch_size, 50.0);
        assert_eq!(stats.min_patch_size, Some(50));
        assert_eq!(stats.max_patch_size, Some(50));
        assert!((stats.patches_per_second - 100.0).abs() < 5.0);
    }

    #[test]
    fn handlers_receive_every_recorded_event_kind() {
        let monitor = Monitor::new(MonitorConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        monitor.register_handler(Arc::new(move |event: &MonitorEvent| {
            seen_clone.lock().unwrap().push(event.kind);
        }));

        monitor.record_patch_received("docs", Some(7), 10);
        monitor.record_patch_applied("docs", Some(7));
        monitor.record_patch_rejected("docs", Some(7), "stale");
        monitor.record_conflict_detected("docs", "x");
        monitor.record_conflict_resolved("docs", "x");
        monitor.record_document_changed("docs");
        monitor.record_error("docs", "boom");

        let kinds = seen.lock().unwrap().clone();
        assert_eq!(
            kinds,
            vec![
                MonitorEventKind::PatchReceived,
                MonitorEventKind::PatchApplied,
                MonitorEventKind::PatchRejected,
                MonitorEventKind::ConflictDetected,
                MonitorEventKind::ConflictResolved,
                MonitorEventKind::DocumentChanged,
                MonitorEventKind::Error,
            ]
        );
    }

    #[test]
    fn sampling_can_be_started_and_stopped_repeatedly() {
        let monitor = Monitor::new(MonitorConfig {
            window: Duration::from_millis(200),
            sampling_interval: Duration::from_millis(10),
        });
        monitor.start_sampling().unwrap();
        assert!(matches!(monitor.start_sampling(), Err(MonitorError::AlreadySampling)));
        monitor.stop_sampling().unwrap();
        assert!(matches!(monitor.stop_sampling(), Err(MonitorError::NotSampling)));
        monitor.start_sampling().unwrap();
        monitor.stop_sampling().unwrap();
    }
}
