use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Per-session patch counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub received: u64,
    pub applied: u64,
    pub rejected: u64,
}

/// A point-in-time snapshot of the monitor's aggregate counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    pub total_patches_received: u64,
    pub total_patches_applied: u64,
    pub total_patches_rejected: u64,
    pub min_patch_size: Option<usize>,
    pub max_patch_size: Option<usize>,
    pub average_patch_size: f64,
    pub patches_per_second: f64,
    pub per_session: HashMap<u64, SessionStats>,
}

/// Accumulates the counters behind [`Stats`], including the rolling
/// window used for `patches_per_second`.
pub(crate) struct StatsAccumulator {
    total_received: u64,
    total_applied: u64,
    total_rejected: u64,
    size_sum: u128,
    size_count: u64,
    min_size: Option<usize>,
    max_size: Option<usize>,
    per_session: HashMap<u64, SessionStats>,
    window: VecDeque<Instant>,
    window_duration: Duration,
}

impl StatsAccumulator {
    pub(crate) fn new(window_duration: Duration) -> Self {
        Self {
            total_received: 0,
            total_applied: 0,
            total_rejected: 0,
            size_sum: 0,
            size_count: 0,
            min_size: None,
            max_size: None,
            per_session: HashMap::new(),
            window: VecDeque::new(),
            window_duration,
        }
    }

    pub(crate) fn record_received(&mut self, session_id: Option<u64>, patch_size: usize) {
        self.total_received += 1;
        self.size_sum += patch_size as u128;
        self.size_count += 1;
        self.min_size = Some(self.min_size.map_or(patch_size, |m| m.min(patch_size)));
        self.max_size = Some(self.max_size.map_or(patch_size, |m| m.max(patch_size)));
        self.window.push_back(Instant::now());
        if let Some(sid) = session_id {
            self.per_session.entry(sid).or_default().received += 1;
        }
    }

    pub(crate) fn record_applied(&mut self, session_id: Option<u64>) {
        self.total_applied += 1;
        if let Some(sid) = session_id {
            self.per_session.entry(sid).or_default().applied += 1;
        }
    }

    pub(crate) fn record_rejected(&mut self, session_id: Option<u64>) {
        self.total_rejected += 1;
        if let Some(sid) = session_id {
            self.per_session.entry(sid).or_default().rejected += 1;
        }
    }

    fn purge_window(&mut self) {
        let cutoff = Instant::now().checked_sub(self.window_duration).unwrap_or_else(Instant::now);
        while matches!(self.window.front(), Some(t) if *t < cutoff) {
            self.window.pop_front();
        }
    }

    pub(crate) fn snapshot(&mut self) -> Stats {
        self.purge_window();
        let average_patch_size = if self.size_count > 0 {
            self.size_sum as f64 / self.size_count as f64
        } else {
            0.0
        };
        let patches_per_second = self.window.len() as f64 / self.window_duration.as_secs_f64();
        Stats {
            total_patches_received: self.total_received,
            total_patches_applied: self.total_applied,
            total_patches_rejected: self.total_rejected,
            min_patch_size: self.min_size,
            max_patch_size: self.max_size,
            average_patch_size,
            patches_per_second,
            per_session: self.per_session.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_min_max_track_recorded_sizes() {
        let mut acc = StatsAccumulator::new(Duration::from_secs(1));
        acc.record_received(None, 50);
        acc.record_received(None, 50);
        let stats = acc.snapshot();
        assert_eq!(stats.total_patches_received, 2);
        assert_eq!(stats.average_patch_size, 50.0);
        assert_eq!(stats.min_patch_size, Some(50));
        assert_eq!(stats.max_patch_size, Some(50));
    }

    #[test]
    fn per_session_counters_are_isolated() {
        let mut acc = StatsAccumulator::new(Duration::from_secs(1));
        acc.record_received(Some(1), 10);
        acc.record_received(Some(2), 20);
        acc.record_applied(Some(1));
        let stats = acc.snapshot();
        assert_eq!(stats.per_session[&1].received, 1);
        assert_eq!(stats.per_session[&1].applied, 1);
        assert_eq!(stats.per_session[&2].received, 1);
        assert_eq!(stats.per_session[&2].applied, 0);
    }
}
