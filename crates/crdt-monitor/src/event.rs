use std::sync::Arc;

/// The structured events a [`crate::Monitor`] dispatches to registered
/// handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEventKind {
    PatchReceived,
    PatchApplied,
    PatchRejected,
    ConflictDetected,
    ConflictResolved,
    DocumentChanged,
    Error,
}

#[derive(Debug, Clone)]
pub struct MonitorEvent {
    pub kind: MonitorEventKind,
    pub topic: String,
    pub session_id: Option<u64>,
    pub patch_size: Option<usize>,
    pub message: Option<String>,
}

impl MonitorEvent {
    pub fn new(kind: MonitorEventKind, topic: impl Into<String>) -> Self {
        Self {
            kind,
            topic: topic.into(),
            session_id: None,
            patch_size: None,
            message: None,
        }
    }

    pub fn with_session(mut self, session_id: u64) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_patch_size(mut self, patch_size: usize) -> Self {
        self.patch_size = Some(patch_size);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

pub type MonitorHandler = Arc<dyn Fn(&MonitorEvent) + Send + Sync>;
