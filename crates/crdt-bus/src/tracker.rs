use std::collections::HashSet;
use std::sync::RwLock;

use crdt_core::model_runtime::{ApplyError, RuntimeModel};
use crdt_core::patch::Patch;

/// Wraps a document and remembers applied patch ids, collapsing an
/// at-least-once delivery transport into at-most-once effect on the
/// document.
pub struct Tracker {
    document: RwLock<RuntimeModel>,
    applied: RwLock<HashSet<(u64, u64)>>,
}

impl Tracker {
    pub fn new(document: RuntimeModel) -> Self {
        Self {
            document: RwLock::new(document),
            applied: RwLock::new(HashSet::new()),
        }
    }

    /// No-op if `patch.id()` is already recorded; otherwise applies, then
    /// records. Re-delivery of the same patch therefore never re-mutates
    /// the document.
    pub fn apply_patch(&self, patch: &Patch) -> Result<(), ApplyError> {
        let Some(id) = patch.id() else {
            return Ok(());
        };
        if self.has_applied(id) {
            tracing::debug!(sid = id.0, time = id.1, "tracker skipping already-applied patch");
            return Ok(());
        }
        self.document
            .write()
            .expect("tracker document lock poisoned")
            .apply_patch(patch)?;
        self.applied.write().expect("tracker applied-set lock poisoned").insert(id);
        Ok(())
    }

    pub fn has_applied(&self, id: (u64, u64)) -> bool {
        self.applied.read().expect("tracker applied-set lock poisoned").contains(&id)
    }

    /// Forgets applied-patch history. The document itself is left as-is;
    /// only the idempotence bookkeeping resets.
    pub fn reset(&self) {
        self.applied.write().expect("tracker applied-set lock poisoned").clear();
    }

    pub fn view(&self) -> serde_json::Value {
        self.document.read().expect("tracker document lock poisoned").view_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crdt_core::patch_builder::encode_patch_from_ops;
    use crdt_core::patch::{ConValue, DecodedOp, Timestamp};

    fn one_op_patch(sid: u64, time: u64) -> Patch {
        let ops = vec![DecodedOp::NewCon {
            id: Timestamp { sid, time },
            value: ConValue::Json(serde_json::json!(1)),
        }];
        let bytes = encode_patch_from_ops(sid, time, &ops).unwrap();
        Patch::from_binary(&bytes).unwrap()
    }

    /// S4 — Replay idempotence through the bus: redelivering the same
    /// patch five times applies it exactly once.
    #[test]
    fn repeated_apply_of_the_same_patch_is_idempotent() {
        let tracker = Tracker::new(RuntimeModel::new_logical_empty(99_999));
        let patch = one_op_patch(99_999, 1);

        assert!(!tracker.has_applied((99_999, 1)));
        for _ in 0..5 {
            tracker.apply_patch(&patch).unwrap();
        }
        assert!(tracker.has_applied((99_999, 1)));
    }

    #[test]
    fn reset_forgets_history_but_keeps_document_state() {
        let tracker = Tracker::new(RuntimeModel::new_logical_empty(99_999));
        let patch = one_op_patch(99_999, 1);
        tracker.apply_patch(&patch).unwrap();
        assert!(tracker.has_applied((99_999, 1)));

        tracker.reset();
        assert!(!tracker.has_applied((99_999, 1)));
    }
}
