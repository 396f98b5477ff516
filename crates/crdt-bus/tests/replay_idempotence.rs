use std::sync::Arc;
use std::time::Duration;

use crdt_bus::{EncodingFormat, EventBus, InMemoryBus, Tracker};
use crdt_core::model_runtime::RuntimeModel;
use crdt_core::patch::{ConValue, DecodedOp, Timestamp};
use crdt_core::patch_builder::encode_patch_from_ops;

/// S4 — Replay idempotence through the bus. A producer publishes patch
/// `P`; the consumer's bus redelivers it five times. The tracker ensures
/// exactly one application, and `has_applied` is true from the first call.
#[test]
fn redelivered_patch_is_applied_exactly_once() {
    let sid = 424_242;
    let ops = vec![DecodedOp::NewCon {
        id: Timestamp { sid, time: 1 },
        value: ConValue::Json(serde_json::json!("hello")),
    }];
    let patch_bytes = encode_patch_from_ops(sid, 1, &ops).unwrap();

    let bus = InMemoryBus::new();
    let tracker = Arc::new(Tracker::new(RuntimeModel::new_logical_empty(sid)));
    let tracker_clone = tracker.clone();

    bus.subscribe(
        "docs",
        "consumer-1",
        Arc::new(move |message| {
            let patch = crdt_core::patch::Patch::from_binary(&message.payload).unwrap();
            tracker_clone.apply_patch(&patch).unwrap();
        }),
    )
    .unwrap();

    for _ in 0..5 {
        bus.publish("docs", patch_bytes.clone(), EncodingFormat::Binary).unwrap();
    }

    for _ in 0..200 {
        if tracker.has_applied((sid, 1)) {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(tracker.has_applied((sid, 1)));

    // Give the redundant deliveries time to land; the tracker must have
    // collapsed all five into a single application.
    std::thread::sleep(Duration::from_millis(50));
    bus.close().unwrap();
}
