//! Cross-cutting correctness properties for the document engine: patches
//! from independent sessions commute and associate into the same view,
//! re-applying a patch is a no-op, deletions stay deleted, and the three
//! interoperable wire codecs agree with the native binary one.

use serde_json::{json, Value};

use crdt_core::model_runtime::RuntimeModel;
use crdt_core::patch::{ConValue, DecodedOp, Patch, Timestamp};
use crdt_core::patch_builder::PatchBuilder;
use crdt_core::patch_compact_binary_codec::{decode_patch_compact_binary, encode_patch_compact_binary};
use crdt_core::patch_compact_codec::{decode_patch_compact, encode_patch_compact};
use crdt_core::patch_verbose_codec::{decode_patch_verbose, encode_patch_verbose};

const SID_A: u64 = 70_000;
const SID_B: u64 = 70_001;

fn ts(sid: u64, time: u64) -> Timestamp {
    Timestamp { sid, time }
}

/// Builds a patch that sets the document root to `{"<key>": "<value>"}`,
/// starting the session's clock at `time`.
fn single_key_object_patch(sid: u64, time: u64, key: &str, value: &str) -> Patch {
    let mut b = PatchBuilder::new(sid, time);
    let obj_id = ts(sid, time);
    b.push_op(DecodedOp::NewObj { id: obj_id });

    let str_id = ts(sid, time + 1);
    b.push_op(DecodedOp::NewStr { id: str_id });

    let ins_str_id = ts(sid, time + 2);
    b.push_op(DecodedOp::InsStr {
        id: ins_str_id,
        obj: str_id,
        reference: str_id,
        data: value.to_string(),
    });

    let ins_obj_time = time + 2 + value.chars().count() as u64;
    let ins_obj_id = ts(sid, ins_obj_time);
    b.push_op(DecodedOp::InsObj {
        id: ins_obj_id,
        obj: obj_id,
        data: vec![(key.to_string(), str_id)],
    });

    let ins_val_id = ts(sid, ins_obj_time + 1);
    b.push_op(DecodedOp::InsVal {
        id: ins_val_id,
        obj: ts(0, 0),
        val: obj_id,
    });

    b.into_patch().expect("well-formed single-key-object patch")
}

/// A patch that creates a plain constant node holding `value` and sets it
/// as the document root (used for the register tie-break scenarios).
fn root_register_patch(sid: u64, time: u64, value: Value) -> Patch {
    let mut b = PatchBuilder::new(sid, time);
    let con_id = ts(sid, time);
    b.push_op(DecodedOp::NewCon {
        id: con_id,
        value: ConValue::Json(value),
    });
    let ins_val_id = ts(sid, time + 1);
    b.push_op(DecodedOp::InsVal {
        id: ins_val_id,
        obj: ts(0, 0),
        val: con_id,
    });
    b.into_patch().expect("well-formed register patch")
}

#[test]
fn scenario_s1_builds_a_single_key_object_behaviorally() {
    let patch = single_key_object_patch(SID_A, 1, "foo", "bar");
    let mut model = RuntimeModel::new_logical_empty(SID_A);
    model.apply_patch(&patch).expect("apply single-key patch");
    assert_eq!(model.view_json(), json!({"foo": "bar"}));
}

#[test]
fn commutativity_of_independent_session_patches() {
    let patch_a = single_key_object_patch(SID_A, 1, "foo", "bar");
    let patch_b = root_register_patch(SID_B, 1, json!(42));

    let mut ab = RuntimeModel::new_logical_empty(SID_A);
    ab.apply_patch(&patch_a).unwrap();
    ab.apply_patch(&patch_b).unwrap();

    let mut ba = RuntimeModel::new_logical_empty(SID_A);
    ba.apply_patch(&patch_b).unwrap();
    ba.apply_patch(&patch_a).unwrap();

    assert_eq!(ab.view_json(), ba.view_json());
}

#[test]
fn associativity_of_three_independent_patches_under_any_grouping() {
    let patch_a = single_key_object_patch(SID_A, 1, "foo", "bar");
    let patch_b = root_register_patch(SID_B, 1, json!(42));
    let patch_c = root_register_patch(SID_B, 50, json!(false));

    let orders: [[&Patch; 3]; 3] = [
        [&patch_a, &patch_b, &patch_c],
        [&patch_c, &patch_b, &patch_a],
        [&patch_b, &patch_c, &patch_a],
    ];

    let views: Vec<Value> = orders
        .iter()
        .map(|order| {
            let mut model = RuntimeModel::new_logical_empty(SID_A);
            for patch in order {
                model.apply_patch(patch).unwrap();
            }
            model.view_json()
        })
        .collect();

    assert!(views.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn idempotence_of_reapplying_the_same_patch() {
    let patch = single_key_object_patch(SID_A, 1, "foo", "bar");
    let mut model = RuntimeModel::new_logical_empty(SID_A);
    model.apply_patch(&patch).unwrap();
    let once = model.view_json();

    model.apply_patch(&patch).unwrap();
    let twice = model.view_json();

    assert_eq!(once, twice);
}

/// S2 — concurrent last-write-wins register updates at the same logical
/// time tie-break deterministically on session id, regardless of apply
/// order.
#[test]
fn scenario_s2_concurrent_register_writes_tie_break_on_session_id() {
    let low_sid_patch = root_register_patch(SID_A, 5, json!("low"));
    let high_sid_patch = root_register_patch(SID_B, 5, json!("high"));

    let mut low_then_high = RuntimeModel::new_logical_empty(SID_A);
    low_then_high.apply_patch(&low_sid_patch).unwrap();
    low_then_high.apply_patch(&high_sid_patch).unwrap();

    let mut high_then_low = RuntimeModel::new_logical_empty(SID_A);
    high_then_low.apply_patch(&high_sid_patch).unwrap();
    high_then_low.apply_patch(&low_sid_patch).unwrap();

    assert_eq!(low_then_high.view_json(), json!("high"));
    assert_eq!(high_then_low.view_json(), json!("high"));
}

/// S3 — concurrent RGA insertions at the same reference position converge
/// to the same order (higher session id sorts closer to the reference)
/// no matter which patch is applied first.
#[test]
fn scenario_s3_concurrent_list_insertions_converge_on_session_id_order() {
    fn insert_at_head_patch(sid: u64, time: u64, ch: char) -> (Patch, Timestamp) {
        let mut b = PatchBuilder::new(sid, time);
        let str_id = ts(sid, time);
        b.push_op(DecodedOp::NewStr { id: str_id });
        let ins_id = ts(sid, time + 1);
        b.push_op(DecodedOp::InsStr {
            id: ins_id,
            obj: str_id,
            reference: str_id,
            data: ch.to_string(),
        });
        (b.into_patch().expect("well-formed string patch"), str_id)
    }

    // Build a shared string container up front under a neutral session,
    // then apply two concurrent single-character inserts at its head from
    // two different sessions, in both orders.
    let (base_patch, str_id) = insert_at_head_patch(SID_A, 1, 'x');

    let mut insert_a = PatchBuilder::new(SID_A, 10);
    let a_id = ts(SID_A, 10);
    insert_a.push_op(DecodedOp::InsStr {
        id: a_id,
        obj: str_id,
        reference: str_id,
        data: "a".to_string(),
    });
    let patch_a = insert_a.into_patch().unwrap();

    let mut insert_b = PatchBuilder::new(SID_B, 10);
    let b_id = ts(SID_B, 10);
    insert_b.push_op(DecodedOp::InsStr {
        id: b_id,
        obj: str_id,
        reference: str_id,
        data: "b".to_string(),
    });
    let patch_b = insert_b.into_patch().unwrap();

    let mut ab = RuntimeModel::new_logical_empty(SID_A);
    ab.apply_patch(&base_patch).unwrap();
    ab.apply_patch(&patch_a).unwrap();
    ab.apply_patch(&patch_b).unwrap();

    let mut ba = RuntimeModel::new_logical_empty(SID_A);
    ba.apply_patch(&base_patch).unwrap();
    ba.apply_patch(&patch_b).unwrap();
    ba.apply_patch(&patch_a).unwrap();

    assert_eq!(ab.view_json(), ba.view_json());
    // SID_B > SID_A, so "b" sorts ahead of "a" at the shared head position.
    assert_eq!(ab.view_json(), json!("bax"));
}

#[test]
fn tombstone_stability_under_repeated_deletion() {
    let mut b = PatchBuilder::new(SID_A, 1);
    let str_id = ts(SID_A, 1);
    b.push_op(DecodedOp::NewStr { id: str_id });
    let ins_id = ts(SID_A, 2);
    b.push_op(DecodedOp::InsStr {
        id: ins_id,
        obj: str_id,
        reference: str_id,
        data: "bar".to_string(),
    });
    let ins_val_id = ts(SID_A, 5);
    b.push_op(DecodedOp::InsVal {
        id: ins_val_id,
        obj: ts(0, 0),
        val: str_id,
    });
    let patch = b.into_patch().unwrap();

    let mut model = RuntimeModel::new_logical_empty(SID_A);
    model.apply_patch(&patch).unwrap();
    assert_eq!(model.view_json(), json!("bar"));

    let mut del = PatchBuilder::new(SID_A, 6);
    let del_id = ts(SID_A, 6);
    del.push_op(DecodedOp::Del {
        id: del_id,
        obj: str_id,
        what: vec![crdt_core::patch::Timespan {
            sid: SID_A,
            time: 2,
            span: 1,
        }],
    });
    let del_patch = del.into_patch().unwrap();

    model.apply_patch(&del_patch).unwrap();
    assert_eq!(model.view_json(), json!("ar"));

    // Re-deleting the same span is a no-op: the tombstone stays removed.
    model.apply_patch(&del_patch).unwrap();
    assert_eq!(model.view_json(), json!("ar"));
}

#[test]
fn verbose_codec_round_trips_through_apply() {
    let patch = single_key_object_patch(SID_A, 1, "foo", "bar");
    let verbose = encode_patch_verbose(&patch).expect("encode verbose");
    let decoded = decode_patch_verbose(&verbose).expect("decode verbose");

    let mut model = RuntimeModel::new_logical_empty(SID_A);
    model.apply_patch(&decoded).unwrap();
    assert_eq!(model.view_json(), json!({"foo": "bar"}));
}

#[test]
fn compact_codec_round_trips_through_apply() {
    let patch = single_key_object_patch(SID_A, 1, "foo", "bar");
    let compact = encode_patch_compact(&patch).expect("encode compact");
    let decoded = decode_patch_compact(&compact).expect("decode compact");

    let mut model = RuntimeModel::new_logical_empty(SID_A);
    model.apply_patch(&decoded).unwrap();
    assert_eq!(model.view_json(), json!({"foo": "bar"}));
}

#[test]
fn compact_binary_codec_round_trips_through_apply() {
    let patch = single_key_object_patch(SID_A, 1, "foo", "bar");
    let bytes = encode_patch_compact_binary(&patch).expect("encode compact-binary");
    let decoded = decode_patch_compact_binary(&bytes).expect("decode compact-binary");

    let mut model = RuntimeModel::new_logical_empty(SID_A);
    model.apply_patch(&decoded).unwrap();
    assert_eq!(model.view_json(), json!({"foo": "bar"}));
}

#[test]
fn native_binary_codec_round_trips_bit_for_bit() {
    let patch = single_key_object_patch(SID_A, 1, "foo", "bar");
    let bytes = patch.to_binary();
    let decoded = Patch::from_binary(&bytes).expect("decode native binary");
    assert_eq!(patch.decoded_ops(), decoded.decoded_ops());

    let mut model = RuntimeModel::new_logical_empty(SID_A);
    model.apply_patch(&decoded).unwrap();
    assert_eq!(model.view_json(), json!({"foo": "bar"}));
}

#[test]
fn per_stream_ops_stay_in_canonical_time_order() {
    let patch = single_key_object_patch(SID_A, 1, "foo", "bar");
    let mut prev_end = patch.id().map(|(_, t)| t).unwrap_or(0);
    for op in patch.decoded_ops() {
        let id = op.id();
        assert_eq!(id.sid, SID_A);
        assert_eq!(id.time, prev_end);
        prev_end += op.span();
    }
}
