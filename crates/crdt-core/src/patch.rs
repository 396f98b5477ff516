//! JSON CRDT Patch binary handling.
//!
//! Implementation note:
//! - Exact wire bytes are preserved, and enough semantic operation payload is
//!   decoded to drive runtime application.
//! - Decoding is permissive for many malformed payloads, matching the
//!   tolerance expected of a long-lived collaborative document store.

use ciborium::value::Value;
use serde_json::Number;
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("patch decode overflow")]
    Overflow,
    #[error("unknown patch opcode: {0}")]
    UnknownOpcode(u8),
    #[error("invalid cbor in patch")]
    InvalidCbor,
    #[error("trailing bytes in patch")]
    TrailingBytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp {
    pub sid: u64,
    pub time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timespan {
    pub sid: u64,
    pub time: u64,
    pub span: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConValue {
    Json(serde_json::Value),
    Ref(Timestamp),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedOp {
    NewCon { id: Timestamp, value: ConValue },
    NewVal { id: Timestamp },
    NewObj { id: Timestamp },
    NewVec { id: Timestamp },
    NewStr { id: Timestamp },
    NewBin { id: Timestamp },
    NewArr { id: Timestamp },
    InsVal { id: Timestamp, obj: Timestamp, val: Timestamp },
    InsObj {
        id: Timestamp,
        obj: Timestamp,
        data: Vec<(String, Timestamp)>,
    },
    InsVec {
        id: Timestamp,
        obj: Timestamp,
        data: Vec<(u64, Timestamp)>,
    },
    InsStr {
        id: Timestamp,
        obj: Timestamp,
        reference: Timestamp,
        data: String,
    },
    InsBin {
        id: Timestamp,
        obj: Timestamp,
        reference: Timestamp,
        data: Vec<u8>,
    },
    InsArr {
        id: Timestamp,
        obj: Timestamp,
        reference: Timestamp,
        data: Vec<Timestamp>,
    },
    UpdArr {
        id: Timestamp,
        obj: Timestamp,
        reference: Timestamp,
        val: Timestamp,
    },
    Del {
        id: Timestamp,
        obj: Timestamp,
        what: Vec<Timespan>,
    },
    Nop { id: Timestamp, len: u64 },
}

impl DecodedOp {
    pub fn id(&self) -> Timestamp {
        match self {
            DecodedOp::NewCon { id, .. }
            | DecodedOp::NewVal { id }
            | DecodedOp::NewObj { id }
            | DecodedOp::NewVec { id }
            | DecodedOp::NewStr { id }
            | DecodedOp::NewBin { id }
            | DecodedOp::NewArr { id }
            | DecodedOp::InsVal { id, .. }
            | DecodedOp::InsObj { id, .. }
            | DecodedOp::InsVec { id, .. }
            | DecodedOp::InsStr { id, .. }
            | DecodedOp::InsBin { id, .. }
            | DecodedOp::InsArr { id, .. }
            | DecodedOp::UpdArr { id, .. }
            | DecodedOp::Del { id, .. }
            | DecodedOp::Nop { id, .. } => *id,
        }
    }

    pub fn span(&self) -> u64 {
        match self {
            DecodedOp::InsStr { data, .. } => data.chars().count() as u64,
            DecodedOp::InsBin { data, .. } => data.len() as u64,
            DecodedOp::InsArr { data, .. } => data.len() as u64,
            DecodedOp::Nop { len, .. } => *len,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    /// Original binary payload, preserved for exact wire round-trips.
    bytes: Vec<u8>,
    op_count: u64,
    span: u64,
    sid: u64,
    time: u64,
    opcodes: Vec<u8>,
    decoded_ops: Vec<DecodedOp>,
}

impl Patch {
    pub fn from_binary(data: &[u8]) -> Result<Self, PatchError> {
        let mut reader = Reader::new(data);
        let decoded = decode_patch(&mut reader);
        if let Err(err) = decoded {
            // Decoding is permissive for many malformed payloads.
            if matches!(err, PatchError::InvalidCbor) {
                // An ASCII JSON payload (`0x7b` / '{') is rejected outright.
                if data.first() == Some(&0x7b) {
                    return Err(err);
                }
            }
            return Ok(Self {
                bytes: data.to_vec(),
                op_count: 0,
                span: 0,
                sid: 0,
                time: 0,
                opcodes: Vec::new(),
                decoded_ops: Vec::new(),
            });
        }
        if !reader.is_eof() {
            return Ok(Self {
                bytes: data.to_vec(),
                op_count: 0,
                span: 0,
                sid: 0,
                time: 0,
                opcodes: Vec::new(),
                decoded_ops: Vec::new(),
            });
        }
        let (sid, time, op_count, span, opcodes, decoded_ops) = decoded.expect("checked above");
        Ok(Self {
            bytes: data.to_vec(),
            op_count,
            span,
            sid,
            time,
            opcodes,
            decoded_ops,
        })
    }

    pub fn to_binary(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    pub fn op_count(&self) -> u64 {
        self.op_count
    }

    pub fn span(&self) -> u64 {
        self.span
    }

    pub fn id(&self) -> Option<(u64, u64)> {
        if self.op_count == 0 {
            None
        } else {
            Some((self.sid, self.time))
        }
    }

    pub fn next_time(&self) -> u64 {
        if self.op_count == 0 {
            0
        } else {
            self.time.saturating_add(self.span)
        }
    }

    pub fn opcodes(&self) -> &[u8] {
        &self.opcodes
    }

    pub fn decoded_ops(&self) -> &[DecodedOp] {
        &self.decoded_ops
    }
}

#[derive(Debug)]
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_eof(&self) -> bool {
        self.pos == self.data.len()
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn u8(&mut self) -> Result<u8, PatchError> {
        if self.remaining() < 1 {
            return Err(PatchError::Overflow);
        }
        let b = self.data[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn skip(&mut self, n: usize) -> Result<(), PatchError> {
        if self.remaining() < n {
            return Err(PatchError::Overflow);
        }
        self.pos += n;
        Ok(())
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, PatchError> {
        if self.remaining() < n {
            return Err(PatchError::Overflow);
        }
        let start = self.pos;
        self.pos += n;
        Ok(self.data[start..start + n].to_vec())
    }

    fn vu57(&mut self) -> Result<u64, PatchError> {
        let mut result: u64 = 0;
        let mut shift: u32 = 0;
        for i in 0..8 {
            let b = self.u8()?;
            if i < 7 {
                let part = (b & 0x7f) as u64;
                result |= part.checked_shl(shift).ok_or(PatchError::Overflow)?;
                if (b & 0x80) == 0 {
                    return Ok(result);
                }
                shift += 7;
            } else {
                result |= (b as u64).checked_shl(49).ok_or(PatchError::Overflow)?;
                return Ok(result);
            }
        }
        Err(PatchError::Overflow)
    }

    fn b1vu56(&mut self) -> Result<(u8, u64), PatchError> {
        let first = self.u8()?;
        let flag = (first >> 7) & 1;
        let mut result: u64 = (first & 0x3f) as u64;
        if (first & 0x40) == 0 {
            return Ok((flag, result));
        }
        let mut shift: u32 = 6;
        for i in 0..7 {
            let b = self.u8()?;
            if i < 6 {
                result |= ((b & 0x7f) as u64)
                    .checked_shl(shift)
                    .ok_or(PatchError::Overflow)?;
                if (b & 0x80) == 0 {
                    return Ok((flag, result));
                }
                shift += 7;
            } else {
                result |= (b as u64).checked_shl(48).ok_or(PatchError::Overflow)?;
                return Ok((flag, result));
            }
        }
        Err(PatchError::Overflow)
    }

    fn decode_id(&mut self, patch_sid: u64) -> Result<Timestamp, PatchError> {
        let (flag, time) = self.b1vu56()?;
        if flag == 1 {
            let sid = self.vu57()?;
            Ok(Timestamp { sid, time })
        } else {
            Ok(Timestamp {
                sid: patch_sid,
                time,
            })
        }
    }

    fn read_one_cbor(&mut self) -> Result<Value, PatchError> {
        let slice = &self.data[self.pos..];
        let mut cursor = Cursor::new(slice);
        let val = ciborium::de::from_reader::<Value, _>(&mut cursor)
            .map_err(|_| PatchError::InvalidCbor)?;
        let consumed = cursor.position() as usize;
        self.skip(consumed)?;
        Ok(val)
    }
}

fn cbor_to_json(v: Value) -> Result<serde_json::Value, PatchError> {
    Ok(match v {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(b),
        Value::Integer(i) => {
            let signed: i128 = i.into();
            if signed >= 0 {
                let u = u64::try_from(signed).map_err(|_| PatchError::InvalidCbor)?;
                serde_json::Value::Number(Number::from(u))
            } else {
                let s = i64::try_from(signed).map_err(|_| PatchError::InvalidCbor)?;
                serde_json::Value::Number(Number::from(s))
            }
        }
        Value::Float(f) => Number::from_f64(f as f64)
            .map(serde_json::Value::Number)
            .ok_or(PatchError::InvalidCbor)?,
        Value::Text(s) => serde_json::Value::String(s),
        Value::Bytes(bytes) => serde_json::Value::Array(
            bytes
                .into_iter()
                .map(|b| serde_json::Value::Number(Number::from(b)))
                .collect(),
        ),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(cbor_to_json(item)?);
            }
            serde_json::Value::Array(out)
        }
        Value::Map(entries) => {
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                let key = match k {
                    Value::Text(s) => s,
                    _ => return Err(PatchError::InvalidCbor),
                };
                out.insert(key, cbor_to_json(v)?);
            }
            serde_json::Value::Object(out)
        }
        _ => return Err(PatchError::InvalidCbor),
    })
}

fn decode_patch(
    reader: &mut Reader<'_>,
) -> Result<(u64, u64, u64, u64, Vec<u8>, Vec<DecodedOp>), PatchError> {
    let sid = reader.vu57()?;
    let time = reader.vu57()?;

    // meta is a CBOR value (typically undefined or [meta])
    let _meta = reader.read_one_cbor()?;

    let ops_len = reader.vu57()?;
    let mut span: u64 = 0;
    let mut opcodes = Vec::with_capacity(ops_len as usize);
    let mut decoded_ops = Vec::with_capacity(ops_len as usize);
    let mut op_time = time;
    for _ in 0..ops_len {
        let op_id = Timestamp { sid, time: op_time };
        let (opcode, decoded, op_span) = decode_op(reader, sid, op_id)?;
        opcodes.push(opcode);
        decoded_ops.push(decoded);
        span = span.checked_add(op_span).ok_or(PatchError::Overflow)?;
        op_time = op_time.checked_add(op_span).ok_or(PatchError::Overflow)?;
    }
    Ok((sid, time, ops_len, span, opcodes, decoded_ops))
}

fn read_len_from_low3_or_var(reader: &mut Reader<'_>, octet: u8) -> Result<u64, PatchError> {
    let low = (octet & 0b111) as u64;
    if low == 0 {
        reader.vu57()
    } else {
        Ok(low)
    }
}

fn decode_op(
    reader: &mut Reader<'_>,
    patch_sid: u64,
    op_id: Timestamp,
) -> Result<(u8, DecodedOp, u64), PatchError> {
    let octet = reader.u8()?;
    let opcode = octet >> 3;

    match opcode {
        // new_con
        0 => {
            let low = octet & 0b111;
            let value = if low == 0 {
                ConValue::Json(cbor_to_json(reader.read_one_cbor()?)?)
            } else {
                ConValue::Ref(reader.decode_id(patch_sid)?)
            };
            Ok((opcode, DecodedOp::NewCon { id: op_id, value }, 1))
        }
        // new_val
        1 => Ok((opcode, DecodedOp::NewVal { id: op_id }, 1)),
        // new_obj
        2 => Ok((opcode, DecodedOp::NewObj { id: op_id }, 1)),
        // new_vec
        3 => Ok((opcode, DecodedOp::NewVec { id: op_id }, 1)),
        // new_str
        4 => Ok((opcode, DecodedOp::NewStr { id: op_id }, 1)),
        // new_bin
        5 => Ok((opcode, DecodedOp::NewBin { id: op_id }, 1)),
        // new_arr
        6 => Ok((opcode, DecodedOp::NewArr { id: op_id }, 1)),
        // ins_val
        9 => {
            let obj = reader.decode_id(patch_sid)?;
            let val = reader.decode_id(patch_sid)?;
            Ok((
                opcode,
                DecodedOp::InsVal {
                    id: op_id,
                    obj,
                    val,
                },
                1,
            ))
        }
        // ins_obj
        10 => {
            let len = read_len_from_low3_or_var(reader, octet)?;
            let obj = reader.decode_id(patch_sid)?;
            let mut data = Vec::with_capacity(len as usize);
            for _ in 0..len {
                let key = match reader.read_one_cbor()? {
                    Value::Text(s) => s,
                    _ => return Err(PatchError::InvalidCbor),
                };
                let value = reader.decode_id(patch_sid)?;
                data.push((key, value));
            }
            Ok((
                opcode,
                DecodedOp::InsObj {
                    id: op_id,
                    obj,
                    data,
                },
                1,
            ))
        }
        // ins_vec
        11 => {
            let len = read_len_from_low3_or_var(reader, octet)?;
            let obj = reader.decode_id(patch_sid)?;
            let mut data = Vec::with_capacity(len as usize);
            for _ in 0..len {
                let idx = reader.u8()? as u64;
                let value = reader.decode_id(patch_sid)?;
                data.push((idx, value));
            }
            Ok((
                opcode,
                DecodedOp::InsVec {
                    id: op_id,
                    obj,
                    data,
                },
                1,
            ))
        }
        // ins_str
        12 => {
            let len = read_len_from_low3_or_var(reader, octet)? as usize;
            let obj = reader.decode_id(patch_sid)?;
            let reference = reader.decode_id(patch_sid)?;
            let bytes = reader.read_bytes(len)?;
            let data = String::from_utf8(bytes).map_err(|_| PatchError::InvalidCbor)?;
            let span = data.chars().count() as u64;
            Ok((
                opcode,
                DecodedOp::InsStr {
                    id: op_id,
                    obj,
                    reference,
                    data,
                },
                span,
            ))
        }
        // ins_bin
        13 => {
            let len = read_len_from_low3_or_var(reader, octet)? as usize;
            let obj = reader.decode_id(patch_sid)?;
            let reference = reader.decode_id(patch_sid)?;
            let data = reader.read_bytes(len)?;
            Ok((
                opcode,
                DecodedOp::InsBin {
                    id: op_id,
                    obj,
                    reference,
                    data,
                },
                len as u64,
            ))
        }
        // ins_arr
        14 => {
            let len = read_len_from_low3_or_var(reader, octet)?;
            let obj = reader.decode_id(patch_sid)?;
            let reference = reader.decode_id(patch_sid)?;
            let mut data = Vec::with_capacity(len as usize);
            for _ in 0..len {
                data.push(reader.decode_id(patch_sid)?);
            }
            Ok((
                opcode,
                DecodedOp::InsArr {
                    id: op_id,
                    obj,
                    reference,
                    data,
                },
                len,
            ))
        }
        // upd_arr
        15 => {
            let obj = reader.decode_id(patch_sid)?;
            let reference = reader.decode_id(patch_sid)?;
            let val = reader.decode_id(patch_sid)?;
            Ok((
                opcode,
                DecodedOp::UpdArr {
                    id: op_id,
                    obj,
                    reference,
                    val,
                },
                1,
            ))
        }
        // del
        16 => {
            let len = read_len_from_low3_or_var(reader, octet)?;
            let obj = reader.decode_id(patch_sid)?;
            let mut what = Vec::with_capacity(len as usize);
            for _ in 0..len {
                let start = reader.decode_id(patch_sid)?;
                let span = reader.vu57()?;
                what.push(Timespan {
                    sid: start.sid,
                    time: start.time,
                    span,
                });
            }
            Ok((
                opcode,
                DecodedOp::Del {
                    id: op_id,
                    obj,
                    what,
                },
                1,
            ))
        }
        // nop
        17 => {
            let len = read_len_from_low3_or_var(reader, octet)?;
            Ok((opcode, DecodedOp::Nop { id: op_id, len }, len))
        }
        _ => Err(PatchError::UnknownOpcode(opcode)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch_builder::PatchBuilder;

    fn two_op_patch(sid: u64) -> Patch {
        let mut b = PatchBuilder::new(sid, 1);
        b.push_op(DecodedOp::NewStr {
            id: Timestamp { sid, time: 1 },
        });
        b.push_op(DecodedOp::InsStr {
            id: Timestamp { sid, time: 2 },
            obj: Timestamp { sid, time: 1 },
            reference: Timestamp { sid, time: 1 },
            data: "hi".to_string(),
        });
        b.into_patch().unwrap()
    }

    #[test]
    fn from_binary_reports_id_span_and_next_time() {
        let patch = two_op_patch(70_070);
        assert_eq!(patch.id(), Some((70_070, 1)));
        assert_eq!(patch.op_count(), 2);
        assert_eq!(patch.span(), 3);
        assert_eq!(patch.next_time(), 4);
    }

    #[test]
    fn to_binary_round_trips_through_from_binary() {
        let patch = two_op_patch(70_071);
        let bytes = patch.to_binary();
        let restored = Patch::from_binary(&bytes).unwrap();
        assert_eq!(restored, patch);
    }

    #[test]
    fn empty_patch_has_no_id_and_zero_span() {
        let patch = PatchBuilder::new(70_072, 1).into_patch().unwrap();
        assert_eq!(patch.id(), None);
        assert_eq!(patch.span(), 0);
        assert_eq!(patch.next_time(), 0);
        assert!(patch.decoded_ops().is_empty());
    }

    #[test]
    fn from_binary_tolerates_garbage_by_yielding_an_empty_patch() {
        // Not ASCII JSON, not valid CBOR either: permissive decoding must not
        // panic, and should fall back to an empty patch rather than erroring.
        let patch = Patch::from_binary(&[0xff, 0xff, 0xff]).unwrap();
        assert_eq!(patch.op_count(), 0);
        assert!(patch.decoded_ops().is_empty());
    }

    #[test]
    fn ins_str_span_counts_unicode_scalars_not_bytes() {
        let mut b = PatchBuilder::new(70_073, 1);
        b.push_op(DecodedOp::NewStr {
            id: Timestamp { sid: 70_073, time: 1 },
        });
        b.push_op(DecodedOp::InsStr {
            id: Timestamp { sid: 70_073, time: 2 },
            obj: Timestamp { sid: 70_073, time: 1 },
            reference: Timestamp { sid: 70_073, time: 1 },
            data: "héllo".to_string(),
        });
        let patch = b.into_patch().unwrap();
        assert_eq!(patch.span(), 1 + 5);
    }
}
