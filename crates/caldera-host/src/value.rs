//! Values exchanged with compiled modules.

use std::fmt;

use crate::abi::{SLOT_SIZE, ValueKind};
use crate::error::{TrampolineError, TrampolineResult};
use crate::instance::RawValue;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i32),
    Int64(i64),
    Float(f64),
    /// A non-scalar value the host cannot inspect.
    Opaque,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Unit => ValueKind::Unit,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Int64(_) => ValueKind::Int64,
            Value::Float(_) => ValueKind::Float,
            Value::Opaque => ValueKind::Opaque,
        }
    }

    fn bits(&self) -> u64 {
        match *self {
            Value::Unit | Value::Opaque => 0,
            Value::Bool(b) => u64::from(b),
            Value::Int(i) => i64::from(i) as u64,
            Value::Int64(i) => i as u64,
            Value::Float(f) => f.to_bits(),
        }
    }

    pub fn encode_slot(&self) -> [u8; SLOT_SIZE as usize] {
        let mut slot = [0u8; SLOT_SIZE as usize];
        slot[0..4].copy_from_slice(&self.kind().code().to_le_bytes());
        slot[8..16].copy_from_slice(&self.bits().to_le_bytes());
        slot
    }

    /// Decodes a slot written by the module.
    ///
    /// Payload slots only carry the box class of a value (unit, i32, i64, f64
    /// or reference), so the expected kind from the operation signature
    /// decides between `Unit`, `Bool` and `Int`.
    pub fn decode_slot(slot: &[u8], expected: ValueKind) -> TrampolineResult<Value> {
        if slot.len() < SLOT_SIZE as usize {
            return Err(TrampolineError::abi(format!(
                "value slot is {} bytes, expected {SLOT_SIZE}",
                slot.len()
            )));
        }
        let code = u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]);
        let kind = ValueKind::from_code(code)
            .ok_or_else(|| TrampolineError::abi(format!("unknown value kind {code}")))?;
        let mut bits = [0u8; 8];
        bits.copy_from_slice(&slot[8..16]);
        let bits = u64::from_le_bytes(bits);
        let value = match (expected, kind) {
            (ValueKind::Unit, ValueKind::Unit | ValueKind::Int) => Value::Unit,
            (ValueKind::Bool, ValueKind::Bool | ValueKind::Int) => Value::Bool(bits != 0),
            (ValueKind::Int, ValueKind::Int | ValueKind::Bool) => Value::Int(bits as i64 as i32),
            (ValueKind::Int64, ValueKind::Int64) => Value::Int64(bits as i64),
            (ValueKind::Float, ValueKind::Float) => Value::Float(f64::from_bits(bits)),
            (ValueKind::Opaque, _) => Value::Opaque,
            _ => {
                return Err(TrampolineError::abi(format!(
                    "slot of kind {kind} cannot be read as {expected}"
                )));
            }
        };
        Ok(value)
    }

    /// Decodes a slot that carries the exact kind of its value.
    pub fn read_slot(slot: &[u8]) -> TrampolineResult<Value> {
        let code = slot
            .get(0..4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or_else(|| TrampolineError::abi("value slot is truncated"))?;
        let kind = ValueKind::from_code(code)
            .ok_or_else(|| TrampolineError::abi(format!("unknown value kind {code}")))?;
        Self::decode_slot(slot, kind)
    }

    /// Wasm argument for an export parameter of this value.
    pub fn to_raw(&self) -> TrampolineResult<RawValue> {
        Ok(match *self {
            Value::Unit => RawValue::I32(0),
            Value::Bool(b) => RawValue::I32(i32::from(b)),
            Value::Int(i) => RawValue::I32(i),
            Value::Int64(i) => RawValue::I64(i),
            Value::Float(f) => RawValue::F64(f),
            Value::Opaque => {
                return Err(TrampolineError::abi(
                    "opaque values cannot be passed to an export",
                ));
            }
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => f.write_str("()"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Int64(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Opaque => f.write_str("<opaque>"),
        }
    }
}
