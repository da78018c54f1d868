//! Binary contract between compiled modules and the host.
//!
//! Shared by the code generator, which emits the exports and the operation
//! table, and by the trampoline, which drives them.

use std::fmt;

pub const EXPORT_MEMORY: &str = "memory";
pub const EXPORT_INIT_EFFECTS: &str = "init_effects";
pub const EXPORT_EFFECT_STATUS: &str = "effect_status";
pub const EXPORT_EFFECT_OP: &str = "effect_op";
pub const EXPORT_EFFECT_CONT: &str = "effect_cont";
pub const EXPORT_EFFECT_LEN: &str = "effect_len";
pub const EXPORT_EFFECT_BUFFER: &str = "effect_buffer";
pub const EXPORT_RESUME_EFFECTFUL: &str = "resume_effectful";

/// Suffix of the effectful entry generated next to every exported function.
pub const EFFECTFUL_SUFFIX: &str = "_effectful";

pub const STATUS_DONE: i32 = 0;
pub const STATUS_SUSPENDED: i32 = 1;

/// Size of one value slot: `kind: u32, reserved: u32, bits: u64`.
pub const SLOT_SIZE: u32 = 16;

/// The operation table starts with a `u32` entry count.
pub const TABLE_HEADER_SIZE: u32 = 4;
/// `effect_id, op_id, signature_hash, handle`, each a `u32`.
pub const TABLE_ENTRY_SIZE: u32 = 16;

pub fn effectful_export(name: &str) -> String {
    format!("{name}{EFFECTFUL_SUFFIX}")
}

/// Address of the exchange buffer that follows a table of `entries` operations.
pub fn buffer_offset(entries: u32) -> u32 {
    let end = TABLE_HEADER_SIZE + entries * TABLE_ENTRY_SIZE;
    end.div_ceil(SLOT_SIZE) * SLOT_SIZE
}

/// Kind tag of a value slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Unit = 0,
    Bool = 1,
    /// Sign-extended i32.
    Int = 2,
    Int64 = 3,
    /// IEEE-754 bits of an f64.
    Float = 4,
    /// Any non-scalar value; carries no bits.
    Opaque = 5,
}

impl ValueKind {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => ValueKind::Unit,
            1 => ValueKind::Bool,
            2 => ValueKind::Int,
            3 => ValueKind::Int64,
            4 => ValueKind::Float,
            5 => ValueKind::Opaque,
            _ => return None,
        })
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueKind::Unit => "unit",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Int64 => "int64",
            ValueKind::Float => "float",
            ValueKind::Opaque => "opaque",
        })
    }
}

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// FNV-1a over the parameter count, the parameter kinds and the result kind.
pub fn signature_hash(params: &[ValueKind], result: ValueKind) -> u32 {
    let mut hash = FNV_OFFSET;
    let mut feed = |byte: u8| {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    };
    feed(params.len() as u8);
    for kind in params {
        feed(kind.code() as u8);
    }
    feed(result.code() as u8);
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_hash_depends_on_order_and_result() {
        let a = signature_hash(&[ValueKind::Int, ValueKind::Float], ValueKind::Unit);
        let b = signature_hash(&[ValueKind::Float, ValueKind::Int], ValueKind::Unit);
        let c = signature_hash(&[ValueKind::Int, ValueKind::Float], ValueKind::Int);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, signature_hash(&[ValueKind::Int, ValueKind::Float], ValueKind::Unit));
    }

    #[test]
    fn buffer_follows_table_on_slot_boundary() {
        assert_eq!(buffer_offset(0), 16);
        assert_eq!(buffer_offset(1), 32);
        assert_eq!(buffer_offset(3), 64);
    }
}
