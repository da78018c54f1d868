//! Runtime handles of effect operations and the table the host reads them from.

use std::collections::BTreeMap;

use caldera_hir::{HirProgram, OperationRef};
use caldera_host::abi::{self, TABLE_ENTRY_SIZE, TABLE_HEADER_SIZE};

use crate::types::value_kind;

/// One row of the operation table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, salsa::Update)]
pub struct OperationInfo {
    pub effect: u32,
    pub op: u32,
    /// `Effect.op`
    pub name: String,
    pub signature_hash: u32,
    pub handle: u32,
    /// Number of arguments the operation sends.
    pub arity: u32,
}

/// Dense handles for every declared operation, in declaration order.
#[derive(Clone, Debug, Default)]
pub struct OperationHandles {
    entries: Vec<OperationInfo>,
    by_ref: BTreeMap<OperationRef, u32>,
}

impl OperationHandles {
    pub fn collect(program: &HirProgram) -> Self {
        let mut handles = Self::default();
        for effect in &program.effects {
            for decl in &effect.operations {
                let handle = handles.entries.len() as u32;
                let params: Vec<_> = decl
                    .params
                    .iter()
                    .map(|param| value_kind(program, *param))
                    .collect();
                handles.entries.push(OperationInfo {
                    effect: effect.id.0,
                    op: decl.id.0,
                    name: format!("{}.{}", effect.name, decl.name),
                    signature_hash: abi::signature_hash(&params, value_kind(program, decl.result)),
                    handle,
                    arity: decl.params.len() as u32,
                });
                handles
                    .by_ref
                    .insert(OperationRef::new(effect.id, decl.id), handle);
            }
        }
        handles
    }

    pub fn handle(&self, op: OperationRef) -> Option<u32> {
        self.by_ref.get(&op).copied()
    }

    pub fn entries(&self) -> &[OperationInfo] {
        &self.entries
    }

    pub fn max_arity(&self) -> u32 {
        self.entries.iter().map(|entry| entry.arity).max().unwrap_or(0)
    }

    /// Address of the exchange buffer placed right after the table.
    pub fn buffer_offset(&self) -> u32 {
        abi::buffer_offset(self.entries.len() as u32)
    }

    /// `u32 count` followed by `(effect, op, signature_hash, handle)` rows.
    pub fn encode(&self) -> Vec<u8> {
        let len = TABLE_HEADER_SIZE + self.entries.len() as u32 * TABLE_ENTRY_SIZE;
        let mut bytes = Vec::with_capacity(len as usize);
        bytes.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            for word in [entry.effect, entry.op, entry.signature_hash, entry.handle] {
                bytes.extend_from_slice(&word.to_le_bytes());
            }
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use caldera_hir::{ProgramBuilder, ResumeKind};
    use caldera_host::{EffectTable, ValueKind};

    use super::*;

    #[test]
    fn handles_follow_declaration_order() {
        let mut b = ProgramBuilder::new("ops");
        let int = b.int();
        let unit = b.unit();
        let log = b.effect("Log");
        let write = b.operation(log, "write", &[int], unit, ResumeKind::Fn);
        let ask = b.effect("Ask");
        let get = b.operation(ask, "get", &[], int, ResumeKind::Ctl);
        let program = b.finish();

        let handles = OperationHandles::collect(&program);
        assert_eq!(handles.handle(write), Some(0));
        assert_eq!(handles.handle(get), Some(1));
        assert_eq!(handles.max_arity(), 1);
        assert_eq!(handles.entries()[1].name, "Ask.get");
        assert_eq!(
            handles.entries()[1].signature_hash,
            abi::signature_hash(&[], ValueKind::Int)
        );
    }

    #[test]
    fn encoded_table_is_readable_by_the_host() {
        let mut b = ProgramBuilder::new("ops");
        let int = b.int();
        let ask = b.effect("Ask");
        b.operation(ask, "get", &[], int, ResumeKind::Ctl);
        b.operation(ask, "put", &[int], int, ResumeKind::Ctl);
        let program = b.finish();

        let handles = OperationHandles::collect(&program);
        let bytes = handles.encode();
        let count = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let table = EffectTable::parse(count, &bytes[TABLE_HEADER_SIZE as usize..]).unwrap();
        let entry = table.by_handle(1).unwrap();
        assert_eq!((entry.effect, entry.op), (0, 1));
        assert_eq!(entry.signature_hash, handles.entries()[1].signature_hash);
        assert_eq!(handles.buffer_offset(), 48);
    }
}
