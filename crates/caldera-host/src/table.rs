//! Decoding of the operation table embedded in compiled modules.

use crate::abi::{TABLE_ENTRY_SIZE, TABLE_HEADER_SIZE};
use crate::error::{TrampolineError, TrampolineResult};
use crate::instance::EffectfulInstance;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationEntry {
    pub effect: u32,
    pub op: u32,
    pub signature_hash: u32,
    /// Runtime handle the module reports through `effect_op`.
    pub handle: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EffectTable {
    entries: Vec<OperationEntry>,
}

impl EffectTable {
    pub fn read<I>(instance: &mut I, address: u32) -> TrampolineResult<Self>
    where
        I: EffectfulInstance + ?Sized,
    {
        let header = instance.read_memory(address, TABLE_HEADER_SIZE)?;
        let count = read_u32(&header, 0)?;
        let bytes = instance.read_memory(address + TABLE_HEADER_SIZE, count * TABLE_ENTRY_SIZE)?;
        Self::parse(count, &bytes)
    }

    pub fn parse(count: u32, bytes: &[u8]) -> TrampolineResult<Self> {
        let entries = (0..count as usize)
            .map(|i| {
                let base = i * TABLE_ENTRY_SIZE as usize;
                Ok(OperationEntry {
                    effect: read_u32(bytes, base)?,
                    op: read_u32(bytes, base + 4)?,
                    signature_hash: read_u32(bytes, base + 8)?,
                    handle: read_u32(bytes, base + 12)?,
                })
            })
            .collect::<TrampolineResult<Vec<_>>>()?;
        Ok(Self { entries })
    }

    pub fn by_handle(&self, handle: u32) -> Option<&OperationEntry> {
        self.entries.iter().find(|entry| entry.handle == handle)
    }

    pub fn entries(&self) -> &[OperationEntry] {
        &self.entries
    }
}

fn read_u32(bytes: &[u8], at: usize) -> TrampolineResult<u32> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| TrampolineError::abi(format!("operation table truncated at byte {at}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_found_by_handle() {
        let mut bytes = Vec::new();
        for word in [3u32, 1, 0xdead_beef, 0, 3, 2, 0xfeed_f00d, 1] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        let table = EffectTable::parse(2, &bytes).unwrap();
        let entry = table.by_handle(1).unwrap();
        assert_eq!((entry.effect, entry.op), (3, 2));
        assert_eq!(entry.signature_hash, 0xfeed_f00d);
        assert!(table.by_handle(2).is_none());
    }

    #[test]
    fn truncated_table_is_an_abi_error() {
        let err = EffectTable::parse(1, &[0; 8]).unwrap_err();
        insta::assert_snapshot!(err, @"ABI violation: operation table truncated at byte 8");
    }
}
