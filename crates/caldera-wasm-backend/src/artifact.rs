//! The result of compiling one module.

use crate::effect_table::OperationInfo;

/// A compiled WebAssembly module with the metadata the host needs.
#[derive(Clone, Debug, PartialEq, Eq, salsa::Update)]
pub struct WasmArtifact {
    /// The binary, ready to be written to a `.wasm` file.
    pub bytes: Vec<u8>,
    /// Names of the exported source functions. Each has a `name_effectful`
    /// entry point.
    pub exports: Vec<String>,
    /// Operation table, as also written to the module's data segment.
    pub operations: Vec<OperationInfo>,
}

impl WasmArtifact {
    pub fn operation(&self, name: &str) -> Option<&OperationInfo> {
        self.operations.iter().find(|info| info.name == name)
    }
}
