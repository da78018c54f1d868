//! Options accepted by the compiler driver.

use std::path::Path;

use anyhow::Context;
use caldera_hir::HirProgram;
use caldera_wasm_backend::EmitOptions;
use serde::Deserialize;

/// Settings for one compilation. Loadable from a JSON file; missing keys
/// take their default.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, salsa::Update)]
#[serde(default, deny_unknown_fields)]
pub struct CompileOptions {
    /// Overrides the module name recorded in the HIR.
    pub module_name: Option<String>,
    /// Export `name` with its declared signature next to `name_effectful`.
    pub export_pure_surfaces: bool,
    /// Emit a `name` custom section with function names.
    pub debug_names: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            module_name: None,
            export_pure_surfaces: true,
            debug_names: false,
        }
    }
}

impl CompileOptions {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("invalid options in {}", path.display()))
    }

    pub fn emit_options(&self, program: &HirProgram) -> EmitOptions {
        let module_name = self
            .module_name
            .clone()
            .unwrap_or_else(|| program.module_name.clone());
        EmitOptions {
            export_pure_surfaces: self.export_pure_surfaces,
            debug_names: self.debug_names,
            ..EmitOptions::new(module_name)
        }
    }
}
