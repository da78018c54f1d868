use std::path::Path;

use anyhow::Context;
use caldera_hir::HirProgram;

/// A HIR program handed over by the front-end.
#[salsa::input(debug)]
pub struct ProgramSource {
    #[returns(ref)]
    pub hir: HirProgram,
}

#[derive(Default, Clone)]
#[salsa::db]
pub struct CalderaDatabase {
    storage: salsa::Storage<Self>,
}

#[salsa::db]
impl salsa::Database for CalderaDatabase {}

impl CalderaDatabase {
    /// Reads a `.hir.json` file and registers it as an input.
    pub fn load(&self, path: &Path) -> anyhow::Result<ProgramSource> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let hir = HirProgram::from_json(&text)
            .with_context(|| format!("cannot load {}", path.display()))?;
        Ok(ProgramSource::new(self, hir))
    }
}
