//! Compilation pipeline for Caldera.
//!
//! Stages are salsa tracked functions, so re-compiling an unchanged program
//! with the same options reuses the cached artifact.
//!
//! ```text
//! ProgramSource (HIR)
//!     │
//!     ▼
//! site_table ─► SiteTable (owners, continuation sites, environment layouts)
//!     │
//!     ▼
//! compile_wasm ─► WasmArtifact (module bytes, exports, operation table)
//! ```
//!
//! Only `compile_wasm` depends on `CompileOptions`; changing them re-runs
//! code generation but not the analysis.

use caldera_passes::{AnalysisError, SiteTable};
use caldera_wasm_backend::{CompilationError, WasmArtifact, compile_module};
use tracing::debug;

use crate::database::ProgramSource;
use crate::options::CompileOptions;

/// Stage 1: liveness and site analysis over every owner of the program.
#[salsa::tracked(returns(ref))]
pub fn site_table(db: &dyn salsa::Database, source: ProgramSource) -> Result<SiteTable, AnalysisError> {
    let program = source.hir(db);
    let table = SiteTable::build(program)?;
    debug!(
        "analysed {}: {} owners, {} sites, {} environment types",
        program.module_name,
        table.owners.len(),
        table.sites.len(),
        table.env_types.len()
    );
    Ok(table)
}

/// Stage 2: code generation.
#[salsa::tracked(returns(ref))]
pub fn compile_wasm(
    db: &dyn salsa::Database,
    source: ProgramSource,
    options: CompileOptions,
) -> Result<WasmArtifact, CompilationError> {
    let program = source.hir(db);
    let table = site_table(db, source).as_ref().map_err(|err| err.clone())?;
    let emit = options.emit_options(program);
    let artifact = compile_module(program, table, &emit)?;
    debug!(
        "compiled {} into {} bytes with {} exports",
        emit.module_name,
        artifact.bytes.len(),
        artifact.exports.len()
    );
    Ok(artifact)
}
