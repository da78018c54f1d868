//! Wasm GC backend: lowers an analysed HIR program to a module that runs
//! effectful code as explicit continuation state machines.
//!
//! Every owner compiles to a body function, plus a continuation function
//! when it has continuation sites. Effectful code returns an `Outcome`, and
//! a suspended outcome carries the continuation frames of every caller it
//! passed through. The host drives suspended computations through the
//! exports of [`host_abi`].

use caldera_hir::HirProgram;
use caldera_passes::SiteTable;
use tracing::debug;

mod artifact;
mod calls;
mod context;
mod effect_table;
mod errors;
mod expr;
mod function_builder;
mod functions;
pub mod gc_types;
mod host_abi;
mod module_builder;
mod outcome;
mod patterns;
mod runtime;
mod types;

pub use artifact::WasmArtifact;
pub use context::EmitOptions;
pub use effect_table::OperationInfo;
pub use errors::{CompilationError, CompilationErrorKind, CompilationResult};
pub use types::{Abi, Repr};

/// Compiles `program` to a wasm module using its site table.
pub fn compile_module(
    program: &HirProgram,
    table: &SiteTable,
    options: &EmitOptions,
) -> CompilationResult<WasmArtifact> {
    let mut ctx = context::CompileContext::new(program, table, options)?;
    ctx.declare_owners()?;
    let runtime = ctx.runtime;
    runtime.define(&mut ctx.module)?;
    let host = ctx.host;
    host.define(&mut ctx.module, &runtime)?;
    ctx.compile_owners()?;
    let exports = ctx.emit_exports()?;
    let operations = ctx.operations.entries().to_vec();
    debug!(
        "compiled `{}`: {} functions, {} types",
        options.module_name,
        ctx.module.function_count(),
        ctx.module.types.len()
    );
    let bytes = ctx.module.finish(&options.module_name, options.debug_names)?;
    Ok(WasmArtifact {
        bytes,
        exports,
        operations,
    })
}
