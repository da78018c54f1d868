//! Caldera: lowers effect-typed HIR to WebAssembly GC modules.
//!
//! The crate ties the workspace together:
//!
//! - `database`: the salsa database and its `ProgramSource` input
//! - `pipeline`: tracked stages from HIR to a `WasmArtifact`
//! - `options`: user-facing `CompileOptions`
//! - `run`: argument decoding and trampoline driving for `calderac run`

pub mod database;
pub mod options;
pub mod pipeline;
pub mod run;

pub use caldera_wasm_backend::{CompilationError, WasmArtifact};
pub use database::{CalderaDatabase, ProgramSource};
pub use options::CompileOptions;
pub use pipeline::{compile_wasm, site_table};
