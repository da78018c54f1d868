//! Host runtime for Caldera modules.
//!
//! Compiled modules suspend on effect operations they cannot handle
//! themselves and report them through a small set of exports. This crate
//! decodes that protocol and drives the computation to completion with
//! handlers supplied by the embedder.
//!
//! ```ignore
//! let mut registry = HandlerRegistry::new();
//! registry.register(0, 0, Signature::new([], ValueKind::Int), |_, tail: Tail| async move {
//!     Ok(tail.resume(Value::Int(41)))
//! });
//! let mut instance = WasmtimeInstance::new(&bytes)?;
//! let value = Trampoline::new(registry).run(&mut instance, "main", &[]).await?;
//! ```

pub mod abi;
mod error;
mod instance;
mod registry;
mod table;
mod trampoline;
mod value;

pub use abi::ValueKind;
pub use error::{TrampolineError, TrampolineErrorKind, TrampolineResult};
#[cfg(feature = "wasmtime")]
pub use instance::WasmtimeInstance;
pub use instance::{EffectfulInstance, RawValue};
pub use registry::{
    EffectHandler, HandlerError, HandlerFuture, HandlerRegistry, RegisteredHandler, Resume,
    Signature, Tail,
};
pub use table::{EffectTable, OperationEntry};
pub use trampoline::{Step, Suspension, Trampoline, start};
pub use value::Value;
