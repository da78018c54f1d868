//! Access to an instantiated module.

use crate::error::TrampolineResult;

/// A scalar wasm value passed to or returned from an export.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RawValue {
    I32(i32),
    I64(i64),
    F64(f64),
}

impl RawValue {
    pub fn as_i32(self) -> Option<i32> {
        match self {
            RawValue::I32(v) => Some(v),
            _ => None,
        }
    }
}

/// The operations the trampoline needs from an instance.
pub trait EffectfulInstance {
    /// Calls an export and returns its first result, if any.
    fn call(&mut self, export: &str, args: &[RawValue]) -> TrampolineResult<Option<RawValue>>;

    fn read_memory(&mut self, offset: u32, len: u32) -> TrampolineResult<Vec<u8>>;

    fn write_memory(&mut self, offset: u32, bytes: &[u8]) -> TrampolineResult<()>;
}

#[cfg(feature = "wasmtime")]
pub use self::wasmtime_instance::WasmtimeInstance;

#[cfg(feature = "wasmtime")]
mod wasmtime_instance {
    use tracing::trace;
    use wasmtime::{Config, Engine, Instance, Memory, Module, Store, Val};

    use super::{EffectfulInstance, RawValue};
    use crate::abi::EXPORT_MEMORY;
    use crate::error::{TrampolineError, TrampolineResult};

    /// An instance running on wasmtime with the GC proposal enabled.
    pub struct WasmtimeInstance {
        store: Store<()>,
        instance: Instance,
        memory: Memory,
    }

    impl WasmtimeInstance {
        pub fn engine() -> TrampolineResult<Engine> {
            let mut config = Config::new();
            config
                .wasm_gc(true)
                .wasm_function_references(true)
                .wasm_tail_call(true);
            Engine::new(&config).map_err(TrampolineError::wasm)
        }

        pub fn new(bytes: &[u8]) -> TrampolineResult<Self> {
            let engine = Self::engine()?;
            let module = Module::new(&engine, bytes).map_err(TrampolineError::wasm)?;
            let mut store = Store::new(&engine, ());
            let instance =
                Instance::new(&mut store, &module, &[]).map_err(TrampolineError::wasm)?;
            let memory = instance
                .get_memory(&mut store, EXPORT_MEMORY)
                .ok_or_else(|| TrampolineError::missing_export(EXPORT_MEMORY))?;
            Ok(Self {
                store,
                instance,
                memory,
            })
        }
    }

    fn to_val(value: &RawValue) -> Val {
        match *value {
            RawValue::I32(v) => Val::I32(v),
            RawValue::I64(v) => Val::I64(v),
            RawValue::F64(v) => Val::F64(v.to_bits()),
        }
    }

    impl EffectfulInstance for WasmtimeInstance {
        fn call(&mut self, export: &str, args: &[RawValue]) -> TrampolineResult<Option<RawValue>> {
            let func = self
                .instance
                .get_func(&mut self.store, export)
                .ok_or_else(|| TrampolineError::missing_export(export))?;
            let result_count = func.ty(&self.store).results().len();
            let params: Vec<Val> = args.iter().map(to_val).collect();
            let mut results = vec![Val::I32(0); result_count];
            trace!("call {export}({args:?})");
            func.call(&mut self.store, &params, &mut results)
                .map_err(TrampolineError::wasm)?;
            Ok(match results.first() {
                Some(Val::I32(v)) => Some(RawValue::I32(*v)),
                Some(Val::I64(v)) => Some(RawValue::I64(*v)),
                Some(Val::F64(bits)) => Some(RawValue::F64(f64::from_bits(*bits))),
                Some(_) => {
                    return Err(TrampolineError::abi(format!(
                        "export `{export}` returned a non-scalar value"
                    )));
                }
                None => None,
            })
        }

        fn read_memory(&mut self, offset: u32, len: u32) -> TrampolineResult<Vec<u8>> {
            let mut buf = vec![0u8; len as usize];
            self.memory
                .read(&self.store, offset as usize, &mut buf)
                .map_err(TrampolineError::wasm)?;
            Ok(buf)
        }

        fn write_memory(&mut self, offset: u32, bytes: &[u8]) -> TrampolineResult<()> {
            self.memory
                .write(&mut self.store, offset as usize, bytes)
                .map_err(TrampolineError::wasm)
        }
    }
}
