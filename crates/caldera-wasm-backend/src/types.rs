//! Mapping of HIR types onto wasm value types.
//!
//! Scalars stay unboxed in locals and on the stack. Everything that travels
//! through an `anyref` slot (outcome values, operation payloads, resume
//! values) is boxed: `Unit` as `ref.null any`, i32/i64/f64 in their box
//! structs, references as they are.

use caldera_hir::{HirProgram, Ty, TypeId};
use caldera_host::ValueKind;
use caldera_passes::FieldTy;
use wasm_encoder::{HeapType, Instruction, ValType};

use crate::context::CompileContext;
use crate::errors::{CompilationError, CompilationResult};
use crate::function_builder::FunctionBuilder;
use crate::gc_types::{
    ANY_HEAP, ANYREF, BOX_F64_IDX, BOX_I32_IDX, BOX_I64_IDX, BOX_VALUE_FIELD, CLOSURE_IDX,
    ENV_BASE_IDX, FRAME_REF, OUTCOME_REF, RESUMPTION_REF, nullable,
};

/// Runtime representation of a HIR type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Repr {
    /// `i32.const 0` on the stack, `ref.null any` when boxed.
    Unit,
    I32,
    I64,
    F64,
    /// Nullable reference to a concrete GC type.
    Ref(u32),
}

impl Repr {
    pub fn val_type(self) -> ValType {
        match self {
            Repr::Unit | Repr::I32 => ValType::I32,
            Repr::I64 => ValType::I64,
            Repr::F64 => ValType::F64,
            Repr::Ref(idx) => nullable(idx),
        }
    }
}

/// Turns the value on top of the stack into an `anyref`.
pub fn emit_box(fb: &mut FunctionBuilder, repr: Repr) {
    match repr {
        Repr::Unit => {
            fb.emit(Instruction::Drop);
            fb.emit(Instruction::RefNull(ANY_HEAP));
        }
        Repr::I32 => fb.emit(Instruction::StructNew(BOX_I32_IDX)),
        Repr::I64 => fb.emit(Instruction::StructNew(BOX_I64_IDX)),
        Repr::F64 => fb.emit(Instruction::StructNew(BOX_F64_IDX)),
        Repr::Ref(_) => {}
    }
}

/// Inverse of [`emit_box`]. Traps if the box has the wrong class.
pub fn emit_unbox(fb: &mut FunctionBuilder, repr: Repr) {
    let boxed = |fb: &mut FunctionBuilder, idx: u32| {
        fb.emit(Instruction::RefCastNonNull(HeapType::Concrete(idx)));
        fb.struct_get(idx, BOX_VALUE_FIELD);
    };
    match repr {
        Repr::Unit => {
            fb.emit(Instruction::Drop);
            fb.i32_const(0);
        }
        Repr::I32 => boxed(fb, BOX_I32_IDX),
        Repr::I64 => boxed(fb, BOX_I64_IDX),
        Repr::F64 => boxed(fb, BOX_F64_IDX),
        Repr::Ref(idx) => fb.emit(Instruction::RefCastNullable(HeapType::Concrete(idx))),
    }
}

/// Host-visible kind of a value of type `ty`.
pub fn value_kind(program: &HirProgram, ty: TypeId) -> ValueKind {
    match program.ty(ty) {
        Ty::Unit => ValueKind::Unit,
        Ty::Bool => ValueKind::Bool,
        Ty::Int => ValueKind::Int,
        Ty::Int64 => ValueKind::Int64,
        Ty::Float => ValueKind::Float,
        Ty::Tuple { .. } | Ty::Record { .. } | Ty::Function { .. } => ValueKind::Opaque,
    }
}

/// Calling convention of a compiled function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Abi {
    /// Returns its result directly.
    Pure,
    /// Takes the handler frame after any environment and returns an `Outcome`.
    Effectful,
}

impl<'p> CompileContext<'p> {
    pub fn repr(&mut self, ty: TypeId) -> CompilationResult<Repr> {
        if let Some(repr) = self.reprs.get(&ty) {
            return Ok(*repr);
        }
        let program = self.program;
        let repr = match program.ty(ty) {
            Ty::Unit => Repr::Unit,
            Ty::Bool | Ty::Int => Repr::I32,
            Ty::Int64 => Repr::I64,
            Ty::Float => Repr::F64,
            Ty::Function { .. } => Repr::Ref(CLOSURE_IDX),
            aggregate @ (Ty::Tuple { .. } | Ty::Record { .. }) => {
                if !self.reprs_in_progress.insert(ty) {
                    return Err(CompilationError::unsupported_feature(
                        "recursive aggregate type",
                    ));
                }
                let name = match aggregate {
                    Ty::Record { name, .. } => name.clone(),
                    _ => format!("tuple{}", ty.0),
                };
                let mut fields = Vec::new();
                for field in aggregate.aggregate_fields().unwrap_or_default() {
                    fields.push(self.repr(field)?.val_type());
                }
                self.reprs_in_progress.remove(&ty);
                Repr::Ref(self.module.types.intern_record(&name, &fields))
            }
        };
        self.reprs.insert(ty, repr);
        Ok(repr)
    }

    pub fn val_type(&mut self, ty: TypeId) -> CompilationResult<ValType> {
        Ok(self.repr(ty)?.val_type())
    }

    /// Struct type of a tuple or record value.
    pub fn aggregate_type(&mut self, ty: TypeId) -> CompilationResult<u32> {
        match self.repr(ty)? {
            Repr::Ref(idx) if idx != CLOSURE_IDX => Ok(idx),
            _ => Err(CompilationError::internal(format!(
                "type {} is not an aggregate",
                self.program.ty(ty)
            ))),
        }
    }

    /// Convention used when calling a value of function type `ty`.
    pub fn abi_of(&self, ty: TypeId) -> Abi {
        match self.program.effects_of(ty) {
            Some(row) if !row.is_pure() => Abi::Effectful,
            _ => Abi::Pure,
        }
    }

    /// Wasm parameters and results of a function of type `ty`.
    ///
    /// `closure` adds the leading environment parameter every function
    /// reachable through a `Closure` takes.
    pub fn signature(
        &mut self,
        ty: TypeId,
        abi: Abi,
        closure: bool,
    ) -> CompilationResult<(Vec<ValType>, Vec<ValType>)> {
        let program = self.program;
        let (params, ret, _) = program.function_signature(ty).ok_or_else(|| {
            CompilationError::internal(format!("type {} is not a function type", program.ty(ty)))
        })?;
        let mut wasm_params = Vec::with_capacity(params.len() + 2);
        if closure {
            wasm_params.push(ANYREF);
        }
        if abi == Abi::Effectful {
            wasm_params.push(FRAME_REF);
        }
        for param in params {
            wasm_params.push(self.val_type(*param)?);
        }
        let results = match abi {
            Abi::Pure => vec![self.val_type(ret)?],
            Abi::Effectful => vec![OUTCOME_REF],
        };
        Ok((wasm_params, results))
    }

    /// Type index of `signature(ty, abi, closure)`.
    pub fn signature_type(&mut self, ty: TypeId, abi: Abi, closure: bool) -> CompilationResult<u32> {
        let (params, results) = self.signature(ty, abi, closure)?;
        Ok(self.module.types.intern_func(&params, &results))
    }

    /// The `call_ref` type of a closure of function type `ty`.
    pub fn closure_signature(&mut self, ty: TypeId) -> CompilationResult<u32> {
        let abi = self.abi_of(ty);
        self.signature_type(ty, abi, true)
    }

    pub(crate) fn register_env_types(&mut self) -> CompilationResult<()> {
        let table = self.table;
        for env in &table.env_types {
            let mut fields = Vec::with_capacity(env.fields.len());
            for field in &env.fields {
                fields.push(match field {
                    FieldTy::SiteMarker | FieldTy::Flag => ValType::I32,
                    FieldTy::HandlerFrame => FRAME_REF,
                    FieldTy::Resumption => RESUMPTION_REF,
                    FieldTy::Value(ty) => self.val_type(*ty)?,
                });
            }
            let supertype = match env.supertype {
                Some(parent) => self.env_type_index(parent)?,
                None => ENV_BASE_IDX,
            };
            let idx = self
                .module
                .types
                .push_struct(&env.name, &fields, Some(supertype), false);
            self.env_types.push(idx);
        }
        Ok(())
    }
}
