//! The status/buffer protocol spoken with the host trampoline.
//!
//! A top-level outcome is "settled" into globals and the exchange buffer: a
//! completed run leaves its result in the first slot, a suspended one leaves
//! the pending operation handle, its arguments and a generation token that
//! `resume_effectful` must present to continue.

use caldera_host::abi::{
    self, EXPORT_EFFECT_BUFFER, EXPORT_EFFECT_CONT, EXPORT_EFFECT_LEN, EXPORT_EFFECT_OP,
    EXPORT_EFFECT_STATUS, EXPORT_INIT_EFFECTS, EXPORT_MEMORY, EXPORT_RESUME_EFFECTFUL, SLOT_SIZE,
    STATUS_DONE, STATUS_SUSPENDED,
};
use caldera_passes::ContinuationSiteOwner;
use tracing::debug;
use wasm_encoder::{BlockType, ConstExpr, ExportKind, HeapType, Instruction, MemArg, ValType};

use crate::context::CompileContext;
use crate::errors::{CompilationError, CompilationResult};
use crate::function_builder::FunctionBuilder;
use crate::gc_types::{
    ANY_HEAP, ANYREF, ARGS_IDX, BOX_F64_IDX, BOX_I32_IDX, BOX_I64_IDX, BOX_VALUE_FIELD, CONT_IDX,
    CONT_REF, FRAME_IDX, OUTCOME_CONT_FIELD, OUTCOME_IDX, OUTCOME_OP_FIELD, OUTCOME_PAYLOAD_FIELD,
    OUTCOME_REF, OUTCOME_TAG_FIELD, OUTCOME_VALUE_FIELD, nullable,
};
use crate::module_builder::ModuleBuilder;
use crate::runtime::RuntimeFns;
use crate::types::{Abi, emit_box, emit_unbox, value_kind};

const PAGE_SIZE: u64 = 65536;

/// Slot kind argument of `store_slot` meaning "use the box class".
const KIND_FROM_BOX: i32 = -1;

fn mem32(offset: u64) -> MemArg {
    MemArg {
        offset,
        align: 2,
        memory_index: 0,
    }
}

fn mem64(offset: u64) -> MemArg {
    MemArg {
        offset,
        align: 3,
        memory_index: 0,
    }
}

/// Globals and helpers of the host protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostFns {
    pub buffer: u32,
    status: u32,
    op: u32,
    token: u32,
    len: u32,
    /// Slot kind of the running export's result.
    result_kind: u32,
    pending: u32,
    /// `(addr: i32, value: anyref, kind: i32)`
    store_slot: u32,
    /// `(addr: i32) -> anyref`
    load_slot: u32,
    /// `(Outcome) -> i32` status
    pub settle: u32,
    init_effects: u32,
    effect_status: u32,
    effect_op: u32,
    effect_cont: u32,
    effect_len: u32,
    effect_buffer: u32,
    resume_effectful: u32,
}

impl HostFns {
    pub fn declare(module: &mut ModuleBuilder, buffer: u32) -> Self {
        let i32_zero = ConstExpr::i32_const(0);
        let status = module.add_global("effect_status", ValType::I32, i32_zero.clone());
        let op = module.add_global("effect_op", ValType::I32, i32_zero.clone());
        let token = module.add_global("effect_token", ValType::I32, i32_zero.clone());
        let len = module.add_global("effect_len", ValType::I32, i32_zero.clone());
        let result_kind = module.add_global("result_kind", ValType::I32, i32_zero);
        let pending = module.add_global(
            "pending_cont",
            CONT_REF,
            ConstExpr::ref_null(HeapType::Concrete(CONT_IDX)),
        );

        let getter = module.types.intern_func(&[], &[ValType::I32]);
        let resume = module.types.intern_func(&[ValType::I32], &[ValType::I32]);
        let store = module
            .types
            .intern_func(&[ValType::I32, ANYREF, ValType::I32], &[]);
        let load = module.types.intern_func(&[ValType::I32], &[ANYREF]);
        let settle = module.types.intern_func(&[OUTCOME_REF], &[ValType::I32]);
        Self {
            buffer,
            status,
            op,
            token,
            len,
            result_kind,
            pending,
            store_slot: module.declare_function("host$store_slot", store),
            load_slot: module.declare_function("host$load_slot", load),
            settle: module.declare_function("host$settle", settle),
            init_effects: module.declare_function(EXPORT_INIT_EFFECTS, getter),
            effect_status: module.declare_function(EXPORT_EFFECT_STATUS, getter),
            effect_op: module.declare_function(EXPORT_EFFECT_OP, getter),
            effect_cont: module.declare_function(EXPORT_EFFECT_CONT, getter),
            effect_len: module.declare_function(EXPORT_EFFECT_LEN, getter),
            effect_buffer: module.declare_function(EXPORT_EFFECT_BUFFER, getter),
            resume_effectful: module.declare_function(EXPORT_RESUME_EFFECTFUL, resume),
        }
    }

    pub fn define(&self, module: &mut ModuleBuilder, runtime: &RuntimeFns) -> CompilationResult<()> {
        module.define_function(self.store_slot, self.emit_store_slot())?;
        module.define_function(self.load_slot, self.emit_load_slot())?;
        module.define_function(self.settle, self.emit_settle())?;
        module.define_function(self.init_effects, self.emit_init_effects())?;
        module.define_function(self.effect_status, global_getter(self.status))?;
        module.define_function(self.effect_op, global_getter(self.op))?;
        module.define_function(self.effect_cont, global_getter(self.token))?;
        module.define_function(self.effect_len, global_getter(self.len))?;
        let mut fb = FunctionBuilder::new(&[]);
        fb.i32_const(self.buffer as i32);
        module.define_function(self.effect_buffer, fb.finish())?;
        module.define_function(self.resume_effectful, self.emit_resume(runtime))?;

        for (name, func) in [
            (EXPORT_INIT_EFFECTS, self.init_effects),
            (EXPORT_EFFECT_STATUS, self.effect_status),
            (EXPORT_EFFECT_OP, self.effect_op),
            (EXPORT_EFFECT_CONT, self.effect_cont),
            (EXPORT_EFFECT_LEN, self.effect_len),
            (EXPORT_EFFECT_BUFFER, self.effect_buffer),
            (EXPORT_RESUME_EFFECTFUL, self.resume_effectful),
        ] {
            module.export(name, ExportKind::Func, func);
        }
        Ok(())
    }

    /// Writes `kind, 0, bits` at `addr`. A negative `kind` stores the box
    /// class of the value instead.
    fn emit_store_slot(&self) -> wasm_encoder::Function {
        const ADDR: u32 = 0;
        const VALUE: u32 = 1;
        const KIND: u32 = 2;
        let mut fb = FunctionBuilder::new(&[ValType::I32, ANYREF, ValType::I32]);
        let class = fb.local(ValType::I32);

        let result = BlockType::Result(ValType::I32);
        fb.local_get(VALUE);
        fb.emit(Instruction::RefIsNull);
        fb.if_(result);
        fb.i32_const(abi::ValueKind::Unit.code() as i32);
        fb.else_();
        for (idx, kind) in [
            (BOX_I32_IDX, abi::ValueKind::Int),
            (BOX_I64_IDX, abi::ValueKind::Int64),
            (BOX_F64_IDX, abi::ValueKind::Float),
        ] {
            fb.local_get(VALUE);
            fb.emit(Instruction::RefTestNonNull(HeapType::Concrete(idx)));
            fb.if_(result);
            fb.i32_const(kind.code() as i32);
            fb.else_();
        }
        fb.i32_const(abi::ValueKind::Opaque.code() as i32);
        for _ in 0..4 {
            fb.end();
        }
        fb.local_set(class);

        fb.local_get(ADDR);
        fb.local_get(KIND);
        fb.local_get(class);
        fb.local_get(KIND);
        fb.i32_const(0);
        fb.emit(Instruction::I32GeS);
        fb.emit(Instruction::Select);
        fb.emit(Instruction::I32Store(mem32(0)));

        fb.local_get(ADDR);
        fb.i32_const(0);
        fb.emit(Instruction::I32Store(mem32(4)));

        let bits = BlockType::Result(ValType::I64);
        fb.local_get(ADDR);
        let unboxed = |fb: &mut FunctionBuilder, idx: u32| {
            fb.local_get(VALUE);
            fb.emit(Instruction::RefCastNonNull(HeapType::Concrete(idx)));
            fb.struct_get(idx, BOX_VALUE_FIELD);
        };
        fb.local_get(class);
        fb.i32_const(abi::ValueKind::Int.code() as i32);
        fb.emit(Instruction::I32Eq);
        fb.if_(bits);
        unboxed(&mut fb, BOX_I32_IDX);
        fb.emit(Instruction::I64ExtendI32S);
        fb.else_();
        fb.local_get(class);
        fb.i32_const(abi::ValueKind::Int64.code() as i32);
        fb.emit(Instruction::I32Eq);
        fb.if_(bits);
        unboxed(&mut fb, BOX_I64_IDX);
        fb.else_();
        fb.local_get(class);
        fb.i32_const(abi::ValueKind::Float.code() as i32);
        fb.emit(Instruction::I32Eq);
        fb.if_(bits);
        unboxed(&mut fb, BOX_F64_IDX);
        fb.emit(Instruction::I64ReinterpretF64);
        fb.else_();
        fb.emit(Instruction::I64Const(0));
        fb.end();
        fb.end();
        fb.end();
        fb.emit(Instruction::I64Store(mem64(8)));
        fb.finish()
    }

    /// Boxes the slot at `addr` according to its kind.
    fn emit_load_slot(&self) -> wasm_encoder::Function {
        const ADDR: u32 = 0;
        let mut fb = FunctionBuilder::new(&[ValType::I32]);
        let kind = fb.local(ValType::I32);
        fb.local_get(ADDR);
        fb.emit(Instruction::I32Load(mem32(0)));
        fb.local_set(kind);

        let is = |fb: &mut FunctionBuilder, code: abi::ValueKind| {
            fb.local_get(kind);
            fb.i32_const(code.code() as i32);
            fb.emit(Instruction::I32Eq);
        };
        is(&mut fb, abi::ValueKind::Bool);
        is(&mut fb, abi::ValueKind::Int);
        fb.emit(Instruction::I32Or);
        fb.if_(BlockType::Empty);
        fb.local_get(ADDR);
        fb.emit(Instruction::I64Load(mem64(8)));
        fb.emit(Instruction::I32WrapI64);
        fb.emit(Instruction::StructNew(BOX_I32_IDX));
        fb.emit(Instruction::Return);
        fb.end();

        is(&mut fb, abi::ValueKind::Int64);
        fb.if_(BlockType::Empty);
        fb.local_get(ADDR);
        fb.emit(Instruction::I64Load(mem64(8)));
        fb.emit(Instruction::StructNew(BOX_I64_IDX));
        fb.emit(Instruction::Return);
        fb.end();

        is(&mut fb, abi::ValueKind::Float);
        fb.if_(BlockType::Empty);
        fb.local_get(ADDR);
        fb.emit(Instruction::F64Load(mem64(8)));
        fb.emit(Instruction::StructNew(BOX_F64_IDX));
        fb.emit(Instruction::Return);
        fb.end();

        fb.emit(Instruction::RefNull(ANY_HEAP));
        fb.finish()
    }

    fn emit_settle(&self) -> wasm_encoder::Function {
        const OUTCOME: u32 = 0;
        let mut fb = FunctionBuilder::new(&[OUTCOME_REF]);
        let args = fb.local(nullable(ARGS_IDX));
        let count = fb.local(ValType::I32);
        let i = fb.local(ValType::I32);

        fb.local_get(OUTCOME);
        fb.struct_get(OUTCOME_IDX, OUTCOME_TAG_FIELD);
        fb.emit(Instruction::I32Eqz);
        fb.if_(BlockType::Empty);
        fb.i32_const(STATUS_DONE);
        fb.emit(Instruction::GlobalSet(self.status));
        fb.emit(Instruction::RefNull(HeapType::Concrete(CONT_IDX)));
        fb.emit(Instruction::GlobalSet(self.pending));
        fb.i32_const(self.buffer as i32);
        fb.local_get(OUTCOME);
        fb.struct_get(OUTCOME_IDX, OUTCOME_VALUE_FIELD);
        fb.emit(Instruction::GlobalGet(self.result_kind));
        fb.emit(Instruction::Call(self.store_slot));
        fb.i32_const(SLOT_SIZE as i32);
        fb.emit(Instruction::GlobalSet(self.len));
        fb.i32_const(STATUS_DONE);
        fb.emit(Instruction::Return);
        fb.end();

        fb.i32_const(STATUS_SUSPENDED);
        fb.emit(Instruction::GlobalSet(self.status));
        fb.local_get(OUTCOME);
        fb.struct_get(OUTCOME_IDX, OUTCOME_OP_FIELD);
        fb.emit(Instruction::GlobalSet(self.op));
        fb.local_get(OUTCOME);
        fb.struct_get(OUTCOME_IDX, OUTCOME_CONT_FIELD);
        fb.emit(Instruction::GlobalSet(self.pending));
        fb.emit(Instruction::GlobalGet(self.token));
        fb.i32_const(1);
        fb.emit(Instruction::I32Add);
        fb.emit(Instruction::GlobalSet(self.token));

        fb.local_get(OUTCOME);
        fb.struct_get(OUTCOME_IDX, OUTCOME_PAYLOAD_FIELD);
        fb.emit(Instruction::RefCastNullable(HeapType::Concrete(ARGS_IDX)));
        fb.emit(Instruction::LocalTee(args));
        fb.emit(Instruction::RefIsNull);
        fb.if_(BlockType::Result(ValType::I32));
        fb.i32_const(0);
        fb.else_();
        fb.local_get(args);
        fb.emit(Instruction::ArrayLen);
        fb.end();
        fb.local_set(count);

        let exit = fb.block(BlockType::Empty);
        let top = fb.loop_(BlockType::Empty);
        fb.local_get(i);
        fb.local_get(count);
        fb.emit(Instruction::I32GeU);
        fb.br_if(exit);
        fb.i32_const(self.buffer as i32);
        fb.local_get(i);
        fb.i32_const(SLOT_SIZE as i32);
        fb.emit(Instruction::I32Mul);
        fb.emit(Instruction::I32Add);
        fb.local_get(args);
        fb.local_get(i);
        fb.emit(Instruction::ArrayGet(ARGS_IDX));
        fb.i32_const(KIND_FROM_BOX);
        fb.emit(Instruction::Call(self.store_slot));
        fb.local_get(i);
        fb.i32_const(1);
        fb.emit(Instruction::I32Add);
        fb.local_set(i);
        fb.br(top);
        fb.end();
        fb.end();

        fb.local_get(count);
        fb.i32_const(SLOT_SIZE as i32);
        fb.emit(Instruction::I32Mul);
        fb.emit(Instruction::GlobalSet(self.len));
        fb.i32_const(STATUS_SUSPENDED);
        fb.finish()
    }

    /// Resets the protocol state and returns the address of the operation
    /// table. The token keeps counting so stale tokens stay invalid.
    fn emit_init_effects(&self) -> wasm_encoder::Function {
        let mut fb = FunctionBuilder::new(&[]);
        for global in [self.status, self.op, self.len] {
            fb.i32_const(0);
            fb.emit(Instruction::GlobalSet(global));
        }
        fb.emit(Instruction::RefNull(HeapType::Concrete(CONT_IDX)));
        fb.emit(Instruction::GlobalSet(self.pending));
        fb.i32_const(0);
        fb.finish()
    }

    fn emit_resume(&self, runtime: &RuntimeFns) -> wasm_encoder::Function {
        const TOKEN: u32 = 0;
        let mut fb = FunctionBuilder::new(&[ValType::I32]);
        let cont = fb.local(CONT_REF);

        fb.local_get(TOKEN);
        fb.emit(Instruction::GlobalGet(self.token));
        fb.emit(Instruction::I32Ne);
        fb.emit(Instruction::GlobalGet(self.pending));
        fb.emit(Instruction::RefIsNull);
        fb.emit(Instruction::I32Or);
        fb.if_(BlockType::Empty);
        fb.emit(Instruction::Unreachable);
        fb.end();

        fb.emit(Instruction::GlobalGet(self.pending));
        fb.local_set(cont);
        fb.emit(Instruction::RefNull(HeapType::Concrete(CONT_IDX)));
        fb.emit(Instruction::GlobalSet(self.pending));
        fb.local_get(cont);
        fb.i32_const(self.buffer as i32);
        fb.emit(Instruction::Call(self.load_slot));
        fb.emit(Instruction::Call(runtime.resume_cont));
        fb.emit(Instruction::ReturnCall(self.settle));
        fb.finish()
    }
}

fn global_getter(global: u32) -> wasm_encoder::Function {
    let mut fb = FunctionBuilder::new(&[]);
    fb.emit(Instruction::GlobalGet(global));
    fb.finish()
}

impl<'p> CompileContext<'p> {
    /// Emits `name_effectful` (and, when enabled, the pure surface `name`) for
    /// every exported function, plus memory and the operation table.
    pub(crate) fn emit_exports(&mut self) -> CompilationResult<Vec<String>> {
        let program = self.program;
        let table = self.table;
        let mut exported = Vec::new();
        for owner in table.owners.iter().filter(|owner| owner.exported) {
            let ContinuationSiteOwner::Function { .. } = owner.owner else {
                continue;
            };
            let fn_ty = owner
                .fn_ty
                .ok_or_else(|| CompilationError::internal(format!("`{}` has no type", owner.name)))?;
            let (params, ret, _) = program.function_signature(fn_ty).ok_or_else(|| {
                CompilationError::internal(format!("`{}` is not a function", owner.name))
            })?;
            if params.iter().any(|param| !program.ty(*param).is_scalar()) {
                return Err(CompilationError::invalid_export(
                    &owner.name,
                    "parameters must be scalars",
                ));
            }
            if !program.ty(ret).is_scalar() {
                return Err(CompilationError::invalid_export(
                    &owner.name,
                    "result must be a scalar",
                ));
            }
            let fns = self.owner_fns(owner.id)?;
            let (wasm_params, _) = self.signature(fn_ty, Abi::Pure, false)?;
            let ret_repr = self.repr(ret)?;

            let ty = self.module.types.intern_func(&wasm_params, &[ValType::I32]);
            let name = abi::effectful_export(&owner.name);
            let func = self.module.declare_function(name.clone(), ty);
            let mut fb = FunctionBuilder::new(&wasm_params);
            fb.i32_const(value_kind(program, ret).code() as i32);
            fb.emit(Instruction::GlobalSet(self.host.result_kind));
            if fns.abi == Abi::Effectful {
                fb.emit(Instruction::RefNull(HeapType::Concrete(FRAME_IDX)));
            }
            for index in 0..wasm_params.len() as u32 {
                fb.local_get(index);
            }
            fb.emit(Instruction::Call(fns.body));
            if fns.abi == Abi::Pure {
                emit_box(&mut fb, ret_repr);
                fb.emit(Instruction::Call(self.runtime.done));
            }
            fb.emit(Instruction::ReturnCall(self.host.settle));
            self.module.define_function(func, fb.finish())?;
            self.module.export(name, ExportKind::Func, func);

            if self.options.export_pure_surfaces {
                let surface = match fns.declared {
                    Abi::Pure => fns.entry(),
                    Abi::Effectful => {
                        let ty = self.signature_type(fn_ty, Abi::Pure, false)?;
                        let func = self.module.declare_function(format!("{}$pure", owner.name), ty);
                        let mut fb = FunctionBuilder::new(&wasm_params);
                        fb.emit(Instruction::RefNull(HeapType::Concrete(FRAME_IDX)));
                        for index in 0..wasm_params.len() as u32 {
                            fb.local_get(index);
                        }
                        fb.emit(Instruction::Call(fns.body));
                        fb.emit(Instruction::Call(self.runtime.expect_done));
                        emit_unbox(&mut fb, ret_repr);
                        self.module.define_function(func, fb.finish())?;
                        func
                    }
                };
                self.module.export(owner.name.clone(), ExportKind::Func, surface);
            }
            exported.push(owner.name.clone());
        }

        self.module.export(EXPORT_MEMORY, ExportKind::Memory, 0);
        let needed = u64::from(self.host.buffer)
            + u64::from(SLOT_SIZE) * u64::from(self.operations.max_arity().max(1));
        self.module.set_memory(needed.div_ceil(PAGE_SIZE).max(1));
        self.module.add_data(0, self.operations.encode());
        debug!(
            "host abi: {} exports, buffer at {}",
            exported.len(),
            self.host.buffer
        );
        Ok(exported)
    }
}
