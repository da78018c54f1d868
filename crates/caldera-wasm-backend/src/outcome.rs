//! Glue between the pure and the effectful calling conventions.
//!
//! - surfaces give an effectful body the signature its pure type promises
//! - closure adapters turn a top-level function into a `Closure` value
//! - coercion wrappers let a pure closure flow where an effectful one is
//!   expected

use caldera_hir::{SymbolId, TypeId};
use caldera_passes::{ContinuationSiteOwner, OwnerSummary};
use tracing::trace;
use wasm_encoder::{HeapType, Instruction};

use crate::context::{CompileContext, OwnerFns};
use crate::errors::{CompilationError, CompilationResult};
use crate::function_builder::FunctionBuilder;
use crate::gc_types::{
    ANY_HEAP, CLOSURE_ENV_FIELD, CLOSURE_FUNC_FIELD, CLOSURE_IDX, CLOSURE_REF, FRAME_IDX,
};
use crate::types::{Abi, emit_box, emit_unbox};

impl<'p> CompileContext<'p> {
    /// Defines the pure surface of an owner whose body had to be compiled
    /// effectfully (it handles its own effects).
    pub(crate) fn define_surface(&mut self, owner: &OwnerSummary, fns: OwnerFns) -> CompilationResult<()> {
        let Some(surface) = fns.surface else {
            return Ok(());
        };
        let fn_ty = owner.fn_ty.ok_or_else(|| {
            CompilationError::internal(format!("surface of `{}` without a type", owner.name))
        })?;
        let lambda = matches!(owner.owner, ContinuationSiteOwner::Lambda { .. });
        let (params, _) = self.signature(fn_ty, Abi::Pure, lambda)?;
        let ret = self
            .program
            .function_signature(fn_ty)
            .map(|(_, ret, _)| ret)
            .ok_or_else(|| CompilationError::internal(format!("`{}` is not a function", owner.name)))?;
        let ret = self.repr(ret)?;

        let mut fb = FunctionBuilder::new(&params);
        let first_param = if lambda {
            fb.local_get(0);
            1
        } else {
            0
        };
        fb.emit(Instruction::RefNull(HeapType::Concrete(FRAME_IDX)));
        for index in first_param..params.len() as u32 {
            fb.local_get(index);
        }
        fb.emit(Instruction::Call(fns.body));
        fb.emit(Instruction::Call(self.runtime.expect_done));
        emit_unbox(&mut fb, ret);
        self.module.define_function(surface, fb.finish())
    }

    /// `name$closure`: the closure-convention entry of a top-level function.
    pub(crate) fn closure_adapter(&mut self, symbol: SymbolId) -> CompilationResult<u32> {
        if let Some(func) = self.closure_adapters.get(&symbol) {
            return Ok(*func);
        }
        let table = self.table;
        let owner = table.function_owner(symbol).ok_or_else(|| {
            CompilationError::internal(format!("no function owner for {symbol}"))
        })?;
        let fn_ty = self.program.symbol(symbol).ty;
        let ty = self.closure_signature(fn_ty)?;
        let (params, _) = self.signature(fn_ty, self.abi_of(fn_ty), true)?;
        let entry = self.owner_fns(owner.id)?.entry();

        let func = self
            .module
            .declare_function(format!("{}$closure", owner.name), ty);
        let mut fb = FunctionBuilder::new(&params);
        for index in 1..params.len() as u32 {
            fb.local_get(index);
        }
        fb.emit(Instruction::ReturnCall(entry));
        self.module.define_function(func, fb.finish())?;
        self.closure_adapters.insert(symbol, func);
        trace!("closure adapter for `{}`: {func}", owner.name);
        Ok(func)
    }

    /// Whether a value of function type `from` must be wrapped before it can
    /// be used as a value of function type `to`.
    pub(crate) fn needs_coercion(&self, from: TypeId, to: TypeId) -> bool {
        from != to
            && self.program.function_signature(from).is_some()
            && self.program.function_signature(to).is_some()
            && self.abi_of(from) == Abi::Pure
            && self.abi_of(to) == Abi::Effectful
    }

    /// Wrapper presenting a pure closure of type `from` with the effectful
    /// convention of `to`. The wrapped closure is the wrapper's environment.
    pub(crate) fn coercion_wrapper(&mut self, from: TypeId, to: TypeId) -> CompilationResult<u32> {
        if let Some(func) = self.coercions.get(&(from, to)) {
            return Ok(*func);
        }
        let program = self.program;
        let ret = program
            .function_signature(from)
            .map(|(_, ret, _)| ret)
            .ok_or_else(|| CompilationError::internal(format!("type {from} is not a function")))?;
        let ret = self.repr(ret)?;
        let src_sig = self.closure_signature(from)?;
        let ty = self.closure_signature(to)?;
        let (params, _) = self.signature(to, Abi::Effectful, true)?;

        let func = self
            .module
            .declare_function(format!("coerce${}${}", from.0, to.0), ty);
        let mut fb = FunctionBuilder::new(&params);
        let closure = fb.local(CLOSURE_REF);
        fb.local_get(0);
        fb.emit(Instruction::RefCastNonNull(HeapType::Concrete(CLOSURE_IDX)));
        fb.emit(Instruction::LocalTee(closure));
        fb.struct_get(CLOSURE_IDX, CLOSURE_ENV_FIELD);
        // Parameter 1 is the handler frame, which a pure callee does not take.
        for index in 2..params.len() as u32 {
            fb.local_get(index);
        }
        fb.local_get(closure);
        fb.struct_get(CLOSURE_IDX, CLOSURE_FUNC_FIELD);
        fb.emit(Instruction::RefCastNonNull(HeapType::Concrete(src_sig)));
        fb.emit(Instruction::CallRef(src_sig));
        emit_box(&mut fb, ret);
        fb.emit(Instruction::Call(self.runtime.done));
        self.module.define_function(func, fb.finish())?;
        self.coercions.insert((from, to), func);
        trace!("coercion wrapper {from} -> {to}: {func}");
        Ok(func)
    }

    /// Applies [`Self::coercion_wrapper`] to the closure on top of the stack.
    pub(crate) fn emit_coercion(
        &mut self,
        fb: &mut FunctionBuilder,
        from: TypeId,
        to: TypeId,
    ) -> CompilationResult<()> {
        if !self.needs_coercion(from, to) {
            return Ok(());
        }
        let wrapper = self.coercion_wrapper(from, to)?;
        let saved = fb.local(CLOSURE_REF);
        fb.local_set(saved);
        self.ref_func(fb, wrapper);
        fb.local_get(saved);
        fb.emit(Instruction::StructNew(CLOSURE_IDX));
        Ok(())
    }

    /// Closure value of a top-level function used as a value.
    pub(crate) fn emit_function_value(
        &mut self,
        fb: &mut FunctionBuilder,
        symbol: SymbolId,
    ) -> CompilationResult<()> {
        let adapter = self.closure_adapter(symbol)?;
        self.ref_func(fb, adapter);
        fb.emit(Instruction::RefNull(ANY_HEAP));
        fb.emit(Instruction::StructNew(CLOSURE_IDX));
        Ok(())
    }
}
