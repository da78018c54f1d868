//! Effect-specific expressions: calls, `perform`, `handle`, `resume` and
//! closures, plus the check that follows every continuation site.

use caldera_hir::{HandlerClause, HirExpr, OperationRef, ResumeKind, SymbolId, TypeId};
use caldera_passes::{
    AnalysisError, ContinuationSiteOwner, FieldSource, OwnerSummary, direct_callee, operands,
};
use tracing::trace;
use wasm_encoder::{BlockType, HeapType, Instruction};

use crate::errors::{CompilationError, CompilationResult};
use crate::expr::{FnCx, Operands};
use crate::gc_types::{
    ANY_HEAP, ANYREF, ARGS_IDX, CLOSURE_ARRAY_IDX, CLOSURE_ENV_FIELD, CLOSURE_FUNC_FIELD,
    CLOSURE_IDX, CLOSURE_REF, CONT_IDX, FRAME_IDX, FRAME_REF, I32_ARRAY_IDX, OUTCOME_CONT_FIELD,
    OUTCOME_IDX, OUTCOME_OP_FIELD, OUTCOME_PAYLOAD_FIELD, OUTCOME_SKIP_FIELD, OUTCOME_TAG_FIELD,
    OUTCOME_VALUE_FIELD,
};
use crate::runtime::{CLAUSE_CTL, CLAUSE_FN, TAG_SUSPENDED};
use crate::types::{Abi, emit_box, emit_unbox};

impl<'a, 'p> FnCx<'a, 'p> {
    /// With the `Outcome` of a site on the stack: returns it to the caller,
    /// extended by this function's continuation frame, if it is suspended;
    /// otherwise leaves its unboxed value.
    pub(crate) fn site_check(&mut self, expr: &'p HirExpr) -> CompilationResult<()> {
        let table = self.ctx.table;
        let site = table.site_for_expr(expr.id).ok_or_else(|| {
            CompilationError::internal(format!("{} is not a continuation site", expr.id))
        })?;
        let cont = self.ctx.owner_fns(self.owner.id)?.cont.ok_or_else(|| {
            CompilationError::internal(format!("`{}` has no continuation function", self.owner.name))
        })?;
        let env_idx = self.ctx.env_type_index(site.env_type)?;
        let outcome = self.outcome_local();

        self.fb.emit(Instruction::LocalTee(outcome));
        self.fb.struct_get(OUTCOME_IDX, OUTCOME_TAG_FIELD);
        self.fb.if_(BlockType::Empty);
        self.fb.i32_const(TAG_SUSPENDED);
        self.fb.emit(Instruction::RefNull(ANY_HEAP));
        self.ctx.ref_func(&mut self.fb, cont);
        for field in &site.env_fields {
            match field.source {
                FieldSource::Site => self.fb.i32_const(site.site_id as i32),
                FieldSource::Handler => self.push_handler(),
                FieldSource::Continuation | FieldSource::TailGuard => {
                    let clause = self.clause.ok_or_else(|| {
                        CompilationError::internal(format!(
                            "`{}` saves a resumption outside a ctl clause",
                            site.cont_fn_name
                        ))
                    })?;
                    if field.source == FieldSource::Continuation {
                        self.fb.local_get(clause.k);
                    } else {
                        self.fb.local_get(clause.guard);
                    }
                }
                FieldSource::Temp(key) => {
                    let local = self.temp_local(key)?.ok_or_else(|| {
                        CompilationError::missing_restore_binding(&site.cont_fn_name, &field.name)
                    })?;
                    self.fb.local_get(local);
                }
                FieldSource::Local(symbol) => {
                    let local = self.local(symbol)?;
                    self.fb.local_get(local);
                }
            }
        }
        self.fb.emit(Instruction::StructNew(env_idx));
        self.fb.local_get(outcome);
        self.fb.struct_get(OUTCOME_IDX, OUTCOME_CONT_FIELD);
        self.fb.emit(Instruction::StructNew(CONT_IDX));
        self.fb.local_get(outcome);
        self.fb.struct_get(OUTCOME_IDX, OUTCOME_OP_FIELD);
        self.fb.local_get(outcome);
        self.fb.struct_get(OUTCOME_IDX, OUTCOME_PAYLOAD_FIELD);
        self.fb.local_get(outcome);
        self.fb.struct_get(OUTCOME_IDX, OUTCOME_SKIP_FIELD);
        self.fb.emit(Instruction::StructNew(OUTCOME_IDX));
        self.fb.emit(Instruction::Return);
        self.fb.end();

        self.fb.local_get(outcome);
        self.fb.struct_get(OUTCOME_IDX, OUTCOME_VALUE_FIELD);
        let repr = self.repr(expr.ty)?;
        emit_unbox(&mut self.fb, repr);
        Ok(())
    }

    pub(crate) fn call(
        &mut self,
        expr: &'p HirExpr,
        callee: &'p HirExpr,
        args: &'p [HirExpr],
        tail: bool,
    ) -> CompilationResult<()> {
        let program = self.ctx.program;
        let (params, ret, _) = program
            .function_signature(callee.ty)
            .ok_or_else(|| AnalysisError::not_a_function(expr.id))?;
        if params.len() != args.len() {
            return Err(CompilationError::internal(format!(
                "{} passes {} arguments to a function of {}",
                expr.id,
                args.len(),
                params.len()
            )));
        }
        let abi = self.ctx.abi_of(callee.ty);
        if abi == Abi::Effectful {
            self.site(expr, |cx| cx.emit_call(expr, callee, args, params, ret, abi, tail))
        } else {
            self.emit_call(expr, callee, args, params, ret, abi, tail)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_call(
        &mut self,
        expr: &'p HirExpr,
        callee: &'p HirExpr,
        args: &'p [HirExpr],
        params: &[TypeId],
        ret: TypeId,
        abi: Abi,
        tail: bool,
    ) -> CompilationResult<()> {
        let program = self.ctx.program;
        let ops = operands(program, expr);
        let operands = self.park_operands(expr, &ops)?;
        let tail = tail && self.resume.is_none() && abi == self.abi && ret == self.result_ty;

        match direct_callee(program, expr) {
            Some(function) => {
                let entry = self.direct_entry(function)?;
                if abi == Abi::Effectful {
                    self.push_handler();
                }
                for (pos, arg) in args.iter().enumerate() {
                    self.push_operand(&operands, pos, arg, params[pos])?;
                }
                if tail {
                    self.fb.emit(Instruction::ReturnCall(entry));
                } else {
                    self.fb.emit(Instruction::Call(entry));
                }
            }
            None => {
                let closure = match &operands {
                    Operands::Parked(locals) => locals.first().copied().ok_or_else(|| {
                        CompilationError::internal(format!("callee of {} was not parked", expr.id))
                    })?,
                    Operands::Inline => {
                        let local = self.fb.local(CLOSURE_REF);
                        self.compile_expr(callee, false)?;
                        self.fb.local_set(local);
                        local
                    }
                };
                let sig = self.ctx.closure_signature(callee.ty)?;
                self.fb.local_get(closure);
                self.fb.struct_get(CLOSURE_IDX, CLOSURE_ENV_FIELD);
                if abi == Abi::Effectful {
                    self.push_handler();
                }
                for (pos, arg) in args.iter().enumerate() {
                    self.push_operand(&operands, pos + 1, arg, params[pos])?;
                }
                self.fb.local_get(closure);
                self.fb.struct_get(CLOSURE_IDX, CLOSURE_FUNC_FIELD);
                self.fb.emit(Instruction::RefCastNonNull(HeapType::Concrete(sig)));
                if tail {
                    self.fb.emit(Instruction::ReturnCallRef(sig));
                } else {
                    self.fb.emit(Instruction::CallRef(sig));
                }
            }
        }

        if abi == Abi::Effectful && !tail {
            self.site_check(expr)?;
        }
        Ok(())
    }

    fn direct_entry(&mut self, function: SymbolId) -> CompilationResult<u32> {
        let table = self.ctx.table;
        let owner = table.function_owner(function).ok_or_else(|| {
            CompilationError::internal(format!("no function owner for {function}"))
        })?;
        Ok(self.ctx.owner_fns(owner.id)?.entry())
    }

    pub(crate) fn perform(
        &mut self,
        expr: &'p HirExpr,
        op: Option<OperationRef>,
        args: &'p [HirExpr],
    ) -> CompilationResult<()> {
        let program = self.ctx.program;
        let op = op.ok_or_else(|| AnalysisError::missing_operation(expr.id))?;
        let decl = program
            .operation(op)
            .ok_or_else(|| AnalysisError::missing_operation(expr.id))?;
        let handle = self
            .ctx
            .operations
            .handle(op)
            .ok_or_else(|| AnalysisError::missing_operation(expr.id))?;
        if decl.params.len() != args.len() {
            return Err(CompilationError::internal(format!(
                "{} sends {} arguments to `{}`",
                expr.id,
                args.len(),
                decl.name
            )));
        }

        self.site(expr, |cx| {
            let ops = operands(program, expr);
            let operands = cx.park_operands(expr, &ops)?;
            if decl.resume_kind == ResumeKind::Fn {
                cx.push_handler();
            }
            cx.fb.i32_const(handle as i32);
            for (pos, arg) in args.iter().enumerate() {
                cx.push_operand(&operands, pos, arg, decl.params[pos])?;
                let repr = cx.repr(decl.params[pos])?;
                emit_box(&mut cx.fb, repr);
            }
            cx.fb.emit(Instruction::ArrayNewFixed {
                array_type_index: ARGS_IDX,
                array_size: args.len() as u32,
            });
            let helper = match decl.resume_kind {
                ResumeKind::Fn => cx.ctx.runtime.perform,
                ResumeKind::Ctl => cx.ctx.runtime.suspend,
            };
            cx.fb.emit(Instruction::Call(helper));
            cx.site_check(expr)
        })
    }

    pub(crate) fn handle(
        &mut self,
        expr: &'p HirExpr,
        clauses: &'p [HandlerClause],
    ) -> CompilationResult<()> {
        let program = self.ctx.program;
        let table = self.ctx.table;
        let body_owner = table
            .owner_of(ContinuationSiteOwner::HandleBody { handler: expr.id })
            .ok_or_else(|| CompilationError::internal(format!("no body owner for {}", expr.id)))?;

        let mut clause_owners = Vec::with_capacity(clauses.len());
        for (index, clause) in clauses.iter().enumerate() {
            let owner = table
                .owner_of(ContinuationSiteOwner::HandlerClause {
                    handler: expr.id,
                    clause: index as u32,
                })
                .ok_or_else(|| {
                    CompilationError::internal(format!("no owner for clause {index} of {}", expr.id))
                })?;
            let decl = program
                .operation(clause.op)
                .ok_or_else(|| AnalysisError::missing_operation(expr.id))?;
            let handle = self
                .ctx
                .operations
                .handle(clause.op)
                .ok_or_else(|| AnalysisError::missing_operation(expr.id))?;
            let kind = match decl.resume_kind {
                ResumeKind::Ctl => CLAUSE_CTL,
                ResumeKind::Fn => CLAUSE_FN,
            };
            clause_owners.push((owner, handle, kind));
        }

        self.site(expr, |cx| {
            let count = clause_owners.len() as u32;
            for (_, handle, _) in &clause_owners {
                cx.fb.i32_const(*handle as i32);
            }
            cx.fb.emit(Instruction::ArrayNewFixed {
                array_type_index: I32_ARRAY_IDX,
                array_size: count,
            });
            for (_, _, kind) in &clause_owners {
                cx.fb.i32_const(*kind);
            }
            cx.fb.emit(Instruction::ArrayNewFixed {
                array_type_index: I32_ARRAY_IDX,
                array_size: count,
            });
            for &(owner, _, _) in &clause_owners {
                let func = cx.ctx.owner_fns(owner.id)?.body;
                cx.emit_closure(owner, func)?;
            }
            cx.fb.emit(Instruction::ArrayNewFixed {
                array_type_index: CLOSURE_ARRAY_IDX,
                array_size: count,
            });
            cx.push_handler();
            cx.fb.emit(Instruction::StructNew(FRAME_IDX));
            let frame = cx.fb.local(FRAME_REF);
            cx.fb.local_set(frame);

            let body = cx.ctx.owner_fns(body_owner.id)?.body;
            cx.emit_captures(body_owner)?;
            cx.fb.local_get(frame);
            cx.fb.emit(Instruction::Call(body));
            cx.fb.local_get(frame);
            cx.fb.emit(Instruction::Call(cx.ctx.runtime.handle));
            cx.site_check(expr)
        })
    }

    pub(crate) fn resume_expr(&mut self, expr: &'p HirExpr, value: &'p HirExpr) -> CompilationResult<()> {
        let program = self.ctx.program;
        let clause = self.owner.clause.ok_or_else(|| {
            AnalysisError::unsupported_site(expr.id, "resume outside a handler clause")
        })?;
        let decl = program
            .operation(clause.op)
            .ok_or_else(|| AnalysisError::missing_operation(expr.id))?;
        let result = decl.result;
        let repr = self.repr(result)?;

        match clause.resume_kind {
            // The clause's result is the operation's result.
            ResumeKind::Fn => {
                self.compile_expr(value, false)?;
                self.coerce(value.ty, result)?;
                emit_box(&mut self.fb, repr);
                self.fb.emit(Instruction::Call(self.ctx.runtime.done));
                self.fb.emit(Instruction::Return);
                Ok(())
            }
            ResumeKind::Ctl => self.site(expr, |cx| {
                let locals = cx.clause.ok_or_else(|| {
                    CompilationError::internal(format!("`{}` has no resumption", cx.owner.name))
                })?;
                cx.compile_expr(value, false)?;
                cx.coerce(value.ty, result)?;
                emit_box(&mut cx.fb, repr);
                let boxed = cx.fb.local(ANYREF);
                cx.fb.local_set(boxed);

                cx.fb.local_get(locals.guard);
                cx.fb.if_(BlockType::Empty);
                cx.fb.emit(Instruction::Unreachable);
                cx.fb.end();
                cx.fb.i32_const(1);
                cx.fb.local_set(locals.guard);

                cx.fb.local_get(locals.k);
                cx.fb.local_get(boxed);
                cx.fb.emit(Instruction::Call(cx.ctx.runtime.resume_with));
                cx.site_check(expr)
            }),
        }
    }

    pub(crate) fn lambda(&mut self, expr: &'p HirExpr) -> CompilationResult<()> {
        let table = self.ctx.table;
        let owner = table
            .owner_of(ContinuationSiteOwner::Lambda { expr: expr.id })
            .ok_or_else(|| CompilationError::internal(format!("no owner for lambda {}", expr.id)))?;
        let entry = self.ctx.owner_fns(owner.id)?.entry();
        self.emit_closure(owner, entry)
    }

    /// `Closure { func, env: captures of owner }`
    fn emit_closure(&mut self, owner: &'p OwnerSummary, func: u32) -> CompilationResult<()> {
        self.ctx.ref_func(&mut self.fb, func);
        self.emit_captures(owner)?;
        self.fb.emit(Instruction::StructNew(CLOSURE_IDX));
        Ok(())
    }

    /// Environment value of a nested owner: its captured locals, or
    /// `ref.null any` when it captures nothing.
    pub(crate) fn emit_captures(&mut self, owner: &'p OwnerSummary) -> CompilationResult<()> {
        match self.ctx.capture_type(owner)? {
            None => self.fb.emit(Instruction::RefNull(ANY_HEAP)),
            Some(idx) => {
                for symbol in &owner.captures {
                    let local = self.local(*symbol)?;
                    self.fb.local_get(local);
                }
                self.fb.emit(Instruction::StructNew(idx));
                trace!("`{}` captures {} values", owner.name, owner.captures.len());
            }
        }
        Ok(())
    }
}
