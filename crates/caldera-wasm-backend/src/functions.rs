//! Wasm functions generated per owner: the body, its pure surface and the
//! continuation function shared by all of the owner's sites.

use caldera_hir::TypeId;
use caldera_passes::{ContinuationSiteOwner, EnvField, FieldSource, HEADER_FIELDS, OwnerSummary};
use tracing::{debug, trace};
use wasm_encoder::{BlockType, HeapType, Instruction, ValType};

use crate::context::{CompileContext, OwnerFns};
use crate::errors::{CompilationError, CompilationResult};
use crate::expr::{ClauseLocals, FnCx, ResumeState};
use crate::gc_types::{
    ANYREF, ARGS_IDX, CLAUSE_FN_IDX, CONT_FN_IDX, ENV_BASE_IDX, ENV_BASE_REF, ENV_HANDLER_FIELD,
    ENV_SITE_FIELD, FRAME_REF, OUTCOME_IDX, OUTCOME_REF, RESUMPTION_REF, nullable,
};
use crate::types::{Abi, emit_unbox};

/// Parameters of a clause function.
const CLAUSE_HANDLER_PARAM: u32 = 1;
const CLAUSE_PAYLOAD_PARAM: u32 = 2;
const CLAUSE_RESUMPTION_PARAM: u32 = 3;

impl<'p> CompileContext<'p> {
    /// Declares the functions of every owner, fixing their indices before
    /// any body refers to them.
    pub(crate) fn declare_owners(&mut self) -> CompilationResult<()> {
        let table = self.table;
        for owner in &table.owners {
            if owner.id.index() != self.owner_fns.len() {
                return Err(CompilationError::internal(format!(
                    "owner `{}` is out of order",
                    owner.name
                )));
            }
            let fns = match owner.owner {
                ContinuationSiteOwner::Function { .. } | ContinuationSiteOwner::Lambda { .. } => {
                    let fn_ty = owner_fn_ty(owner)?;
                    let lambda = matches!(owner.owner, ContinuationSiteOwner::Lambda { .. });
                    let abi = if owner.effectful { Abi::Effectful } else { Abi::Pure };
                    let declared = self.abi_of(fn_ty);
                    let body_ty = self.signature_type(fn_ty, abi, lambda)?;
                    if abi == Abi::Effectful && declared == Abi::Pure {
                        let body = self
                            .module
                            .declare_function(format!("{}$impl", owner.name), body_ty);
                        let surface_ty = self.signature_type(fn_ty, Abi::Pure, lambda)?;
                        let surface = self.module.declare_function(owner.name.clone(), surface_ty);
                        OwnerFns {
                            body,
                            abi,
                            declared,
                            surface: Some(surface),
                            cont: None,
                        }
                    } else {
                        OwnerFns {
                            body: self.module.declare_function(owner.name.clone(), body_ty),
                            abi,
                            declared,
                            surface: None,
                            cont: None,
                        }
                    }
                }
                ContinuationSiteOwner::HandleBody { .. } => {
                    let ty = self.module.types.intern_func(&[ANYREF, FRAME_REF], &[OUTCOME_REF]);
                    OwnerFns {
                        body: self.module.declare_function(owner.name.clone(), ty),
                        abi: Abi::Effectful,
                        declared: Abi::Effectful,
                        surface: None,
                        cont: None,
                    }
                }
                ContinuationSiteOwner::HandlerClause { .. } => OwnerFns {
                    body: self.module.declare_function(owner.name.clone(), CLAUSE_FN_IDX),
                    abi: Abi::Effectful,
                    declared: Abi::Effectful,
                    surface: None,
                    cont: None,
                },
            };
            let cont = owner
                .sites
                .map(|_| self.module.declare_function(owner.cont_fn_name.clone(), CONT_FN_IDX));
            self.owner_fns.push(OwnerFns { cont, ..fns });
        }
        debug!("declared functions for {} owners", self.owner_fns.len());
        Ok(())
    }

    pub(crate) fn compile_owners(&mut self) -> CompilationResult<()> {
        let table = self.table;
        let mut cont_fns = 0;
        for owner in &table.owners {
            let fns = self.owner_fns(owner.id)?;
            let body = compile_body(self, owner, fns)?;
            self.module.define_function(fns.body, body)?;
            self.define_surface(owner, fns)?;
            if let Some(cont) = fns.cont {
                let function = compile_cont_fn(self, owner, fns)?;
                self.module.define_function(cont, function)?;
                cont_fns += 1;
            }
        }
        debug!("emitted {cont_fns} continuation functions");
        Ok(())
    }

    /// Type of the value the owner's body function produces.
    fn owner_result_ty(&self, owner: &OwnerSummary) -> CompilationResult<TypeId> {
        match owner.owner {
            ContinuationSiteOwner::Function { .. } | ContinuationSiteOwner::Lambda { .. } => {
                let fn_ty = owner_fn_ty(owner)?;
                self.program
                    .function_signature(fn_ty)
                    .map(|(_, ret, _)| ret)
                    .ok_or_else(|| CompilationError::internal(format!("`{}` is not a function", owner.name)))
            }
            ContinuationSiteOwner::HandleBody { .. } | ContinuationSiteOwner::HandlerClause { .. } => {
                Ok(self.expr(owner.body)?.ty)
            }
        }
    }
}

fn owner_fn_ty(owner: &OwnerSummary) -> CompilationResult<TypeId> {
    owner
        .fn_ty
        .ok_or_else(|| CompilationError::internal(format!("`{}` has no function type", owner.name)))
}

fn compile_body<'p>(
    ctx: &mut CompileContext<'p>,
    owner: &'p OwnerSummary,
    fns: OwnerFns,
) -> CompilationResult<wasm_encoder::Function> {
    let body = ctx.expr(owner.body)?;
    let result_ty = ctx.owner_result_ty(owner)?;
    let params = match owner.owner {
        ContinuationSiteOwner::Function { .. } => ctx.signature(owner_fn_ty(owner)?, fns.abi, false)?.0,
        ContinuationSiteOwner::Lambda { .. } => ctx.signature(owner_fn_ty(owner)?, fns.abi, true)?.0,
        ContinuationSiteOwner::HandleBody { .. } => vec![ANYREF, FRAME_REF],
        ContinuationSiteOwner::HandlerClause { .. } => {
            vec![ANYREF, FRAME_REF, ANYREF, RESUMPTION_REF]
        }
    };

    let mut cx = FnCx::new(ctx, owner, &params, result_ty, fns.abi);
    match owner.owner {
        ContinuationSiteOwner::Function { .. } => {
            let first = cx.bind_handler_param(0);
            cx.bind_params(first);
        }
        ContinuationSiteOwner::Lambda { .. } => {
            let first = cx.bind_handler_param(1);
            cx.bind_params(first);
            cx.load_captures()?;
        }
        ContinuationSiteOwner::HandleBody { .. } => {
            cx.handler = Some(1);
            cx.load_captures()?;
        }
        ContinuationSiteOwner::HandlerClause { .. } => {
            cx.handler = Some(CLAUSE_HANDLER_PARAM);
            cx.load_captures()?;
            cx.load_clause_params()?;
            if owner.is_ctl_clause() {
                let guard = cx.fb.local(ValType::I32);
                cx.clause = Some(ClauseLocals {
                    k: CLAUSE_RESUMPTION_PARAM,
                    guard,
                });
            }
        }
    }
    cx.compile_expr(body, true)?;
    cx.finish_body(body.ty)
}

/// `(env, value) -> Outcome`: restores the state saved at the active site
/// and re-runs the body in resume mode.
fn compile_cont_fn<'p>(
    ctx: &mut CompileContext<'p>,
    owner: &'p OwnerSummary,
    fns: OwnerFns,
) -> CompilationResult<wasm_encoder::Function> {
    const ENV: u32 = 0;
    const VALUE: u32 = 1;
    let table = ctx.table;
    let body = ctx.expr(owner.body)?;
    let result_ty = ctx.owner_result_ty(owner)?;
    let cfg = ctx.cont_cfg(owner)?;
    let sites = table.sites_of(owner);

    let mut cx = FnCx::new(ctx, owner, &[ENV_BASE_REF, ANYREF], result_ty, fns.abi);
    let active = cx.fb.local(ValType::I32);
    let resuming = cx.fb.local(ValType::I32);
    let handler = cx.fb.local(FRAME_REF);
    cx.fb.local_get(ENV);
    cx.fb.struct_get(ENV_BASE_IDX, ENV_SITE_FIELD);
    cx.fb.local_set(active);
    cx.fb.local_get(ENV);
    cx.fb.struct_get(ENV_BASE_IDX, ENV_HANDLER_FIELD);
    cx.fb.local_set(handler);
    cx.handler = Some(handler);
    if owner.is_ctl_clause() {
        let k = cx.fb.local(RESUMPTION_REF);
        let guard = cx.fb.local(ValType::I32);
        cx.clause = Some(ClauseLocals { k, guard });
    }

    for site in sites.iter().rev() {
        let env_idx = cx.ctx.env_type_index(site.env_type)?;
        let env = cx.fb.local(nullable(env_idx));
        cx.fb.local_get(active);
        cx.fb.i32_const(site.site_id as i32);
        cx.fb.emit(Instruction::I32Eq);
        cx.fb.if_(BlockType::Empty);
        cx.fb.local_get(ENV);
        cx.fb.emit(Instruction::RefCastNonNull(HeapType::Concrete(env_idx)));
        cx.fb.local_set(env);
        for (index, field) in site.env_fields.iter().enumerate().skip(HEADER_FIELDS) {
            let target = cx.restore_target(&site.cont_fn_name, field)?;
            cx.fb.local_get(env);
            cx.fb.struct_get(env_idx, index as u32);
            cx.fb.local_set(target);
        }
        cx.fb.end();
        trace!(
            "{}: restores {} fields for site {}",
            site.cont_fn_name,
            site.env_fields.len().saturating_sub(HEADER_FIELDS),
            site.site_id
        );
    }

    cx.resume = Some(ResumeState {
        active,
        resuming,
        value: VALUE,
        cfg,
    });
    // Not a site of this owner: answer with a null outcome.
    cx.emit_in_range(owner.sites)?;
    cx.fb.emit(Instruction::I32Eqz);
    cx.fb.if_(BlockType::Empty);
    cx.fb.emit(Instruction::RefNull(HeapType::Concrete(OUTCOME_IDX)));
    cx.fb.emit(Instruction::Return);
    cx.fb.end();
    cx.fb.i32_const(1);
    cx.fb.local_set(resuming);

    cx.compile_expr(body, false)?;
    cx.finish_body(body.ty)
}

impl<'a, 'p> FnCx<'a, 'p> {
    /// Binds the handler parameter at `index` when the body is effectful and
    /// returns the index of the first declared parameter.
    fn bind_handler_param(&mut self, index: u32) -> u32 {
        if self.abi == Abi::Effectful {
            self.handler = Some(index);
            index + 1
        } else {
            index
        }
    }

    fn bind_params(&mut self, first: u32) {
        for (offset, symbol) in self.owner.params.iter().enumerate() {
            self.bind_param(*symbol, first + offset as u32);
        }
    }

    /// Copies the captured values out of the environment parameter.
    fn load_captures(&mut self) -> CompilationResult<()> {
        let owner = self.owner;
        let Some(idx) = self.ctx.capture_type(owner)? else {
            return Ok(());
        };
        let captures = self.fb.local(nullable(idx));
        self.fb.local_get(0);
        self.fb.emit(Instruction::RefCastNonNull(HeapType::Concrete(idx)));
        self.fb.local_set(captures);
        for (index, symbol) in owner.captures.iter().enumerate() {
            let local = self.local(*symbol)?;
            self.fb.local_get(captures);
            self.fb.struct_get(idx, index as u32);
            self.fb.local_set(local);
        }
        Ok(())
    }

    /// Unpacks the operation arguments into the clause's parameters.
    fn load_clause_params(&mut self) -> CompilationResult<()> {
        let owner = self.owner;
        if owner.params.is_empty() {
            return Ok(());
        }
        let args = self.fb.local(nullable(ARGS_IDX));
        self.fb.local_get(CLAUSE_PAYLOAD_PARAM);
        self.fb.emit(Instruction::RefCastNonNull(HeapType::Concrete(ARGS_IDX)));
        self.fb.local_set(args);
        for (index, symbol) in owner.params.iter().enumerate() {
            let ty = self.ctx.program.symbol(*symbol).ty;
            let repr = self.repr(ty)?;
            let local = self.local(*symbol)?;
            self.fb.local_get(args);
            self.fb.i32_const(index as i32);
            self.fb.emit(Instruction::ArrayGet(ARGS_IDX));
            emit_unbox(&mut self.fb, repr);
            self.fb.local_set(local);
        }
        Ok(())
    }

    /// Local a saved environment field is written back into.
    fn restore_target(&mut self, env: &str, field: &EnvField) -> CompilationResult<u32> {
        let missing = || CompilationError::missing_restore_binding(env, &field.name);
        match field.source {
            FieldSource::Site | FieldSource::Handler => Err(missing()),
            FieldSource::Continuation => self.clause.map(|clause| clause.k).ok_or_else(missing),
            FieldSource::TailGuard => self.clause.map(|clause| clause.guard).ok_or_else(missing),
            FieldSource::Temp(key) => self.temp_local(key)?.ok_or_else(missing),
            FieldSource::Local(symbol) => self.local(symbol),
        }
    }
}
