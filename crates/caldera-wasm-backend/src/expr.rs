//! Expression compiler shared by owner bodies and continuation functions.
//!
//! Every expression leaves exactly one value of its type's representation on
//! the stack (`i32.const 0` for unit). Control that leaves an expression
//! early (`br`, `return`, `return_call`) relies on the stack being
//! polymorphic afterwards.
//!
//! A continuation function compiles its owner's body a second time in
//! resume mode. `resuming` is set on entry and cleared by the active site,
//! so while it is set the code only walks down the path that leads to the
//! active site: statements before it are skipped, the branch or arm that
//! contains it is selected, operands evaluated before it are reloaded from
//! their temporaries.

use std::collections::HashMap;
use std::rc::Rc;

use caldera_hir::{
    BinaryOp, ExprKind, HirExpr, LabelId, Literal, MatchArm, Stmt, SymbolId, TypeId,
};
use caldera_passes::{CfgEdge, ContCfg, OwnerSummary, SiteRange, TempKey, operands};
use wasm_encoder::{BlockType, HeapType, Instruction, ValType};

use crate::context::CompileContext;
use crate::errors::{CompilationError, CompilationResult};
use crate::function_builder::{FunctionBuilder, Label};
use crate::gc_types::{FRAME_IDX, OUTCOME_REF};
use crate::types::{Abi, Repr, emit_box, emit_unbox};

/// Locals of a `ctl` clause.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ClauseLocals {
    /// The clause's resumption.
    pub k: u32,
    /// Set once `resume` has run.
    pub guard: u32,
}

#[derive(Clone, Debug)]
pub(crate) struct ResumeState {
    pub active: u32,
    pub resuming: u32,
    /// Parameter holding the boxed resume value.
    pub value: u32,
    pub cfg: Rc<ContCfg>,
}

#[derive(Clone, Copy, Debug)]
struct LoopFrame {
    label: Option<LabelId>,
    brk: Label,
    cont: Label,
    /// Type delivered by `break`, `None` for `while`.
    ty: Option<TypeId>,
}

/// How the operands of a multi-operand expression reach the stack.
pub(crate) enum Operands {
    /// No site inside: compiled in place when pushed.
    Inline,
    /// Evaluated in order into these locals before anything is pushed.
    Parked(Vec<u32>),
}

/// Compiler state of one wasm function.
pub(crate) struct FnCx<'a, 'p> {
    pub ctx: &'a mut CompileContext<'p>,
    pub fb: FunctionBuilder,
    pub owner: &'p OwnerSummary,
    locals: HashMap<SymbolId, u32>,
    temps: HashMap<TempKey, u32>,
    pub handler: Option<u32>,
    pub clause: Option<ClauseLocals>,
    pub resume: Option<ResumeState>,
    loops: Vec<LoopFrame>,
    outcome: Option<u32>,
    pub result_ty: TypeId,
    pub abi: Abi,
}

impl<'a, 'p> FnCx<'a, 'p> {
    pub fn new(
        ctx: &'a mut CompileContext<'p>,
        owner: &'p OwnerSummary,
        params: &[ValType],
        result_ty: TypeId,
        abi: Abi,
    ) -> Self {
        Self {
            ctx,
            fb: FunctionBuilder::new(params),
            owner,
            locals: HashMap::new(),
            temps: HashMap::new(),
            handler: None,
            clause: None,
            resume: None,
            loops: Vec::new(),
            outcome: None,
            result_ty,
            abi,
        }
    }

    pub fn bind_param(&mut self, symbol: SymbolId, index: u32) {
        self.locals.insert(symbol, index);
    }

    pub fn local(&mut self, symbol: SymbolId) -> CompilationResult<u32> {
        if let Some(local) = self.locals.get(&symbol) {
            return Ok(*local);
        }
        let ty = self.ctx.program.symbol(symbol).ty;
        let local = self.fb.local(self.ctx.val_type(ty)?);
        self.locals.insert(symbol, local);
        Ok(local)
    }

    /// Local of an operand temporary, if the operand is ever saved.
    pub fn temp_local(&mut self, key: TempKey) -> CompilationResult<Option<u32>> {
        if let Some(local) = self.temps.get(&key) {
            return Ok(Some(*local));
        }
        let Some(ty) = self.ctx.table.temps.get(&key).copied() else {
            return Ok(None);
        };
        let local = self.fb.local(self.ctx.val_type(ty)?);
        self.temps.insert(key, local);
        Ok(Some(local))
    }

    pub fn outcome_local(&mut self) -> u32 {
        match self.outcome {
            Some(local) => local,
            None => {
                let local = self.fb.local(OUTCOME_REF);
                self.outcome = Some(local);
                local
            }
        }
    }

    pub fn repr(&mut self, ty: TypeId) -> CompilationResult<Repr> {
        self.ctx.repr(ty)
    }

    fn block_type(&mut self, ty: TypeId) -> CompilationResult<BlockType> {
        Ok(BlockType::Result(self.ctx.val_type(ty)?))
    }

    pub fn coerce(&mut self, from: TypeId, to: TypeId) -> CompilationResult<()> {
        self.ctx.emit_coercion(&mut self.fb, from, to)
    }

    pub fn push_handler(&mut self) {
        match self.handler {
            Some(local) => self.fb.local_get(local),
            None => self
                .fb
                .emit(Instruction::RefNull(HeapType::Concrete(FRAME_IDX))),
        }
    }

    // === resume-mode helpers ===

    pub fn range_of(&self, expr: &HirExpr) -> Option<SiteRange> {
        self.ctx.table.range(expr.id)
    }

    /// Whether `expr` may be entered with `resuming` set.
    pub fn resumable(&self, expr: &HirExpr) -> bool {
        self.resume.is_some() && self.range_of(expr).is_some()
    }

    fn edge(&self, edge: CfgEdge) -> Option<SiteRange> {
        self.resume.as_ref().and_then(|state| state.cfg.range(edge))
    }

    fn emit_resuming(&mut self) -> CompilationResult<()> {
        let state = self
            .resume
            .as_ref()
            .ok_or_else(|| CompilationError::internal("resume check outside a continuation"))?;
        let local = state.resuming;
        self.fb.local_get(local);
        Ok(())
    }

    /// Pushes whether the active site lies in `range`.
    pub fn emit_in_range(&mut self, range: Option<SiteRange>) -> CompilationResult<()> {
        let Some(range) = range else {
            self.fb.i32_const(0);
            return Ok(());
        };
        let active = self
            .resume
            .as_ref()
            .map(|state| state.active)
            .ok_or_else(|| CompilationError::internal("range check outside a continuation"))?;
        self.fb.local_get(active);
        self.fb.i32_const(range.first as i32);
        if range.len() == 1 {
            self.fb.emit(Instruction::I32Eq);
        } else {
            self.fb.emit(Instruction::I32Sub);
            self.fb.i32_const((range.last - range.first) as i32);
            self.fb.emit(Instruction::I32LeU);
        }
        Ok(())
    }

    /// Pushes `!resuming || active in range`: whether code covering `range`
    /// runs on the current pass.
    fn emit_runs(&mut self, range: Option<SiteRange>) -> CompilationResult<()> {
        self.emit_resuming()?;
        self.fb.emit(Instruction::I32Eqz);
        if range.is_some() {
            self.emit_in_range(range)?;
            self.fb.emit(Instruction::I32Or);
        }
        Ok(())
    }

    /// Pushes `resuming && active not in range`.
    fn emit_resuming_past(&mut self, range: Option<SiteRange>) -> CompilationResult<()> {
        self.emit_resuming()?;
        if range.is_some() {
            self.emit_in_range(range)?;
            self.fb.emit(Instruction::I32Eqz);
            self.fb.emit(Instruction::I32And);
        }
        Ok(())
    }

    /// Evaluates the operands of `expr` in order. Expressions with a site
    /// inside park every operand in a local, so the ones evaluated before a
    /// suspension can be saved and reloaded.
    pub fn park_operands(
        &mut self,
        expr: &HirExpr,
        ops: &[(u32, &'p HirExpr)],
    ) -> CompilationResult<Operands> {
        if self.range_of(expr).is_none() {
            return Ok(Operands::Inline);
        }
        let guarded = self.resume.is_some();
        let mut locals = Vec::with_capacity(ops.len());
        for &(index, operand) in ops {
            let key = TempKey {
                expr: expr.id,
                operand: index,
            };
            let local = match self.temp_local(key)? {
                Some(local) => local,
                None => {
                    let ty = self.ctx.val_type(operand.ty)?;
                    self.fb.local(ty)
                }
            };
            if guarded {
                let range = self.range_of(operand);
                self.emit_runs(range)?;
                self.fb.if_(BlockType::Empty);
            }
            self.compile_expr(operand, false)?;
            self.fb.local_set(local);
            if guarded {
                self.fb.end();
            }
            locals.push(local);
        }
        Ok(Operands::Parked(locals))
    }

    /// Pushes operand `pos` converted to `target`.
    pub fn push_operand(
        &mut self,
        operands: &Operands,
        pos: usize,
        operand: &'p HirExpr,
        target: TypeId,
    ) -> CompilationResult<()> {
        match operands {
            Operands::Inline => self.compile_expr(operand, false)?,
            Operands::Parked(locals) => {
                let local = locals.get(pos).copied().ok_or_else(|| {
                    CompilationError::internal(format!("operand {pos} of {} was not parked", operand.id))
                })?;
                self.fb.local_get(local);
            }
        }
        self.coerce(operand.ty, target)
    }

    /// Emits a continuation site. In a continuation function the site may
    /// be the one being resumed, in which case the resume value takes the
    /// place of the whole expression.
    pub fn site(
        &mut self,
        expr: &'p HirExpr,
        emit: impl FnOnce(&mut Self) -> CompilationResult<()>,
    ) -> CompilationResult<()> {
        let Some(state) = self.resume.clone() else {
            return emit(self);
        };
        let site = self.ctx.table.site_for_expr(expr.id).ok_or_else(|| {
            CompilationError::internal(format!("{} is not a continuation site", expr.id))
        })?;
        let repr = self.repr(expr.ty)?;
        let block = self.block_type(expr.ty)?;
        self.fb.local_get(state.resuming);
        self.fb.local_get(state.active);
        self.fb.i32_const(site.site_id as i32);
        self.fb.emit(Instruction::I32Eq);
        self.fb.emit(Instruction::I32And);
        self.fb.if_(block);
        self.fb.i32_const(0);
        self.fb.local_set(state.resuming);
        self.fb.local_get(state.value);
        emit_unbox(&mut self.fb, repr);
        self.fb.else_();
        emit(self)?;
        self.fb.end();
        Ok(())
    }

    // === expressions ===

    pub fn compile_expr(&mut self, expr: &'p HirExpr, tail: bool) -> CompilationResult<()> {
        match &expr.kind {
            ExprKind::Literal { value } => {
                self.literal(*value);
                Ok(())
            }
            ExprKind::Ident { symbol } => self.ident(*symbol),
            ExprKind::Binary { op, lhs, rhs } => self.binary(expr, *op, lhs, rhs),
            ExprKind::Call { callee, args } => self.call(expr, callee, args, tail),
            ExprKind::Block { stmts, tail: last } => self.block(expr, stmts, last.as_deref(), tail),
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.if_expr(expr, cond, then_branch, else_branch.as_deref(), tail),
            ExprKind::Match { scrutinee, arms } => self.match_expr(expr, scrutinee, arms, tail),
            ExprKind::While { label, cond, body } => self.while_expr(expr, *label, cond, body),
            ExprKind::Loop { label, body } => self.loop_expr(expr, *label, body),
            ExprKind::Break { label, value } => self.break_expr(expr, *label, value.as_deref()),
            ExprKind::Continue { label } => {
                let frame = self.find_loop(expr, *label)?;
                self.fb.br(frame.cont);
                Ok(())
            }
            ExprKind::Assign { target, value } => {
                self.compile_expr(value, false)?;
                let ty = self.ctx.program.symbol(*target).ty;
                self.coerce(value.ty, ty)?;
                let local = self.local(*target)?;
                self.fb.local_set(local);
                self.fb.i32_const(0);
                Ok(())
            }
            ExprKind::Tuple { .. } | ExprKind::Record { .. } => self.aggregate(expr),
            ExprKind::Field { base, index } => {
                self.compile_expr(base, false)?;
                let idx = self.ctx.aggregate_type(base.ty)?;
                self.fb.struct_get(idx, *index);
                Ok(())
            }
            ExprKind::Lambda { .. } => self.lambda(expr),
            ExprKind::Perform { op, args } => self.perform(expr, *op, args),
            ExprKind::Handle { clauses, .. } => self.handle(expr, clauses),
            ExprKind::Resume { value } => self.resume_expr(expr, value),
        }
    }

    pub fn literal(&mut self, value: Literal) {
        match value {
            Literal::Unit => self.fb.i32_const(0),
            Literal::Bool(b) => self.fb.i32_const(i32::from(b)),
            Literal::Int(i) => self.fb.i32_const(i),
            Literal::Int64(i) => self.fb.emit(Instruction::I64Const(i)),
            Literal::Float(f) => self.fb.emit(Instruction::F64Const(f.into())),
        }
    }

    fn ident(&mut self, symbol: SymbolId) -> CompilationResult<()> {
        if self.ctx.program.is_function(symbol) {
            return self.ctx.emit_function_value(&mut self.fb, symbol);
        }
        let local = self.local(symbol)?;
        self.fb.local_get(local);
        Ok(())
    }

    fn binary(
        &mut self,
        expr: &'p HirExpr,
        op: BinaryOp,
        lhs: &'p HirExpr,
        rhs: &'p HirExpr,
    ) -> CompilationResult<()> {
        let ops = [(0, lhs), (1, rhs)];
        let operands = self.park_operands(expr, &ops)?;
        self.push_operand(&operands, 0, lhs, lhs.ty)?;
        self.push_operand(&operands, 1, rhs, rhs.ty)?;
        let repr = self.repr(lhs.ty)?;
        let instruction = binary_instruction(op, repr)?;
        match instruction {
            Some(instruction) => self.fb.emit(instruction),
            // Unit operands: only equality is meaningful.
            None => {
                self.fb.emit(Instruction::Drop);
                self.fb.emit(Instruction::Drop);
                self.fb.i32_const(i32::from(op == BinaryOp::Eq));
            }
        }
        Ok(())
    }

    fn aggregate(&mut self, expr: &'p HirExpr) -> CompilationResult<()> {
        let program = self.ctx.program;
        let fields = program.ty(expr.ty).aggregate_fields().ok_or_else(|| {
            CompilationError::internal(format!("{} does not have an aggregate type", expr.id))
        })?;
        let ops = operands(program, expr);
        if ops.len() != fields.len() {
            return Err(CompilationError::internal(format!(
                "{} has {} fields, its type {}",
                expr.id,
                ops.len(),
                fields.len()
            )));
        }
        let operands = self.park_operands(expr, &ops)?;
        for (pos, &(_, operand)) in ops.iter().enumerate() {
            self.push_operand(&operands, pos, operand, fields[pos])?;
        }
        let idx = self.ctx.aggregate_type(expr.ty)?;
        self.fb.emit(Instruction::StructNew(idx));
        Ok(())
    }

    fn block(
        &mut self,
        expr: &'p HirExpr,
        stmts: &'p [Stmt],
        last: Option<&'p HirExpr>,
        tail: bool,
    ) -> CompilationResult<()> {
        let resumable = self.resumable(expr);
        for (index, stmt) in stmts.iter().enumerate() {
            if resumable {
                let range = self.edge(CfgEdge::Stmt {
                    block: expr.id,
                    index: index as u32,
                });
                self.emit_runs(range)?;
                self.fb.if_(BlockType::Empty);
            }
            match stmt {
                Stmt::Let { pattern, value } => {
                    self.compile_expr(value, false)?;
                    self.bind_pattern(pattern, value.ty)?;
                }
                Stmt::Expr { expr } => {
                    self.compile_expr(expr, false)?;
                    self.fb.emit(Instruction::Drop);
                }
            }
            if resumable {
                self.fb.end();
            }
        }
        match last {
            Some(last) => self.compile_expr(last, tail),
            None => {
                self.fb.i32_const(0);
                Ok(())
            }
        }
    }

    fn if_expr(
        &mut self,
        expr: &'p HirExpr,
        cond: &'p HirExpr,
        then_branch: &'p HirExpr,
        else_branch: Option<&'p HirExpr>,
        tail: bool,
    ) -> CompilationResult<()> {
        if self.resumable(expr) {
            let cond_range = self.edge(CfgEdge::Cond { expr: expr.id });
            let then_range = self.edge(CfgEdge::Then { expr: expr.id });
            self.emit_resuming_past(cond_range)?;
            self.fb.if_(BlockType::Result(ValType::I32));
            self.emit_in_range(then_range)?;
            self.fb.else_();
            self.compile_expr(cond, false)?;
            self.fb.end();
        } else {
            self.compile_expr(cond, false)?;
        }

        match else_branch {
            Some(else_branch) => {
                let block = self.block_type(expr.ty)?;
                self.fb.if_(block);
                self.compile_expr(then_branch, tail)?;
                self.coerce(then_branch.ty, expr.ty)?;
                self.fb.else_();
                self.compile_expr(else_branch, tail)?;
                self.coerce(else_branch.ty, expr.ty)?;
                self.fb.end();
            }
            None => {
                self.fb.if_(BlockType::Empty);
                self.compile_expr(then_branch, false)?;
                self.fb.emit(Instruction::Drop);
                self.fb.end();
                self.fb.i32_const(0);
            }
        }
        Ok(())
    }

    fn match_expr(
        &mut self,
        expr: &'p HirExpr,
        scrutinee: &'p HirExpr,
        arms: &'p [MatchArm],
        tail: bool,
    ) -> CompilationResult<()> {
        let resumable = self.resumable(expr);
        let scrutinee_ty = self.ctx.val_type(scrutinee.ty)?;
        let value = self.fb.local(scrutinee_ty);

        // Arm picked by a resumption, -1 when the patterns decide.
        let selected = if resumable {
            let selected = self.fb.local(ValType::I32);
            self.fb.i32_const(-1);
            self.fb.local_set(selected);
            let scrutinee_range = self.edge(CfgEdge::Scrutinee { expr: expr.id });
            self.emit_resuming_past(scrutinee_range)?;
            self.fb.if_(BlockType::Empty);
            for index in 0..arms.len() as u32 {
                let range = self.edge(CfgEdge::Arm {
                    expr: expr.id,
                    index,
                });
                if range.is_none() {
                    continue;
                }
                self.emit_in_range(range)?;
                self.fb.if_(BlockType::Empty);
                self.fb.i32_const(index as i32);
                self.fb.local_set(selected);
                self.fb.end();
            }
            self.fb.else_();
            self.compile_expr(scrutinee, false)?;
            self.fb.local_set(value);
            self.fb.end();
            Some(selected)
        } else {
            self.compile_expr(scrutinee, false)?;
            self.fb.local_set(value);
            None
        };

        let block = self.block_type(expr.ty)?;
        let done = self.fb.block(block);
        for (index, arm) in arms.iter().enumerate() {
            let next = self.fb.block(BlockType::Empty);
            if let Some(selected) = selected {
                self.fb.local_get(selected);
                self.fb.i32_const(-1);
                self.fb.emit(Instruction::I32Eq);
                self.fb.if_(BlockType::Empty);
                self.arm_test(arm, scrutinee.ty, value, next)?;
                self.fb.else_();
                self.fb.local_get(selected);
                self.fb.i32_const(index as i32);
                self.fb.emit(Instruction::I32Ne);
                self.fb.br_if(next);
                self.fb.end();
            } else {
                self.arm_test(arm, scrutinee.ty, value, next)?;
            }
            self.compile_expr(&arm.body, tail)?;
            self.coerce(arm.body.ty, expr.ty)?;
            self.fb.br(done);
            self.fb.end();
        }
        // Non-exhaustive match.
        self.fb.emit(Instruction::Unreachable);
        self.fb.end();
        Ok(())
    }

    fn arm_test(
        &mut self,
        arm: &'p MatchArm,
        ty: TypeId,
        value: u32,
        next: Label,
    ) -> CompilationResult<()> {
        self.match_pattern(&arm.pattern, ty, value, Some(next))?;
        if let Some(guard) = &arm.guard {
            self.compile_expr(guard, false)?;
            self.fb.emit(Instruction::I32Eqz);
            self.fb.br_if(next);
        }
        Ok(())
    }

    fn while_expr(
        &mut self,
        expr: &'p HirExpr,
        label: Option<LabelId>,
        cond: &'p HirExpr,
        body: &'p HirExpr,
    ) -> CompilationResult<()> {
        let brk = self.fb.block(BlockType::Empty);
        let top = self.fb.loop_(BlockType::Empty);
        let body_range = self.edge(CfgEdge::LoopBody { expr: expr.id });
        if self.resumable(expr) && body_range.is_some() {
            // Re-entering mid-body skips the condition once.
            self.emit_resuming()?;
            self.emit_in_range(body_range)?;
            self.fb.emit(Instruction::I32And);
            self.fb.if_(BlockType::Result(ValType::I32));
            self.fb.i32_const(1);
            self.fb.else_();
            self.compile_expr(cond, false)?;
            self.fb.end();
        } else {
            self.compile_expr(cond, false)?;
        }
        self.fb.emit(Instruction::I32Eqz);
        self.fb.br_if(brk);

        self.loops.push(LoopFrame {
            label,
            brk,
            cont: top,
            ty: None,
        });
        let compiled = self.compile_expr(body, false);
        self.loops.pop();
        compiled?;
        self.fb.emit(Instruction::Drop);
        self.fb.br(top);
        self.fb.end();
        self.fb.end();
        self.fb.i32_const(0);
        Ok(())
    }

    fn loop_expr(
        &mut self,
        expr: &'p HirExpr,
        label: Option<LabelId>,
        body: &'p HirExpr,
    ) -> CompilationResult<()> {
        let block = self.block_type(expr.ty)?;
        let brk = self.fb.block(block);
        let top = self.fb.loop_(BlockType::Empty);
        self.loops.push(LoopFrame {
            label,
            brk,
            cont: top,
            ty: Some(expr.ty),
        });
        let compiled = self.compile_expr(body, false);
        self.loops.pop();
        compiled?;
        self.fb.emit(Instruction::Drop);
        self.fb.br(top);
        self.fb.end();
        self.fb.emit(Instruction::Unreachable);
        self.fb.end();
        Ok(())
    }

    fn find_loop(&self, expr: &HirExpr, label: Option<LabelId>) -> CompilationResult<LoopFrame> {
        let frame = match label {
            None => self.loops.last(),
            Some(label) => self.loops.iter().rev().find(|frame| frame.label == Some(label)),
        };
        frame
            .copied()
            .ok_or_else(|| CompilationError::internal(format!("{} has no enclosing loop", expr.id)))
    }

    fn break_expr(
        &mut self,
        expr: &'p HirExpr,
        label: Option<LabelId>,
        value: Option<&'p HirExpr>,
    ) -> CompilationResult<()> {
        let frame = self.find_loop(expr, label)?;
        match (frame.ty, value) {
            (Some(ty), Some(value)) => {
                self.compile_expr(value, false)?;
                self.coerce(value.ty, ty)?;
            }
            (Some(ty), None) => {
                let repr = self.repr(ty)?;
                self.default_value(repr);
            }
            (None, Some(value)) => {
                self.compile_expr(value, false)?;
                self.fb.emit(Instruction::Drop);
            }
            (None, None) => {}
        }
        self.fb.br(frame.brk);
        Ok(())
    }

    fn default_value(&mut self, repr: Repr) {
        match repr {
            Repr::Unit | Repr::I32 => self.fb.i32_const(0),
            Repr::I64 => self.fb.emit(Instruction::I64Const(0)),
            Repr::F64 => self.fb.emit(Instruction::F64Const(0.0f64.into())),
            Repr::Ref(idx) => self
                .fb
                .emit(Instruction::RefNull(HeapType::Concrete(idx))),
        }
    }

    /// Converts the body value to the owner's result and returns it.
    pub fn finish_body(mut self, body_ty: TypeId) -> CompilationResult<wasm_encoder::Function> {
        self.coerce(body_ty, self.result_ty)?;
        if self.abi == Abi::Effectful {
            let repr = self.repr(self.result_ty)?;
            emit_box(&mut self.fb, repr);
            self.fb.emit(Instruction::Call(self.ctx.runtime.done));
        }
        Ok(self.fb.finish())
    }
}

/// Instruction for `op` on operands of representation `repr`; `None` for
/// unit comparisons.
fn binary_instruction(op: BinaryOp, repr: Repr) -> CompilationResult<Option<Instruction<'static>>> {
    use BinaryOp::*;
    let instruction = match (repr, op) {
        (Repr::Unit, Eq | Ne) => return Ok(None),
        (Repr::I32, Add) => Instruction::I32Add,
        (Repr::I32, Sub) => Instruction::I32Sub,
        (Repr::I32, Mul) => Instruction::I32Mul,
        (Repr::I32, Div) => Instruction::I32DivS,
        (Repr::I32, Rem) => Instruction::I32RemS,
        (Repr::I32, Eq) => Instruction::I32Eq,
        (Repr::I32, Ne) => Instruction::I32Ne,
        (Repr::I32, Lt) => Instruction::I32LtS,
        (Repr::I32, Le) => Instruction::I32LeS,
        (Repr::I32, Gt) => Instruction::I32GtS,
        (Repr::I32, Ge) => Instruction::I32GeS,
        (Repr::I32, And) => Instruction::I32And,
        (Repr::I32, Or) => Instruction::I32Or,
        (Repr::I64, Add) => Instruction::I64Add,
        (Repr::I64, Sub) => Instruction::I64Sub,
        (Repr::I64, Mul) => Instruction::I64Mul,
        (Repr::I64, Div) => Instruction::I64DivS,
        (Repr::I64, Rem) => Instruction::I64RemS,
        (Repr::I64, Eq) => Instruction::I64Eq,
        (Repr::I64, Ne) => Instruction::I64Ne,
        (Repr::I64, Lt) => Instruction::I64LtS,
        (Repr::I64, Le) => Instruction::I64LeS,
        (Repr::I64, Gt) => Instruction::I64GtS,
        (Repr::I64, Ge) => Instruction::I64GeS,
        (Repr::I64, And) => Instruction::I64And,
        (Repr::I64, Or) => Instruction::I64Or,
        (Repr::F64, Add) => Instruction::F64Add,
        (Repr::F64, Sub) => Instruction::F64Sub,
        (Repr::F64, Mul) => Instruction::F64Mul,
        (Repr::F64, Div) => Instruction::F64Div,
        (Repr::F64, Eq) => Instruction::F64Eq,
        (Repr::F64, Ne) => Instruction::F64Ne,
        (Repr::F64, Lt) => Instruction::F64Lt,
        (Repr::F64, Le) => Instruction::F64Le,
        (Repr::F64, Gt) => Instruction::F64Gt,
        (Repr::F64, Ge) => Instruction::F64Ge,
        (repr, op) => {
            return Err(CompilationError::unsupported_feature_msg(format!(
                "operator {op:?} on {repr:?} operands"
            )));
        }
    };
    Ok(Some(instruction))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_remainder_is_rejected() {
        let err = binary_instruction(BinaryOp::Rem, Repr::F64).unwrap_err();
        insta::assert_snapshot!(err, @"Unsupported feature: operator Rem on F64 operands");
    }

    #[test]
    fn comparisons_follow_operand_width() {
        assert!(matches!(
            binary_instruction(BinaryOp::Lt, Repr::I64),
            Ok(Some(Instruction::I64LtS))
        ));
        assert!(matches!(
            binary_instruction(BinaryOp::Eq, Repr::Unit),
            Ok(None)
        ));
    }
}
