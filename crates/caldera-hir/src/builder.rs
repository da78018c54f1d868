//! Programmatic construction of well-typed HIR programs.
//!
//! The builder hands out fresh expression ids and interns types, so callers
//! only describe structure. It performs no type checking beyond deriving the
//! obvious result type of each node.

use std::collections::HashMap;

use crate::effects::{EffectDecl, OperationDecl, OperationRef, ResumeKind};
use crate::expr::{
    BinaryOp, ExprKind, HandlerClause, HirExpr, HirPattern, Literal, MatchArm, Stmt,
};
use crate::ids::{EffectId, ExprId, LabelId, OpId, SymbolId, TypeId};
use crate::program::{HirFunction, HirProgram, SymbolInfo};
use crate::types::{EffectRow, Ty};

pub struct ProgramBuilder {
    program: HirProgram,
    interned: HashMap<Ty, TypeId>,
    next_expr: u32,
    next_label: u32,
}

impl ProgramBuilder {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            program: HirProgram {
                module_name: module_name.into(),
                types: Vec::new(),
                symbols: Vec::new(),
                effects: Vec::new(),
                functions: Vec::new(),
            },
            interned: HashMap::new(),
            next_expr: 0,
            next_label: 0,
        }
    }

    pub fn finish(self) -> HirProgram {
        self.program
    }

    pub fn program(&self) -> &HirProgram {
        &self.program
    }

    // === types ===

    pub fn ty(&mut self, ty: Ty) -> TypeId {
        if let Some(id) = self.interned.get(&ty) {
            return *id;
        }
        let id = TypeId::new(self.program.types.len() as u32);
        self.program.types.push(ty.clone());
        self.interned.insert(ty, id);
        id
    }

    pub fn unit(&mut self) -> TypeId {
        self.ty(Ty::Unit)
    }

    pub fn bool(&mut self) -> TypeId {
        self.ty(Ty::Bool)
    }

    pub fn int(&mut self) -> TypeId {
        self.ty(Ty::Int)
    }

    pub fn int64(&mut self) -> TypeId {
        self.ty(Ty::Int64)
    }

    pub fn float(&mut self) -> TypeId {
        self.ty(Ty::Float)
    }

    pub fn tuple_ty(&mut self, elements: &[TypeId]) -> TypeId {
        self.ty(Ty::Tuple {
            elements: elements.to_vec(),
        })
    }

    pub fn record_ty(&mut self, name: &str, fields: &[(&str, TypeId)]) -> TypeId {
        self.ty(Ty::Record {
            name: name.to_owned(),
            fields: fields
                .iter()
                .map(|(name, ty)| ((*name).to_owned(), *ty))
                .collect(),
        })
    }

    pub fn func_ty(&mut self, params: &[TypeId], ret: TypeId, effects: &[EffectId]) -> TypeId {
        self.ty(Ty::Function {
            params: params.to_vec(),
            ret,
            effects: effects.iter().copied().collect::<EffectRow>(),
        })
    }

    // === declarations ===

    pub fn effect(&mut self, name: &str) -> EffectId {
        let id = EffectId::new(self.program.effects.len() as u32);
        self.program.effects.push(EffectDecl {
            id,
            name: name.to_owned(),
            operations: Vec::new(),
        });
        id
    }

    pub fn operation(
        &mut self,
        effect: EffectId,
        name: &str,
        params: &[TypeId],
        result: TypeId,
        resume_kind: ResumeKind,
    ) -> OperationRef {
        let decl = &mut self.program.effects[effect.index()];
        let op = OpId::new(decl.operations.len() as u32);
        decl.operations.push(OperationDecl {
            id: op,
            name: name.to_owned(),
            params: params.to_vec(),
            result,
            resume_kind,
        });
        OperationRef::new(effect, op)
    }

    pub fn symbol(&mut self, name: &str, ty: TypeId) -> SymbolId {
        let id = SymbolId::new(self.program.symbols.len() as u32);
        self.program.symbols.push(SymbolInfo {
            name: name.to_owned(),
            ty,
        });
        id
    }

    pub fn label(&mut self) -> LabelId {
        let id = LabelId::new(self.next_label);
        self.next_label += 1;
        id
    }

    /// Declares a function symbol so that bodies can refer to it before it is defined.
    pub fn declare_function(
        &mut self,
        name: &str,
        params: &[TypeId],
        ret: TypeId,
        effects: &[EffectId],
    ) -> SymbolId {
        let ty = self.func_ty(params, ret, effects);
        self.symbol(name, ty)
    }

    pub fn define_function(
        &mut self,
        symbol: SymbolId,
        params: Vec<SymbolId>,
        body: HirExpr,
        exported: bool,
    ) {
        let ty = self.program.symbol(symbol).ty;
        self.program.functions.push(HirFunction {
            symbol,
            params,
            ty,
            body,
            exported,
        });
    }

    // === expressions ===

    fn node(&mut self, ty: TypeId, kind: ExprKind) -> HirExpr {
        let id = ExprId::new(self.next_expr);
        self.next_expr += 1;
        HirExpr { id, ty, kind }
    }

    pub fn lit(&mut self, value: Literal) -> HirExpr {
        let ty = match value {
            Literal::Unit => self.unit(),
            Literal::Bool(_) => self.bool(),
            Literal::Int(_) => self.int(),
            Literal::Int64(_) => self.int64(),
            Literal::Float(_) => self.float(),
        };
        self.node(ty, ExprKind::Literal { value })
    }

    pub fn int_lit(&mut self, value: i32) -> HirExpr {
        self.lit(Literal::Int(value))
    }

    pub fn bool_lit(&mut self, value: bool) -> HirExpr {
        self.lit(Literal::Bool(value))
    }

    pub fn unit_lit(&mut self) -> HirExpr {
        self.lit(Literal::Unit)
    }

    pub fn ident(&mut self, symbol: SymbolId) -> HirExpr {
        let ty = self.program.symbol(symbol).ty;
        self.node(ty, ExprKind::Ident { symbol })
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: HirExpr, rhs: HirExpr) -> HirExpr {
        let ty = if op.is_comparison() {
            self.bool()
        } else {
            lhs.ty
        };
        self.node(
            ty,
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        )
    }

    pub fn call(&mut self, callee: HirExpr, args: Vec<HirExpr>) -> HirExpr {
        let ret = match self.program.ty(callee.ty) {
            Ty::Function { ret, .. } => Some(*ret),
            _ => None,
        };
        let ty = match ret {
            Some(ret) => ret,
            None => self.unit(),
        };
        self.node(
            ty,
            ExprKind::Call {
                callee: Box::new(callee),
                args,
            },
        )
    }

    pub fn call_fn(&mut self, function: SymbolId, args: Vec<HirExpr>) -> HirExpr {
        let callee = self.ident(function);
        self.call(callee, args)
    }

    pub fn let_stmt(&mut self, symbol: SymbolId, value: HirExpr) -> Stmt {
        Stmt::Let {
            pattern: HirPattern::Bind { symbol },
            value,
        }
    }

    pub fn let_pattern(&mut self, pattern: HirPattern, value: HirExpr) -> Stmt {
        Stmt::Let { pattern, value }
    }

    pub fn expr_stmt(&mut self, expr: HirExpr) -> Stmt {
        Stmt::Expr { expr }
    }

    pub fn block(&mut self, stmts: Vec<Stmt>, tail: Option<HirExpr>) -> HirExpr {
        let ty = match &tail {
            Some(tail) => tail.ty,
            None => self.unit(),
        };
        self.node(
            ty,
            ExprKind::Block {
                stmts,
                tail: tail.map(Box::new),
            },
        )
    }

    pub fn if_expr(
        &mut self,
        cond: HirExpr,
        then_branch: HirExpr,
        else_branch: Option<HirExpr>,
    ) -> HirExpr {
        let ty = if else_branch.is_some() {
            then_branch.ty
        } else {
            self.unit()
        };
        self.node(
            ty,
            ExprKind::If {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch: else_branch.map(Box::new),
            },
        )
    }

    pub fn arm(&mut self, pattern: HirPattern, guard: Option<HirExpr>, body: HirExpr) -> MatchArm {
        MatchArm {
            pattern,
            guard,
            body,
        }
    }

    pub fn match_expr(&mut self, scrutinee: HirExpr, arms: Vec<MatchArm>) -> HirExpr {
        let ty = match arms.first() {
            Some(arm) => arm.body.ty,
            None => self.unit(),
        };
        self.node(
            ty,
            ExprKind::Match {
                scrutinee: Box::new(scrutinee),
                arms,
            },
        )
    }

    pub fn while_expr(&mut self, label: Option<LabelId>, cond: HirExpr, body: HirExpr) -> HirExpr {
        let ty = self.unit();
        self.node(
            ty,
            ExprKind::While {
                label,
                cond: Box::new(cond),
                body: Box::new(body),
            },
        )
    }

    /// An infinite loop whose value is delivered by `break`.
    pub fn loop_expr(&mut self, label: Option<LabelId>, body: HirExpr, ty: TypeId) -> HirExpr {
        self.node(
            ty,
            ExprKind::Loop {
                label,
                body: Box::new(body),
            },
        )
    }

    pub fn break_expr(&mut self, label: Option<LabelId>, value: Option<HirExpr>) -> HirExpr {
        let ty = self.unit();
        self.node(
            ty,
            ExprKind::Break {
                label,
                value: value.map(Box::new),
            },
        )
    }

    pub fn continue_expr(&mut self, label: Option<LabelId>) -> HirExpr {
        let ty = self.unit();
        self.node(ty, ExprKind::Continue { label })
    }

    pub fn assign(&mut self, target: SymbolId, value: HirExpr) -> HirExpr {
        let ty = self.unit();
        self.node(
            ty,
            ExprKind::Assign {
                target,
                value: Box::new(value),
            },
        )
    }

    pub fn tuple(&mut self, elements: Vec<HirExpr>) -> HirExpr {
        let tys: Vec<TypeId> = elements.iter().map(|el| el.ty).collect();
        let ty = self.tuple_ty(&tys);
        self.node(ty, ExprKind::Tuple { elements })
    }

    pub fn record(&mut self, ty: TypeId, fields: Vec<HirExpr>) -> HirExpr {
        self.node(ty, ExprKind::Record { fields })
    }

    pub fn field(&mut self, base: HirExpr, index: u32) -> HirExpr {
        let ty = self
            .program
            .ty(base.ty)
            .aggregate_fields()
            .and_then(|fields| fields.get(index as usize).copied());
        let ty = match ty {
            Some(ty) => ty,
            None => self.unit(),
        };
        self.node(
            ty,
            ExprKind::Field {
                base: Box::new(base),
                index,
            },
        )
    }

    pub fn lambda(&mut self, params: Vec<SymbolId>, body: HirExpr, effects: &[EffectId]) -> HirExpr {
        let param_tys: Vec<TypeId> = params
            .iter()
            .map(|param| self.program.symbol(*param).ty)
            .collect();
        let ty = self.func_ty(&param_tys, body.ty, effects);
        self.node(
            ty,
            ExprKind::Lambda {
                params,
                body: Box::new(body),
            },
        )
    }

    pub fn perform(&mut self, op: OperationRef, args: Vec<HirExpr>) -> HirExpr {
        let result = self.program.operation(op).map(|decl| decl.result);
        let ty = match result {
            Some(result) => result,
            None => self.unit(),
        };
        self.node(ty, ExprKind::Perform { op: Some(op), args })
    }

    /// A perform whose operation the checker failed to resolve.
    pub fn perform_unresolved(&mut self, ty: TypeId, args: Vec<HirExpr>) -> HirExpr {
        self.node(ty, ExprKind::Perform { op: None, args })
    }

    pub fn clause(&mut self, op: OperationRef, params: Vec<SymbolId>, body: HirExpr) -> HandlerClause {
        HandlerClause { op, params, body }
    }

    pub fn handle(&mut self, body: HirExpr, clauses: Vec<HandlerClause>) -> HirExpr {
        let ty = body.ty;
        self.node(
            ty,
            ExprKind::Handle {
                body: Box::new(body),
                clauses,
            },
        )
    }

    /// `resume(value)`; `ty` is the type of the enclosing handle expression.
    pub fn resume(&mut self, value: HirExpr, ty: TypeId) -> HirExpr {
        self.node(
            ty,
            ExprKind::Resume {
                value: Box::new(value),
            },
        )
    }
}
