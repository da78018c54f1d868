//! Typed expression tree.
//!
//! Every node carries its resolved type. Nodes are never mutated by the
//! effect-lowering passes; per-site facts live in side tables keyed by
//! [`ExprId`].

use serde::{Deserialize, Serialize};

use crate::effects::OperationRef;
use crate::ids::{ExprId, LabelId, SymbolId, TypeId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HirExpr {
    pub id: ExprId,
    pub ty: TypeId,
    pub kind: ExprKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Unit,
    Bool(bool),
    Int(i32),
    Int64(i64),
    Float(f64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Evaluates both operands. Short-circuit forms arrive as `If`.
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stmt", rename_all = "snake_case")]
pub enum Stmt {
    Let { pattern: HirPattern, value: HirExpr },
    Expr { expr: HirExpr },
}

impl Stmt {
    pub fn expr(&self) -> &HirExpr {
        match self {
            Stmt::Let { value, .. } => value,
            Stmt::Expr { expr } => expr,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum HirPattern {
    Wildcard,
    Bind { symbol: SymbolId },
    Literal { value: Literal },
    Tuple { elements: Vec<HirPattern> },
    /// Positional record pattern; field order follows the record type.
    Record { fields: Vec<HirPattern> },
}

impl HirPattern {
    /// Symbols bound by this pattern, in document order.
    pub fn bindings(&self, out: &mut Vec<SymbolId>) {
        match self {
            HirPattern::Wildcard | HirPattern::Literal { .. } => {}
            HirPattern::Bind { symbol } => out.push(*symbol),
            HirPattern::Tuple { elements } => elements.iter().for_each(|p| p.bindings(out)),
            HirPattern::Record { fields } => fields.iter().for_each(|p| p.bindings(out)),
        }
    }

    pub fn is_irrefutable(&self) -> bool {
        match self {
            HirPattern::Wildcard | HirPattern::Bind { .. } => true,
            HirPattern::Literal { .. } => false,
            HirPattern::Tuple { elements } => elements.iter().all(HirPattern::is_irrefutable),
            HirPattern::Record { fields } => fields.iter().all(HirPattern::is_irrefutable),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchArm {
    pub pattern: HirPattern,
    pub guard: Option<HirExpr>,
    pub body: HirExpr,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HandlerClause {
    pub op: OperationRef,
    pub params: Vec<SymbolId>,
    pub body: HirExpr,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "expr", rename_all = "snake_case")]
pub enum ExprKind {
    Literal {
        value: Literal,
    },
    Ident {
        symbol: SymbolId,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<HirExpr>,
        rhs: Box<HirExpr>,
    },
    Call {
        callee: Box<HirExpr>,
        args: Vec<HirExpr>,
    },
    Block {
        stmts: Vec<Stmt>,
        tail: Option<Box<HirExpr>>,
    },
    If {
        cond: Box<HirExpr>,
        then_branch: Box<HirExpr>,
        else_branch: Option<Box<HirExpr>>,
    },
    Match {
        scrutinee: Box<HirExpr>,
        arms: Vec<MatchArm>,
    },
    While {
        label: Option<LabelId>,
        cond: Box<HirExpr>,
        body: Box<HirExpr>,
    },
    Loop {
        label: Option<LabelId>,
        body: Box<HirExpr>,
    },
    Break {
        label: Option<LabelId>,
        value: Option<Box<HirExpr>>,
    },
    Continue {
        label: Option<LabelId>,
    },
    Assign {
        target: SymbolId,
        value: Box<HirExpr>,
    },
    Tuple {
        elements: Vec<HirExpr>,
    },
    Record {
        fields: Vec<HirExpr>,
    },
    Field {
        base: Box<HirExpr>,
        index: u32,
    },
    Lambda {
        params: Vec<SymbolId>,
        body: Box<HirExpr>,
    },
    /// `op` is `None` when the checker could not resolve the operation.
    Perform {
        op: Option<OperationRef>,
        args: Vec<HirExpr>,
    },
    Handle {
        body: Box<HirExpr>,
        clauses: Vec<HandlerClause>,
    },
    Resume {
        value: Box<HirExpr>,
    },
}

impl HirExpr {
    /// Visits direct children in evaluation order.
    ///
    /// Lambda bodies, handle bodies and handler clause bodies are visited too;
    /// callers that treat them as separate scopes must match on the kind first.
    pub fn for_each_child<'a>(&'a self, mut f: impl FnMut(&'a HirExpr)) {
        match &self.kind {
            ExprKind::Literal { .. } | ExprKind::Ident { .. } | ExprKind::Continue { .. } => {}
            ExprKind::Binary { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            ExprKind::Call { callee, args } => {
                f(callee);
                args.iter().for_each(f);
            }
            ExprKind::Block { stmts, tail } => {
                for stmt in stmts {
                    f(stmt.expr());
                }
                if let Some(tail) = tail {
                    f(tail);
                }
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                f(cond);
                f(then_branch);
                if let Some(else_branch) = else_branch {
                    f(else_branch);
                }
            }
            ExprKind::Match { scrutinee, arms } => {
                f(scrutinee);
                for arm in arms {
                    if let Some(guard) = &arm.guard {
                        f(guard);
                    }
                    f(&arm.body);
                }
            }
            ExprKind::While { cond, body, .. } => {
                f(cond);
                f(body);
            }
            ExprKind::Loop { body, .. } => f(body),
            ExprKind::Break { value, .. } => {
                if let Some(value) = value {
                    f(value);
                }
            }
            ExprKind::Assign { value, .. } => f(value),
            ExprKind::Tuple { elements } => elements.iter().for_each(f),
            ExprKind::Record { fields } => fields.iter().for_each(f),
            ExprKind::Field { base, .. } => f(base),
            ExprKind::Lambda { body, .. } => f(body),
            ExprKind::Perform { args, .. } => args.iter().for_each(f),
            ExprKind::Handle { body, clauses } => {
                f(body);
                for clause in clauses {
                    f(&clause.body);
                }
            }
            ExprKind::Resume { value } => f(value),
        }
    }
}
