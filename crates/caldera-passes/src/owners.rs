//! Discovery of continuation owners.
//!
//! An owner is a scope that compiles to its own wasm function and therefore
//! owns the continuation sites syntactically inside it: top-level functions,
//! lambdas, handle bodies (compiled as zero-argument thunks) and handler clauses.
//!
//! Owners are listed in a fixed order so that site numbering is deterministic:
//! all functions in declaration order, then lambdas and handle bodies in
//! discovery order, then handler clauses in declaration order within their
//! handle expression. Scopes discovered while processing clauses are appended
//! and the lambda/clause rounds repeat until nothing is left.

use std::collections::VecDeque;
use std::fmt;

use caldera_hir::{ExprId, ExprKind, HirExpr, HirProgram, OperationRef, ResumeKind, SymbolId, TypeId};
use tracing::debug;

use crate::captures::{find_captured_assignment, free_variables, local_bindings};
use crate::error::{AnalysisError, AnalysisResult};

/// Index of an owner in discovery order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OwnerId(pub u32);

impl OwnerId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The scope a continuation site belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContinuationSiteOwner {
    Function { symbol: SymbolId },
    Lambda { expr: ExprId },
    /// The body of a handle expression, run as a thunk under the new handler.
    HandleBody { handler: ExprId },
    HandlerClause { handler: ExprId, clause: u32 },
}

impl fmt::Display for ContinuationSiteOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContinuationSiteOwner::Function { symbol } => write!(f, "function {symbol}"),
            ContinuationSiteOwner::Lambda { expr } => write!(f, "lambda {expr}"),
            ContinuationSiteOwner::HandleBody { handler } => write!(f, "handle body {handler}"),
            ContinuationSiteOwner::HandlerClause { handler, clause } => {
                write!(f, "handler clause {handler}#{clause}")
            }
        }
    }
}

/// Operation handled by a clause owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClauseInfo {
    pub op: OperationRef,
    pub resume_kind: ResumeKind,
}

#[derive(Clone, Debug)]
pub struct OwnerInfo<'p> {
    pub id: OwnerId,
    pub owner: ContinuationSiteOwner,
    pub parent: Option<OwnerId>,
    /// Deterministic name, used to derive generated function and type names.
    pub name: String,
    pub body: &'p HirExpr,
    pub params: Vec<SymbolId>,
    /// Ordered by the parent's declaration order.
    pub captures: Vec<SymbolId>,
    /// Parameters, then captures, then bindings in document order.
    pub decl_order: Vec<SymbolId>,
    /// Declared function type for functions and lambdas.
    pub fn_ty: Option<TypeId>,
    pub clause: Option<ClauseInfo>,
    pub exported: bool,
}

struct Pending<'p> {
    owner: ContinuationSiteOwner,
    parent: OwnerId,
    name: String,
    body: &'p HirExpr,
    params: Vec<SymbolId>,
    fn_ty: Option<TypeId>,
    clause: Option<ClauseInfo>,
}

pub fn discover_owners(program: &HirProgram) -> AnalysisResult<Vec<OwnerInfo<'_>>> {
    let mut owners: Vec<OwnerInfo<'_>> = Vec::new();
    let mut lambdas = VecDeque::new();
    let mut clauses = VecDeque::new();

    for func in &program.functions {
        let info = make_owner(
            program,
            &owners,
            Pending {
                owner: ContinuationSiteOwner::Function {
                    symbol: func.symbol,
                },
                parent: OwnerId(u32::MAX),
                name: program.symbol_name(func.symbol).to_owned(),
                body: &func.body,
                params: func.params.clone(),
                fn_ty: Some(func.ty),
                clause: None,
            },
            func.exported,
        )?;
        collect_nested(program, &info, &mut lambdas, &mut clauses)?;
        owners.push(info);
    }

    while !lambdas.is_empty() || !clauses.is_empty() {
        while let Some(pending) = lambdas.pop_front() {
            let info = make_owner(program, &owners, pending, false)?;
            collect_nested(program, &info, &mut lambdas, &mut clauses)?;
            owners.push(info);
        }
        let round: Vec<_> = clauses.drain(..).collect();
        for pending in round {
            let info = make_owner(program, &owners, pending, false)?;
            collect_nested(program, &info, &mut lambdas, &mut clauses)?;
            owners.push(info);
        }
    }

    debug!("discover_owners: {} owners", owners.len());
    Ok(owners)
}

/// Captures are ordered by the parent's declaration order, which must already
/// be in `owners`.
fn make_owner<'p>(
    program: &'p HirProgram,
    owners: &[OwnerInfo<'p>],
    pending: Pending<'p>,
    exported: bool,
) -> AnalysisResult<OwnerInfo<'p>> {
    let id = OwnerId(owners.len() as u32);
    let is_function = matches!(pending.owner, ContinuationSiteOwner::Function { .. });
    let mut captures = if is_function {
        Vec::new()
    } else {
        free_variables(program, pending.body, &pending.params)
    };
    if let Some(parent) = owners.get(pending.parent.index()) {
        captures.sort_by_key(|symbol| {
            parent
                .decl_order
                .iter()
                .position(|declared| declared == symbol)
                .unwrap_or(usize::MAX)
        });
    }
    if let Some(symbol) = find_captured_assignment(pending.body, &captures) {
        return Err(AnalysisError::captured_assignment(
            symbol,
            program.symbol_name(symbol),
        ));
    }
    let mut decl_order = pending.params.clone();
    decl_order.extend(captures.iter().copied());
    for sym in local_bindings(pending.body) {
        if !decl_order.contains(&sym) {
            decl_order.push(sym);
        }
    }
    Ok(OwnerInfo {
        id,
        owner: pending.owner,
        parent: (!is_function).then_some(pending.parent),
        name: pending.name,
        body: pending.body,
        params: pending.params,
        captures,
        decl_order,
        fn_ty: pending.fn_ty,
        clause: pending.clause,
        exported,
    })
}

/// Queues the scopes directly nested in `owner` (not the ones nested deeper).
fn collect_nested<'p>(
    program: &'p HirProgram,
    owner: &OwnerInfo<'p>,
    lambdas: &mut VecDeque<Pending<'p>>,
    clauses: &mut VecDeque<Pending<'p>>,
) -> AnalysisResult<()> {
    let mut found = Vec::new();
    find_nested_scopes(owner.body, &mut found);
    for expr in found {
        match &expr.kind {
            ExprKind::Lambda { params, body } => lambdas.push_back(Pending {
                owner: ContinuationSiteOwner::Lambda { expr: expr.id },
                parent: owner.id,
                name: format!("{}$lambda{}", owner.name, expr.id.0),
                body,
                params: params.clone(),
                fn_ty: Some(expr.ty),
                clause: None,
            }),
            ExprKind::Handle { body, clauses: decls } => {
                lambdas.push_back(Pending {
                    owner: ContinuationSiteOwner::HandleBody { handler: expr.id },
                    parent: owner.id,
                    name: format!("{}$handle{}", owner.name, expr.id.0),
                    body,
                    params: Vec::new(),
                    fn_ty: None,
                    clause: None,
                });
                for (index, clause) in decls.iter().enumerate() {
                    let decl = program
                        .operation(clause.op)
                        .ok_or_else(|| AnalysisError::missing_operation(clause.body.id))?;
                    if decl.params.len() != clause.params.len() {
                        return Err(AnalysisError::malformed(format!(
                            "clause {index} of handle {} binds {} parameters, operation `{}` has {}",
                            expr.id,
                            clause.params.len(),
                            decl.name,
                            decl.params.len()
                        )));
                    }
                    clauses.push_back(Pending {
                        owner: ContinuationSiteOwner::HandlerClause {
                            handler: expr.id,
                            clause: index as u32,
                        },
                        parent: owner.id,
                        name: format!("{}$handle{}$clause{}", owner.name, expr.id.0, index),
                        body: &clause.body,
                        params: clause.params.clone(),
                        fn_ty: None,
                        clause: Some(ClauseInfo {
                            op: clause.op,
                            resume_kind: decl.resume_kind,
                        }),
                    });
                }
            }
            _ => unreachable!("find_nested_scopes only yields lambdas and handles"),
        }
    }
    Ok(())
}

fn find_nested_scopes<'p>(expr: &'p HirExpr, out: &mut Vec<&'p HirExpr>) {
    match &expr.kind {
        ExprKind::Lambda { .. } | ExprKind::Handle { .. } => out.push(expr),
        _ => expr.for_each_child(|child| find_nested_scopes(child, out)),
    }
}

#[cfg(test)]
mod tests {
    use caldera_hir::{BinaryOp, ProgramBuilder, ResumeKind};

    use super::*;
    use crate::error::AnalysisErrorKind;

    #[test]
    fn owners_follow_function_lambda_clause_order() {
        let mut b = ProgramBuilder::new("order");
        let int = b.int();
        let unit = b.unit();
        let ask = b.effect("Ask");
        let get = b.operation(ask, "get", &[], int, ResumeKind::Ctl);

        // fn main() { handle { (fn() 1)() } with Ask.get() -> resume(2) }
        let main = b.declare_function("main", &[], int, &[]);
        let one = b.int_lit(1);
        let lam = b.lambda(vec![], one, &[]);
        let call = b.call(lam, vec![]);
        let two = b.int_lit(2);
        let resume = b.resume(two, int);
        let clause = b.clause(get, vec![], resume);
        let handle = b.handle(call, vec![clause]);
        b.define_function(main, vec![], handle, true);

        let helper = b.declare_function("helper", &[], unit, &[]);
        let body = b.unit_lit();
        b.define_function(helper, vec![], body, false);
        let program = b.finish();

        let owners = discover_owners(&program).unwrap();
        let names: Vec<&str> = owners.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "main",
                "helper",
                "main$handle5",
                "main$handle5$lambda1",
                "main$handle5$clause0",
            ]
        );
        assert_eq!(owners[4].clause.map(|c| c.resume_kind), Some(ResumeKind::Ctl));
        assert_eq!(owners[3].parent, Some(OwnerId(2)));
    }

    #[test]
    fn captures_follow_parent_declaration_order() {
        let mut b = ProgramBuilder::new("caps");
        let int = b.int();
        let main = b.declare_function("main", &[int], int, &[]);
        let p = b.symbol("p", int);
        let a = b.symbol("a", int);
        let c = b.symbol("c", int);

        // main(p) { let a = 1; let c = 2; (fn() c + p + a)() }
        let one = b.int_lit(1);
        let let_a = b.let_stmt(a, one);
        let two = b.int_lit(2);
        let let_c = b.let_stmt(c, two);
        let c_ref = b.ident(c);
        let p_ref = b.ident(p);
        let sum = b.binary(BinaryOp::Add, c_ref, p_ref);
        let a_ref = b.ident(a);
        let sum = b.binary(BinaryOp::Add, sum, a_ref);
        let lam = b.lambda(vec![], sum, &[]);
        let call = b.call(lam, vec![]);
        let body = b.block(vec![let_a, let_c], Some(call));
        b.define_function(main, vec![p], body, false);
        let program = b.finish();

        let owners = discover_owners(&program).unwrap();
        let lambda = owners
            .iter()
            .find(|o| matches!(o.owner, ContinuationSiteOwner::Lambda { .. }))
            .unwrap();
        assert_eq!(owners[0].decl_order, vec![p, a, c]);
        assert_eq!(lambda.captures, vec![p, a, c]);
        assert_eq!(lambda.decl_order, vec![p, a, c]);
    }

    #[test]
    fn assignment_to_captured_variable_is_rejected() {
        let mut b = ProgramBuilder::new("capture");
        let int = b.int();
        let unit = b.unit();
        let main = b.declare_function("main", &[], unit, &[]);
        let x = b.symbol("x", int);
        let zero = b.int_lit(0);
        let let_x = b.let_stmt(x, zero);
        let one = b.int_lit(1);
        let assign = b.assign(x, one);
        let lam = b.lambda(vec![], assign, &[]);
        let stmt = b.expr_stmt(lam);
        let body = b.block(vec![let_x, stmt], None);
        b.define_function(main, vec![], body, false);
        let program = b.finish();

        let err = discover_owners(&program).unwrap_err();
        assert!(matches!(
            err.kind(),
            AnalysisErrorKind::CapturedAssignment { symbol, .. } if *symbol == x
        ));
    }
}
