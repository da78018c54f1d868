//! Capture analysis for lambdas, handle bodies and handler clauses.
//!
//! A nested scope copies the values of the outer locals it refers to when it is
//! created. Those copies become ordinary locals of the nested owner, so the
//! liveness walk treats them like parameters.

use std::collections::HashSet;

use caldera_hir::{ExprKind, HirExpr, HirPattern, HirProgram, SymbolId};

/// Local symbols referenced by `body` but bound outside of it, in first-use order.
///
/// `params` are the symbols the scope binds itself (lambda or clause parameters).
pub fn free_variables(program: &HirProgram, body: &HirExpr, params: &[SymbolId]) -> Vec<SymbolId> {
    let mut collector = UseCollector {
        program,
        uses: Vec::new(),
        seen: HashSet::new(),
        bound: params.iter().copied().collect(),
    };
    collector.visit(body);
    let UseCollector { uses, bound, .. } = collector;
    uses.into_iter().filter(|sym| !bound.contains(sym)).collect()
}

/// Symbols bound directly in an owner body (`let` and match patterns), in
/// document order. Nested lambdas, handle bodies and clauses are skipped.
pub fn local_bindings(body: &HirExpr) -> Vec<SymbolId> {
    let mut out = Vec::new();
    collect_bindings(body, &mut out);
    out
}

fn collect_bindings(expr: &HirExpr, out: &mut Vec<SymbolId>) {
    match &expr.kind {
        ExprKind::Lambda { .. } | ExprKind::Handle { .. } => {}
        ExprKind::Block { stmts, tail } => {
            for stmt in stmts {
                match stmt {
                    caldera_hir::Stmt::Let { pattern, value } => {
                        collect_bindings(value, out);
                        pattern.bindings(out);
                    }
                    caldera_hir::Stmt::Expr { expr } => collect_bindings(expr, out),
                }
            }
            if let Some(tail) = tail {
                collect_bindings(tail, out);
            }
        }
        ExprKind::Match { scrutinee, arms } => {
            collect_bindings(scrutinee, out);
            for arm in arms {
                arm.pattern.bindings(out);
                if let Some(guard) = &arm.guard {
                    collect_bindings(guard, out);
                }
                collect_bindings(&arm.body, out);
            }
        }
        _ => expr.for_each_child(|child| collect_bindings(child, out)),
    }
}

struct UseCollector<'a> {
    program: &'a HirProgram,
    uses: Vec<SymbolId>,
    seen: HashSet<SymbolId>,
    bound: HashSet<SymbolId>,
}

impl UseCollector<'_> {
    fn use_symbol(&mut self, symbol: SymbolId) {
        if self.program.is_function(symbol) {
            return;
        }
        if self.seen.insert(symbol) {
            self.uses.push(symbol);
        }
    }

    fn bind_pattern(&mut self, pattern: &HirPattern) {
        let mut syms = Vec::new();
        pattern.bindings(&mut syms);
        self.bound.extend(syms);
    }

    fn visit(&mut self, expr: &HirExpr) {
        match &expr.kind {
            ExprKind::Ident { symbol } => self.use_symbol(*symbol),
            ExprKind::Assign { target, value } => {
                self.use_symbol(*target);
                self.visit(value);
            }
            ExprKind::Block { stmts, .. } => {
                for stmt in stmts {
                    if let caldera_hir::Stmt::Let { pattern, .. } = stmt {
                        self.bind_pattern(pattern);
                    }
                }
                expr.for_each_child(|child| self.visit(child));
            }
            ExprKind::Match { arms, .. } => {
                for arm in arms {
                    self.bind_pattern(&arm.pattern);
                }
                expr.for_each_child(|child| self.visit(child));
            }
            ExprKind::Lambda { params, body } => {
                self.bound.extend(params.iter().copied());
                self.visit(body);
            }
            ExprKind::Handle { body, clauses } => {
                self.visit(body);
                for clause in clauses {
                    self.bound.extend(clause.params.iter().copied());
                    self.visit(&clause.body);
                }
            }
            _ => expr.for_each_child(|child| self.visit(child)),
        }
    }
}

/// Finds an assignment to one of `captures` anywhere inside `body`, nested
/// scopes included.
pub fn find_captured_assignment(body: &HirExpr, captures: &[SymbolId]) -> Option<SymbolId> {
    if let ExprKind::Assign { target, .. } = &body.kind {
        if captures.contains(target) {
            return Some(*target);
        }
    }
    let mut found = None;
    body.for_each_child(|child| {
        if found.is_none() {
            found = find_captured_assignment(child, captures);
        }
    });
    found
}
