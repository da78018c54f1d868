//! Lookup of expressions by id.

use std::collections::HashMap;

use caldera_hir::{ExprId, HirExpr, HirProgram};

/// Maps every expression id of a program to its node.
pub struct ExprIndex<'p> {
    exprs: HashMap<ExprId, &'p HirExpr>,
}

impl<'p> ExprIndex<'p> {
    pub fn build(program: &'p HirProgram) -> Self {
        let mut exprs = HashMap::new();
        for func in &program.functions {
            insert(&mut exprs, &func.body);
        }
        Self { exprs }
    }

    pub fn get(&self, id: ExprId) -> Option<&'p HirExpr> {
        self.exprs.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }
}

fn insert<'p>(exprs: &mut HashMap<ExprId, &'p HirExpr>, expr: &'p HirExpr) {
    exprs.insert(expr.id, expr);
    expr.for_each_child(|child| insert(exprs, child));
}
