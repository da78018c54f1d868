//! Whole-program container handed to the effect-lowering pipeline.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::effects::{EffectDecl, OperationDecl, OperationRef};
use crate::error::{HirError, HirResult};
use crate::expr::HirExpr;
use crate::ids::{EffectId, ExprId, SymbolId, TypeId};
use crate::types::{EffectRow, Ty};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    pub ty: TypeId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HirFunction {
    pub symbol: SymbolId,
    pub params: Vec<SymbolId>,
    /// Always a [`Ty::Function`].
    pub ty: TypeId,
    pub body: HirExpr,
    #[serde(default)]
    pub exported: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HirProgram {
    pub module_name: String,
    pub types: Vec<Ty>,
    pub symbols: Vec<SymbolInfo>,
    #[serde(default)]
    pub effects: Vec<EffectDecl>,
    pub functions: Vec<HirFunction>,
}

impl HirProgram {
    pub fn from_json(text: &str) -> HirResult<Self> {
        let program: HirProgram = serde_json::from_str(text)?;
        program.check_references()?;
        Ok(program)
    }

    pub fn to_json(&self) -> HirResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn ty(&self, id: TypeId) -> &Ty {
        // References are checked on load and by the builder.
        &self.types[id.index()]
    }

    pub fn symbol(&self, id: SymbolId) -> &SymbolInfo {
        &self.symbols[id.index()]
    }

    pub fn symbol_name(&self, id: SymbolId) -> &str {
        &self.symbol(id).name
    }

    pub fn function(&self, symbol: SymbolId) -> Option<&HirFunction> {
        self.functions.iter().find(|func| func.symbol == symbol)
    }

    pub fn is_function(&self, symbol: SymbolId) -> bool {
        self.function(symbol).is_some()
    }

    pub fn effect(&self, id: EffectId) -> Option<&EffectDecl> {
        self.effects.iter().find(|decl| decl.id == id)
    }

    pub fn operation(&self, op: OperationRef) -> Option<&OperationDecl> {
        self.effect(op.effect)?.operation(op.op)
    }

    /// Effect row of a function type, or `None` if `ty` is not a function.
    pub fn effects_of(&self, ty: TypeId) -> Option<&EffectRow> {
        self.ty(ty).effects()
    }

    pub fn function_signature(&self, ty: TypeId) -> Option<(&[TypeId], TypeId, &EffectRow)> {
        match self.ty(ty) {
            Ty::Function {
                params,
                ret,
                effects,
            } => Some((params.as_slice(), *ret, effects)),
            _ => None,
        }
    }

    /// Validates that every id used by the program points into its tables and
    /// that expression ids are unique.
    pub fn check_references(&self) -> HirResult<()> {
        let type_count = self.types.len();
        let check_ty = |id: TypeId| {
            if id.index() < type_count {
                Ok(())
            } else {
                Err(HirError::dangling(format!("type {id}")))
            }
        };
        for ty in &self.types {
            match ty {
                Ty::Tuple { elements } => elements.iter().try_for_each(|t| check_ty(*t))?,
                Ty::Record { fields, .. } => fields.iter().try_for_each(|(_, t)| check_ty(*t))?,
                Ty::Function { params, ret, .. } => {
                    params.iter().try_for_each(|t| check_ty(*t))?;
                    check_ty(*ret)?;
                }
                _ => {}
            }
        }
        for symbol in &self.symbols {
            check_ty(symbol.ty)?;
        }
        let mut seen = HashSet::new();
        for func in &self.functions {
            if func.symbol.index() >= self.symbols.len() {
                return Err(HirError::dangling(format!("symbol {}", func.symbol)));
            }
            if !matches!(self.ty(func.ty), Ty::Function { .. }) {
                return Err(HirError::malformed(format!(
                    "function `{}` does not have a function type",
                    self.symbol_name(func.symbol)
                )));
            }
            self.check_expr(&func.body, &mut seen)?;
        }
        Ok(())
    }

    fn check_expr(&self, expr: &HirExpr, seen: &mut HashSet<ExprId>) -> HirResult<()> {
        if !seen.insert(expr.id) {
            return Err(HirError::malformed(format!(
                "expression id {} used twice",
                expr.id
            )));
        }
        if expr.ty.index() >= self.types.len() {
            return Err(HirError::dangling(format!("type {}", expr.ty)));
        }
        let mut result = Ok(());
        expr.for_each_child(|child| {
            if result.is_ok() {
                result = self.check_expr(child, seen);
            }
        });
        result
    }
}
