//! Typed high-level IR consumed by the Caldera effect-lowering pipeline.
//!
//! The HIR is produced upstream by name resolution and the type/effect
//! checker. Every expression carries its resolved type and every function
//! type carries its effect row; this crate only models that data.
//!
//! ## Contents
//!
//! - `ids`: dense identifiers for expressions, symbols, types, effects and labels
//! - `types`: resolved types and effect rows
//! - `effects`: effect and operation declarations
//! - `expr`: the closed expression/statement/pattern grammar
//! - `program`: the whole-program container and its JSON interchange form
//! - `builder`: `ProgramBuilder` for constructing programs in code

mod builder;
mod effects;
mod error;
mod expr;
mod ids;
mod program;
mod types;

pub use builder::ProgramBuilder;
pub use effects::{EffectDecl, OperationDecl, OperationRef, ResumeKind};
pub use error::{HirError, HirErrorKind, HirResult};
pub use expr::{BinaryOp, ExprKind, HandlerClause, HirExpr, HirPattern, Literal, MatchArm, Stmt};
pub use ids::{EffectId, ExprId, LabelId, OpId, SymbolId, TypeId};
pub use program::{HirFunction, HirProgram, SymbolInfo};
pub use types::{EffectRow, Ty};

#[cfg(test)]
mod tests {
    use super::*;

    fn ask_program() -> HirProgram {
        let mut b = ProgramBuilder::new("demo");
        let int = b.int();
        let ask = b.effect("Ask");
        let get = b.operation(ask, "get", &[], int, ResumeKind::Ctl);
        let f = b.declare_function("f", &[], int, &[ask]);
        let perform = b.perform(get, vec![]);
        let one = b.int_lit(1);
        let body = b.binary(BinaryOp::Add, perform, one);
        b.define_function(f, vec![], body, true);
        b.finish()
    }

    #[test]
    fn builder_derives_result_types() {
        let program = ask_program();
        let func = &program.functions[0];
        assert_eq!(program.ty(func.body.ty), &Ty::Int);
        let (params, ret, effects) = program.function_signature(func.ty).unwrap();
        assert!(params.is_empty());
        assert_eq!(program.ty(ret), &Ty::Int);
        assert!(!effects.is_pure());
    }

    #[test]
    fn json_interchange_preserves_program() {
        let program = ask_program();
        let text = program.to_json().unwrap();
        let loaded = HirProgram::from_json(&text).unwrap();
        assert_eq!(loaded, program);
    }

    #[test]
    fn duplicate_expression_ids_are_rejected() {
        let mut program = ask_program();
        let ExprKind::Binary { rhs, .. } = &mut program.functions[0].body.kind else {
            panic!("expected binary body");
        };
        rhs.id = ExprId::new(0);
        let text = program.to_json().unwrap();
        let err = HirProgram::from_json(&text).unwrap_err();
        assert!(matches!(err.kind(), HirErrorKind::Malformed(_)), "{err}");
    }

    #[test]
    fn function_type_display_lists_effects() {
        let mut b = ProgramBuilder::new("demo");
        let int = b.int();
        let io = b.effect("Io");
        let ty = b.func_ty(&[int], int, &[io]);
        let program = b.finish();
        insta::assert_snapshot!(program.ty(ty).to_string(), @"fn(t0) -> t0 ! {eff0}");
    }
}
