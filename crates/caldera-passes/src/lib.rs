//! Continuation analysis passes for Caldera.
//!
//! This crate finds every point at which an effectful computation can
//! suspend, decides what state must survive the suspension, and describes
//! how generated code re-enters a body at each such point.
//!
//! ## Pipeline
//!
//! - `owners`: scopes that compile to their own function
//! - `captures`: free variables of nested scopes
//! - `sites`: forward numbering of continuation sites
//! - `live_vars`: backward liveness and operand temporaries per site
//! - `env_layout`: environment field order and type interning
//! - `site_table`: the program-wide table combining the above
//! - `cont_cfg`: per-owner resume paths for the resume-aware compiler

pub mod captures;
pub mod cont_cfg;
pub mod env_layout;
pub mod error;
pub mod index;
pub mod live_vars;
pub mod owners;
pub mod site_table;
pub mod sites;

pub use cont_cfg::{CfgEdge, ContCfg, ResumePoint};
pub use env_layout::{EnvField, EnvType, EnvTypeId, FieldSource, FieldTy, HEADER_FIELDS};
pub use error::{AnalysisError, AnalysisErrorKind, AnalysisResult};
pub use index::ExprIndex;
pub use owners::{ClauseInfo, ContinuationSiteOwner, OwnerId};
pub use site_table::{ContinuationSite, OwnerSummary, SiteTable};
pub use sites::{CallTarget, SiteKind, SiteRange, TempKey, direct_callee, operands};

#[cfg(test)]
mod tests {
    use caldera_hir::{BinaryOp, HirProgram, ProgramBuilder, ResumeKind};
    use insta::assert_snapshot;

    use super::*;

    /// `f() = perform get() + 1`, `main() = handle { f() } with get() -> resume(41)`.
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

        let main = b.declare_function("main", &[], int, &[]);
        let call = b.call_fn(f, vec![]);
        let answer = b.int_lit(41);
        let resume = b.resume(answer, int);
        let clause = b.clause(get, vec![], resume);
        let handle = b.handle(call, vec![clause]);
        b.define_function(main, vec![], handle, true);
        b.finish()
    }

    #[test]
    fn site_table_lists_owners_in_discovery_order() {
        let program = ask_program();
        let table = SiteTable::build(&program).unwrap();
        assert_snapshot!(table.dump(&program), @r"
        f [function s0] sites 0 effectful -> f$cont
          #0 perform eff0.op0 (ctl) at e0: Int | demo.f.env0 {}
        main [function s1] sites 1 effectful -> main$cont
          #1 handle at e7: Int | demo.main.env1 {}
        main$handle7 [handle body e7] sites 2 effectful -> main$handle7$cont
          #2 call s0 at e4: Int | demo.main$handle7.env2 {}
        main$handle7$clause0 [handler clause e7#0] sites 3 effectful -> main$handle7$clause0$cont
          #3 resume at e6: Int | demo.main$handle7$clause0.env3 {k, resumed}
        ");
    }

    #[test]
    fn site_ids_are_contiguous_per_owner() {
        let program = ask_program();
        let table = SiteTable::build(&program).unwrap();
        let mut expected = 0;
        for owner in &table.owners {
            for site in table.sites_of(owner) {
                assert_eq!(site.site_id, expected);
                assert_eq!(site.owner_index, owner.id);
                expected += 1;
            }
        }
        assert_eq!(expected as usize, table.sites.len());
    }

    #[test]
    fn later_environment_extends_earlier_one() {
        let mut b = ProgramBuilder::new("demo");
        let int = b.int();
        let ask = b.effect("Ask");
        let get = b.operation(ask, "get", &[], int, ResumeKind::Ctl);
        let h = b.declare_function("h", &[int], int, &[ask]);
        let x = b.symbol("x", int);
        let a = b.symbol("a", int);
        let bb = b.symbol("b", int);

        // { let a = perform get(); let b = perform get(); a + b + x }
        let p0 = b.perform(get, vec![]);
        let let_a = b.let_stmt(a, p0);
        let p1 = b.perform(get, vec![]);
        let let_b = b.let_stmt(bb, p1);
        let a_ref = b.ident(a);
        let b_ref = b.ident(bb);
        let sum = b.binary(BinaryOp::Add, a_ref, b_ref);
        let x_ref = b.ident(x);
        let sum = b.binary(BinaryOp::Add, sum, x_ref);
        let body = b.block(vec![let_a, let_b], Some(sum));
        b.define_function(h, vec![x], body, false);
        let program = b.finish();

        let table = SiteTable::build(&program).unwrap();
        let names = |site: &ContinuationSite| -> Vec<String> {
            site.env_fields.iter().map(|field| field.name.clone()).collect()
        };
        assert_eq!(names(&table.sites[0]), vec!["site", "handler", "x"]);
        assert_eq!(names(&table.sites[1]), vec!["site", "handler", "x", "a"]);

        let first = table.env_type(table.sites[0].env_type);
        let second = table.env_type(table.sites[1].env_type);
        assert_eq!(first.supertype, None);
        assert_eq!(second.supertype, Some(first.id));
        assert_eq!(second.name, "demo.h.env1");
    }

    #[test]
    fn sibling_branches_resume_through_their_own_edge() {
        let mut b = ProgramBuilder::new("demo");
        let int = b.int();
        let bool_ty = b.bool();
        let ask = b.effect("Ask");
        let get = b.operation(ask, "get", &[], int, ResumeKind::Ctl);
        let g = b.declare_function("g", &[bool_ty], int, &[ask]);
        let c = b.symbol("c", bool_ty);

        // if c { perform get() + 1 } else { perform get() + 2 }
        let cond = b.ident(c);
        let p0 = b.perform(get, vec![]);
        let one = b.int_lit(1);
        let then_branch = b.binary(BinaryOp::Add, p0, one);
        let p1 = b.perform(get, vec![]);
        let two = b.int_lit(2);
        let else_branch = b.binary(BinaryOp::Add, p1, two);
        let body = b.if_expr(cond, then_branch, Some(else_branch));
        let if_id = body.id;
        b.define_function(g, vec![c], body, false);
        let program = b.finish();

        let table = SiteTable::build(&program).unwrap();
        let owner = &table.owners[0];
        let cfg = ContCfg::build(&program, &table, owner, &program.functions[0].body);
        assert_snapshot!(cfg.dump(), @r"
        g$cont
          #0 e1: e7.then > e3.op0
          #1 e4: e7.else > e6.op0
        ");
        assert_eq!(cfg.range(CfgEdge::Cond { expr: if_id }), None);
        assert_eq!(
            cfg.range(CfgEdge::Else { expr: if_id }),
            Some(SiteRange::single(1))
        );
        // Neither branch keeps anything alive, so both sites share one layout.
        assert_eq!(table.sites[0].env_type, table.sites[1].env_type);
    }
}
