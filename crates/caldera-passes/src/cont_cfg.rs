//! Control-flow skeleton used to re-enter an owner body at a resume point.
//!
//! Each resume point records the path of structural edges from the owner
//! body down to its site. The resume-aware compiler asks, for every construct
//! it passes through, which edge leads to the active site: the statement to
//! start from, the branch or arm to select, or whether a loop is being
//! re-entered in the middle of its body.

use std::collections::BTreeMap;
use std::fmt;

use caldera_hir::{ExprId, ExprKind, HirExpr, HirProgram, Stmt};

use crate::sites::{SiteRange, operands};
use crate::site_table::{OwnerSummary, SiteTable};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CfgEdge {
    /// Statement `index` of a block (its `let` value or expression).
    Stmt { block: ExprId, index: u32 },
    Tail { block: ExprId },
    Cond { expr: ExprId },
    Then { expr: ExprId },
    Else { expr: ExprId },
    Scrutinee { expr: ExprId },
    Arm { expr: ExprId, index: u32 },
    /// Body of a `while` or `loop`.
    LoopBody { expr: ExprId },
    Operand { expr: ExprId, index: u32 },
    /// The single child of a field access, assignment, break or resume.
    Inner { expr: ExprId },
}

impl fmt::Display for CfgEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CfgEdge::Stmt { block, index } => write!(f, "{block}.stmt{index}"),
            CfgEdge::Tail { block } => write!(f, "{block}.tail"),
            CfgEdge::Cond { expr } => write!(f, "{expr}.cond"),
            CfgEdge::Then { expr } => write!(f, "{expr}.then"),
            CfgEdge::Else { expr } => write!(f, "{expr}.else"),
            CfgEdge::Scrutinee { expr } => write!(f, "{expr}.scrutinee"),
            CfgEdge::Arm { expr, index } => write!(f, "{expr}.arm{index}"),
            CfgEdge::LoopBody { expr } => write!(f, "{expr}.body"),
            CfgEdge::Operand { expr, index } => write!(f, "{expr}.op{index}"),
            CfgEdge::Inner { expr } => write!(f, "{expr}.inner"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResumePoint {
    pub site_id: u32,
    pub expr: ExprId,
    pub path: Vec<CfgEdge>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContCfg {
    pub cont_fn_name: String,
    pub resume_points: Vec<ResumePoint>,
    edges: BTreeMap<CfgEdge, SiteRange>,
}

impl ContCfg {
    pub fn build(program: &HirProgram, table: &SiteTable, owner: &OwnerSummary, body: &HirExpr) -> Self {
        let mut builder = Builder {
            program,
            table,
            path: Vec::new(),
            points: Vec::new(),
        };
        builder.visit(body);
        let mut edges: BTreeMap<CfgEdge, SiteRange> = BTreeMap::new();
        for point in &builder.points {
            for edge in &point.path {
                let range = SiteRange::single(point.site_id);
                edges
                    .entry(*edge)
                    .and_modify(|existing| *existing = existing.merge(range))
                    .or_insert(range);
            }
        }
        ContCfg {
            cont_fn_name: owner.cont_fn_name.clone(),
            resume_points: builder.points,
            edges,
        }
    }

    /// Sites reachable through `edge`, if any.
    pub fn range(&self, edge: CfgEdge) -> Option<SiteRange> {
        self.edges.get(&edge).copied()
    }

    /// Whether resuming at `site` re-enters the loop `expr` mid-body, so the
    /// loop condition must be skipped on the first iteration.
    pub fn skips_condition(&self, expr: ExprId, site: u32) -> bool {
        self.range(CfgEdge::LoopBody { expr })
            .is_some_and(|range| range.contains(site))
    }

    pub fn point(&self, site: u32) -> Option<&ResumePoint> {
        self.resume_points.iter().find(|point| point.site_id == site)
    }

    pub fn dump(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ContCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.cont_fn_name)?;
        for point in &self.resume_points {
            let path: Vec<String> = point.path.iter().map(ToString::to_string).collect();
            writeln!(f, "  #{} {}: {}", point.site_id, point.expr, path.join(" > "))?;
        }
        Ok(())
    }
}

struct Builder<'a> {
    program: &'a HirProgram,
    table: &'a SiteTable,
    path: Vec<CfgEdge>,
    points: Vec<ResumePoint>,
}

impl Builder<'_> {
    fn descend(&mut self, edge: CfgEdge, expr: &HirExpr) {
        if self.table.range(expr.id).is_none() {
            return;
        }
        self.path.push(edge);
        self.visit(expr);
        self.path.pop();
    }

    fn visit(&mut self, expr: &HirExpr) {
        let id = expr.id;
        match &expr.kind {
            ExprKind::Literal { .. }
            | ExprKind::Ident { .. }
            | ExprKind::Continue { .. }
            | ExprKind::Lambda { .. } => {}
            ExprKind::Binary { .. } | ExprKind::Tuple { .. } | ExprKind::Record { .. } => {
                self.visit_operands(expr)
            }
            ExprKind::Call { .. } | ExprKind::Perform { .. } => {
                self.visit_operands(expr);
                self.point(expr);
            }
            ExprKind::Block { stmts, tail } => {
                for (index, stmt) in stmts.iter().enumerate() {
                    let inner = match stmt {
                        Stmt::Let { value, .. } => value,
                        Stmt::Expr { expr } => expr,
                    };
                    self.descend(
                        CfgEdge::Stmt {
                            block: id,
                            index: index as u32,
                        },
                        inner,
                    );
                }
                if let Some(tail) = tail {
                    self.descend(CfgEdge::Tail { block: id }, tail);
                }
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.descend(CfgEdge::Cond { expr: id }, cond);
                self.descend(CfgEdge::Then { expr: id }, then_branch);
                if let Some(else_branch) = else_branch {
                    self.descend(CfgEdge::Else { expr: id }, else_branch);
                }
            }
            ExprKind::Match { scrutinee, arms } => {
                self.descend(CfgEdge::Scrutinee { expr: id }, scrutinee);
                for (index, arm) in arms.iter().enumerate() {
                    self.descend(
                        CfgEdge::Arm {
                            expr: id,
                            index: index as u32,
                        },
                        &arm.body,
                    );
                }
            }
            ExprKind::While { cond, body, .. } => {
                self.descend(CfgEdge::Cond { expr: id }, cond);
                self.descend(CfgEdge::LoopBody { expr: id }, body);
            }
            ExprKind::Loop { body, .. } => self.descend(CfgEdge::LoopBody { expr: id }, body),
            ExprKind::Break { value, .. } => {
                if let Some(value) = value {
                    self.descend(CfgEdge::Inner { expr: id }, value);
                }
            }
            ExprKind::Assign { value: inner, .. } | ExprKind::Field { base: inner, .. } => {
                self.descend(CfgEdge::Inner { expr: id }, inner)
            }
            ExprKind::Handle { .. } => self.point(expr),
            ExprKind::Resume { value } => {
                self.descend(CfgEdge::Inner { expr: id }, value);
                self.point(expr);
            }
        }
    }

    fn visit_operands(&mut self, expr: &HirExpr) {
        for (index, operand) in operands(self.program, expr) {
            self.descend(
                CfgEdge::Operand {
                    expr: expr.id,
                    index,
                },
                operand,
            );
        }
    }

    fn point(&mut self, expr: &HirExpr) {
        if let Some(site) = self.table.site_for_expr(expr.id) {
            self.points.push(ResumePoint {
                site_id: site.site_id,
                expr: expr.id,
                path: self.path.clone(),
            });
        }
    }
}
