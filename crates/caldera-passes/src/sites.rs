//! Forward numbering of continuation sites.
//!
//! Sites are numbered in post-order, following evaluation order, with one
//! counter shared by every owner of the program. The sites inside any subtree
//! therefore form a contiguous id range, which later lets generated code test
//! "does this subtree contain the active site" with a single range check.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;

use caldera_hir::{
    ExprId, ExprKind, HirExpr, HirProgram, OperationRef, ResumeKind, SymbolId, TypeId,
};
use tracing::trace;

use crate::error::{AnalysisError, AnalysisResult};
use crate::owners::OwnerInfo;

/// Inclusive range of site ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SiteRange {
    pub first: u32,
    pub last: u32,
}

impl SiteRange {
    pub fn single(id: u32) -> Self {
        Self {
            first: id,
            last: id,
        }
    }

    pub fn contains(self, id: u32) -> bool {
        self.first <= id && id <= self.last
    }

    pub fn len(self) -> u32 {
        self.last - self.first + 1
    }

    pub fn merge(self, other: SiteRange) -> SiteRange {
        SiteRange {
            first: self.first.min(other.first),
            last: self.last.max(other.last),
        }
    }

    pub fn iter(self) -> RangeInclusive<u32> {
        self.first..=self.last
    }
}

impl fmt::Display for SiteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{}..={}", self.first, self.last)
        }
    }
}

/// An already evaluated operand that must survive a site in a later operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TempKey {
    pub expr: ExprId,
    pub operand: u32,
}

impl fmt::Display for TempKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tmp{}_{}", self.expr.0, self.operand)
    }
}

/// What an effectful call site invokes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallTarget {
    /// A top-level function called by name.
    Direct { function: SymbolId },
    /// Any other callee value.
    Closure,
    /// The body thunk of a `handle` expression, followed by handler dispatch.
    HandleBody,
    /// `resume` inside a `ctl` clause.
    Resume,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SiteKind {
    Perform {
        op: OperationRef,
        resume_kind: ResumeKind,
    },
    Call {
        target: CallTarget,
    },
}

impl SiteKind {
    pub fn is_perform(&self) -> bool {
        matches!(self, SiteKind::Perform { .. })
    }
}

impl fmt::Display for SiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteKind::Perform { op, resume_kind } => {
                write!(f, "perform {}.{} ({})", op.effect, op.op, resume_kind.as_str())
            }
            SiteKind::Call {
                target: CallTarget::Direct { function },
            } => write!(f, "call {function}"),
            SiteKind::Call {
                target: CallTarget::Closure,
            } => f.write_str("call closure"),
            SiteKind::Call {
                target: CallTarget::HandleBody,
            } => f.write_str("handle"),
            SiteKind::Call {
                target: CallTarget::Resume,
            } => f.write_str("resume"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NumberedSite {
    pub expr: ExprId,
    pub site_id: u32,
    pub kind: SiteKind,
    pub resume_value_ty: TypeId,
}

/// Sites of one owner plus the site range of every subtree that has sites.
#[derive(Clone, Debug, Default)]
pub struct OwnerSites {
    pub sites: Vec<NumberedSite>,
    pub ranges: BTreeMap<ExprId, SiteRange>,
}

impl OwnerSites {
    pub fn range(&self) -> Option<SiteRange> {
        let first = self.sites.first()?;
        let last = self.sites.last()?;
        Some(SiteRange {
            first: first.site_id,
            last: last.site_id,
        })
    }
}

/// The top-level function a call expression names, if any.
pub fn direct_callee(program: &HirProgram, expr: &HirExpr) -> Option<SymbolId> {
    let ExprKind::Call { callee, .. } = &expr.kind else {
        return None;
    };
    match callee.kind {
        ExprKind::Ident { symbol } if program.is_function(symbol) => Some(symbol),
        _ => None,
    }
}

/// Value-producing operands of a multi-operand expression, with their operand
/// index. A direct callee is not a value and is left out; call arguments keep
/// their position (callee is operand 0).
pub fn operands<'p>(program: &HirProgram, expr: &'p HirExpr) -> Vec<(u32, &'p HirExpr)> {
    match &expr.kind {
        ExprKind::Binary { lhs, rhs, .. } => vec![(0, &**lhs), (1, &**rhs)],
        ExprKind::Call { callee, args } => {
            let mut out = Vec::with_capacity(args.len() + 1);
            if direct_callee(program, expr).is_none() {
                out.push((0, &**callee));
            }
            out.extend(args.iter().enumerate().map(|(i, arg)| (i as u32 + 1, arg)));
            out
        }
        ExprKind::Tuple { elements: items } | ExprKind::Record { fields: items } => items
            .iter()
            .enumerate()
            .map(|(i, item)| (i as u32, item))
            .collect(),
        ExprKind::Perform { args, .. } => args
            .iter()
            .enumerate()
            .map(|(i, arg)| (i as u32, arg))
            .collect(),
        _ => Vec::new(),
    }
}

pub fn number_sites(
    program: &HirProgram,
    owner: &OwnerInfo<'_>,
    next_site: &mut u32,
) -> AnalysisResult<OwnerSites> {
    let mut numbering = Numbering {
        program,
        owner,
        next_site,
        out: OwnerSites::default(),
    };
    numbering.visit(owner.body)?;
    let out = numbering.out;
    trace!("number_sites: {} has {} sites", owner.name, out.sites.len());
    Ok(out)
}

struct Numbering<'a, 'p> {
    program: &'a HirProgram,
    owner: &'a OwnerInfo<'p>,
    next_site: &'a mut u32,
    out: OwnerSites,
}

impl Numbering<'_, '_> {
    fn site(&mut self, expr: &HirExpr, kind: SiteKind) {
        let site_id = *self.next_site;
        *self.next_site += 1;
        self.out.sites.push(NumberedSite {
            expr: expr.id,
            site_id,
            kind,
            resume_value_ty: expr.ty,
        });
    }

    fn visit(&mut self, expr: &HirExpr) -> AnalysisResult<()> {
        let first = *self.next_site;
        match &expr.kind {
            // Separate owners.
            ExprKind::Lambda { .. } => {}
            ExprKind::Handle { .. } => self.site(
                expr,
                SiteKind::Call {
                    target: CallTarget::HandleBody,
                },
            ),
            ExprKind::Match { scrutinee, arms } => {
                self.visit(scrutinee)?;
                for arm in arms {
                    if let Some(guard) = &arm.guard {
                        let before = *self.next_site;
                        self.visit(guard)?;
                        if *self.next_site != before {
                            return Err(AnalysisError::unsupported_site(
                                guard.id,
                                "continuation site inside a match guard",
                            ));
                        }
                    }
                    self.visit(&arm.body)?;
                }
            }
            ExprKind::Perform { op, args } => {
                for arg in args {
                    self.visit(arg)?;
                }
                let op = op.ok_or_else(|| AnalysisError::missing_operation(expr.id))?;
                let decl = self
                    .program
                    .operation(op)
                    .ok_or_else(|| AnalysisError::missing_operation(expr.id))?;
                self.site(
                    expr,
                    SiteKind::Perform {
                        op,
                        resume_kind: decl.resume_kind,
                    },
                );
            }
            ExprKind::Call { callee, args } => {
                self.visit(callee)?;
                for arg in args {
                    self.visit(arg)?;
                }
                let effects = self
                    .program
                    .effects_of(callee.ty)
                    .ok_or_else(|| AnalysisError::not_a_function(expr.id))?;
                if !effects.is_pure() {
                    let target = match direct_callee(self.program, expr) {
                        Some(function) => CallTarget::Direct { function },
                        None => CallTarget::Closure,
                    };
                    self.site(expr, SiteKind::Call { target });
                }
            }
            ExprKind::Resume { value } => {
                self.visit(value)?;
                match self.owner.clause {
                    Some(clause) if clause.resume_kind == ResumeKind::Ctl => self.site(
                        expr,
                        SiteKind::Call {
                            target: CallTarget::Resume,
                        },
                    ),
                    // Tail-resumptive clauses return the value to the perform site.
                    Some(_) => {}
                    None => {
                        return Err(AnalysisError::unsupported_site(
                            expr.id,
                            "resume outside of a handler clause",
                        ));
                    }
                }
            }
            ExprKind::Literal { .. }
            | ExprKind::Ident { .. }
            | ExprKind::Binary { .. }
            | ExprKind::Block { .. }
            | ExprKind::If { .. }
            | ExprKind::While { .. }
            | ExprKind::Loop { .. }
            | ExprKind::Break { .. }
            | ExprKind::Continue { .. }
            | ExprKind::Assign { .. }
            | ExprKind::Tuple { .. }
            | ExprKind::Record { .. }
            | ExprKind::Field { .. } => {
                let mut result = Ok(());
                expr.for_each_child(|child| {
                    if result.is_ok() {
                        result = self.visit(child);
                    }
                });
                result?;
            }
        }
        if *self.next_site > first {
            self.out.ranges.insert(
                expr.id,
                SiteRange {
                    first,
                    last: *self.next_site - 1,
                },
            );
        }
        Ok(())
    }
}
