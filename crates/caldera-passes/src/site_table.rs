//! The program-wide continuation site table.

use std::collections::BTreeMap;
use std::fmt;

use caldera_hir::{ExprId, HirProgram, ResumeKind, SymbolId, TypeId};
use tracing::debug;

use crate::env_layout::{EnvField, EnvType, EnvTypeId, EnvTypeInterner, layout_fields};
use crate::error::AnalysisResult;
use crate::live_vars::analyze_liveness;
use crate::owners::{ClauseInfo, ContinuationSiteOwner, OwnerId, OwnerInfo, discover_owners};
use crate::sites::{SiteKind, SiteRange, TempKey, number_sites};

/// One suspension point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContinuationSite {
    pub expr: ExprId,
    /// Global ordinal; also the runtime active-site marker.
    pub site_id: u32,
    pub owner: ContinuationSiteOwner,
    pub owner_index: OwnerId,
    pub kind: SiteKind,
    pub env_type: EnvTypeId,
    pub env_fields: Vec<EnvField>,
    pub cont_fn_name: String,
    pub resume_value_ty: TypeId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerSummary {
    pub id: OwnerId,
    pub owner: ContinuationSiteOwner,
    pub parent: Option<OwnerId>,
    pub name: String,
    pub body: ExprId,
    pub params: Vec<SymbolId>,
    pub captures: Vec<SymbolId>,
    pub decl_order: Vec<SymbolId>,
    pub fn_ty: Option<TypeId>,
    pub clause: Option<ClauseInfo>,
    pub exported: bool,
    pub sites: Option<SiteRange>,
    pub cont_fn_name: String,
    /// Whether the owner is compiled with a handler parameter and an outcome result.
    pub effectful: bool,
}

impl OwnerSummary {
    fn new(program: &HirProgram, info: &OwnerInfo<'_>, sites: Option<SiteRange>) -> Self {
        let declared_effects = info
            .fn_ty
            .and_then(|ty| program.effects_of(ty))
            .is_some_and(|row| !row.is_pure());
        let thunk = matches!(
            info.owner,
            ContinuationSiteOwner::HandleBody { .. } | ContinuationSiteOwner::HandlerClause { .. }
        );
        Self {
            id: info.id,
            owner: info.owner,
            parent: info.parent,
            name: info.name.clone(),
            body: info.body.id,
            params: info.params.clone(),
            captures: info.captures.clone(),
            decl_order: info.decl_order.clone(),
            fn_ty: info.fn_ty,
            clause: info.clause,
            exported: info.exported,
            sites,
            cont_fn_name: format!("{}$cont", info.name),
            effectful: sites.is_some() || declared_effects || thunk,
        }
    }

    /// Declared effects are non-empty, so callers use the effectful convention.
    pub fn declares_effects(&self, program: &HirProgram) -> bool {
        self.fn_ty
            .and_then(|ty| program.effects_of(ty))
            .is_some_and(|row| !row.is_pure())
    }

    pub fn is_ctl_clause(&self) -> bool {
        self.clause
            .is_some_and(|clause| clause.resume_kind == ResumeKind::Ctl)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, salsa::Update)]
pub struct SiteTable {
    pub sites: Vec<ContinuationSite>,
    pub owners: Vec<OwnerSummary>,
    pub env_types: Vec<EnvType>,
    /// Site range of every expression that contains at least one site.
    pub ranges: BTreeMap<ExprId, SiteRange>,
    pub temps: BTreeMap<TempKey, TypeId>,
}

impl SiteTable {
    pub fn build(program: &HirProgram) -> AnalysisResult<SiteTable> {
        let owners = discover_owners(program)?;
        let mut table = SiteTable::default();
        let mut interner = EnvTypeInterner::default();
        let mut next_site = 0;

        for info in &owners {
            let numbered = number_sites(program, info, &mut next_site)?;
            let liveness = analyze_liveness(program, info, &numbered)?;
            let summary = OwnerSummary::new(program, info, numbered.range());
            for site in &numbered.sites {
                let empty = Default::default();
                let live_after = liveness.live_after.get(&site.expr).unwrap_or(&empty);
                let temps = liveness
                    .temps
                    .get(&site.expr)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                let env_fields =
                    layout_fields(program, info, live_after, temps, &liveness.temp_types);
                let env_type =
                    interner.intern(&program.module_name, info, site.site_id, &env_fields);
                table.sites.push(ContinuationSite {
                    expr: site.expr,
                    site_id: site.site_id,
                    owner: info.owner,
                    owner_index: info.id,
                    kind: site.kind,
                    env_type,
                    env_fields,
                    cont_fn_name: summary.cont_fn_name.clone(),
                    resume_value_ty: site.resume_value_ty,
                });
            }
            debug!(
                "site table: {} ({}) has {} sites",
                info.name,
                info.owner,
                numbered.sites.len()
            );
            table.ranges.extend(numbered.ranges);
            table.temps.extend(liveness.temp_types);
            table.owners.push(summary);
        }

        table.env_types = interner.finish();
        debug!(
            "site table: {} owners, {} sites, {} env types",
            table.owners.len(),
            table.sites.len(),
            table.env_types.len()
        );
        Ok(table)
    }

    pub fn site(&self, site_id: u32) -> Option<&ContinuationSite> {
        self.sites.get(site_id as usize)
    }

    pub fn site_for_expr(&self, expr: ExprId) -> Option<&ContinuationSite> {
        self.sites.iter().find(|site| site.expr == expr)
    }

    pub fn range(&self, expr: ExprId) -> Option<SiteRange> {
        self.ranges.get(&expr).copied()
    }

    pub fn owner(&self, id: OwnerId) -> &OwnerSummary {
        &self.owners[id.index()]
    }

    pub fn owner_of(&self, owner: ContinuationSiteOwner) -> Option<&OwnerSummary> {
        self.owners.iter().find(|summary| summary.owner == owner)
    }

    pub fn function_owner(&self, symbol: SymbolId) -> Option<&OwnerSummary> {
        self.owner_of(ContinuationSiteOwner::Function { symbol })
    }

    pub fn sites_of(&self, owner: &OwnerSummary) -> &[ContinuationSite] {
        match owner.sites {
            Some(range) => &self.sites[range.first as usize..=range.last as usize],
            None => &[],
        }
    }

    pub fn env_type(&self, id: EnvTypeId) -> &EnvType {
        &self.env_types[id.0 as usize]
    }

    /// Human-readable listing used by `calderac sites` and snapshot tests.
    pub fn dump(&self, program: &HirProgram) -> String {
        self.display(program).to_string()
    }

    pub fn display<'a>(&'a self, program: &'a HirProgram) -> SiteTableDisplay<'a> {
        SiteTableDisplay {
            table: self,
            program,
        }
    }
}

pub struct SiteTableDisplay<'a> {
    table: &'a SiteTable,
    program: &'a HirProgram,
}

impl fmt::Display for SiteTableDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table;
        for owner in &table.owners {
            let range = match owner.sites {
                Some(range) => range.to_string(),
                None => "-".to_owned(),
            };
            let abi = if owner.effectful { "effectful" } else { "pure" };
            writeln!(
                f,
                "{} [{}] sites {range} {abi} -> {}",
                owner.name, owner.owner, owner.cont_fn_name
            )?;
            for site in table.sites_of(owner) {
                let env = table.env_type(site.env_type);
                let fields: Vec<String> = site
                    .env_fields
                    .iter()
                    .skip(crate::env_layout::HEADER_FIELDS)
                    .map(|field| field.name.clone())
                    .collect();
                writeln!(
                    f,
                    "  #{} {} at {}: {} | {} {{{}}}",
                    site.site_id,
                    site.kind,
                    site.expr,
                    self.program.ty(site.resume_value_ty),
                    env.name,
                    fields.join(", "),
                )?;
            }
        }
        Ok(())
    }
}
