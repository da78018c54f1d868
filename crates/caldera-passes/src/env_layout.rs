//! Continuation environment layouts.
//!
//! Every environment starts with the two header fields of the shared base
//! type (`site`, `handler`). Clause owners of `ctl` operations then carry
//! their resumption and tail-guard slots, followed by operand temporaries in
//! key order and finally the live locals in the owner's declaration order.
//!
//! Layouts are interned per owner. A layout whose proper prefix is already
//! interned for the same owner extends that type, otherwise it extends the
//! base environment directly.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use caldera_hir::{HirProgram, ResumeKind, SymbolId, TypeId};

use crate::live_vars::LiveSet;
use crate::owners::{OwnerId, OwnerInfo};
use crate::sites::TempKey;

/// Number of header fields shared by every environment.
pub const HEADER_FIELDS: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldTy {
    /// Active-site marker (i32).
    SiteMarker,
    /// Handler frame in effect at the site.
    HandlerFrame,
    /// The clause's resumption.
    Resumption,
    /// Boolean slot (i32).
    Flag,
    Value(TypeId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldSource {
    Site,
    Handler,
    Continuation,
    TailGuard,
    Temp(TempKey),
    Local(SymbolId),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EnvField {
    pub name: String,
    pub ty: FieldTy,
    pub source: FieldSource,
}

impl fmt::Display for EnvField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            FieldTy::SiteMarker => write!(f, "{}: site", self.name),
            FieldTy::HandlerFrame => write!(f, "{}: frame", self.name),
            FieldTy::Resumption => write!(f, "{}: resumption", self.name),
            FieldTy::Flag => write!(f, "{}: flag", self.name),
            FieldTy::Value(ty) => write!(f, "{}: {ty}", self.name),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnvTypeId(pub u32);

impl fmt::Display for EnvTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "env{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvType {
    pub id: EnvTypeId,
    pub name: String,
    pub owner: OwnerId,
    pub fields: Vec<FieldTy>,
    /// `None` means the shared base environment.
    pub supertype: Option<EnvTypeId>,
}

pub fn layout_fields(
    program: &HirProgram,
    owner: &OwnerInfo<'_>,
    live_after: &LiveSet,
    temps: &[TempKey],
    temp_types: &BTreeMap<TempKey, TypeId>,
) -> Vec<EnvField> {
    let mut fields = vec![
        EnvField {
            name: "site".to_owned(),
            ty: FieldTy::SiteMarker,
            source: FieldSource::Site,
        },
        EnvField {
            name: "handler".to_owned(),
            ty: FieldTy::HandlerFrame,
            source: FieldSource::Handler,
        },
    ];
    if owner
        .clause
        .is_some_and(|clause| clause.resume_kind == ResumeKind::Ctl)
    {
        fields.push(EnvField {
            name: "k".to_owned(),
            ty: FieldTy::Resumption,
            source: FieldSource::Continuation,
        });
        fields.push(EnvField {
            name: "resumed".to_owned(),
            ty: FieldTy::Flag,
            source: FieldSource::TailGuard,
        });
    }
    let mut temps = temps.to_vec();
    temps.sort();
    temps.dedup();
    for key in temps {
        if let Some(ty) = temp_types.get(&key) {
            fields.push(EnvField {
                name: key.to_string(),
                ty: FieldTy::Value(*ty),
                source: FieldSource::Temp(key),
            });
        }
    }
    for symbol in &owner.decl_order {
        if live_after.contains(symbol) {
            let info = program.symbol(*symbol);
            fields.push(EnvField {
                name: info.name.clone(),
                ty: FieldTy::Value(info.ty),
                source: FieldSource::Local(*symbol),
            });
        }
    }
    fields
}

#[derive(Debug, Default)]
pub struct EnvTypeInterner {
    types: Vec<EnvType>,
    by_owner: HashMap<(OwnerId, Vec<FieldTy>), EnvTypeId>,
}

impl EnvTypeInterner {
    pub fn intern(
        &mut self,
        module: &str,
        owner: &OwnerInfo<'_>,
        first_site: u32,
        fields: &[EnvField],
    ) -> EnvTypeId {
        let shape: Vec<FieldTy> = fields.iter().map(|field| field.ty).collect();
        if let Some(id) = self.by_owner.get(&(owner.id, shape.clone())) {
            return *id;
        }
        let supertype = (HEADER_FIELDS..shape.len()).rev().find_map(|len| {
            self.by_owner
                .get(&(owner.id, shape[..len].to_vec()))
                .copied()
        });
        let id = EnvTypeId(self.types.len() as u32);
        self.types.push(EnvType {
            id,
            name: format!("{module}.{}.env{first_site}", owner.name),
            owner: owner.id,
            fields: shape.clone(),
            supertype,
        });
        self.by_owner.insert((owner.id, shape), id);
        id
    }

    pub fn finish(self) -> Vec<EnvType> {
        self.types
    }
}
