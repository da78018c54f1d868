//! Resolved types as produced by the type/effect checker.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{EffectId, TypeId};

/// An ordered set of effects attached to a function type.
///
/// The empty row means the function is pure.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectRow(BTreeSet<EffectId>);

impl EffectRow {
    pub fn pure() -> Self {
        Self::default()
    }

    pub fn is_pure(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, effect: EffectId) -> bool {
        self.0.contains(&effect)
    }

    pub fn iter(&self) -> impl Iterator<Item = EffectId> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<EffectId> for EffectRow {
    fn from_iter<I: IntoIterator<Item = EffectId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A fully resolved type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ty {
    Unit,
    Bool,
    Int,
    Int64,
    Float,
    Tuple {
        elements: Vec<TypeId>,
    },
    Record {
        name: String,
        fields: Vec<(String, TypeId)>,
    },
    Function {
        params: Vec<TypeId>,
        ret: TypeId,
        #[serde(default)]
        effects: EffectRow,
    },
}

impl Ty {
    pub fn is_scalar(&self) -> bool {
        matches!(self, Ty::Unit | Ty::Bool | Ty::Int | Ty::Int64 | Ty::Float)
    }

    /// Field types of an aggregate, in layout order.
    pub fn aggregate_fields(&self) -> Option<Vec<TypeId>> {
        match self {
            Ty::Tuple { elements } => Some(elements.clone()),
            Ty::Record { fields, .. } => Some(fields.iter().map(|(_, ty)| *ty).collect()),
            _ => None,
        }
    }

    /// Effect row of a function type. `None` for non-function types.
    pub fn effects(&self) -> Option<&EffectRow> {
        match self {
            Ty::Function { effects, .. } => Some(effects),
            _ => None,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Unit => f.write_str("()"),
            Ty::Bool => f.write_str("Bool"),
            Ty::Int => f.write_str("Int"),
            Ty::Int64 => f.write_str("Int64"),
            Ty::Float => f.write_str("Float"),
            Ty::Tuple { elements } => {
                f.write_str("(")?;
                for (i, el) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{el}")?;
                }
                f.write_str(")")
            }
            Ty::Record { name, .. } => f.write_str(name),
            Ty::Function {
                params,
                ret,
                effects,
            } => {
                f.write_str("fn(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") -> {ret}")?;
                if !effects.is_pure() {
                    f.write_str(" ! {")?;
                    for (i, eff) in effects.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{eff}")?;
                    }
                    f.write_str("}")?;
                }
                Ok(())
            }
        }
    }
}
