//! Effect declarations and operation references.

use serde::{Deserialize, Serialize};

use crate::ids::{EffectId, OpId, TypeId};

/// How a handler clause may resume the operation it handles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeKind {
    /// Resumed at most once, under full control of the handler.
    Ctl,
    /// Tail-resumable: behaves like an ordinary call from the perform site.
    Fn,
}

impl ResumeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResumeKind::Ctl => "ctl",
            ResumeKind::Fn => "fn",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationRef {
    pub effect: EffectId,
    pub op: OpId,
}

impl OperationRef {
    pub const fn new(effect: EffectId, op: OpId) -> Self {
        Self { effect, op }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDecl {
    pub id: OpId,
    pub name: String,
    pub params: Vec<TypeId>,
    pub result: TypeId,
    pub resume_kind: ResumeKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectDecl {
    pub id: EffectId,
    pub name: String,
    pub operations: Vec<OperationDecl>,
}

impl EffectDecl {
    pub fn operation(&self, op: OpId) -> Option<&OperationDecl> {
        self.operations.iter().find(|decl| decl.id == op)
    }
}
