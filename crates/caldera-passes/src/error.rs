//! Internal invariant violations detected while analyzing continuation sites.
//!
//! These indicate inconsistent input from the type/effect checker, not user
//! mistakes, and abort compilation.

use caldera_hir::{ExprId, SymbolId};
use derive_more::{Display, From};

pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[derive(Clone, Display, Debug, From, PartialEq, Eq, salsa::Update)]
#[display("{kind}")]
pub struct AnalysisError {
    #[from]
    kind: Box<AnalysisErrorKind>,
}

impl<E> From<E> for AnalysisError
where
    AnalysisErrorKind: From<E>,
{
    fn from(error: E) -> Self {
        AnalysisError {
            kind: Box::new(AnalysisErrorKind::from(error)),
        }
    }
}

impl AnalysisError {
    pub fn kind(&self) -> &AnalysisErrorKind {
        &self.kind
    }

    pub fn missing_operation(expr: ExprId) -> Self {
        AnalysisErrorKind::MissingOperation { expr }.into()
    }

    pub fn not_a_function(expr: ExprId) -> Self {
        AnalysisErrorKind::NotAFunction { expr }.into()
    }

    pub fn unsupported_site(expr: ExprId, reason: &'static str) -> Self {
        AnalysisErrorKind::UnsupportedSite { expr, reason }.into()
    }

    pub fn captured_assignment(symbol: SymbolId, name: &str) -> Self {
        AnalysisErrorKind::CapturedAssignment {
            symbol,
            name: name.to_owned(),
        }
        .into()
    }

    pub fn unknown_label(expr: ExprId) -> Self {
        AnalysisErrorKind::UnknownLabel { expr }.into()
    }

    pub fn malformed(msg: impl std::fmt::Display) -> Self {
        AnalysisErrorKind::MalformedProgram(msg.to_string()).into()
    }
}

#[derive(Clone, Display, Debug, PartialEq, Eq)]
pub enum AnalysisErrorKind {
    #[display("perform at {expr} has no resolvable operation")]
    MissingOperation { expr: ExprId },

    #[display("call at {expr} does not target a function type")]
    NotAFunction { expr: ExprId },

    #[display("continuation site at {expr} is not supported: {reason}")]
    UnsupportedSite { expr: ExprId, reason: &'static str },

    #[display("captured variable `{name}` ({symbol}) is assigned inside its capturing scope")]
    CapturedAssignment { symbol: SymbolId, name: String },

    #[display("break/continue at {expr} has no enclosing loop")]
    UnknownLabel { expr: ExprId },

    #[display("malformed program: {_0}")]
    MalformedProgram(String),
}

impl std::error::Error for AnalysisError {}
