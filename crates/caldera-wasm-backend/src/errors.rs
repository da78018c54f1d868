//! Error types for wasm emission.

use caldera_passes::AnalysisError;
use derive_more::{Display, From};

pub type CompilationResult<T> = Result<T, CompilationError>;

#[derive(Clone, Display, Debug, From, PartialEq, Eq, salsa::Update)]
#[display("{kind}")]
pub struct CompilationError {
    #[from]
    kind: Box<CompilationErrorKind>,
}

impl<E> From<E> for CompilationError
where
    CompilationErrorKind: From<E>,
{
    fn from(error: E) -> Self {
        CompilationError {
            kind: Box::new(CompilationErrorKind::from(error)),
        }
    }
}

impl CompilationError {
    pub fn kind(&self) -> &CompilationErrorKind {
        &self.kind
    }

    pub fn unsupported_feature(feature: &'static str) -> Self {
        CompilationErrorKind::UnsupportedFeature(feature.to_string()).into()
    }

    pub fn unsupported_feature_msg(msg: impl std::fmt::Display) -> Self {
        CompilationErrorKind::UnsupportedFeature(msg.to_string()).into()
    }

    pub fn missing_restore_binding(env: &str, field: &str) -> Self {
        CompilationErrorKind::MissingRestoreBinding {
            env: env.to_owned(),
            field: field.to_owned(),
        }
        .into()
    }

    pub fn invalid_export(name: &str, reason: &'static str) -> Self {
        CompilationErrorKind::InvalidExport {
            name: name.to_owned(),
            reason,
        }
        .into()
    }

    pub fn internal(msg: impl std::fmt::Display) -> Self {
        CompilationErrorKind::Internal(msg.to_string()).into()
    }
}

#[derive(Clone, Display, Debug, From, PartialEq, Eq)]
pub enum CompilationErrorKind {
    #[display("{_0}")]
    Analysis(AnalysisError),

    #[display("environment `{env}` has no local to restore field `{field}` into")]
    #[from(ignore)]
    MissingRestoreBinding { env: String, field: String },

    #[display("Unsupported feature: {_0}")]
    #[from(ignore)]
    UnsupportedFeature(String),

    #[display("cannot export `{name}`: {reason}")]
    #[from(ignore)]
    InvalidExport { name: String, reason: &'static str },

    #[display("internal compiler error: {_0}")]
    #[from(ignore)]
    Internal(String),
}

impl std::error::Error for CompilationError {}
