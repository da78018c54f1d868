//! Errors surfaced to the embedder while driving an effectful export.

use derive_more::{Display, From};

use crate::registry::HandlerError;

pub type TrampolineResult<T> = Result<T, TrampolineError>;

#[derive(Debug, Display, From)]
#[display("{kind}")]
pub struct TrampolineError {
    #[from]
    kind: Box<TrampolineErrorKind>,
}

impl<E> From<E> for TrampolineError
where
    TrampolineErrorKind: From<E>,
{
    fn from(error: E) -> Self {
        TrampolineError {
            kind: Box::new(TrampolineErrorKind::from(error)),
        }
    }
}

impl TrampolineError {
    pub fn kind(&self) -> &TrampolineErrorKind {
        &self.kind
    }

    pub fn unregistered(effect: u32, op: u32) -> Self {
        TrampolineErrorKind::UnregisteredHandler { effect, op }.into()
    }

    pub fn wasm(err: impl std::fmt::Display) -> Self {
        TrampolineErrorKind::Wasm(err.to_string()).into()
    }

    pub fn abi(msg: impl std::fmt::Display) -> Self {
        TrampolineErrorKind::Abi(msg.to_string()).into()
    }

    pub fn missing_export(name: &str) -> Self {
        TrampolineErrorKind::MissingExport(name.to_owned()).into()
    }
}

#[derive(Debug, Display, From)]
pub enum TrampolineErrorKind {
    #[display("no handler registered for effect {effect} operation {op}")]
    #[from(ignore)]
    UnregisteredHandler { effect: u32, op: u32 },

    #[display("effect handler failed: {_0}")]
    HandlerFailed(HandlerError),

    #[display("wasm execution failed: {_0}")]
    #[from(ignore)]
    Wasm(String),

    #[display("ABI violation: {_0}")]
    #[from(ignore)]
    Abi(String),

    #[display("module does not export `{_0}`")]
    #[from(ignore)]
    MissingExport(String),

    #[display(
        "handler for effect {effect} operation {op} has signature {registered:#010x}, module expects {expected:#010x}"
    )]
    #[from(ignore)]
    SignatureMismatch {
        effect: u32,
        op: u32,
        registered: u32,
        expected: u32,
    },
}

impl std::error::Error for TrampolineError {}
