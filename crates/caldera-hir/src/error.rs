use derive_more::{Display, From};

pub type HirResult<T> = Result<T, HirError>;

#[derive(Debug, Display, From)]
#[display("{kind}")]
pub struct HirError {
    #[from]
    kind: Box<HirErrorKind>,
}

impl<E> From<E> for HirError
where
    HirErrorKind: From<E>,
{
    fn from(error: E) -> Self {
        HirError {
            kind: Box::new(HirErrorKind::from(error)),
        }
    }
}

impl HirError {
    pub fn kind(&self) -> &HirErrorKind {
        &self.kind
    }

    pub fn dangling(what: impl std::fmt::Display) -> Self {
        HirErrorKind::DanglingReference(what.to_string()).into()
    }

    pub fn malformed(msg: impl std::fmt::Display) -> Self {
        HirErrorKind::Malformed(msg.to_string()).into()
    }
}

#[derive(Debug, Display, From)]
pub enum HirErrorKind {
    #[display("Invalid HIR JSON: {_0}")]
    Json(serde_json::Error),

    #[display("Dangling reference to {_0}")]
    #[from(ignore)]
    DanglingReference(String),

    #[display("Malformed program: {_0}")]
    #[from(ignore)]
    Malformed(String),
}

impl std::error::Error for HirError {}
