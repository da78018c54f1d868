//! Host-side effect handlers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use derive_more::Display;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::abi::{ValueKind, signature_hash};
use crate::value::Value;

/// Parameter and result kinds of an operation, as seen by the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<ValueKind>,
    pub result: ValueKind,
}

impl Signature {
    pub fn new(params: impl Into<Vec<ValueKind>>, result: ValueKind) -> Self {
        Self {
            params: params.into(),
            result,
        }
    }

    pub fn hash(&self) -> u32 {
        signature_hash(&self.params, self.result)
    }
}

/// Error reported by a handler; aborts the trampoline.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
#[display("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::error::Error for HandlerError {}

/// Builds the value a handler resumes the suspended computation with.
#[derive(Debug)]
pub struct Tail {
    result: ValueKind,
}

impl Tail {
    pub(crate) fn new(result: ValueKind) -> Self {
        Self { result }
    }

    /// Kind the operation is declared to return.
    pub fn result_kind(&self) -> ValueKind {
        self.result
    }

    pub fn resume(self, value: Value) -> Resume {
        Resume {
            value,
            expected: self.result,
        }
    }
}

/// A resume value produced through [`Tail::resume`].
#[derive(Debug)]
pub struct Resume {
    value: Value,
    expected: ValueKind,
}

impl Resume {
    pub fn value(&self) -> Value {
        self.value
    }

    pub(crate) fn expected(&self) -> ValueKind {
        self.expected
    }
}

pub type HandlerFuture = BoxFuture<'static, Result<Resume, HandlerError>>;

pub trait EffectHandler: Send + Sync {
    fn handle(&self, payload: Vec<Value>, tail: Tail) -> HandlerFuture;
}

impl<F, Fut> EffectHandler for F
where
    F: Fn(Vec<Value>, Tail) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Resume, HandlerError>> + Send + 'static,
{
    fn handle(&self, payload: Vec<Value>, tail: Tail) -> HandlerFuture {
        self(payload, tail).boxed()
    }
}

#[derive(Clone)]
pub struct RegisteredHandler {
    pub signature: Signature,
    pub handler: Arc<dyn EffectHandler>,
}

/// Handlers keyed by `(effect id, operation id)`.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(u32, u32), RegisteredHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler`, replacing any handler previously registered for
    /// the same operation.
    pub fn register(
        &mut self,
        effect: u32,
        op: u32,
        signature: Signature,
        handler: impl EffectHandler + 'static,
    ) -> &mut Self {
        self.handlers.insert(
            (effect, op),
            RegisteredHandler {
                signature,
                handler: Arc::new(handler),
            },
        );
        self
    }

    pub fn lookup(&self, effect: u32, op: u32) -> Option<&RegisteredHandler> {
        self.handlers.get(&(effect, op))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
