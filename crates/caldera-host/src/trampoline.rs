//! The host-side driver loop for effectful exports.
//!
//! A compiled module reports a suspension through its status exports and
//! leaves the operation payload in the exchange buffer. The trampoline looks
//! up the registered handler, awaits it, writes the resume value back into
//! the buffer and re-enters the module, until the entry reports completion.

use tracing::debug;

use crate::abi::{
    EXPORT_EFFECT_BUFFER, EXPORT_EFFECT_CONT, EXPORT_EFFECT_LEN, EXPORT_EFFECT_OP,
    EXPORT_EFFECT_STATUS, EXPORT_INIT_EFFECTS, EXPORT_RESUME_EFFECTFUL, SLOT_SIZE, STATUS_DONE,
    STATUS_SUSPENDED, effectful_export,
};
use crate::error::{TrampolineError, TrampolineErrorKind, TrampolineResult};
use crate::instance::{EffectfulInstance, RawValue};
use crate::registry::{HandlerRegistry, Resume, Signature, Tail};
use crate::table::{EffectTable, OperationEntry};
use crate::value::Value;

/// Result of entering or resuming the module.
#[derive(Debug)]
pub enum Step {
    Done(Value),
    Suspended(Suspension),
}

/// A pending operation. Resuming consumes it, so each suspension can be
/// resumed at most once.
#[derive(Debug)]
pub struct Suspension {
    entry: OperationEntry,
    token: i32,
    buffer: u32,
    len: u32,
    table: EffectTable,
}

impl Suspension {
    pub fn effect(&self) -> u32 {
        self.entry.effect
    }

    pub fn op(&self) -> u32 {
        self.entry.op
    }

    pub fn signature_hash(&self) -> u32 {
        self.entry.signature_hash
    }

    /// Decodes the operation arguments against `signature`.
    pub fn payload<I>(&self, instance: &mut I, signature: &Signature) -> TrampolineResult<Vec<Value>>
    where
        I: EffectfulInstance + ?Sized,
    {
        let count = self.len / SLOT_SIZE;
        if count as usize != signature.params.len() {
            return Err(TrampolineError::abi(format!(
                "operation {}.{} sent {count} arguments, handler expects {}",
                self.entry.effect,
                self.entry.op,
                signature.params.len()
            )));
        }
        let bytes = instance.read_memory(self.buffer, self.len)?;
        bytes
            .chunks(SLOT_SIZE as usize)
            .zip(&signature.params)
            .map(|(slot, kind)| Value::decode_slot(slot, *kind))
            .collect()
    }

    pub fn resume<I>(self, instance: &mut I, resume: Resume) -> TrampolineResult<Step>
    where
        I: EffectfulInstance + ?Sized,
    {
        let value = resume.value();
        if value.kind() != resume.expected() {
            return Err(TrampolineError::abi(format!(
                "operation {}.{} resumed with {}, expected {}",
                self.entry.effect,
                self.entry.op,
                value.kind(),
                resume.expected()
            )));
        }
        instance.write_memory(self.buffer, &value.encode_slot())?;
        debug!(
            "resume {}.{} (token {}) with {value}",
            self.entry.effect, self.entry.op, self.token
        );
        instance.call(EXPORT_RESUME_EFFECTFUL, &[RawValue::I32(self.token)])?;
        next_step(instance, self.table)
    }
}

/// Calls `init_effects`, reads the operation table and enters `entry`.
pub fn start<I>(instance: &mut I, entry: &str, args: &[Value]) -> TrampolineResult<Step>
where
    I: EffectfulInstance + ?Sized,
{
    let address = call_i32(instance, EXPORT_INIT_EFFECTS, &[])?;
    let table = EffectTable::read(instance, address as u32)?;
    let raw = args
        .iter()
        .map(Value::to_raw)
        .collect::<TrampolineResult<Vec<_>>>()?;
    let export = effectful_export(entry);
    debug!("enter {export} with {} operations", table.entries().len());
    instance.call(&export, &raw)?;
    next_step(instance, table)
}

fn next_step<I>(instance: &mut I, table: EffectTable) -> TrampolineResult<Step>
where
    I: EffectfulInstance + ?Sized,
{
    let status = call_i32(instance, EXPORT_EFFECT_STATUS, &[])?;
    let buffer = call_i32(instance, EXPORT_EFFECT_BUFFER, &[])? as u32;
    match status {
        STATUS_DONE => {
            let slot = instance.read_memory(buffer, SLOT_SIZE)?;
            Ok(Step::Done(Value::read_slot(&slot)?))
        }
        STATUS_SUSPENDED => {
            let handle = call_i32(instance, EXPORT_EFFECT_OP, &[])? as u32;
            let token = call_i32(instance, EXPORT_EFFECT_CONT, &[])?;
            let len = call_i32(instance, EXPORT_EFFECT_LEN, &[])? as u32;
            let entry = *table.by_handle(handle).ok_or_else(|| {
                TrampolineError::abi(format!("unknown operation handle {handle}"))
            })?;
            debug!(
                "suspended on {}.{} (token {token}, {len} payload bytes)",
                entry.effect, entry.op
            );
            Ok(Step::Suspended(Suspension {
                entry,
                token,
                buffer,
                len,
                table,
            }))
        }
        other => Err(TrampolineError::abi(format!("unknown effect status {other}"))),
    }
}

fn call_i32<I>(instance: &mut I, export: &str, args: &[RawValue]) -> TrampolineResult<i32>
where
    I: EffectfulInstance + ?Sized,
{
    instance
        .call(export, args)?
        .and_then(RawValue::as_i32)
        .ok_or_else(|| TrampolineError::abi(format!("export `{export}` must return an i32")))
}

/// Drives effectful exports with a fixed set of handlers.
#[derive(Clone, Default)]
pub struct Trampoline {
    registry: HandlerRegistry,
}

impl Trampoline {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Runs `entry` to completion.
    ///
    /// A handler that never resolves leaves the returned future pending; an
    /// unregistered operation or a failing handler aborts the run.
    pub async fn run<I>(&self, instance: &mut I, entry: &str, args: &[Value]) -> TrampolineResult<Value>
    where
        I: EffectfulInstance + ?Sized,
    {
        let mut step = start(instance, entry, args)?;
        loop {
            let suspension = match step {
                Step::Done(value) => return Ok(value),
                Step::Suspended(suspension) => suspension,
            };
            let registered = self
                .registry
                .lookup(suspension.effect(), suspension.op())
                .ok_or_else(|| TrampolineError::unregistered(suspension.effect(), suspension.op()))?;
            let registered_hash = registered.signature.hash();
            if registered_hash != suspension.signature_hash() {
                return Err(TrampolineErrorKind::SignatureMismatch {
                    effect: suspension.effect(),
                    op: suspension.op(),
                    registered: registered_hash,
                    expected: suspension.signature_hash(),
                }
                .into());
            }
            let payload = suspension.payload(instance, &registered.signature)?;
            let tail = Tail::new(registered.signature.result);
            let resume = registered.handler.handle(payload, tail).await?;
            step = suspension.resume(instance, resume)?;
        }
    }
}
