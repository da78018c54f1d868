//! Trampoline tests against a scripted in-memory instance.

use std::time::Duration;

use caldera_host::abi::{self, SLOT_SIZE};
use caldera_host::{
    EffectfulInstance, HandlerError, HandlerRegistry, RawValue, Resume, Signature, Tail,
    Trampoline, TrampolineErrorKind, TrampolineResult, Value, ValueKind,
};

/// Plays back a fixed sequence of suspensions, then finishes with a value
/// computed from everything it was resumed with.
struct ScriptedInstance {
    memory: Vec<u8>,
    operations: Vec<(u32, u32, Signature)>,
    script: Vec<(u32, Vec<Value>)>,
    position: usize,
    status: i32,
    op: i32,
    token: i32,
    len: i32,
    resumed: Vec<Value>,
    finish: fn(&[Value]) -> Value,
}

impl ScriptedInstance {
    fn new(
        operations: Vec<(u32, u32, Signature)>,
        script: Vec<(u32, Vec<Value>)>,
        finish: fn(&[Value]) -> Value,
    ) -> Self {
        Self {
            memory: vec![0; 1024],
            operations,
            script,
            position: 0,
            status: abi::STATUS_DONE,
            op: 0,
            token: 0,
            len: 0,
            resumed: Vec::new(),
            finish,
        }
    }

    fn buffer(&self) -> u32 {
        abi::buffer_offset(self.operations.len() as u32)
    }

    fn put(&mut self, at: u32, bytes: &[u8]) {
        let at = at as usize;
        self.memory[at..at + bytes.len()].copy_from_slice(bytes);
    }

    fn advance(&mut self) {
        let buffer = self.buffer();
        if let Some((handle, payload)) = self.script.get(self.position).cloned() {
            self.position += 1;
            for (i, value) in payload.iter().enumerate() {
                self.put(buffer + i as u32 * SLOT_SIZE, &value.encode_slot());
            }
            self.len = (payload.len() as u32 * SLOT_SIZE) as i32;
            self.op = handle as i32;
            self.token += 1;
            self.status = abi::STATUS_SUSPENDED;
        } else {
            let result = (self.finish)(&self.resumed);
            self.put(buffer, &result.encode_slot());
            self.status = abi::STATUS_DONE;
        }
    }
}

impl EffectfulInstance for ScriptedInstance {
    fn call(&mut self, export: &str, args: &[RawValue]) -> TrampolineResult<Option<RawValue>> {
        let result = match export {
            abi::EXPORT_INIT_EFFECTS => {
                let mut table = (self.operations.len() as u32).to_le_bytes().to_vec();
                for (handle, (effect, op, signature)) in self.operations.iter().enumerate() {
                    for word in [*effect, *op, signature.hash(), handle as u32] {
                        table.extend_from_slice(&word.to_le_bytes());
                    }
                }
                self.put(0, &table);
                0
            }
            "main_effectful" => {
                self.advance();
                self.status
            }
            abi::EXPORT_RESUME_EFFECTFUL => {
                assert_eq!(args, &[RawValue::I32(self.token)], "stale continuation token");
                let buffer = self.buffer() as usize;
                let slot = &self.memory[buffer..buffer + SLOT_SIZE as usize];
                self.resumed.push(Value::read_slot(slot)?);
                self.advance();
                self.status
            }
            abi::EXPORT_EFFECT_STATUS => self.status,
            abi::EXPORT_EFFECT_OP => self.op,
            abi::EXPORT_EFFECT_CONT => self.token,
            abi::EXPORT_EFFECT_LEN => self.len,
            abi::EXPORT_EFFECT_BUFFER => self.buffer() as i32,
            other => panic!("unexpected export {other}"),
        };
        Ok(Some(RawValue::I32(result)))
    }

    fn read_memory(&mut self, offset: u32, len: u32) -> TrampolineResult<Vec<u8>> {
        Ok(self.memory[offset as usize..(offset + len) as usize].to_vec())
    }

    fn write_memory(&mut self, offset: u32, bytes: &[u8]) -> TrampolineResult<()> {
        self.put(offset, bytes);
        Ok(())
    }
}

fn ask_signature() -> Signature {
    Signature::new([], ValueKind::Int)
}

fn first_plus_one(resumed: &[Value]) -> Value {
    match resumed {
        [Value::Int(v)] => Value::Int(v + 1),
        other => panic!("unexpected resume values {other:?}"),
    }
}

#[tokio::test]
async fn ask_handler_resumes_with_41() {
    let mut instance =
        ScriptedInstance::new(vec![(0, 0, ask_signature())], vec![(0, vec![])], first_plus_one);
    let mut registry = HandlerRegistry::new();
    registry.register(0, 0, ask_signature(), |_: Vec<Value>, tail: Tail| async move {
        Ok::<_, HandlerError>(tail.resume(Value::Int(41)))
    });

    let value = Trampoline::new(registry)
        .run(&mut instance, "main", &[])
        .await
        .unwrap();
    assert_eq!(value, Value::Int(42));
}

#[tokio::test]
async fn payloads_are_decoded_against_the_signature() {
    let signature = Signature::new([ValueKind::Int, ValueKind::Bool], ValueKind::Int);
    let script = (1..=3)
        .map(|i| (0, vec![Value::Int(i), Value::Int(i % 2)]))
        .collect();
    let mut instance = ScriptedInstance::new(vec![(2, 1, signature.clone())], script, |resumed| {
        Value::Int(
            resumed
                .iter()
                .map(|v| match v {
                    Value::Int(i) => *i,
                    _ => 0,
                })
                .sum(),
        )
    });
    let mut registry = HandlerRegistry::new();
    registry.register(2, 1, signature, |payload: Vec<Value>, tail: Tail| async move {
        let value = match payload.as_slice() {
            [Value::Int(i), Value::Bool(true)] => i * 10,
            [Value::Int(i), Value::Bool(false)] => *i,
            other => return Err(HandlerError::new(format!("bad payload {other:?}"))),
        };
        Ok(tail.resume(Value::Int(value)))
    });

    let value = Trampoline::new(registry)
        .run(&mut instance, "main", &[])
        .await
        .unwrap();
    // 10 + 2 + 30
    assert_eq!(value, Value::Int(42));
}

#[tokio::test]
async fn unregistered_operation_is_fatal() {
    let mut instance =
        ScriptedInstance::new(vec![(4, 2, ask_signature())], vec![(0, vec![])], first_plus_one);
    let err = Trampoline::default()
        .run(&mut instance, "main", &[])
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind(),
        TrampolineErrorKind::UnregisteredHandler { effect: 4, op: 2 }
    ));
}

#[tokio::test]
async fn handler_failure_aborts_the_run() {
    let mut instance =
        ScriptedInstance::new(vec![(0, 0, ask_signature())], vec![(0, vec![])], first_plus_one);
    let mut registry = HandlerRegistry::new();
    registry.register(0, 0, ask_signature(), |_: Vec<Value>, _: Tail| async move {
        Err::<Resume, _>(HandlerError::new("connection reset"))
    });
    let err = Trampoline::new(registry)
        .run(&mut instance, "main", &[])
        .await
        .unwrap_err();
    insta::assert_snapshot!(err, @"effect handler failed: connection reset");
}

#[tokio::test]
async fn mismatched_signature_is_rejected() {
    let mut instance =
        ScriptedInstance::new(vec![(0, 0, ask_signature())], vec![(0, vec![])], first_plus_one);
    let mut registry = HandlerRegistry::new();
    registry.register(
        0,
        0,
        Signature::new([], ValueKind::Float),
        |_: Vec<Value>, tail: Tail| async move { Ok::<_, HandlerError>(tail.resume(Value::Float(1.0))) },
    );
    let err = Trampoline::new(registry)
        .run(&mut instance, "main", &[])
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind(),
        TrampolineErrorKind::SignatureMismatch { effect: 0, op: 0, .. }
    ));
}

#[tokio::test]
async fn handler_that_never_resumes_leaves_run_pending() {
    let mut instance =
        ScriptedInstance::new(vec![(0, 0, ask_signature())], vec![(0, vec![])], first_plus_one);
    let mut registry = HandlerRegistry::new();
    registry.register(0, 0, ask_signature(), |_: Vec<Value>, _: Tail| {
        std::future::pending::<Result<Resume, HandlerError>>()
    });
    let trampoline = Trampoline::new(registry);
    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        trampoline.run(&mut instance, "main", &[]),
    )
    .await;
    assert!(outcome.is_err(), "run completed: {outcome:?}");
}
