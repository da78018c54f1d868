//! Runs compiled modules on wasmtime through the host trampoline.

#![cfg(feature = "wasmtime-tests")]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use caldera::WasmArtifact;
use caldera::run::run_export;
use caldera_host::abi::{
    EXPORT_EFFECT_BUFFER, EXPORT_EFFECT_CONT, EXPORT_EFFECT_STATUS, EXPORT_RESUME_EFFECTFUL,
    STATUS_DONE, STATUS_SUSPENDED,
};
use caldera_host::{
    EffectfulInstance, HandlerError, HandlerRegistry, RawValue, Resume, Signature, Step, Tail,
    TrampolineError, TrampolineErrorKind, Value, ValueKind, WasmtimeInstance, start,
};

/// Answers `Ask.get` with `value` and counts the calls.
fn answer_get(artifact: &WasmArtifact, value: i32, calls: Arc<AtomicI32>) -> HandlerRegistry {
    let get = artifact.operation("Ask.get").expect("Ask.get in operation table");
    let mut registry = HandlerRegistry::new();
    registry.register(
        get.effect,
        get.op,
        Signature::new([], ValueKind::Int),
        move |payload: Vec<Value>, tail: Tail| {
            assert!(payload.is_empty());
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(tail.resume(Value::Int(value))) }
        },
    );
    registry
}

async fn run(artifact: &WasmArtifact, registry: HandlerRegistry, export: &str, args: &[Value]) -> Value {
    run_export(artifact, registry, export, args)
        .await
        .unwrap_or_else(|err| panic!("{export} failed: {err:#}"))
}

#[tokio::test]
async fn handled_in_module() {
    let artifact = common::compile(common::ask());
    let value = run(&artifact, HandlerRegistry::new(), "main", &[]).await;
    assert_eq!(value, Value::Int(42));
}

#[tokio::test]
async fn host_handles_unhandled_operations() {
    let artifact = common::compile(common::ask());
    let calls = Arc::new(AtomicI32::new(0));
    let registry = answer_get(&artifact, 9, calls.clone());
    let value = run(&artifact, registry, "f", &[]).await;
    assert_eq!(value, Value::Int(10));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unregistered_operations_are_reported() {
    let artifact = common::compile(common::ask());
    let err = run_export(&artifact, HandlerRegistry::new(), "f", &[])
        .await
        .unwrap_err();
    let err = err.downcast_ref::<TrampolineError>().expect("trampoline error");
    assert!(matches!(
        err.kind(),
        TrampolineErrorKind::UnregisteredHandler { .. }
    ));
}

#[tokio::test]
async fn loop_resumes_three_times() {
    let artifact = common::compile(common::counting_loop());
    let calls = Arc::new(AtomicI32::new(0));
    let registry = answer_get(&artifact, 10, calls.clone());
    let value = run(&artifact, registry, "count", &[]).await;
    assert_eq!(value, Value::Int(30));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn forwarding_handler_is_transparent_to_the_loop() {
    let plain = common::compile(common::counting_loop());
    let wrapped = common::compile(common::identity_loop());
    let mut observed = Vec::new();
    for artifact in [&plain, &wrapped] {
        let calls = Arc::new(AtomicI32::new(0));
        let registry = answer_get(artifact, 10, calls.clone());
        let value = run(artifact, registry, "count", &[]).await;
        observed.push((value, calls.load(Ordering::SeqCst)));
    }
    assert_eq!(observed[0], (Value::Int(30), 3));
    assert_eq!(observed[1], observed[0]);
}

#[tokio::test]
async fn sibling_branches_resume_in_place() {
    let artifact = common::compile(common::branches());
    let cases = [
        (true, 3, 6),
        (false, 3, 7),
        (true, 0, 5),
        (false, 20, 20),
    ];
    for (c, n, expected) in cases {
        let calls = Arc::new(AtomicI32::new(0));
        let registry = answer_get(&artifact, 5, calls.clone());
        let value = run(&artifact, registry, "pick", &[Value::Bool(c), Value::Int(n)]).await;
        assert_eq!(value, Value::Int(expected), "pick({c}, {n})");
        let expected_calls = if n > 10 { 0 } else { 1 };
        assert_eq!(calls.load(Ordering::SeqCst), expected_calls, "pick({c}, {n})");
    }
}

#[tokio::test]
async fn closures_and_pure_function_values() {
    // (1 + base) + 7 + 7
    let artifact = common::compile(common::closures());
    let value = run(&artifact, HandlerRegistry::new(), "main", &[Value::Int(10)]).await;
    assert_eq!(value, Value::Int(25));
}

#[tokio::test]
async fn fn_clauses_and_host_payloads() {
    let artifact = common::compile(common::counter());
    let log = artifact.operation("Counter.log").expect("Counter.log");
    let mut registry = HandlerRegistry::new();
    registry.register(
        log.effect,
        log.op,
        Signature::new([ValueKind::Float, ValueKind::Int], ValueKind::Int),
        |payload: Vec<Value>, tail: Tail| async move {
            match payload.as_slice() {
                [Value::Float(scale), Value::Int(n)] => {
                    Ok(tail.resume(Value::Int((scale * f64::from(*n) * 100.0) as i32)))
                }
                other => Err(HandlerError::new(format!("unexpected payload {other:?}"))),
            }
        },
    );
    // 10 + 20 + 150
    let value = run(&artifact, registry, "main", &[]).await;
    assert_eq!(value, Value::Int(180));
}

#[tokio::test]
async fn unrelated_handlers_are_transparent() {
    let artifact = common::compile(common::outer_handlers());
    for export in ["f", "unrelated", "forward"] {
        let calls = Arc::new(AtomicI32::new(0));
        let registry = answer_get(&artifact, 41, calls.clone());
        let value = run(&artifact, registry, export, &[]).await;
        assert_eq!(value, Value::Int(42), "{export}");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "{export}");
    }
}

#[tokio::test]
async fn clause_without_resume_aborts_the_body() {
    let artifact = common::compile(common::outer_handlers());
    let value = run(&artifact, HandlerRegistry::new(), "abort", &[]).await;
    assert_eq!(value, Value::Int(7));
}

#[tokio::test]
async fn host_handler_that_never_resumes_stays_pending() {
    let artifact = common::compile(common::ask());
    let get = artifact.operation("Ask.get").expect("Ask.get");
    let mut registry = HandlerRegistry::new();
    registry.register(
        get.effect,
        get.op,
        Signature::new([], ValueKind::Int),
        |_: Vec<Value>, _: Tail| std::future::pending::<Result<Resume, HandlerError>>(),
    );
    let run = run_export(&artifact, registry, "f", &[]);
    let outcome = tokio::time::timeout(Duration::from_millis(200), run).await;
    assert!(outcome.is_err(), "run finished without a resume");
}

#[tokio::test]
async fn fn_clause_operations_skip_their_own_handler() {
    let artifact = common::compile(common::escaping_fn_clause());
    let calls = Arc::new(AtomicI32::new(0));
    let registry = answer_get(&artifact, 5, calls.clone());
    let value = run(&artifact, registry, "inner", &[]).await;
    assert_eq!(value, Value::Int(11));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let value = run(&artifact, HandlerRegistry::new(), "outer", &[]).await;
    assert_eq!(value, Value::Int(41));
}

#[tokio::test]
async fn second_resume_in_a_clause_traps() {
    let artifact = common::compile(common::double_resume());
    let result = run_export(&artifact, HandlerRegistry::new(), "twice", &[]).await;
    assert!(result.is_err(), "second resume returned {result:?}");
}

fn call_i32(instance: &mut WasmtimeInstance, export: &str, args: &[RawValue]) -> i32 {
    instance
        .call(export, args)
        .unwrap_or_else(|err| panic!("{export} failed: {err}"))
        .and_then(RawValue::as_i32)
        .unwrap_or_else(|| panic!("{export} returned no i32"))
}

#[test]
fn stale_resume_token_traps() {
    let artifact = common::compile(common::counting_loop());
    let mut instance = WasmtimeInstance::new(&artifact.bytes).unwrap();
    let step = start(&mut instance, "count", &[]).unwrap();
    assert!(matches!(step, Step::Suspended(_)));

    let first = call_i32(&mut instance, EXPORT_EFFECT_CONT, &[]);
    let buffer = call_i32(&mut instance, EXPORT_EFFECT_BUFFER, &[]) as u32;
    instance
        .write_memory(buffer, &Value::Int(10).encode_slot())
        .unwrap();
    let status = call_i32(&mut instance, EXPORT_RESUME_EFFECTFUL, &[RawValue::I32(first)]);
    assert_eq!(status, STATUS_SUSPENDED);
    assert_eq!(call_i32(&mut instance, EXPORT_EFFECT_STATUS, &[]), STATUS_SUSPENDED);
    let second = call_i32(&mut instance, EXPORT_EFFECT_CONT, &[]);
    assert_ne!(first, second);

    let stale = instance.call(EXPORT_RESUME_EFFECTFUL, &[RawValue::I32(first)]);
    assert!(stale.is_err(), "stale token resumed: {stale:?}");
}

#[test]
fn resume_token_is_spent_after_completion() {
    let artifact = common::compile(common::ask());
    let mut instance = WasmtimeInstance::new(&artifact.bytes).unwrap();
    let step = start(&mut instance, "f", &[]).unwrap();
    assert!(matches!(step, Step::Suspended(_)));

    let token = call_i32(&mut instance, EXPORT_EFFECT_CONT, &[]);
    let buffer = call_i32(&mut instance, EXPORT_EFFECT_BUFFER, &[]) as u32;
    instance
        .write_memory(buffer, &Value::Int(9).encode_slot())
        .unwrap();
    let status = call_i32(&mut instance, EXPORT_RESUME_EFFECTFUL, &[RawValue::I32(token)]);
    assert_eq!(status, STATUS_DONE);

    let again = instance.call(EXPORT_RESUME_EFFECTFUL, &[RawValue::I32(token)]);
    assert!(again.is_err(), "spent token resumed: {again:?}");
}
