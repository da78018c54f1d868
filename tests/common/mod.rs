//! Sample programs shared by the integration tests.

#![allow(dead_code)]

use caldera::{CalderaDatabase, CompileOptions, ProgramSource, WasmArtifact, compile_wasm};
use caldera_hir::{
    BinaryOp, HirExpr, HirPattern, HirProgram, Literal, OperationRef, ProgramBuilder, ResumeKind,
};

pub fn compile(program: HirProgram) -> WasmArtifact {
    let db = CalderaDatabase::default();
    let source = ProgramSource::new(&db, program);
    compile_wasm(&db, source, CompileOptions::default())
        .clone()
        .expect("compilation failed")
}

/// ```text
/// f() = perform get() + 1
/// main() = handle { f() } with get() -> resume(41)
/// ```
pub fn ask() -> HirProgram {
    let mut b = ProgramBuilder::new("ask");
    let int = b.int();
    let ask = b.effect("Ask");
    let get = b.operation(ask, "get", &[], int, ResumeKind::Ctl);
    let f = b.declare_function("f", &[], int, &[ask]);
    let perform = b.perform(get, vec![]);
    let one = b.int_lit(1);
    let body = b.binary(BinaryOp::Add, perform, one);
    b.define_function(f, vec![], body, true);

    let main = b.declare_function("main", &[], int, &[]);
    let call = b.call_fn(f, vec![]);
    let answer = b.int_lit(41);
    let resume = b.resume(answer, int);
    let clause = b.clause(get, vec![], resume);
    let handle = b.handle(call, vec![clause]);
    b.define_function(main, vec![], handle, true);
    b.finish()
}

/// ```text
/// count() = { let i = 0; let acc = 0; while i < 3 { acc = acc + perform get(); i = i + 1 }; acc }
/// ```
pub fn counting_loop() -> HirProgram {
    let mut b = ProgramBuilder::new("counting");
    let int = b.int();
    let ask = b.effect("Ask");
    let get = b.operation(ask, "get", &[], int, ResumeKind::Ctl);
    let count = b.declare_function("count", &[], int, &[ask]);
    let body = counting_body(&mut b, get);
    b.define_function(count, vec![], body, true);
    b.finish()
}

/// [`counting_loop`] inside a handler that forwards every `get` outwards.
///
/// ```text
/// count() = handle { <counting loop> } with get() -> resume(perform get())
/// ```
pub fn identity_loop() -> HirProgram {
    let mut b = ProgramBuilder::new("identity");
    let int = b.int();
    let ask = b.effect("Ask");
    let get = b.operation(ask, "get", &[], int, ResumeKind::Ctl);
    let count = b.declare_function("count", &[], int, &[ask]);
    let body = counting_body(&mut b, get);
    let outer = b.perform(get, vec![]);
    let resume = b.resume(outer, int);
    let clause = b.clause(get, vec![], resume);
    let handle = b.handle(body, vec![clause]);
    b.define_function(count, vec![], handle, true);
    b.finish()
}

fn counting_body(b: &mut ProgramBuilder, get: OperationRef) -> HirExpr {
    let int = b.int();
    let i = b.symbol("i", int);
    let acc = b.symbol("acc", int);

    let zero = b.int_lit(0);
    let let_i = b.let_stmt(i, zero);
    let zero = b.int_lit(0);
    let let_acc = b.let_stmt(acc, zero);

    let i_ref = b.ident(i);
    let three = b.int_lit(3);
    let cond = b.binary(BinaryOp::Lt, i_ref, three);
    let acc_ref = b.ident(acc);
    let perform = b.perform(get, vec![]);
    let sum = b.binary(BinaryOp::Add, acc_ref, perform);
    let set_acc = b.assign(acc, sum);
    let set_acc = b.expr_stmt(set_acc);
    let i_ref = b.ident(i);
    let one = b.int_lit(1);
    let next = b.binary(BinaryOp::Add, i_ref, one);
    let set_i = b.assign(i, next);
    let set_i = b.expr_stmt(set_i);
    let body = b.block(vec![set_acc, set_i], None);
    let while_loop = b.while_expr(None, cond, body);
    let while_loop = b.expr_stmt(while_loop);
    let acc_ref = b.ident(acc);
    b.block(vec![let_i, let_acc, while_loop], Some(acc_ref))
}

/// ```text
/// pick(c, n) = match n {
///     0 => perform get(),
///     x if x > 10 => x,
///     _ => if c { perform get() + 1 } else { perform get() + 2 },
/// }
/// ```
pub fn branches() -> HirProgram {
    let mut b = ProgramBuilder::new("branches");
    let int = b.int();
    let bool_ty = b.bool();
    let ask = b.effect("Ask");
    let get = b.operation(ask, "get", &[], int, ResumeKind::Ctl);
    let pick = b.declare_function("pick", &[bool_ty, int], int, &[ask]);
    let c = b.symbol("c", bool_ty);
    let n = b.symbol("n", int);
    let x = b.symbol("x", int);

    let cond = b.ident(c);
    let p0 = b.perform(get, vec![]);
    let one = b.int_lit(1);
    let then_branch = b.binary(BinaryOp::Add, p0, one);
    let p1 = b.perform(get, vec![]);
    let two = b.int_lit(2);
    let else_branch = b.binary(BinaryOp::Add, p1, two);
    let if_expr = b.if_expr(cond, then_branch, Some(else_branch));

    let scrutinee = b.ident(n);
    let p2 = b.perform(get, vec![]);
    let zero = HirPattern::Literal {
        value: Literal::Int(0),
    };
    let first = b.arm(zero, None, p2);
    let x_ref = b.ident(x);
    let ten = b.int_lit(10);
    let guard = b.binary(BinaryOp::Gt, x_ref, ten);
    let x_ref = b.ident(x);
    let second = b.arm(HirPattern::Bind { symbol: x }, Some(guard), x_ref);
    let third = b.arm(HirPattern::Wildcard, None, if_expr);
    let body = b.match_expr(scrutinee, vec![first, second, third]);
    b.define_function(pick, vec![c, n], body, true);
    b.finish()
}

/// ```text
/// apply(f) = f()
/// seven() = 7
/// main(base) = handle { apply(() => perform get() + base) + apply(seven) + apply(seven) }
///              with get() -> resume(1)
/// ```
pub fn closures() -> HirProgram {
    let mut b = ProgramBuilder::new("closures");
    let int = b.int();
    let ask = b.effect("Ask");
    let get = b.operation(ask, "get", &[], int, ResumeKind::Ctl);
    let thunk = b.func_ty(&[], int, &[ask]);

    let apply = b.declare_function("apply", &[thunk], int, &[ask]);
    let f = b.symbol("f", thunk);
    let f_ref = b.ident(f);
    let body = b.call(f_ref, vec![]);
    b.define_function(apply, vec![f], body, false);

    let seven = b.declare_function("seven", &[], int, &[]);
    let lit = b.int_lit(7);
    b.define_function(seven, vec![], lit, false);

    let main = b.declare_function("main", &[int], int, &[]);
    let base = b.symbol("base", int);
    let perform = b.perform(get, vec![]);
    let base_ref = b.ident(base);
    let lambda_body = b.binary(BinaryOp::Add, perform, base_ref);
    let lambda = b.lambda(vec![], lambda_body, &[ask]);
    let first = b.call_fn(apply, vec![lambda]);
    let seven_ref = b.ident(seven);
    let second = b.call_fn(apply, vec![seven_ref]);
    let seven_ref = b.ident(seven);
    let third = b.call_fn(apply, vec![seven_ref]);
    let sum = b.binary(BinaryOp::Add, first, second);
    let body = b.binary(BinaryOp::Add, sum, third);
    let one = b.int_lit(1);
    let resume = b.resume(one, int);
    let clause = b.clause(get, vec![], resume);
    let handle = b.handle(body, vec![clause]);
    b.define_function(main, vec![base], handle, true);
    b.finish()
}

/// ```text
/// main() = handle { perform tick(1) + perform tick(2) + perform log(0.5, 3) }
///          with fn tick(x) -> resume(x * 10)
/// ```
pub fn counter() -> HirProgram {
    let mut b = ProgramBuilder::new("counter");
    let int = b.int();
    let float = b.float();
    let counter = b.effect("Counter");
    let tick = b.operation(counter, "tick", &[int], int, ResumeKind::Fn);
    let log = b.operation(counter, "log", &[float, int], int, ResumeKind::Ctl);

    let main = b.declare_function("main", &[], int, &[counter]);
    let x = b.symbol("x", int);
    let one = b.int_lit(1);
    let p0 = b.perform(tick, vec![one]);
    let two = b.int_lit(2);
    let p1 = b.perform(tick, vec![two]);
    let sum = b.binary(BinaryOp::Add, p0, p1);
    let half = b.lit(Literal::Float(0.5));
    let three = b.int_lit(3);
    let p2 = b.perform(log, vec![half, three]);
    let body = b.binary(BinaryOp::Add, sum, p2);
    let x_ref = b.ident(x);
    let ten = b.int_lit(10);
    let scaled = b.binary(BinaryOp::Mul, x_ref, ten);
    let resume = b.resume(scaled, int);
    let clause = b.clause(tick, vec![x], resume);
    let handle = b.handle(body, vec![clause]);
    b.define_function(main, vec![], handle, true);
    b.finish()
}

/// Handlers around `f() = perform get() + 1` that do not answer `get`
/// themselves.
///
/// ```text
/// unrelated() = handle { f() } with other() -> resume(0)
/// forward() = handle { f() } with get() -> resume(perform get())
/// abort() = handle { f() } with get() -> 7
/// ```
pub fn outer_handlers() -> HirProgram {
    let mut b = ProgramBuilder::new("outer");
    let int = b.int();
    let ask = b.effect("Ask");
    let get = b.operation(ask, "get", &[], int, ResumeKind::Ctl);
    let other_effect = b.effect("Other");
    let other = b.operation(other_effect, "other", &[], int, ResumeKind::Ctl);

    let f = b.declare_function("f", &[], int, &[ask]);
    let perform = b.perform(get, vec![]);
    let one = b.int_lit(1);
    let body = b.binary(BinaryOp::Add, perform, one);
    b.define_function(f, vec![], body, true);

    let unrelated = b.declare_function("unrelated", &[], int, &[ask]);
    let call = b.call_fn(f, vec![]);
    let zero = b.int_lit(0);
    let resume = b.resume(zero, int);
    let clause = b.clause(other, vec![], resume);
    let handle = b.handle(call, vec![clause]);
    b.define_function(unrelated, vec![], handle, true);

    let forward = b.declare_function("forward", &[], int, &[ask]);
    let call = b.call_fn(f, vec![]);
    let outer = b.perform(get, vec![]);
    let resume = b.resume(outer, int);
    let clause = b.clause(get, vec![], resume);
    let handle = b.handle(call, vec![clause]);
    b.define_function(forward, vec![], handle, true);

    let abort = b.declare_function("abort", &[], int, &[]);
    let call = b.call_fn(f, vec![]);
    let seven = b.int_lit(7);
    let clause = b.clause(get, vec![], seven);
    let handle = b.handle(call, vec![clause]);
    b.define_function(abort, vec![], handle, true);
    b.finish()
}

/// A `ctl` clause that resumes twice.
///
/// ```text
/// twice() = handle { perform get() } with get() -> resume(1) + resume(2)
/// ```
pub fn double_resume() -> HirProgram {
    let mut b = ProgramBuilder::new("double");
    let int = b.int();
    let ask = b.effect("Ask");
    let get = b.operation(ask, "get", &[], int, ResumeKind::Ctl);
    let twice = b.declare_function("twice", &[], int, &[]);
    let body = b.perform(get, vec![]);
    let one = b.int_lit(1);
    let first = b.resume(one, int);
    let two = b.int_lit(2);
    let second = b.resume(two, int);
    let sum = b.binary(BinaryOp::Add, first, second);
    let clause = b.clause(get, vec![], sum);
    let handle = b.handle(body, vec![clause]);
    b.define_function(twice, vec![], handle, true);
    b.finish()
}

/// An `fn` clause performing an operation that its own handler also
/// covers. The clause runs outside that handler, so both `get`s go past it.
///
/// ```text
/// inner() = handle { perform find() + 1 }
///           with fn find() -> resume(perform get() + perform get())
///                get() -> resume(100)
/// outer() = handle { inner() } with get() -> resume(20)
/// ```
pub fn escaping_fn_clause() -> HirProgram {
    let mut b = ProgramBuilder::new("escaping");
    let int = b.int();
    let ask = b.effect("Ask");
    let get = b.operation(ask, "get", &[], int, ResumeKind::Ctl);
    let lookup = b.effect("Lookup");
    let find = b.operation(lookup, "find", &[], int, ResumeKind::Fn);

    let inner = b.declare_function("inner", &[], int, &[ask]);
    let perform = b.perform(find, vec![]);
    let one = b.int_lit(1);
    let body = b.binary(BinaryOp::Add, perform, one);
    let p0 = b.perform(get, vec![]);
    let p1 = b.perform(get, vec![]);
    let sum = b.binary(BinaryOp::Add, p0, p1);
    let resume = b.resume(sum, int);
    let find_clause = b.clause(find, vec![], resume);
    let hundred = b.int_lit(100);
    let resume = b.resume(hundred, int);
    let get_clause = b.clause(get, vec![], resume);
    let handle = b.handle(body, vec![find_clause, get_clause]);
    b.define_function(inner, vec![], handle, true);

    let outer = b.declare_function("outer", &[], int, &[]);
    let call = b.call_fn(inner, vec![]);
    let twenty = b.int_lit(20);
    let resume = b.resume(twenty, int);
    let clause = b.clause(get, vec![], resume);
    let handle = b.handle(call, vec![clause]);
    b.define_function(outer, vec![], handle, true);
    b.finish()
}
