//! Generated runtime of the outcome protocol.
//!
//! Effectful functions return an `Outcome`. A suspended outcome carries the
//! chain of continuation frames built by every caller it passed through, the
//! pending operation handle and its boxed arguments. The helpers below build
//! outcomes, dispatch suspended ones to handler frames and drive a chain of
//! continuation frames back to completion.
//!
//! Clause kinds in a frame: 0 is `ctl`, 1 is `fn`.

use wasm_encoder::{BlockType, HeapType, Instruction, ValType};

use crate::errors::CompilationResult;
use crate::function_builder::FunctionBuilder;
use crate::gc_types::{
    ANY_HEAP, ANYREF, CLAUSE_FN_IDX, CLOSURE_ARRAY_IDX, CLOSURE_ENV_FIELD, CLOSURE_FUNC_FIELD,
    CLOSURE_IDX, CLOSURE_REF, CONT_ENV_FIELD, CONT_FN_FIELD, CONT_FN_IDX, CONT_IDX,
    CONT_INNER_FIELD, CONT_REF, ENV_BASE_REF, FRAME_CLAUSES_FIELD, FRAME_IDX, FRAME_KINDS_FIELD,
    FRAME_OPS_FIELD, FRAME_OUTER_FIELD, FRAME_REF, I32_ARRAY_IDX, OUTCOME_CONT_FIELD, OUTCOME_IDX,
    OUTCOME_OP_FIELD, OUTCOME_PAYLOAD_FIELD, OUTCOME_REF, OUTCOME_SKIP_FIELD, OUTCOME_TAG_FIELD,
    OUTCOME_VALUE_FIELD,
    REHANDLE_ENV_IDX, REHANDLE_FRAME_FIELD, REHANDLE_INNER_FIELD, RESUMPTION_CONT_FIELD,
    RESUMPTION_FRAME_FIELD, RESUMPTION_IDX, RESUMPTION_REF, nullable,
};
use crate::module_builder::ModuleBuilder;

pub const TAG_DONE: i32 = 0;
pub const TAG_SUSPENDED: i32 = 1;

pub const CLAUSE_CTL: i32 = 0;
pub const CLAUSE_FN: i32 = 1;

/// Function indices of the runtime helpers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeFns {
    /// `(value: anyref) -> Outcome`
    pub done: u32,
    /// `(op: i32, payload: anyref) -> Outcome`, a leaf suspension.
    pub suspend: u32,
    /// `(Outcome) -> anyref`; traps on a suspended outcome.
    pub expect_done: u32,
    /// `(Cont, anyref) -> Outcome`
    pub resume_cont: u32,
    /// `(Frame, op: i32, kind: i32) -> i32`, clause index or -1.
    pub find_clause: u32,
    /// `(Outcome, Frame) -> Outcome`, handler dispatch after a body returns.
    pub handle: u32,
    /// Continuation function that re-enters a handler after a resumption.
    pub rehandle: u32,
    /// `(Outcome, Frame) -> Outcome`, marks a suspension leaving an `fn`
    /// clause installed by the frame.
    pub skip_frame: u32,
    /// Continuation function that marks the installing frame again after a
    /// resumption.
    pub reskip: u32,
    /// `(Resumption, anyref) -> Outcome`
    pub resume_with: u32,
    /// `(Frame, op: i32, payload: anyref) -> Outcome`, dispatch of `fn` operations.
    pub perform: u32,
}

impl RuntimeFns {
    pub fn declare(module: &mut ModuleBuilder) -> Self {
        let mut declare = |name: &str, params: &[ValType], results: &[ValType]| {
            let ty = module.types.intern_func(params, results);
            module.declare_function(format!("rt${name}"), ty)
        };
        Self {
            done: declare("done", &[ANYREF], &[OUTCOME_REF]),
            suspend: declare("suspend", &[ValType::I32, ANYREF], &[OUTCOME_REF]),
            expect_done: declare("expect_done", &[OUTCOME_REF], &[ANYREF]),
            resume_cont: declare("resume_cont", &[CONT_REF, ANYREF], &[OUTCOME_REF]),
            find_clause: declare(
                "find_clause",
                &[FRAME_REF, ValType::I32, ValType::I32],
                &[ValType::I32],
            ),
            handle: declare("handle", &[OUTCOME_REF, FRAME_REF], &[OUTCOME_REF]),
            rehandle: declare("rehandle", &[ENV_BASE_REF, ANYREF], &[OUTCOME_REF]),
            skip_frame: declare("skip_frame", &[OUTCOME_REF, FRAME_REF], &[OUTCOME_REF]),
            reskip: declare("reskip", &[ENV_BASE_REF, ANYREF], &[OUTCOME_REF]),
            resume_with: declare("resume_with", &[RESUMPTION_REF, ANYREF], &[OUTCOME_REF]),
            perform: declare("perform", &[FRAME_REF, ValType::I32, ANYREF], &[OUTCOME_REF]),
        }
    }

    pub fn define(&self, module: &mut ModuleBuilder) -> CompilationResult<()> {
        module.define_function(self.done, self.emit_done())?;
        module.define_function(self.suspend, self.emit_suspend())?;
        module.define_function(self.expect_done, self.emit_expect_done())?;
        module.define_function(self.resume_cont, self.emit_resume_cont())?;
        module.define_function(self.find_clause, self.emit_find_clause())?;
        module.declare_ref(self.rehandle);
        module.declare_ref(self.reskip);
        module.define_function(self.handle, self.emit_handle())?;
        module.define_function(self.rehandle, self.emit_rehandle())?;
        module.define_function(self.skip_frame, self.emit_skip_frame())?;
        module.define_function(self.reskip, self.emit_reskip())?;
        module.define_function(self.resume_with, self.emit_resume_with())?;
        module.define_function(self.perform, self.emit_perform())?;
        Ok(())
    }

    fn emit_done(&self) -> wasm_encoder::Function {
        let mut fb = FunctionBuilder::new(&[ANYREF]);
        fb.i32_const(TAG_DONE);
        fb.local_get(0);
        fb.emit(Instruction::RefNull(HeapType::Concrete(CONT_IDX)));
        fb.i32_const(0);
        fb.emit(Instruction::RefNull(ANY_HEAP));
        fb.emit(Instruction::RefNull(HeapType::Concrete(FRAME_IDX)));
        fb.emit(Instruction::StructNew(OUTCOME_IDX));
        fb.finish()
    }

    fn emit_suspend(&self) -> wasm_encoder::Function {
        let mut fb = FunctionBuilder::new(&[ValType::I32, ANYREF]);
        fb.i32_const(TAG_SUSPENDED);
        fb.emit(Instruction::RefNull(ANY_HEAP));
        fb.emit(Instruction::RefNull(HeapType::Concrete(CONT_IDX)));
        fb.local_get(0);
        fb.local_get(1);
        fb.emit(Instruction::RefNull(HeapType::Concrete(FRAME_IDX)));
        fb.emit(Instruction::StructNew(OUTCOME_IDX));
        fb.finish()
    }

    fn emit_expect_done(&self) -> wasm_encoder::Function {
        let mut fb = FunctionBuilder::new(&[OUTCOME_REF]);
        fb.local_get(0);
        fb.struct_get(OUTCOME_IDX, OUTCOME_TAG_FIELD);
        fb.if_(BlockType::Empty);
        // An effect escaped through a pure signature.
        fb.emit(Instruction::Unreachable);
        fb.end();
        fb.local_get(0);
        fb.struct_get(OUTCOME_IDX, OUTCOME_VALUE_FIELD);
        fb.finish()
    }

    /// Resumes the innermost frame first. When it completes, its value flows
    /// into the frame around it; when it suspends again, the frame around it
    /// is rebuilt on top of the new inner continuation.
    fn emit_resume_cont(&self) -> wasm_encoder::Function {
        const C: u32 = 0;
        const V: u32 = 1;
        let mut fb = FunctionBuilder::new(&[CONT_REF, ANYREF]);
        let r = fb.local(OUTCOME_REF);

        fb.local_get(C);
        fb.emit(Instruction::RefIsNull);
        fb.if_(BlockType::Empty);
        fb.local_get(V);
        fb.emit(Instruction::ReturnCall(self.done));
        fb.end();

        fb.local_get(C);
        fb.struct_get(CONT_IDX, CONT_INNER_FIELD);
        fb.emit(Instruction::RefIsNull);
        fb.if_(BlockType::Empty);
        fb.local_get(C);
        fb.struct_get(CONT_IDX, CONT_ENV_FIELD);
        fb.local_get(V);
        fb.local_get(C);
        fb.struct_get(CONT_IDX, CONT_FN_FIELD);
        fb.emit(Instruction::ReturnCallRef(CONT_FN_IDX));
        fb.end();

        fb.local_get(C);
        fb.struct_get(CONT_IDX, CONT_INNER_FIELD);
        fb.local_get(V);
        fb.emit(Instruction::Call(self.resume_cont));
        fb.emit(Instruction::LocalTee(r));
        fb.struct_get(OUTCOME_IDX, OUTCOME_TAG_FIELD);
        fb.emit(Instruction::I32Eqz);
        fb.if_(BlockType::Empty);
        fb.local_get(C);
        fb.struct_get(CONT_IDX, CONT_ENV_FIELD);
        fb.local_get(r);
        fb.struct_get(OUTCOME_IDX, OUTCOME_VALUE_FIELD);
        fb.local_get(C);
        fb.struct_get(CONT_IDX, CONT_FN_FIELD);
        fb.emit(Instruction::ReturnCallRef(CONT_FN_IDX));
        fb.end();

        fb.i32_const(TAG_SUSPENDED);
        fb.emit(Instruction::RefNull(ANY_HEAP));
        fb.local_get(C);
        fb.struct_get(CONT_IDX, CONT_FN_FIELD);
        fb.local_get(C);
        fb.struct_get(CONT_IDX, CONT_ENV_FIELD);
        fb.local_get(r);
        fb.struct_get(OUTCOME_IDX, OUTCOME_CONT_FIELD);
        fb.emit(Instruction::StructNew(CONT_IDX));
        fb.local_get(r);
        fb.struct_get(OUTCOME_IDX, OUTCOME_OP_FIELD);
        fb.local_get(r);
        fb.struct_get(OUTCOME_IDX, OUTCOME_PAYLOAD_FIELD);
        fb.local_get(r);
        fb.struct_get(OUTCOME_IDX, OUTCOME_SKIP_FIELD);
        fb.emit(Instruction::StructNew(OUTCOME_IDX));
        fb.finish()
    }

    fn emit_find_clause(&self) -> wasm_encoder::Function {
        const F: u32 = 0;
        const OP: u32 = 1;
        const KIND: u32 = 2;
        let mut fb = FunctionBuilder::new(&[FRAME_REF, ValType::I32, ValType::I32]);
        let i = fb.local(ValType::I32);
        let n = fb.local(ValType::I32);

        fb.local_get(F);
        fb.struct_get(FRAME_IDX, FRAME_OPS_FIELD);
        fb.emit(Instruction::ArrayLen);
        fb.local_set(n);

        let exit = fb.block(BlockType::Empty);
        let top = fb.loop_(BlockType::Empty);
        fb.local_get(i);
        fb.local_get(n);
        fb.emit(Instruction::I32GeU);
        fb.br_if(exit);

        fb.local_get(F);
        fb.struct_get(FRAME_IDX, FRAME_OPS_FIELD);
        fb.local_get(i);
        fb.emit(Instruction::ArrayGet(I32_ARRAY_IDX));
        fb.local_get(OP);
        fb.emit(Instruction::I32Eq);
        fb.local_get(F);
        fb.struct_get(FRAME_IDX, FRAME_KINDS_FIELD);
        fb.local_get(i);
        fb.emit(Instruction::ArrayGet(I32_ARRAY_IDX));
        fb.local_get(KIND);
        fb.emit(Instruction::I32Eq);
        fb.emit(Instruction::I32And);
        fb.if_(BlockType::Empty);
        fb.local_get(i);
        fb.emit(Instruction::Return);
        fb.end();

        fb.local_get(i);
        fb.i32_const(1);
        fb.emit(Instruction::I32Add);
        fb.local_set(i);
        fb.br(top);
        fb.end();
        fb.end();
        fb.i32_const(-1);
        fb.finish()
    }

    /// Pushes `clause.env, frame.outer, payload` followed by `resumption`,
    /// then tail-calls the clause stored in `closure`.
    fn tail_call_clause(fb: &mut FunctionBuilder, closure: u32) {
        fb.local_get(closure);
        fb.struct_get(CLOSURE_IDX, CLOSURE_FUNC_FIELD);
        fb.emit(Instruction::RefCastNonNull(HeapType::Concrete(CLAUSE_FN_IDX)));
        fb.emit(Instruction::ReturnCallRef(CLAUSE_FN_IDX));
    }

    fn emit_handle(&self) -> wasm_encoder::Function {
        const R: u32 = 0;
        const F: u32 = 1;
        let mut fb = FunctionBuilder::new(&[OUTCOME_REF, FRAME_REF]);
        let i = fb.local(ValType::I32);
        let clause = fb.local(CLOSURE_REF);
        let skip = fb.local(FRAME_REF);

        fb.local_get(R);
        fb.struct_get(OUTCOME_IDX, OUTCOME_TAG_FIELD);
        fb.emit(Instruction::I32Eqz);
        fb.if_(BlockType::Empty);
        fb.local_get(R);
        fb.emit(Instruction::Return);
        fb.end();

        // Out of an `fn` clause: this frame is the installing one or sits
        // inside it, so it must not catch the operation.
        fb.local_get(R);
        fb.struct_get(OUTCOME_IDX, OUTCOME_SKIP_FIELD);
        fb.emit(Instruction::RefIsNull);
        fb.emit(Instruction::I32Eqz);
        fb.if_(BlockType::Empty);
        fb.local_get(R);
        fb.struct_get(OUTCOME_IDX, OUTCOME_SKIP_FIELD);
        fb.local_get(F);
        fb.emit(Instruction::RefEq);
        fb.emit(Instruction::I32Eqz);
        fb.if_(BlockType::Empty);
        fb.local_get(R);
        fb.struct_get(OUTCOME_IDX, OUTCOME_SKIP_FIELD);
        fb.local_set(skip);
        fb.end();
        Self::wrap_suspended(&mut fb, self.rehandle, R, F, skip);
        fb.emit(Instruction::Return);
        fb.end();

        fb.local_get(F);
        fb.local_get(R);
        fb.struct_get(OUTCOME_IDX, OUTCOME_OP_FIELD);
        fb.i32_const(CLAUSE_CTL);
        fb.emit(Instruction::Call(self.find_clause));
        fb.emit(Instruction::LocalTee(i));
        fb.i32_const(0);
        fb.emit(Instruction::I32GeS);
        fb.if_(BlockType::Empty);
        fb.local_get(F);
        fb.struct_get(FRAME_IDX, FRAME_CLAUSES_FIELD);
        fb.local_get(i);
        fb.emit(Instruction::ArrayGet(CLOSURE_ARRAY_IDX));
        fb.local_set(clause);
        fb.local_get(clause);
        fb.struct_get(CLOSURE_IDX, CLOSURE_ENV_FIELD);
        fb.local_get(F);
        fb.struct_get(FRAME_IDX, FRAME_OUTER_FIELD);
        fb.local_get(R);
        fb.struct_get(OUTCOME_IDX, OUTCOME_PAYLOAD_FIELD);
        fb.local_get(R);
        fb.struct_get(OUTCOME_IDX, OUTCOME_CONT_FIELD);
        fb.local_get(F);
        fb.emit(Instruction::StructNew(RESUMPTION_IDX));
        Self::tail_call_clause(&mut fb, clause);
        fb.end();

        // Not ours: pass it outwards, re-entering this frame on resumption.
        Self::wrap_suspended(&mut fb, self.rehandle, R, F, skip);
        fb.finish()
    }

    /// Rebuilds the suspended outcome in local `r` on top of a continuation
    /// frame that runs `resume` with the frame in local `frame`. The new
    /// outcome carries the frame in local `skip`.
    fn wrap_suspended(fb: &mut FunctionBuilder, resume: u32, r: u32, frame: u32, skip: u32) {
        fb.i32_const(TAG_SUSPENDED);
        fb.emit(Instruction::RefNull(ANY_HEAP));
        fb.emit(Instruction::RefFunc(resume));
        fb.i32_const(0);
        fb.emit(Instruction::RefNull(HeapType::Concrete(FRAME_IDX)));
        fb.local_get(r);
        fb.struct_get(OUTCOME_IDX, OUTCOME_CONT_FIELD);
        fb.local_get(frame);
        fb.emit(Instruction::StructNew(REHANDLE_ENV_IDX));
        fb.emit(Instruction::RefNull(HeapType::Concrete(CONT_IDX)));
        fb.emit(Instruction::StructNew(CONT_IDX));
        fb.local_get(r);
        fb.struct_get(OUTCOME_IDX, OUTCOME_OP_FIELD);
        fb.local_get(r);
        fb.struct_get(OUTCOME_IDX, OUTCOME_PAYLOAD_FIELD);
        fb.local_get(skip);
        fb.emit(Instruction::StructNew(OUTCOME_IDX));
    }

    /// An `fn` clause runs under the frames outside the one that installed
    /// it. A suspension leaving the clause is marked with that frame so the
    /// frame and everything inside it pass it on. A mark left by a nested
    /// `fn` clause already names a frame further out and is kept.
    fn emit_skip_frame(&self) -> wasm_encoder::Function {
        const R: u32 = 0;
        const F: u32 = 1;
        let mut fb = FunctionBuilder::new(&[OUTCOME_REF, FRAME_REF]);
        let skip = fb.local(FRAME_REF);

        fb.local_get(R);
        fb.struct_get(OUTCOME_IDX, OUTCOME_TAG_FIELD);
        fb.emit(Instruction::I32Eqz);
        fb.if_(BlockType::Empty);
        fb.local_get(R);
        fb.emit(Instruction::Return);
        fb.end();

        fb.local_get(R);
        fb.struct_get(OUTCOME_IDX, OUTCOME_SKIP_FIELD);
        fb.emit(Instruction::LocalTee(skip));
        fb.emit(Instruction::RefIsNull);
        fb.if_(BlockType::Empty);
        fb.local_get(F);
        fb.local_set(skip);
        fb.end();

        Self::wrap_suspended(&mut fb, self.reskip, R, F, skip);
        fb.finish()
    }

    fn emit_reskip(&self) -> wasm_encoder::Function {
        let mut fb = FunctionBuilder::new(&[ENV_BASE_REF, ANYREF]);
        let env = fb.local(nullable(REHANDLE_ENV_IDX));
        fb.local_get(0);
        fb.emit(Instruction::RefCastNonNull(HeapType::Concrete(REHANDLE_ENV_IDX)));
        fb.emit(Instruction::LocalTee(env));
        fb.struct_get(REHANDLE_ENV_IDX, REHANDLE_INNER_FIELD);
        fb.local_get(1);
        fb.emit(Instruction::Call(self.resume_cont));
        fb.local_get(env);
        fb.struct_get(REHANDLE_ENV_IDX, REHANDLE_FRAME_FIELD);
        fb.emit(Instruction::ReturnCall(self.skip_frame));
        fb.finish()
    }

    fn emit_rehandle(&self) -> wasm_encoder::Function {
        let mut fb = FunctionBuilder::new(&[ENV_BASE_REF, ANYREF]);
        let env = fb.local(nullable(REHANDLE_ENV_IDX));
        fb.local_get(0);
        fb.emit(Instruction::RefCastNonNull(HeapType::Concrete(REHANDLE_ENV_IDX)));
        fb.emit(Instruction::LocalTee(env));
        fb.struct_get(REHANDLE_ENV_IDX, REHANDLE_INNER_FIELD);
        fb.local_get(1);
        fb.emit(Instruction::Call(self.resume_cont));
        fb.local_get(env);
        fb.struct_get(REHANDLE_ENV_IDX, REHANDLE_FRAME_FIELD);
        fb.emit(Instruction::ReturnCall(self.handle));
        fb.finish()
    }

    fn emit_resume_with(&self) -> wasm_encoder::Function {
        let mut fb = FunctionBuilder::new(&[RESUMPTION_REF, ANYREF]);
        fb.local_get(0);
        fb.struct_get(RESUMPTION_IDX, RESUMPTION_CONT_FIELD);
        fb.local_get(1);
        fb.emit(Instruction::Call(self.resume_cont));
        fb.local_get(0);
        fb.struct_get(RESUMPTION_IDX, RESUMPTION_FRAME_FIELD);
        fb.emit(Instruction::ReturnCall(self.handle));
        fb.finish()
    }

    /// Calls the nearest `fn` clause for `op`, or suspends to the host.
    /// The clause runs with the installing frame's `outer` as its handler.
    fn emit_perform(&self) -> wasm_encoder::Function {
        const H: u32 = 0;
        const OP: u32 = 1;
        const PAYLOAD: u32 = 2;
        let mut fb = FunctionBuilder::new(&[FRAME_REF, ValType::I32, ANYREF]);
        let frame = fb.local(FRAME_REF);
        let i = fb.local(ValType::I32);
        let clause = fb.local(CLOSURE_REF);

        fb.local_get(H);
        fb.local_set(frame);
        let miss = fb.block(BlockType::Empty);
        let walk = fb.loop_(BlockType::Empty);
        fb.local_get(frame);
        fb.emit(Instruction::RefIsNull);
        fb.br_if(miss);

        fb.local_get(frame);
        fb.local_get(OP);
        fb.i32_const(CLAUSE_FN);
        fb.emit(Instruction::Call(self.find_clause));
        fb.emit(Instruction::LocalTee(i));
        fb.i32_const(0);
        fb.emit(Instruction::I32GeS);
        fb.if_(BlockType::Empty);
        fb.local_get(frame);
        fb.struct_get(FRAME_IDX, FRAME_CLAUSES_FIELD);
        fb.local_get(i);
        fb.emit(Instruction::ArrayGet(CLOSURE_ARRAY_IDX));
        fb.local_set(clause);
        fb.local_get(clause);
        fb.struct_get(CLOSURE_IDX, CLOSURE_ENV_FIELD);
        fb.local_get(frame);
        fb.struct_get(FRAME_IDX, FRAME_OUTER_FIELD);
        fb.local_get(PAYLOAD);
        fb.emit(Instruction::RefNull(HeapType::Concrete(RESUMPTION_IDX)));
        fb.local_get(clause);
        fb.struct_get(CLOSURE_IDX, CLOSURE_FUNC_FIELD);
        fb.emit(Instruction::RefCastNonNull(HeapType::Concrete(CLAUSE_FN_IDX)));
        fb.emit(Instruction::CallRef(CLAUSE_FN_IDX));
        fb.local_get(frame);
        fb.emit(Instruction::ReturnCall(self.skip_frame));
        fb.end();

        fb.local_get(frame);
        fb.struct_get(FRAME_IDX, FRAME_OUTER_FIELD);
        fb.local_set(frame);
        fb.br(walk);
        fb.end();
        fb.end();

        fb.local_get(OP);
        fb.local_get(PAYLOAD);
        fb.emit(Instruction::ReturnCall(self.suspend));
        fb.finish()
    }
}
