//! Instruction buffer for one function body.
//!
//! Locals are allocated while the body is generated, so instructions are
//! buffered and the `Function` is only assembled once the local list is final.
//! Structured control instructions return a [`Label`] that `br`/`br_if` turn
//! into a relative depth.

use wasm_encoder::{BlockType, Function, Instruction, ValType};

/// Absolute nesting depth of a structured control instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Label(u32);

#[derive(Debug)]
pub struct FunctionBuilder {
    param_count: u32,
    locals: Vec<ValType>,
    instructions: Vec<Instruction<'static>>,
    depth: u32,
}

impl FunctionBuilder {
    pub fn new(params: &[ValType]) -> Self {
        Self {
            param_count: params.len() as u32,
            locals: Vec::new(),
            instructions: Vec::new(),
            depth: 0,
        }
    }

    pub fn local(&mut self, ty: ValType) -> u32 {
        let index = self.param_count + self.locals.len() as u32;
        self.locals.push(ty);
        index
    }

    pub fn emit(&mut self, instruction: Instruction<'static>) {
        self.instructions.push(instruction);
    }

    pub fn local_get(&mut self, index: u32) {
        self.emit(Instruction::LocalGet(index));
    }

    pub fn local_set(&mut self, index: u32) {
        self.emit(Instruction::LocalSet(index));
    }

    pub fn i32_const(&mut self, value: i32) {
        self.emit(Instruction::I32Const(value));
    }

    pub fn struct_get(&mut self, struct_type_index: u32, field_index: u32) {
        self.emit(Instruction::StructGet {
            struct_type_index,
            field_index,
        });
    }

    fn open(&mut self, instruction: Instruction<'static>) -> Label {
        self.emit(instruction);
        let label = Label(self.depth);
        self.depth += 1;
        label
    }

    pub fn block(&mut self, ty: BlockType) -> Label {
        self.open(Instruction::Block(ty))
    }

    pub fn loop_(&mut self, ty: BlockType) -> Label {
        self.open(Instruction::Loop(ty))
    }

    pub fn if_(&mut self, ty: BlockType) -> Label {
        self.open(Instruction::If(ty))
    }

    pub fn else_(&mut self) {
        self.emit(Instruction::Else);
    }

    pub fn end(&mut self) {
        self.emit(Instruction::End);
        self.depth = self.depth.saturating_sub(1);
    }

    fn relative(&self, label: Label) -> u32 {
        self.depth - 1 - label.0
    }

    pub fn br(&mut self, label: Label) {
        let depth = self.relative(label);
        self.emit(Instruction::Br(depth));
    }

    pub fn br_if(&mut self, label: Label) {
        let depth = self.relative(label);
        self.emit(Instruction::BrIf(depth));
    }

    /// Assembles the body and closes it with the final `end`.
    pub fn finish(self) -> Function {
        let mut function = Function::new(compress_locals(&self.locals));
        for instruction in &self.instructions {
            function.instruction(instruction);
        }
        function.instruction(&Instruction::End);
        function
    }
}

fn compress_locals(locals: &[ValType]) -> Vec<(u32, ValType)> {
    let mut compressed: Vec<(u32, ValType)> = Vec::new();
    for ty in locals {
        match compressed.last_mut() {
            Some((count, last)) if last == ty => *count += 1,
            _ => compressed.push((1, *ty)),
        }
    }
    compressed
}
