//! Section assembly for the emitted module.
//!
//! Functions are declared first, which fixes their index, and defined later,
//! so bodies can refer to functions that are generated afterwards.

use std::borrow::Cow;
use std::collections::BTreeSet;

use tracing::debug;
use wasm_encoder::{
    CodeSection, ConstExpr, DataSection, ElementSection, Elements, ExportKind, ExportSection,
    Function, FunctionSection, GlobalSection, GlobalType, MemorySection, MemoryType, Module,
    NameMap, NameSection, TypeSection, ValType,
};

use crate::errors::{CompilationError, CompilationResult};
use crate::gc_types::GcTypeRegistry;

struct FunctionSlot {
    name: String,
    type_idx: u32,
    body: Option<Function>,
}

struct GlobalDef {
    name: String,
    ty: ValType,
    init: ConstExpr,
}

#[derive(Default)]
pub struct ModuleBuilder {
    pub types: GcTypeRegistry,
    functions: Vec<FunctionSlot>,
    globals: Vec<GlobalDef>,
    exports: Vec<(String, ExportKind, u32)>,
    data: Vec<(u32, Vec<u8>)>,
    memory_pages: Option<u64>,
    ref_funcs: BTreeSet<u32>,
}

impl ModuleBuilder {
    pub fn declare_function(&mut self, name: impl Into<String>, type_idx: u32) -> u32 {
        let index = self.functions.len() as u32;
        self.functions.push(FunctionSlot {
            name: name.into(),
            type_idx,
            body: None,
        });
        index
    }

    pub fn define_function(&mut self, index: u32, body: Function) -> CompilationResult<()> {
        let slot = self
            .functions
            .get_mut(index as usize)
            .ok_or_else(|| CompilationError::internal(format!("function {index} was never declared")))?;
        if slot.body.is_some() {
            return Err(CompilationError::internal(format!(
                "function `{}` defined twice",
                slot.name
            )));
        }
        slot.body = Some(body);
        Ok(())
    }

    pub fn function_count(&self) -> u32 {
        self.functions.len() as u32
    }

    pub fn function_name(&self, index: u32) -> Option<&str> {
        self.functions.get(index as usize).map(|slot| slot.name.as_str())
    }

    /// Marks a function as the target of `ref.func`.
    pub fn declare_ref(&mut self, index: u32) {
        self.ref_funcs.insert(index);
    }

    pub fn add_global(&mut self, name: &str, ty: ValType, init: ConstExpr) -> u32 {
        let index = self.globals.len() as u32;
        self.globals.push(GlobalDef {
            name: name.to_owned(),
            ty,
            init,
        });
        index
    }

    pub fn export(&mut self, name: impl Into<String>, kind: ExportKind, index: u32) {
        self.exports.push((name.into(), kind, index));
    }

    pub fn set_memory(&mut self, pages: u64) {
        self.memory_pages = Some(pages);
    }

    pub fn add_data(&mut self, offset: u32, bytes: Vec<u8>) {
        self.data.push((offset, bytes));
    }

    pub fn finish(self, module_name: &str, debug_names: bool) -> CompilationResult<Vec<u8>> {
        let mut type_section = TypeSection::new();
        let mut function_section = FunctionSection::new();
        let mut memory_section = MemorySection::new();
        let mut global_section = GlobalSection::new();
        let mut export_section = ExportSection::new();
        let mut element_section = ElementSection::new();
        let mut code_section = CodeSection::new();
        let mut data_section = DataSection::new();

        type_section.ty().rec(self.types.sub_types());

        for slot in &self.functions {
            function_section.function(slot.type_idx);
            let body = slot.body.as_ref().ok_or_else(|| {
                CompilationError::internal(format!("function `{}` has no body", slot.name))
            })?;
            code_section.function(body);
        }

        if let Some(pages) = self.memory_pages {
            memory_section.memory(MemoryType {
                minimum: pages,
                maximum: None,
                memory64: false,
                shared: false,
                page_size_log2: None,
            });
        }

        for global in &self.globals {
            global_section.global(
                GlobalType {
                    val_type: global.ty,
                    mutable: true,
                    shared: false,
                },
                &global.init,
            );
        }

        for (name, kind, index) in &self.exports {
            export_section.export(name, *kind, *index);
        }

        if !self.ref_funcs.is_empty() {
            let funcs: Vec<u32> = self.ref_funcs.iter().copied().collect();
            element_section.declared(Elements::Functions(Cow::Owned(funcs)));
        }

        for (offset, bytes) in &self.data {
            data_section.active(0, &ConstExpr::i32_const(*offset as i32), bytes.iter().copied());
        }

        debug!(
            "module `{module_name}`: {} types, {} functions, {} globals, {} exports",
            self.types.len(),
            self.functions.len(),
            self.globals.len(),
            self.exports.len()
        );

        // Type, Function, Memory, Global, Export, Element, Code, Data
        let mut module = Module::new();
        module.section(&type_section);
        module.section(&function_section);
        if self.memory_pages.is_some() {
            module.section(&memory_section);
        }
        if !self.globals.is_empty() {
            module.section(&global_section);
        }
        module.section(&export_section);
        if !self.ref_funcs.is_empty() {
            module.section(&element_section);
        }
        module.section(&code_section);
        if !self.data.is_empty() {
            module.section(&data_section);
        }
        if debug_names {
            module.section(&self.name_section(module_name));
        }
        Ok(module.finish())
    }

    fn name_section(&self, module_name: &str) -> NameSection {
        let mut names = NameSection::new();
        names.module(module_name);

        let mut type_names = NameMap::new();
        for (index, name) in self.types.names() {
            type_names.append(index, name);
        }
        names.types(&type_names);

        let mut func_names = NameMap::new();
        for (index, slot) in self.functions.iter().enumerate() {
            func_names.append(index as u32, &slot.name);
        }
        names.functions(&func_names);

        let mut global_names = NameMap::new();
        for (index, global) in self.globals.iter().enumerate() {
            global_names.append(index as u32, &global.name);
        }
        names.globals(&global_names);
        names
    }
}
