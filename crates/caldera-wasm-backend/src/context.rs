//! State shared by everything generated for one module.
//!
//! Every cache lives here and is written once per key, so nothing about a
//! compilation outlives the [`CompileContext`] that produced it.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use caldera_hir::{ExprId, HirExpr, HirProgram, SymbolId, TypeId};
use caldera_passes::{ContCfg, EnvTypeId, ExprIndex, OwnerId, OwnerSummary, SiteTable};
use tracing::trace;
use wasm_encoder::Instruction;

use crate::effect_table::OperationHandles;
use crate::errors::{CompilationError, CompilationResult};
use crate::function_builder::FunctionBuilder;
use crate::host_abi::HostFns;
use crate::module_builder::ModuleBuilder;
use crate::runtime::RuntimeFns;
use crate::types::{Abi, Repr};

/// Knobs of a single `compile_module` call.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EmitOptions {
    pub module_name: String,
    /// Export `name` with its declared signature next to `name_effectful`.
    pub export_pure_surfaces: bool,
    /// Emit a `name` custom section.
    pub debug_names: bool,
}

impl EmitOptions {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            export_pure_surfaces: true,
            debug_names: false,
        }
    }
}

/// The functions generated for one owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OwnerFns {
    /// Holds the compiled body.
    pub body: u32,
    pub abi: Abi,
    /// Convention the owner's declared type promises to callers.
    pub declared: Abi,
    /// Declared-signature wrapper of an effectful body whose type is pure.
    pub surface: Option<u32>,
    pub cont: Option<u32>,
}

impl OwnerFns {
    /// What a direct call or a closure of the owner invokes.
    pub fn entry(&self) -> u32 {
        match self.declared {
            Abi::Effectful => self.body,
            Abi::Pure => self.surface.unwrap_or(self.body),
        }
    }
}

pub struct CompileContext<'p> {
    pub program: &'p HirProgram,
    pub table: &'p SiteTable,
    pub index: ExprIndex<'p>,
    pub options: &'p EmitOptions,
    pub module: ModuleBuilder,
    pub operations: OperationHandles,
    pub runtime: RuntimeFns,
    pub host: HostFns,
    pub(crate) reprs: HashMap<TypeId, Repr>,
    pub(crate) reprs_in_progress: HashSet<TypeId>,
    pub(crate) env_types: Vec<u32>,
    pub(crate) owner_fns: Vec<OwnerFns>,
    pub(crate) closure_adapters: HashMap<SymbolId, u32>,
    pub(crate) coercions: HashMap<(TypeId, TypeId), u32>,
    capture_types: HashMap<OwnerId, Option<u32>>,
    cfgs: HashMap<String, Rc<ContCfg>>,
}

impl<'p> CompileContext<'p> {
    pub fn new(
        program: &'p HirProgram,
        table: &'p SiteTable,
        options: &'p EmitOptions,
    ) -> CompilationResult<Self> {
        let mut module = ModuleBuilder::default();
        let runtime = RuntimeFns::declare(&mut module);
        let operations = OperationHandles::collect(program);
        let host = HostFns::declare(&mut module, operations.buffer_offset());
        let mut ctx = Self {
            program,
            table,
            index: ExprIndex::build(program),
            options,
            module,
            operations,
            runtime,
            host,
            reprs: HashMap::new(),
            reprs_in_progress: HashSet::new(),
            env_types: Vec::new(),
            owner_fns: Vec::new(),
            closure_adapters: HashMap::new(),
            coercions: HashMap::new(),
            capture_types: HashMap::new(),
            cfgs: HashMap::new(),
        };
        ctx.register_env_types()?;
        Ok(ctx)
    }

    pub fn expr(&self, id: ExprId) -> CompilationResult<&'p HirExpr> {
        self.index
            .get(id)
            .ok_or_else(|| CompilationError::internal(format!("unknown expression {id}")))
    }

    pub fn owner_fns(&self, id: OwnerId) -> CompilationResult<OwnerFns> {
        self.owner_fns
            .get(id.index())
            .copied()
            .ok_or_else(|| CompilationError::internal(format!("owner {} was not declared", id.0)))
    }

    pub fn env_type_index(&self, id: EnvTypeId) -> CompilationResult<u32> {
        self.env_types
            .get(id.0 as usize)
            .copied()
            .ok_or_else(|| CompilationError::internal(format!("unknown environment {id}")))
    }

    /// Struct holding the captured values of a nested owner, or `None` when
    /// it captures nothing and its environment is `ref.null any`.
    pub fn capture_type(&mut self, owner: &OwnerSummary) -> CompilationResult<Option<u32>> {
        if let Some(idx) = self.capture_types.get(&owner.id) {
            return Ok(*idx);
        }
        let idx = if owner.captures.is_empty() {
            None
        } else {
            let program = self.program;
            let mut fields = Vec::with_capacity(owner.captures.len());
            for symbol in &owner.captures {
                fields.push(self.val_type(program.symbol(*symbol).ty)?);
            }
            let name = format!("{}$captures", owner.name);
            Some(self.module.types.push_struct(&name, &fields, None, true))
        };
        self.capture_types.insert(owner.id, idx);
        Ok(idx)
    }

    /// Resume paths of `owner`, built once per continuation function.
    pub fn cont_cfg(&mut self, owner: &OwnerSummary) -> CompilationResult<Rc<ContCfg>> {
        if let Some(cfg) = self.cfgs.get(&owner.cont_fn_name) {
            trace!("cont cfg cache hit: {}", owner.cont_fn_name);
            return Ok(Rc::clone(cfg));
        }
        let body = self.expr(owner.body)?;
        let cfg = Rc::new(ContCfg::build(self.program, self.table, owner, body));
        self.cfgs.insert(owner.cont_fn_name.clone(), Rc::clone(&cfg));
        Ok(cfg)
    }

    /// `ref.func`, declaring the target in the element section.
    pub fn ref_func(&mut self, fb: &mut FunctionBuilder, func: u32) {
        self.module.declare_ref(func);
        fb.emit(Instruction::RefFunc(func));
    }
}
