//! GC type registry for the emitted module.
//!
//! Every type of a module lives in one recursion group, so structurally equal
//! types stay distinct and `ref.cast` can tell them apart. The runtime object
//! model occupies a fixed prefix of the group; aggregates, capture records,
//! continuation environments and function signatures are appended as code
//! generation asks for them.
//!
//! ## Type Index Layout
//!
//! ```text
//! Index 0:  EnvBase      - struct { site: i32, handler: Frame? } (non-final)
//! Index 1:  Frame        - struct { ops: I32Array?, kinds: I32Array?, clauses: ClosureArray?, outer: Frame? }
//! Index 2:  Closure      - struct { func: funcref, env: anyref }
//! Index 3:  Outcome      - struct { tag: i32, value: anyref, cont: Cont?, op: i32, payload: anyref, skip: Frame? }
//! Index 4:  Cont         - struct { fn: ContFn?, env: EnvBase?, inner: Cont? }
//! Index 5:  ContFn       - func (EnvBase?, anyref) -> Outcome?
//! Index 6:  Resumption   - struct { cont: Cont?, frame: Frame? }
//! Index 7:  ClauseFn     - func (anyref, Frame?, anyref, Resumption?) -> Outcome?
//! Index 8:  Args         - array anyref
//! Index 9:  I32Array     - array i32
//! Index 10: ClosureArray - array Closure?
//! Index 11: BoxI32       - struct { value: i32 }
//! Index 12: BoxI64       - struct { value: i64 }
//! Index 13: BoxF64       - struct { value: f64 }
//! Index 14: RehandleEnv  - struct sub EnvBase { site, handler, inner: Cont?, frame: Frame? }
//! Index 15+: aggregates, captures, environments and signatures
//! ```

use std::collections::HashMap;

use tracing::debug;
use wasm_encoder::{
    AbstractHeapType, ArrayType, CompositeInnerType, CompositeType, FieldType, FuncType, HeapType,
    RefType, StorageType, StructType, SubType, ValType,
};

/// Base of every continuation environment. Non-final so that per-site
/// environments can extend it.
pub const ENV_BASE_IDX: u32 = 0;

/// Handler frame: the operations a `handle` covers, their clause closures and
/// the enclosing frame.
pub const FRAME_IDX: u32 = 1;

/// Uniform closure representation: (function reference, captured environment).
pub const CLOSURE_IDX: u32 = 2;

/// Result of every effectful function.
pub const OUTCOME_IDX: u32 = 3;

/// One frame of a captured continuation.
pub const CONT_IDX: u32 = 4;

/// Signature of continuation functions.
pub const CONT_FN_IDX: u32 = 5;

/// What a `ctl` clause receives to resume the suspended body.
pub const RESUMPTION_IDX: u32 = 6;

/// Signature of handler clause functions.
pub const CLAUSE_FN_IDX: u32 = 7;

/// Boxed operation arguments.
pub const ARGS_IDX: u32 = 8;

pub const I32_ARRAY_IDX: u32 = 9;

pub const CLOSURE_ARRAY_IDX: u32 = 10;

pub const BOX_I32_IDX: u32 = 11;

pub const BOX_I64_IDX: u32 = 12;

pub const BOX_F64_IDX: u32 = 13;

/// Environment of the continuation frame that re-enters a handler after an
/// operation it does not cover has been resumed from outside.
pub const REHANDLE_ENV_IDX: u32 = 14;

/// First type index available for generated types.
pub const FIRST_USER_TYPE_IDX: u32 = 15;

pub const ENV_SITE_FIELD: u32 = 0;
pub const ENV_HANDLER_FIELD: u32 = 1;

pub const FRAME_OPS_FIELD: u32 = 0;
pub const FRAME_KINDS_FIELD: u32 = 1;
pub const FRAME_CLAUSES_FIELD: u32 = 2;
pub const FRAME_OUTER_FIELD: u32 = 3;

pub const CLOSURE_FUNC_FIELD: u32 = 0;
pub const CLOSURE_ENV_FIELD: u32 = 1;

pub const OUTCOME_TAG_FIELD: u32 = 0;
pub const OUTCOME_VALUE_FIELD: u32 = 1;
pub const OUTCOME_CONT_FIELD: u32 = 2;
pub const OUTCOME_OP_FIELD: u32 = 3;
pub const OUTCOME_PAYLOAD_FIELD: u32 = 4;
/// Frame that installed the `fn` clause a suspension came out of. That
/// frame and the frames inside it pass the suspension on unhandled.
pub const OUTCOME_SKIP_FIELD: u32 = 5;

pub const CONT_FN_FIELD: u32 = 0;
pub const CONT_ENV_FIELD: u32 = 1;
pub const CONT_INNER_FIELD: u32 = 2;

pub const RESUMPTION_CONT_FIELD: u32 = 0;
pub const RESUMPTION_FRAME_FIELD: u32 = 1;

pub const REHANDLE_INNER_FIELD: u32 = 2;
pub const REHANDLE_FRAME_FIELD: u32 = 3;

pub const BOX_VALUE_FIELD: u32 = 0;

pub const ANYREF: ValType = ValType::Ref(RefType::ANYREF);
pub const FUNCREF: ValType = ValType::Ref(RefType::FUNCREF);

pub const ANY_HEAP: HeapType = HeapType::Abstract {
    shared: false,
    ty: AbstractHeapType::Any,
};

/// `(ref null $idx)`
pub const fn nullable(idx: u32) -> ValType {
    ValType::Ref(RefType {
        nullable: true,
        heap_type: HeapType::Concrete(idx),
    })
}

pub const FRAME_REF: ValType = nullable(FRAME_IDX);
pub const OUTCOME_REF: ValType = nullable(OUTCOME_IDX);
pub const CONT_REF: ValType = nullable(CONT_IDX);
pub const CLOSURE_REF: ValType = nullable(CLOSURE_IDX);
pub const RESUMPTION_REF: ValType = nullable(RESUMPTION_IDX);
pub const ENV_BASE_REF: ValType = nullable(ENV_BASE_IDX);

/// Definition of a GC type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcTypeDef {
    Struct {
        fields: Vec<FieldType>,
        supertype: Option<u32>,
        is_final: bool,
    },
    Array(FieldType),
    Func {
        params: Vec<ValType>,
        results: Vec<ValType>,
    },
}

impl GcTypeDef {
    /// A final struct with immutable fields.
    pub fn record(fields: &[ValType]) -> Self {
        GcTypeDef::Struct {
            fields: fields.iter().copied().map(field).collect(),
            supertype: None,
            is_final: true,
        }
    }

    pub fn field_count(&self) -> usize {
        match self {
            GcTypeDef::Struct { fields, .. } => fields.len(),
            GcTypeDef::Array(_) | GcTypeDef::Func { .. } => 0,
        }
    }

    fn to_sub_type(&self) -> SubType {
        let (is_final, supertype_idx, inner) = match self {
            GcTypeDef::Struct {
                fields,
                supertype,
                is_final,
            } => (
                *is_final,
                *supertype,
                CompositeInnerType::Struct(StructType {
                    fields: fields.clone().into_boxed_slice(),
                }),
            ),
            GcTypeDef::Array(element) => (true, None, CompositeInnerType::Array(ArrayType(*element))),
            GcTypeDef::Func { params, results } => (
                true,
                None,
                CompositeInnerType::Func(FuncType::new(params.iter().copied(), results.iter().copied())),
            ),
        };
        SubType {
            is_final,
            supertype_idx,
            composite_type: CompositeType {
                shared: false,
                inner,
                descriptor: None,
                describes: None,
            },
        }
    }
}

fn field(ty: ValType) -> FieldType {
    FieldType {
        element_type: StorageType::Val(ty),
        mutable: false,
    }
}

/// Registry of all types of one module, builtins included.
#[derive(Debug, Clone)]
pub struct GcTypeRegistry {
    types: Vec<(String, GcTypeDef)>,
    records: HashMap<Vec<ValType>, u32>,
    signatures: HashMap<(Vec<ValType>, Vec<ValType>), u32>,
}

impl Default for GcTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GcTypeRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            types: Vec::new(),
            records: HashMap::new(),
            signatures: HashMap::new(),
        };
        for (name, def) in Self::builtin_types() {
            registry.types.push((name.to_owned(), def));
        }
        registry
            .signatures
            .insert((vec![ENV_BASE_REF, ANYREF], vec![OUTCOME_REF]), CONT_FN_IDX);
        registry.signatures.insert(
            (vec![ANYREF, FRAME_REF, ANYREF, RESUMPTION_REF], vec![OUTCOME_REF]),
            CLAUSE_FN_IDX,
        );
        registry
    }

    /// The fixed prefix of the recursion group.
    pub fn builtin_types() -> Vec<(&'static str, GcTypeDef)> {
        let header = [ValType::I32, FRAME_REF];
        vec![
            (
                "EnvBase",
                GcTypeDef::Struct {
                    fields: header.iter().copied().map(field).collect(),
                    supertype: None,
                    is_final: false,
                },
            ),
            (
                "Frame",
                GcTypeDef::record(&[
                    nullable(I32_ARRAY_IDX),
                    nullable(I32_ARRAY_IDX),
                    nullable(CLOSURE_ARRAY_IDX),
                    FRAME_REF,
                ]),
            ),
            ("Closure", GcTypeDef::record(&[FUNCREF, ANYREF])),
            (
                "Outcome",
                GcTypeDef::record(&[
                    ValType::I32,
                    ANYREF,
                    CONT_REF,
                    ValType::I32,
                    ANYREF,
                    FRAME_REF,
                ]),
            ),
            (
                "Cont",
                GcTypeDef::record(&[nullable(CONT_FN_IDX), ENV_BASE_REF, CONT_REF]),
            ),
            (
                "ContFn",
                GcTypeDef::Func {
                    params: vec![ENV_BASE_REF, ANYREF],
                    results: vec![OUTCOME_REF],
                },
            ),
            ("Resumption", GcTypeDef::record(&[CONT_REF, FRAME_REF])),
            (
                "ClauseFn",
                GcTypeDef::Func {
                    params: vec![ANYREF, FRAME_REF, ANYREF, RESUMPTION_REF],
                    results: vec![OUTCOME_REF],
                },
            ),
            ("Args", GcTypeDef::Array(field(ANYREF))),
            ("I32Array", GcTypeDef::Array(field(ValType::I32))),
            ("ClosureArray", GcTypeDef::Array(field(CLOSURE_REF))),
            ("BoxI32", GcTypeDef::record(&[ValType::I32])),
            ("BoxI64", GcTypeDef::record(&[ValType::I64])),
            ("BoxF64", GcTypeDef::record(&[ValType::F64])),
            (
                "RehandleEnv",
                GcTypeDef::Struct {
                    fields: [ValType::I32, FRAME_REF, CONT_REF, FRAME_REF]
                        .into_iter()
                        .map(field)
                        .collect(),
                    supertype: Some(ENV_BASE_IDX),
                    is_final: true,
                },
            ),
        ]
    }

    pub fn len(&self) -> u32 {
        self.types.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, idx: u32) -> Option<&GcTypeDef> {
        self.types.get(idx as usize).map(|(_, def)| def)
    }

    pub fn name(&self, idx: u32) -> Option<&str> {
        self.types.get(idx as usize).map(|(name, _)| name.as_str())
    }

    /// Final struct with the given immutable fields, shared by every
    /// aggregate of the same layout.
    pub fn intern_record(&mut self, name: &str, fields: &[ValType]) -> u32 {
        if let Some(idx) = self.records.get(fields) {
            return *idx;
        }
        let idx = self.push(name, GcTypeDef::record(fields));
        self.records.insert(fields.to_vec(), idx);
        idx
    }

    /// Struct that is never shared, such as a per-site environment.
    pub fn push_struct(
        &mut self,
        name: &str,
        fields: &[ValType],
        supertype: Option<u32>,
        is_final: bool,
    ) -> u32 {
        self.push(
            name,
            GcTypeDef::Struct {
                fields: fields.iter().copied().map(field).collect(),
                supertype,
                is_final,
            },
        )
    }

    pub fn intern_func(&mut self, params: &[ValType], results: &[ValType]) -> u32 {
        let key = (params.to_vec(), results.to_vec());
        if let Some(idx) = self.signatures.get(&key) {
            return *idx;
        }
        let name = format!("sig{}", self.types.len());
        let idx = self.push(
            &name,
            GcTypeDef::Func {
                params: key.0.clone(),
                results: key.1.clone(),
            },
        );
        self.signatures.insert(key, idx);
        idx
    }

    fn push(&mut self, name: &str, def: GcTypeDef) -> u32 {
        let idx = self.types.len() as u32;
        debug!("gc type {idx}: {name} {def:?}");
        self.types.push((name.to_owned(), def));
        idx
    }

    /// The recursion group, in index order.
    pub fn sub_types(&self) -> Vec<SubType> {
        self.types.iter().map(|(_, def)| def.to_sub_type()).collect()
    }

    pub fn names(&self) -> impl Iterator<Item = (u32, &str)> {
        self.types
            .iter()
            .enumerate()
            .map(|(idx, (name, _))| (idx as u32, name.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_prefix_matches_index_constants() {
        let registry = GcTypeRegistry::new();
        assert_eq!(registry.len(), FIRST_USER_TYPE_IDX);
        assert_eq!(registry.name(OUTCOME_IDX), Some("Outcome"));
        assert_eq!(registry.name(REHANDLE_ENV_IDX), Some("RehandleEnv"));
        assert_eq!(registry.get(OUTCOME_IDX).map(GcTypeDef::field_count), Some(6));
        assert!(matches!(
            registry.get(ENV_BASE_IDX),
            Some(GcTypeDef::Struct { is_final: false, .. })
        ));
    }

    #[test]
    fn builtin_signatures_are_reused() {
        let mut registry = GcTypeRegistry::new();
        assert_eq!(
            registry.intern_func(&[ENV_BASE_REF, ANYREF], &[OUTCOME_REF]),
            CONT_FN_IDX
        );
        let a = registry.intern_func(&[ValType::I32], &[ValType::I32]);
        let b = registry.intern_func(&[ValType::I32], &[ValType::I32]);
        assert_eq!(a, b);
        assert_eq!(a, FIRST_USER_TYPE_IDX);
    }

    #[test]
    fn records_are_interned_by_layout() {
        let mut registry = GcTypeRegistry::new();
        let pair = registry.intern_record("Pair", &[ValType::I32, ValType::F64]);
        let point = registry.intern_record("Point", &[ValType::I32, ValType::F64]);
        let env = registry.push_struct("env", &[ValType::I32, FRAME_REF], Some(ENV_BASE_IDX), false);
        assert_eq!(pair, point);
        assert_ne!(pair, env);
    }
}
