//! Destructuring of `let` and `match` patterns.

use caldera_hir::{HirPattern, TypeId};
use wasm_encoder::{BlockType, Instruction};

use crate::errors::{CompilationError, CompilationResult};
use crate::expr::FnCx;
use crate::function_builder::Label;
use crate::types::Repr;

impl<'a, 'p> FnCx<'a, 'p> {
    /// Binds the value of type `ty` on top of the stack to `pattern`.
    /// A refutable pattern that does not match traps.
    pub(crate) fn bind_pattern(&mut self, pattern: &'p HirPattern, ty: TypeId) -> CompilationResult<()> {
        match pattern {
            HirPattern::Wildcard => {
                self.fb.emit(Instruction::Drop);
                Ok(())
            }
            HirPattern::Bind { symbol } => {
                let target = self.ctx.program.symbol(*symbol).ty;
                self.coerce(ty, target)?;
                let local = self.local(*symbol)?;
                self.fb.local_set(local);
                Ok(())
            }
            _ => {
                let val_type = self.ctx.val_type(ty)?;
                let scratch = self.fb.local(val_type);
                self.fb.local_set(scratch);
                self.match_pattern(pattern, ty, scratch, None)
            }
        }
    }

    /// Tests the value in local `src` against `pattern` and binds its
    /// variables. On mismatch branches to `fail`, or traps without one.
    pub(crate) fn match_pattern(
        &mut self,
        pattern: &'p HirPattern,
        ty: TypeId,
        src: u32,
        fail: Option<Label>,
    ) -> CompilationResult<()> {
        match pattern {
            HirPattern::Wildcard => Ok(()),
            HirPattern::Bind { symbol } => {
                self.fb.local_get(src);
                let target = self.ctx.program.symbol(*symbol).ty;
                self.coerce(ty, target)?;
                let local = self.local(*symbol)?;
                self.fb.local_set(local);
                Ok(())
            }
            HirPattern::Literal { value } => {
                let ne = match self.repr(ty)? {
                    Repr::Unit => return Ok(()),
                    Repr::I32 => Instruction::I32Ne,
                    Repr::I64 => Instruction::I64Ne,
                    Repr::F64 => Instruction::F64Ne,
                    Repr::Ref(_) => {
                        return Err(CompilationError::unsupported_feature(
                            "literal pattern against a reference value",
                        ));
                    }
                };
                self.fb.local_get(src);
                self.literal(*value);
                self.fb.emit(ne);
                match fail {
                    Some(label) => self.fb.br_if(label),
                    None => {
                        self.fb.if_(BlockType::Empty);
                        self.fb.emit(Instruction::Unreachable);
                        self.fb.end();
                    }
                }
                Ok(())
            }
            HirPattern::Tuple { elements: items } | HirPattern::Record { fields: items } => {
                let fields = self.ctx.program.ty(ty).aggregate_fields().ok_or_else(|| {
                    CompilationError::internal(format!("destructuring non-aggregate type {ty}"))
                })?;
                if fields.len() != items.len() {
                    return Err(CompilationError::internal(format!(
                        "pattern of {} fields against type {ty}",
                        items.len()
                    )));
                }
                let idx = self.ctx.aggregate_type(ty)?;
                for (index, (item, field_ty)) in items.iter().zip(fields).enumerate() {
                    if matches!(item, HirPattern::Wildcard) {
                        continue;
                    }
                    let val_type = self.ctx.val_type(field_ty)?;
                    let local = self.fb.local(val_type);
                    self.fb.local_get(src);
                    self.fb.struct_get(idx, index as u32);
                    self.fb.local_set(local);
                    self.match_pattern(item, field_ty, local, fail)?;
                }
                Ok(())
            }
        }
    }
}
