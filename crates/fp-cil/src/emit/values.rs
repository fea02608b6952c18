//! Loading, storing and coercing temp values.

use super::{storage_type, MethodEmitter};
use crate::error::{CilError, Result};
use crate::opcode::OpCode;
use crate::runtime::RuntimeMethod;
use eyre::eyre;
use fp_core::lir::{LirConst, TempId};
use fp_core::metadata::TypeRef;

impl MethodEmitter<'_> {
    /// Representation stored in the temp's slot.
    pub(super) fn temp_type(&self, temp: TempId) -> Result<TypeRef> {
        self.body
            .temp(temp)
            .map(|storage| storage_type(self.body, storage))
            .ok_or(CilError::MissingMaterialization { temp })
    }

    fn temp_slot(&self, temp: TempId) -> Result<Option<u16>> {
        self.temp_slots
            .get(temp.index())
            .copied()
            .ok_or(CilError::MissingMaterialization { temp })
    }

    /// Pushes the value of `temp` and returns the pushed representation.
    pub(super) fn load_temp(&mut self, temp: TempId) -> Result<TypeRef> {
        let Some(slot) = self.temp_slot(temp)? else {
            return Err(CilError::Internal(eyre!(
                "temp {} has no slot and is only readable by its fused branch",
                temp
            )));
        };
        self.il.ldloc(slot);
        self.temp_type(temp)
    }

    pub(super) fn load_as(&mut self, temp: TempId, target: &TypeRef) -> Result<()> {
        let pushed = self.load_temp(temp)?;
        self.coerce(&pushed, target)
    }

    pub(super) fn load_object(&mut self, temp: TempId) -> Result<()> {
        self.load_as(temp, &TypeRef::Object)
    }

    /// Stores or discards what an instruction left on the stack.
    ///
    /// `pushed == None` means nothing was pushed (a void call); a materialized
    /// result then receives the undefined sentinel.
    pub(super) fn store_result(
        &mut self,
        result: Option<TempId>,
        pushed: Option<TypeRef>,
    ) -> Result<()> {
        let target = match result {
            Some(temp) => self.temp_slot(temp)?.map(|slot| (temp, slot)),
            None => None,
        };
        match (target, pushed) {
            (None, None) => {}
            (None, Some(_)) => self.il.op(OpCode::Pop),
            (Some((temp, slot)), None) => {
                let ty = self.temp_type(temp)?;
                self.push_undefined(&ty);
                self.il.stloc(slot);
            }
            (Some((temp, slot)), Some(pushed)) => {
                let ty = self.temp_type(temp)?;
                self.coerce(&pushed, &ty)?;
                self.il.stloc(slot);
            }
        }
        Ok(())
    }

    /// Pushes the sentinel for a missing value of representation `ty`.
    pub(super) fn push_undefined(&mut self, ty: &TypeRef) {
        match ty {
            TypeRef::Number => self.il.ldc_r8(f64::NAN),
            TypeRef::Boolean | TypeRef::Int32 => self.il.ldc_i4(0),
            _ => self.il.op(OpCode::Ldnull),
        }
    }

    /// Converts the value on top of the stack from `from` to `to`.
    pub(super) fn coerce(&mut self, from: &TypeRef, to: &TypeRef) -> Result<()> {
        if from == to {
            return Ok(());
        }
        match (from, to) {
            (_, TypeRef::Object) => {
                if from.is_value_type() {
                    self.box_value(from);
                }
            }
            (TypeRef::Boolean | TypeRef::Int32, TypeRef::Number) => self.il.op(OpCode::ConvR8),
            (_, TypeRef::Number) => {
                self.box_if_value(from);
                self.call_runtime(RuntimeMethod::ToNumber);
            }
            (TypeRef::Int32, TypeRef::Boolean) => {
                self.il.ldc_i4(0);
                self.il.op(OpCode::CgtUn);
            }
            (_, TypeRef::Boolean) => {
                self.box_if_value(from);
                self.call_runtime(RuntimeMethod::IsTruthy);
            }
            (TypeRef::Number, TypeRef::Int32) => {
                self.call_runtime(RuntimeMethod::ToInt32);
            }
            (TypeRef::Boolean, TypeRef::Int32) => {}
            (_, TypeRef::Int32) => {
                self.call_runtime(RuntimeMethod::ToNumber);
                self.call_runtime(RuntimeMethod::ToInt32);
            }
            (_, TypeRef::String) => {
                self.box_if_value(from);
                self.call_runtime(RuntimeMethod::ToString);
            }
            (_, TypeRef::ObjectArray | TypeRef::Named(_)) => {
                self.box_if_value(from);
                let token = self.services.tokens.type_token(to);
                self.il.token(OpCode::Castclass, token);
            }
        }
        Ok(())
    }

    fn box_value(&mut self, ty: &TypeRef) {
        let token = self.services.tokens.type_token(ty);
        self.il.token(OpCode::Box, token);
    }

    fn box_if_value(&mut self, ty: &TypeRef) {
        if ty.is_value_type() {
            self.box_value(ty);
        }
    }

    pub(super) fn emit_load_const(&mut self, value: &LirConst, result: TempId) -> Result<()> {
        let pushed = match value {
            LirConst::Number(number) => {
                self.il.ldc_r8(*number);
                TypeRef::Number
            }
            LirConst::Boolean(flag) => {
                self.il.ldc_i4(i32::from(*flag));
                TypeRef::Boolean
            }
            LirConst::String(text) => {
                let token = self.services.tokens.string_token(text);
                self.il.token(OpCode::Ldstr, token);
                TypeRef::String
            }
            LirConst::Null => {
                self.il.op(OpCode::Ldnull);
                TypeRef::Object
            }
            LirConst::Undefined => {
                let ty = self.temp_type(result)?;
                self.push_undefined(&ty);
                ty
            }
        };
        self.store_result(Some(result), Some(pushed))
    }

    pub(super) fn convert(&mut self, source: TempId, target: TypeRef, result: TempId) -> Result<()> {
        self.load_as(source, &target)?;
        self.store_result(Some(result), Some(target))
    }
}
