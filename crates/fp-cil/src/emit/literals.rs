//! Array and object literals, and the collection operations on them.

use super::MethodEmitter;
use crate::error::Result;
use crate::opcode::OpCode;
use crate::runtime::{self, RuntimeMethod};
use fp_core::lir::TempId;
use fp_core::metadata::TypeRef;

impl MethodEmitter<'_> {
    pub(super) fn emit_new_array(&mut self, elements: &[TempId], result: TempId) -> Result<()> {
        self.il.ldc_i4(elements.len() as i32);
        self.emit_call(OpCode::Newobj, &RuntimeMethod::ArrayCtor.method_ref());
        for element in elements {
            self.il.op(OpCode::Dup);
            self.load_object(*element)?;
            self.call_runtime(RuntimeMethod::ArrayAdd);
        }
        self.store_result(Some(result), Some(TypeRef::named(runtime::ARRAY)))
    }

    pub(super) fn emit_new_object(
        &mut self,
        properties: &[(String, TempId)],
        result: TempId,
    ) -> Result<()> {
        self.emit_call(OpCode::Newobj, &RuntimeMethod::ObjectCtor.method_ref());
        for (name, value) in properties {
            self.il.op(OpCode::Dup);
            self.load_string(name);
            self.load_object(*value)?;
            self.call_runtime(RuntimeMethod::ObjectSetProperty);
        }
        self.store_result(Some(result), Some(TypeRef::named(runtime::JS_OBJECT)))
    }

    pub(super) fn emit_set_item(
        &mut self,
        object: TempId,
        key: TempId,
        value: TempId,
        result: Option<TempId>,
    ) -> Result<()> {
        self.load_object(object)?;
        self.load_object(key)?;
        self.load_object(value)?;
        let pushed = self.call_runtime(RuntimeMethod::SetItem);
        self.store_result(result, pushed)
    }

    pub(super) fn emit_get_property(
        &mut self,
        object: TempId,
        name: &str,
        result: TempId,
    ) -> Result<()> {
        self.load_object(object)?;
        self.load_string(name);
        let pushed = self.call_runtime(RuntimeMethod::GetProperty);
        self.store_result(Some(result), pushed)
    }

    pub(super) fn emit_set_property(
        &mut self,
        object: TempId,
        name: &str,
        value: TempId,
    ) -> Result<()> {
        self.load_object(object)?;
        self.load_string(name);
        self.load_object(value)?;
        self.call_runtime(RuntimeMethod::SetProperty);
        Ok(())
    }

    pub(super) fn load_string(&mut self, value: &str) {
        let token = self.services.tokens.string_token(value);
        self.il.token(OpCode::Ldstr, token);
    }

    /// Packs `values` into a fresh `object[]` left on the stack.
    pub(super) fn emit_object_array(&mut self, values: &[TempId]) -> Result<()> {
        self.il.ldc_i4(values.len() as i32);
        let element = self.services.tokens.type_token(&TypeRef::Object);
        self.il.token(OpCode::Newarr, element);
        for (index, value) in values.iter().enumerate() {
            self.il.op(OpCode::Dup);
            self.il.ldc_i4(index as i32);
            self.load_object(*value)?;
            self.il.op(OpCode::StelemRef);
        }
        Ok(())
    }
}
