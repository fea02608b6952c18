//! Closure scopes: the scopes array, scope instances and their fields.

use super::MethodEmitter;
use crate::error::{CilError, Result};
use crate::opcode::OpCode;
use crate::runtime;
use eyre::eyre;
use fp_core::lir::{ScopeSource, TempId};
use fp_core::metadata::{FieldRef, MethodRef, TypeRef};

impl MethodEmitter<'_> {
    pub(super) fn scope_type(&self, scope: &str) -> Result<TypeRef> {
        self.services
            .scopes
            .scope_type(scope)
            .ok_or_else(|| CilError::Internal(eyre!("scope {} has no registered type", scope)))
    }

    /// Field handle for `scope.field`: hidden async fields, then hidden
    /// generator fields, then the scope's own fields.
    pub(super) fn resolve_field(&self, scope: &str, field: &str) -> Result<FieldRef> {
        runtime::async_base_field(field)
            .or_else(|| runtime::generator_base_field(field))
            .or_else(|| self.services.scopes.scope_field(scope, field))
            .ok_or_else(|| {
                CilError::Internal(
                    eyre!("no field {} in scope {} or its hidden bases", field, scope).wrap_err(
                        format!(
                            "resolving {}.{} for method {}",
                            scope, field, self.descriptor.name
                        ),
                    ),
                )
            })
    }

    /// `scopes[index]`, downcast to the enclosing scope's type.
    fn load_parent_scope(&mut self, index: u32, scope_type: &TypeRef) -> Result<()> {
        let scopes = self.scopes_arg()?;
        self.il.ldarg(scopes);
        self.il.ldc_i4(index as i32);
        self.il.op(OpCode::LdelemRef);
        let token = self.services.tokens.type_token(scope_type);
        self.il.token(OpCode::Castclass, token);
        Ok(())
    }

    fn load_field(&mut self, field: &FieldRef, result: TempId) -> Result<()> {
        let token = self.services.tokens.field_token(field);
        self.il.token(OpCode::Ldfld, token);
        self.store_result(Some(result), Some(field.ty.clone()))
    }

    /// Expects the instance on the stack.
    fn store_field(&mut self, field: &FieldRef, value: TempId) -> Result<()> {
        self.load_as(value, &field.ty)?;
        let token = self.services.tokens.field_token(field);
        self.il.token(OpCode::Stfld, token);
        Ok(())
    }

    pub(super) fn emit_create_scopes_array(
        &mut self,
        sources: &[ScopeSource],
        result: TempId,
    ) -> Result<()> {
        self.il.ldc_i4(sources.len() as i32);
        let element = self.services.tokens.type_token(&TypeRef::Object);
        self.il.token(OpCode::Newarr, element);
        for (index, source) in sources.iter().enumerate() {
            self.il.op(OpCode::Dup);
            self.il.ldc_i4(index as i32);
            match source {
                ScopeSource::Leaf => {
                    let slot = self.leaf_slot()?;
                    self.il.ldloc(slot);
                }
                ScopeSource::Parent(parent) => {
                    let scopes = self.scopes_arg()?;
                    self.il.ldarg(scopes);
                    self.il.ldc_i4(*parent as i32);
                    self.il.op(OpCode::LdelemRef);
                }
                ScopeSource::Temp(temp) => self.load_object(*temp)?,
                ScopeSource::Null => self.il.op(OpCode::Ldnull),
            }
            self.il.op(OpCode::StelemRef);
        }
        self.store_result(Some(result), Some(TypeRef::ObjectArray))
    }

    pub(super) fn emit_create_scope_instance(&mut self, scope: &str, result: TempId) -> Result<()> {
        let ty = self.scope_type(scope)?;
        self.new_scope(&ty);
        self.store_result(Some(result), Some(ty))
    }

    pub(super) fn new_scope(&mut self, ty: &TypeRef) {
        let ctor = MethodRef::constructor(ty.clone(), Vec::new());
        self.emit_call(OpCode::Newobj, &ctor);
    }

    pub(super) fn emit_load_parent_field(
        &mut self,
        index: u32,
        scope: &str,
        field: &str,
        result: TempId,
    ) -> Result<()> {
        let ty = self.scope_type(scope)?;
        let field = self.resolve_field(scope, field)?;
        self.load_parent_scope(index, &ty)?;
        self.load_field(&field, result)
    }

    pub(super) fn emit_store_parent_field(
        &mut self,
        index: u32,
        scope: &str,
        field: &str,
        value: TempId,
    ) -> Result<()> {
        let ty = self.scope_type(scope)?;
        let field = self.resolve_field(scope, field)?;
        self.load_parent_scope(index, &ty)?;
        self.store_field(&field, value)
    }

    pub(super) fn emit_create_leaf_scope(&mut self, scope: &str) -> Result<()> {
        if self.body.resumable.is_some() {
            return self.emit_resumable_bootstrap();
        }
        let ty = self.scope_type(scope)?;
        let slot = self.leaf_slot()?;
        self.new_scope(&ty);
        self.il.stloc(slot);
        Ok(())
    }

    fn leaf_field(&self, field: &str) -> Result<FieldRef> {
        let scope = self.body.leaf_scope.as_deref().ok_or_else(|| {
            CilError::Internal(eyre!(
                "method {} reads leaf field {} but declares no leaf scope",
                self.descriptor.name,
                field
            ))
        })?;
        self.resolve_field(scope, field)
    }

    pub(super) fn emit_load_leaf_field(&mut self, field: &str, result: TempId) -> Result<()> {
        let field = self.leaf_field(field)?;
        let slot = self.leaf_slot()?;
        self.il.ldloc(slot);
        self.load_field(&field, result)
    }

    pub(super) fn emit_store_leaf_field(&mut self, field: &str, value: TempId) -> Result<()> {
        let field = self.leaf_field(field)?;
        let slot = self.leaf_slot()?;
        self.il.ldloc(slot);
        self.store_field(&field, value)
    }

    pub(super) fn emit_load_scope_field(
        &mut self,
        instance: TempId,
        scope: &str,
        field: &str,
        result: TempId,
    ) -> Result<()> {
        let ty = self.scope_type(scope)?;
        let field = self.resolve_field(scope, field)?;
        self.load_as(instance, &ty)?;
        self.load_field(&field, result)
    }

    pub(super) fn emit_store_scope_field(
        &mut self,
        instance: TempId,
        scope: &str,
        field: &str,
        value: TempId,
    ) -> Result<()> {
        let ty = self.scope_type(scope)?;
        let field = self.resolve_field(scope, field)?;
        self.load_as(instance, &ty)?;
        self.store_field(&field, value)
    }
}
