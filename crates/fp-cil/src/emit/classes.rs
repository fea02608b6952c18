//! User classes: field access on `this` and construction.

use super::MethodEmitter;
use crate::error::{CilError, Result};
use crate::opcode::OpCode;
use crate::registry::ClassInfo;
use crate::runtime::RuntimeMethod;
use eyre::eyre;
use fp_core::lir::TempId;
use fp_core::metadata::{FieldRef, TypeRef};
use std::sync::Arc;

impl MethodEmitter<'_> {
    fn class_info(&self, class: &str) -> Result<Arc<ClassInfo>> {
        self.services
            .program
            .class(class)
            .ok_or_else(|| CilError::Internal(eyre!("class {} is not registered", class)))
    }

    fn this_field(&self, class: &str, field: &str) -> Result<FieldRef> {
        if !self.descriptor.has_this() {
            return Err(CilError::Internal(eyre!(
                "field {}.{} accessed from static method {}",
                class,
                field,
                self.descriptor.name
            )));
        }
        self.class_info(class)?
            .field_ref(field)
            .ok_or_else(|| CilError::Internal(eyre!("class {} declares no field {}", class, field)))
    }

    pub(super) fn emit_load_class_field(
        &mut self,
        class: &str,
        field: &str,
        result: TempId,
    ) -> Result<()> {
        let field = self.this_field(class, field)?;
        self.il.ldarg(0);
        let token = self.services.tokens.field_token(&field);
        self.il.token(OpCode::Ldfld, token);
        self.store_result(Some(result), Some(field.ty))
    }

    pub(super) fn emit_store_class_field(
        &mut self,
        class: &str,
        field: &str,
        value: TempId,
    ) -> Result<()> {
        let field = self.this_field(class, field)?;
        self.il.ldarg(0);
        self.load_as(value, &field.ty)?;
        let token = self.services.tokens.field_token(&field);
        self.il.token(OpCode::Stfld, token);
        Ok(())
    }

    /// `new C(args)`, honouring constructor arity and the return-override field.
    pub(super) fn emit_new_class(
        &mut self,
        class: &str,
        scopes: Option<TempId>,
        args: &[TempId],
        result: Option<TempId>,
    ) -> Result<()> {
        let info = self.class_info(class)?;
        let constructor = &info.constructor;
        if args.len() < constructor.min_args {
            return Err(CilError::not_supported(format!(
                "class {} expects {}..{} constructor arguments but {} were supplied",
                class,
                constructor.min_args,
                constructor.max_args,
                args.len()
            )));
        }

        if constructor.captures_scopes {
            match scopes {
                Some(scopes) => self.load_as(scopes, &TypeRef::ObjectArray)?,
                None => self.il.op(OpCode::Ldnull),
            }
        }
        self.load_padded_args(args, &constructor.params)?;
        self.emit_call(OpCode::Newobj, &constructor.method_ref(&info.ty));

        let mut pushed = info.ty.clone();
        if let Some(name) = info.return_override_field.as_deref() {
            let field = info.field_ref(name).ok_or_else(|| {
                CilError::Internal(eyre!(
                    "return override field {} is not a field of class {}",
                    name,
                    class
                ))
            })?;
            self.emit_return_override(&field)?;
            pushed = TypeRef::Object;
        }
        self.store_result(result, Some(pushed))
    }

    /// With the new instance on the stack, substitutes the override value when
    /// it is object-like.
    fn emit_return_override(&mut self, field: &FieldRef) -> Result<()> {
        let replace = self.il.define_label();
        let done = self.il.define_label();
        let field_token = self.services.tokens.field_token(field);

        self.il.op(OpCode::Dup);
        self.il.token(OpCode::Ldfld, field_token);
        self.il.op(OpCode::Dup);
        self.call_runtime(RuntimeMethod::IsObjectLike);
        self.il.branch(OpCode::Brtrue, replace);
        self.il.op(OpCode::Pop);
        self.il.branch(OpCode::Br, done);

        self.il.mark_label(replace)?;
        let scratch = self.scratch_local(TypeRef::Object)?;
        self.il.stloc(scratch);
        self.il.op(OpCode::Pop);
        self.il.ldloc(scratch);

        self.il.mark_label(done)?;
        Ok(())
    }
}
