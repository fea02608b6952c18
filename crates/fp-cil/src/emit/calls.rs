//! Call sites: functions, closures, dynamic members, typed members, intrinsics.

use super::MethodEmitter;
use crate::error::{CilError, Result};
use crate::intrinsics;
use crate::opcode::OpCode;
use crate::registry::{ClassInfo, ClassMethodInfo};
use crate::runtime::RuntimeMethod;
use eyre::eyre;
use fp_core::lir::TempId;
use fp_core::metadata::{MethodRef, TypeRef};
use std::sync::Arc;
use tracing::trace;

impl MethodEmitter<'_> {
    /// Loads `args` against `params`: missing trailing arguments become the
    /// undefined sentinel, arguments past the declared count are not passed.
    pub(super) fn load_padded_args(&mut self, args: &[TempId], params: &[TypeRef]) -> Result<()> {
        for (index, param) in params.iter().enumerate() {
            match args.get(index) {
                Some(arg) => self.load_as(*arg, param)?,
                None => self.push_undefined(param),
            }
        }
        if args.len() > params.len() {
            trace!(
                supplied = args.len(),
                declared = params.len(),
                "dropping surplus call arguments"
            );
        }
        Ok(())
    }

    pub(super) fn emit_call_function(
        &mut self,
        function: &str,
        scopes: Option<TempId>,
        args: &[TempId],
        result: Option<TempId>,
    ) -> Result<()> {
        let info = self.services.program.function(function).ok_or_else(|| {
            CilError::Internal(eyre!("call to unregistered function {}", function))
        })?;
        if info.takes_scopes {
            match scopes {
                Some(scopes) => self.load_as(scopes, &TypeRef::ObjectArray)?,
                None => self.il.op(OpCode::Ldnull),
            }
        }
        self.load_padded_args(args, &info.params)?;
        let method = info.method_ref();
        self.emit_call(OpCode::Call, &method);
        self.store_result(result, method.sig.returns)
    }

    pub(super) fn emit_call_closure(
        &mut self,
        callee: TempId,
        args: &[TempId],
        result: Option<TempId>,
    ) -> Result<()> {
        self.load_object(callee)?;
        self.emit_object_array(args)?;
        let pushed = self.call_runtime(RuntimeMethod::InvokeClosure);
        self.store_result(result, pushed)
    }

    pub(super) fn emit_call_member(
        &mut self,
        receiver: TempId,
        name: &str,
        args: &[TempId],
        result: Option<TempId>,
    ) -> Result<()> {
        self.emit_dynamic_member_call(receiver, name, args)?;
        self.store_result(result, Some(TypeRef::Object))
    }

    /// `Operators.CallMember(receiver, name, args)`, leaving its result pushed.
    fn emit_dynamic_member_call(
        &mut self,
        receiver: TempId,
        name: &str,
        args: &[TempId],
    ) -> Result<()> {
        self.load_object(receiver)?;
        self.load_string(name);
        self.emit_object_array(args)?;
        self.call_runtime(RuntimeMethod::CallMember);
        Ok(())
    }

    fn typed_target(
        &self,
        class: &str,
        method: &str,
    ) -> Result<(Arc<ClassInfo>, ClassMethodInfo, MethodRef)> {
        let info = self
            .services
            .program
            .class(class)
            .ok_or_else(|| CilError::Internal(eyre!("typed call on unregistered class {}", class)))?;
        let signature = info.methods.get(method).cloned();
        let method_ref = info.method_ref(method);
        match (signature, method_ref) {
            (Some(signature), Some(method_ref)) => Ok((info, signature, method_ref)),
            _ => Err(CilError::Internal(eyre!(
                "class {} declares no method {}",
                class,
                method
            ))),
        }
    }

    pub(super) fn emit_call_typed(
        &mut self,
        receiver: TempId,
        class: &str,
        method: &str,
        args: &[TempId],
        result: Option<TempId>,
    ) -> Result<()> {
        let (info, signature, method_ref) = self.typed_target(class, method)?;
        self.load_as(receiver, &info.ty)?;
        self.load_padded_args(args, &signature.params)?;
        self.emit_call(OpCode::Callvirt, &method_ref);
        self.store_result(result, signature.returns)
    }

    /// Typed call guarded by `isinst`, falling back to dynamic dispatch.
    ///
    /// Both paths reach the join with exactly one `object` on the stack.
    pub(super) fn emit_call_typed_with_fallback(
        &mut self,
        receiver: TempId,
        class: &str,
        method: &str,
        args: &[TempId],
        result: Option<TempId>,
    ) -> Result<()> {
        let (info, signature, method_ref) = self.typed_target(class, method)?;
        let fallback = self.il.define_label();
        let join = self.il.define_label();

        self.load_object(receiver)?;
        let class_token = self.services.tokens.type_token(&info.ty);
        self.il.token(OpCode::Isinst, class_token);
        self.il.op(OpCode::Dup);
        self.il.branch(OpCode::Brfalse, fallback);

        self.load_padded_args(args, &signature.params)?;
        self.emit_call(OpCode::Callvirt, &method_ref);
        match &signature.returns {
            Some(returns) => self.coerce(returns, &TypeRef::Object)?,
            None => self.il.op(OpCode::Ldnull),
        }
        self.il.branch(OpCode::Br, join);

        self.il.mark_label(fallback)?;
        self.il.op(OpCode::Pop);
        self.emit_dynamic_member_call(receiver, method, args)?;

        self.il.mark_label(join)?;
        self.store_result(result, Some(TypeRef::Object))
    }

    pub(super) fn emit_call_intrinsic(
        &mut self,
        owner: Option<&str>,
        name: &str,
        args: &[TempId],
        result: Option<TempId>,
    ) -> Result<()> {
        let overload = intrinsics::resolve(owner, name, args.len()).ok_or_else(|| {
            CilError::invalid_operation(format!(
                "no runtime member for intrinsic {} with {} arguments",
                intrinsics::display_name(owner, name),
                args.len()
            ))
        })?;
        let fixed: Vec<TypeRef> = overload
            .fixed_params()
            .iter()
            .map(|shape| shape.type_ref())
            .collect();
        self.load_padded_args(&args[..args.len().min(fixed.len())], &fixed)?;
        if overload.is_variadic() {
            let rest = args.get(fixed.len()..).unwrap_or(&[]);
            self.emit_object_array(rest)?;
        }
        let method = overload.method_ref();
        self.emit_call(OpCode::Call, &method);
        self.store_result(result, overload.return_type())
    }
}
