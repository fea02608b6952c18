use super::{Epilogue, MethodEmitter};
use crate::error::{CilError, Result};
use crate::opcode::OpCode;
use crate::runtime::{self, RuntimeMethod};
use eyre::eyre;
use fp_core::lir::{ResumableKind, ReturnShape, TempId};

impl MethodEmitter<'_> {
    pub(super) fn emit_return(&mut self, value: Option<TempId>) -> Result<()> {
        if self.regions.in_protected_region() {
            return self.emit_protected_return(value);
        }
        match &self.descriptor.returns {
            ReturnShape::Generator => self.emit_generator_return(value),
            ReturnShape::Async => self.emit_async_return(value),
            ReturnShape::Void => {
                self.il.op(OpCode::Ret);
                Ok(())
            }
            ReturnShape::Value(ty) => {
                let ty = ty.clone();
                match value {
                    Some(value) => self.load_as(value, &ty)?,
                    None => self.push_undefined(&ty),
                }
                self.il.op(OpCode::Ret);
                Ok(())
            }
        }
    }

    /// `ret` is not allowed inside a protected block: park the value and
    /// `leave` to the shared epilogue.
    fn emit_protected_return(&mut self, value: Option<TempId>) -> Result<()> {
        if self.descriptor.is_resumable() {
            return Err(CilError::not_supported(format!(
                "return inside try/catch/finally of async or generator {}",
                self.descriptor.name
            )));
        }
        if self.regions.in_finally_handler() {
            return Err(CilError::not_supported(format!(
                "return from a finally block in {}",
                self.descriptor.name
            )));
        }
        let epilogue = self.epilogue()?;
        if let (Some(slot), Some(ty)) = (epilogue.slot, self.descriptor.return_type()) {
            match value {
                Some(value) => self.load_as(value, &ty)?,
                None => self.push_undefined(&ty),
            }
            self.il.stloc(slot);
        }
        self.il.branch(OpCode::Leave, epilogue.label);
        Ok(())
    }

    fn epilogue(&mut self) -> Result<Epilogue> {
        if let Some(epilogue) = self.epilogue {
            return Ok(epilogue);
        }
        let slot = match self.descriptor.return_type() {
            Some(ty) => Some(self.il.declare_local(ty)?),
            None => None,
        };
        let epilogue = Epilogue {
            label: self.il.define_label(),
            slot,
        };
        self.epilogue = Some(epilogue);
        Ok(epilogue)
    }

    fn load_object_or_null(&mut self, value: Option<TempId>) -> Result<()> {
        match value {
            Some(value) => self.load_object(value),
            None => {
                self.il.op(OpCode::Ldnull);
                Ok(())
            }
        }
    }

    /// `return v` in a generator: `{ value: v, done: true }`.
    fn emit_generator_return(&mut self, value: Option<TempId>) -> Result<()> {
        if self.body.resumable.is_some() {
            let leaf = self.leaf_slot()?;
            let done = runtime::generator_base_field(runtime::GENERATOR_DONE_FIELD)
                .ok_or_else(|| CilError::Internal(eyre!("generator done field is not defined")))?;
            self.il.ldloc(leaf);
            self.il.ldc_i4(1);
            let token = self.services.tokens.field_token(&done);
            self.il.token(OpCode::Stfld, token);
        }
        self.load_object_or_null(value)?;
        self.il.ldc_i4(1);
        self.call_runtime(RuntimeMethod::IteratorResultCreate);
        self.il.op(OpCode::Ret);
        Ok(())
    }

    fn emit_async_return(&mut self, value: Option<TempId>) -> Result<()> {
        let suspends = self
            .body
            .resumable
            .as_ref()
            .is_some_and(|info| info.kind == ResumableKind::Async && info.has_await);
        if !suspends {
            // Nothing ever awaited: hand back an already-settled promise.
            self.load_object_or_null(value)?;
            self.call_runtime(RuntimeMethod::PromiseResolve);
            self.il.op(OpCode::Ret);
            return Ok(());
        }

        let leaf = self.leaf_slot()?;
        self.store_completed_state(leaf)?;
        self.load_deferred(leaf)?;
        self.call_runtime(RuntimeMethod::DeferredResolve);
        self.load_object_or_null(value)?;
        self.call_runtime(RuntimeMethod::InvokeClosure1);
        self.il.op(OpCode::Pop);
        self.load_deferred_promise(leaf)?;
        self.il.op(OpCode::Ret);
        Ok(())
    }
}
