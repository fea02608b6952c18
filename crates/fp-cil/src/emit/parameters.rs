use super::MethodEmitter;
use crate::error::{CilError, Result};
use eyre::eyre;
use fp_core::lir::TempId;
use fp_core::metadata::TypeRef;

impl MethodEmitter<'_> {
    fn parameter(&self, index: u32) -> Result<(u16, TypeRef)> {
        let arg = self.descriptor.param_arg(index);
        let param = self.descriptor.params.get(index as usize);
        match (arg, param) {
            (Some(arg), Some(param)) => Ok((arg, param.ty.clone())),
            _ => Err(CilError::Internal(eyre!(
                "method {} has no parameter {}",
                self.descriptor.name,
                index
            ))),
        }
    }

    pub(super) fn emit_load_parameter(&mut self, index: u32, result: TempId) -> Result<()> {
        let (arg, ty) = self.parameter(index)?;
        self.il.ldarg(arg);
        self.store_result(Some(result), Some(ty))
    }

    pub(super) fn emit_store_parameter(&mut self, index: u32, value: TempId) -> Result<()> {
        let (arg, ty) = self.parameter(index)?;
        self.load_as(value, &ty)?;
        self.il.starg(arg);
        Ok(())
    }

    pub(super) fn emit_load_this(&mut self, result: TempId) -> Result<()> {
        if !self.descriptor.has_this() {
            return Err(CilError::Internal(eyre!(
                "static method {} has no receiver",
                self.descriptor.name
            )));
        }
        self.il.ldarg(0);
        self.store_result(Some(result), Some(self.descriptor.owner.clone()))
    }

    pub(super) fn emit_load_scopes(&mut self, result: TempId) -> Result<()> {
        let scopes = self.scopes_arg()?;
        self.il.ldarg(scopes);
        self.store_result(Some(result), Some(TypeRef::ObjectArray))
    }
}
