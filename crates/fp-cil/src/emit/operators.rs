//! Operators whose semantics live in the runtime library.

use super::MethodEmitter;
use crate::error::Result;
use crate::opcode::OpCode;
use crate::runtime::RuntimeMethod;
use fp_core::lir::TempId;

impl MethodEmitter<'_> {
    pub(super) fn emit_runtime_unary(
        &mut self,
        method: RuntimeMethod,
        operand: TempId,
        result: TempId,
    ) -> Result<()> {
        self.load_object(operand)?;
        let pushed = self.call_runtime(method);
        self.store_result(Some(result), pushed)
    }

    pub(super) fn emit_runtime_binary(
        &mut self,
        method: RuntimeMethod,
        left: TempId,
        right: TempId,
        result: TempId,
    ) -> Result<()> {
        self.load_object(left)?;
        self.load_object(right)?;
        let pushed = self.call_runtime(method);
        self.store_result(Some(result), pushed)
    }

    pub(super) fn emit_equality(
        &mut self,
        method: RuntimeMethod,
        left: TempId,
        right: TempId,
        negated: bool,
        result: TempId,
    ) -> Result<()> {
        self.load_object(left)?;
        self.load_object(right)?;
        let pushed = self.call_runtime(method);
        if negated {
            self.il.ldc_i4(0);
            self.il.op(OpCode::Ceq);
        }
        self.store_result(Some(result), pushed)
    }
}
