use super::MethodEmitter;
use crate::error::Result;
use crate::opcode::OpCode;
use crate::runtime::RuntimeMethod;
use fp_core::lir::{ComparisonKind, NumericOp, TempId};
use fp_core::metadata::TypeRef;

impl MethodEmitter<'_> {
    pub(super) fn emit_numeric_binary(
        &mut self,
        op: NumericOp,
        left: TempId,
        right: TempId,
        result: TempId,
    ) -> Result<()> {
        let opcode = match op {
            NumericOp::Add => OpCode::Add,
            NumericOp::Sub => OpCode::Sub,
            NumericOp::Mul => OpCode::Mul,
            NumericOp::Div => OpCode::Div,
            NumericOp::Rem => OpCode::Rem,
            NumericOp::BitAnd => OpCode::And,
            NumericOp::BitOr => OpCode::Or,
            NumericOp::BitXor => OpCode::Xor,
            NumericOp::Shl => OpCode::Shl,
            NumericOp::Shr => OpCode::Shr,
            NumericOp::UShr => OpCode::ShrUn,
        };
        let floating = matches!(
            op,
            NumericOp::Add | NumericOp::Sub | NumericOp::Mul | NumericOp::Div | NumericOp::Rem
        );
        if floating {
            self.load_as(left, &TypeRef::Number)?;
            self.load_as(right, &TypeRef::Number)?;
            self.il.op(opcode);
            return self.store_result(Some(result), Some(TypeRef::Number));
        }

        // Bitwise operators work on the 32-bit truncation of both operands.
        self.load_int32(left)?;
        self.load_int32(right)?;
        if matches!(op, NumericOp::Shl | NumericOp::Shr | NumericOp::UShr) {
            self.il.ldc_i4(31);
            self.il.op(OpCode::And);
        }
        self.il.op(opcode);
        if op == NumericOp::UShr {
            // The unsigned result must not wrap negative.
            self.il.op(OpCode::ConvRUn);
        }
        self.il.op(OpCode::ConvR8);
        self.store_result(Some(result), Some(TypeRef::Number))
    }

    fn load_int32(&mut self, temp: TempId) -> Result<()> {
        self.load_as(temp, &TypeRef::Number)?;
        self.call_runtime(RuntimeMethod::ToInt32);
        Ok(())
    }

    pub(super) fn emit_negate(&mut self, operand: TempId, result: TempId) -> Result<()> {
        self.load_as(operand, &TypeRef::Number)?;
        self.il.op(OpCode::Neg);
        self.store_result(Some(result), Some(TypeRef::Number))
    }

    pub(super) fn emit_not(&mut self, operand: TempId, result: TempId) -> Result<()> {
        self.load_as(operand, &TypeRef::Boolean)?;
        self.il.ldc_i4(0);
        self.il.op(OpCode::Ceq);
        self.store_result(Some(result), Some(TypeRef::Boolean))
    }

    pub(super) fn emit_bit_not(&mut self, operand: TempId, result: TempId) -> Result<()> {
        self.load_int32(operand)?;
        self.il.op(OpCode::Not);
        self.il.op(OpCode::ConvR8);
        self.store_result(Some(result), Some(TypeRef::Number))
    }

    /// A comparison consumed only by its branch emits nothing here.
    pub(super) fn emit_compare(
        &mut self,
        kind: ComparisonKind,
        left: TempId,
        right: TempId,
        result: TempId,
    ) -> Result<()> {
        if !self.analysis.is_materialized(result)? {
            return Ok(());
        }
        self.emit_comparison(kind, left, right)?;
        self.store_result(Some(result), Some(TypeRef::Boolean))
    }
}
