//! Conditional branches and the comparison idioms fused into them.

use super::MethodEmitter;
use crate::error::{CilError, Result};
use crate::opcode::OpCode;
use eyre::eyre;
use fp_core::lir::{ComparisonKind, LabelId, LirInstruction, TempId};
use fp_core::metadata::TypeRef;
use tracing::trace;

/// Opcodes that turn two loaded operands into a boolean.
///
/// There is no direct less-or-equal, greater-or-equal or not-equal, so those
/// compute the complementary comparison and test it against false. The
/// unordered `.un` forms make `NaN <= x` and `NaN >= x` false.
pub fn comparison_opcodes(kind: ComparisonKind) -> &'static [OpCode] {
    match kind {
        ComparisonKind::NumberLessThan => &[OpCode::Clt],
        ComparisonKind::NumberGreaterThan => &[OpCode::Cgt],
        ComparisonKind::NumberEqual | ComparisonKind::BooleanEqual => &[OpCode::Ceq],
        ComparisonKind::NumberLessThanOrEqual => &[OpCode::CgtUn, OpCode::LdcI4, OpCode::Ceq],
        ComparisonKind::NumberGreaterThanOrEqual => {
            &[OpCode::CltUn, OpCode::LdcI4, OpCode::Ceq]
        }
        ComparisonKind::NumberNotEqual | ComparisonKind::BooleanNotEqual => {
            &[OpCode::Ceq, OpCode::LdcI4, OpCode::Ceq]
        }
    }
}

impl MethodEmitter<'_> {
    /// Loads both operands and leaves the comparison result on the stack.
    pub(super) fn emit_comparison(
        &mut self,
        kind: ComparisonKind,
        left: TempId,
        right: TempId,
    ) -> Result<()> {
        let operand = kind.operand_type();
        self.load_as(left, &operand)?;
        self.load_as(right, &operand)?;
        for op in comparison_opcodes(kind) {
            match op {
                OpCode::LdcI4 => self.il.ldc_i4(0),
                op => self.il.op(*op),
            }
        }
        Ok(())
    }

    pub(super) fn emit_conditional_branch(
        &mut self,
        condition: TempId,
        target: LabelId,
        when: bool,
    ) -> Result<()> {
        let target = self.label(target);
        let op = if when { OpCode::Brtrue } else { OpCode::Brfalse };

        if self.analysis.is_materialized(condition)? {
            self.load_as(condition, &TypeRef::Boolean)?;
            self.il.branch(op, target);
            return Ok(());
        }

        let body = self.body;
        let def = self
            .analysis
            .def_site(condition)
            .and_then(|index| body.instructions.get(index));
        let Some(LirInstruction::Compare {
            kind, left, right, ..
        }) = def
        else {
            return Err(CilError::Internal(eyre!(
                "unmaterialized branch condition {} is not defined by a comparison",
                condition
            )));
        };
        trace!(%condition, ?kind, when, "fusing comparison into branch");
        self.emit_comparison(*kind, *left, *right)?;
        self.il.branch(op, target);
        Ok(())
    }
}
