//! Instruction-stream builder with symbolic labels, locals and protected regions.

use crate::artifact::{ClauseKind, ExceptionClause};
use crate::encode::{encode_code, instruction_offsets};
use crate::error::{CilError, Result};
use crate::opcode::{CallSite, Instruction, Label, OpCode, Operand};
use crate::stack::{verify_stack, EntryPoint};
use fp_core::metadata::{Token, TypeRef};

/// A try block and its single handler, delimited by labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectedRegion {
    pub kind: ClauseKind,
    pub try_start: Label,
    /// End of the try block, which is also where the handler begins.
    pub handler_start: Label,
    pub handler_end: Label,
    pub catch_type: Token,
}

/// A finished instruction stream with every label resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledBody {
    pub instructions: Vec<Instruction>,
    /// Instruction index of each label, indexed by label id.
    pub label_positions: Vec<usize>,
    /// Byte offset of each instruction plus the end of the code.
    pub offsets: Vec<u32>,
    pub code: Vec<u8>,
    pub max_stack: u16,
    /// Stack depth on entry to each instruction; `None` when unreachable.
    pub depths: Vec<Option<u16>>,
    pub locals: Vec<TypeRef>,
    pub clauses: Vec<ExceptionClause>,
}

impl AssembledBody {
    /// Labels marked at instruction `index`.
    pub fn labels_at(&self, index: usize) -> impl Iterator<Item = Label> + '_ {
        self.label_positions
            .iter()
            .enumerate()
            .filter(move |(_, position)| **position == index)
            .map(|(label, _)| Label(label as u32))
    }
}

#[derive(Debug, Default)]
pub struct IlBuilder {
    instructions: Vec<Instruction>,
    labels: Vec<Option<usize>>,
    locals: Vec<TypeRef>,
    regions: Vec<ProtectedRegion>,
}

impl IlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    pub fn mark_label(&mut self, label: Label) -> Result<()> {
        let position = self.instructions.len();
        match self.labels.get_mut(label.0 as usize) {
            Some(slot) if slot.is_none() => {
                *slot = Some(position);
                Ok(())
            }
            Some(_) => Err(CilError::internal(format!(
                "IL label {} marked twice",
                label.0
            ))),
            None => Err(CilError::internal(format!(
                "IL label {} was never defined",
                label.0
            ))),
        }
    }

    pub fn declare_local(&mut self, ty: TypeRef) -> Result<u16> {
        let slot = u16::try_from(self.locals.len())
            .map_err(|_| CilError::not_supported("more than 65535 locals in one method"))?;
        self.locals.push(ty);
        Ok(slot)
    }

    pub fn local_type(&self, slot: u16) -> Option<&TypeRef> {
        self.locals.get(slot as usize)
    }

    pub fn add_region(&mut self, region: ProtectedRegion) {
        self.regions.push(region);
    }

    /// The last emitted instruction never falls through.
    pub fn ends_in_transfer(&self) -> bool {
        self.instructions
            .last()
            .is_some_and(|instruction| instruction.op.ends_flow())
    }

    /// No label is marked after the last instruction.
    pub fn at_unlabelled_end(&self) -> bool {
        let end = self.instructions.len();
        !self.labels.iter().any(|position| *position == Some(end))
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn emit(&mut self, op: OpCode, operand: Operand) {
        self.instructions.push(Instruction::new(op, operand));
    }

    pub fn op(&mut self, op: OpCode) {
        self.emit(op, Operand::None);
    }

    pub fn ldc_i4(&mut self, value: i32) {
        self.emit(OpCode::LdcI4, Operand::Int(value));
    }

    pub fn ldc_r8(&mut self, value: f64) {
        self.emit(OpCode::LdcR8, Operand::Float(value));
    }

    pub fn ldloc(&mut self, slot: u16) {
        self.emit(OpCode::Ldloc, Operand::Local(slot));
    }

    pub fn stloc(&mut self, slot: u16) {
        self.emit(OpCode::Stloc, Operand::Local(slot));
    }

    pub fn ldarg(&mut self, arg: u16) {
        self.emit(OpCode::Ldarg, Operand::Arg(arg));
    }

    pub fn starg(&mut self, arg: u16) {
        self.emit(OpCode::Starg, Operand::Arg(arg));
    }

    pub fn branch(&mut self, op: OpCode, target: Label) {
        debug_assert!(op.is_branch());
        self.emit(op, Operand::Label(target));
    }

    pub fn switch(&mut self, targets: Vec<Label>) {
        self.emit(OpCode::Switch, Operand::Switch(targets));
    }

    pub fn token(&mut self, op: OpCode, token: Token) {
        self.emit(op, Operand::Token(token));
    }

    pub fn call(&mut self, op: OpCode, token: Token, pops: u16, pushes: u16) {
        self.emit(op, Operand::Call(CallSite { token, pops, pushes }));
    }

    pub fn finish(self, returns_value: bool) -> Result<AssembledBody> {
        let IlBuilder {
            instructions,
            labels,
            locals,
            regions,
        } = self;
        let label_positions = labels
            .iter()
            .enumerate()
            .map(|(label, position)| {
                position.ok_or_else(|| {
                    CilError::internal(format!("IL label {} defined but never marked", label))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let handler_entries: Vec<EntryPoint> = regions
            .iter()
            .map(|region| EntryPoint {
                index: label_positions[region.handler_start.0 as usize],
                depth: match region.kind {
                    ClauseKind::Catch => 1,
                    ClauseKind::Finally => 0,
                },
            })
            .collect();
        let report = verify_stack(
            &instructions,
            &label_positions,
            &handler_entries,
            returns_value,
        )?;

        let offsets = instruction_offsets(&instructions);
        let code = encode_code(&instructions, &label_positions, &offsets)?;

        let offset_of = |label: Label| offsets[label_positions[label.0 as usize]];
        let mut clauses: Vec<ExceptionClause> = regions
            .iter()
            .map(|region| {
                let try_offset = offset_of(region.try_start);
                let handler_offset = offset_of(region.handler_start);
                let handler_end = offset_of(region.handler_end);
                ExceptionClause {
                    kind: region.kind,
                    try_offset,
                    try_length: handler_offset - try_offset,
                    handler_offset,
                    handler_length: handler_end - handler_offset,
                    class_token: region.catch_type,
                }
            })
            .collect();
        // Nested clauses must precede the clauses enclosing them.
        clauses.sort_by_key(|clause| {
            clause.handler_offset + clause.handler_length - clause.try_offset
        });

        Ok(AssembledBody {
            instructions,
            label_positions,
            offsets,
            code,
            max_stack: report.max_stack,
            depths: report.depths,
            locals,
            clauses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_resolves_labels_and_stack_depth() {
        let mut il = IlBuilder::new();
        let done = il.define_label();
        il.ldc_i4(1);
        il.branch(OpCode::Brfalse, done);
        il.ldc_r8(2.0);
        il.op(OpCode::Pop);
        il.mark_label(done).unwrap();
        il.op(OpCode::Ret);
        let body = il.finish(false).unwrap();
        assert_eq!(body.label_positions, vec![4]);
        assert_eq!(body.max_stack, 1);
        assert_eq!(body.labels_at(4).collect::<Vec<_>>(), vec![done]);
    }

    #[test]
    fn unmarked_label_is_an_internal_error() {
        let mut il = IlBuilder::new();
        let _ = il.define_label();
        il.op(OpCode::Ret);
        assert!(matches!(il.finish(false), Err(CilError::Internal(_))));
    }

    #[test]
    fn regions_become_clauses_with_byte_offsets() {
        let mut il = IlBuilder::new();
        let try_start = il.define_label();
        let handler = il.define_label();
        let end = il.define_label();
        il.mark_label(try_start).unwrap();
        il.emit(OpCode::Leave, Operand::Label(end));
        il.mark_label(handler).unwrap();
        il.op(OpCode::Pop);
        il.emit(OpCode::Leave, Operand::Label(end));
        il.mark_label(end).unwrap();
        il.op(OpCode::Ret);
        il.add_region(ProtectedRegion {
            kind: ClauseKind::Catch,
            try_start,
            handler_start: handler,
            handler_end: end,
            catch_type: Token(0x0100_0001),
        });
        let body = il.finish(false).unwrap();
        assert_eq!(body.clauses.len(), 1);
        let clause = body.clauses[0];
        assert_eq!((clause.try_offset, clause.try_length), (0, 5));
        assert_eq!((clause.handler_offset, clause.handler_length), (5, 6));
    }
}
