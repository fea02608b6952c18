//! Evaluation-stack verification over an instruction stream.
//!
//! Every reachable instruction must be entered with one consistent stack depth,
//! no instruction may pop more than is available, and `ret` must leave nothing
//! behind. The deepest point reached becomes the method's max stack.

use crate::error::{CilError, Result};
use crate::opcode::{Instruction, OpCode};

/// Where execution may start other than instruction 0: handler entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    pub index: usize,
    pub depth: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackReport {
    pub max_stack: u16,
    /// Depth on entry to each instruction; `None` when unreachable.
    pub depths: Vec<Option<u16>>,
}

impl StackReport {
    pub fn depth_at(&self, index: usize) -> Option<u16> {
        self.depths.get(index).copied().flatten()
    }
}

pub fn verify_stack(
    instructions: &[Instruction],
    label_positions: &[usize],
    handler_entries: &[EntryPoint],
    returns_value: bool,
) -> Result<StackReport> {
    let mut depths: Vec<Option<u16>> = vec![None; instructions.len() + 1];
    let mut max_stack = 0u16;
    let mut worklist: Vec<(usize, u16)> = vec![(0, 0)];
    worklist.extend(handler_entries.iter().map(|entry| (entry.index, entry.depth)));

    while let Some((start, depth)) = worklist.pop() {
        let mut index = start;
        let mut depth = depth;
        loop {
            if index >= instructions.len() {
                if !instructions.is_empty() {
                    return Err(CilError::StackImbalance {
                        index,
                        mnemonic: "<end>",
                        message: "control falls off the end of the body".to_string(),
                    });
                }
                break;
            }
            match depths[index] {
                Some(seen) if seen == depth => break,
                Some(seen) => {
                    return Err(imbalance(
                        instructions,
                        index,
                        format!("entered with depth {} and {}", seen, depth),
                    ));
                }
                None => depths[index] = Some(depth),
            }
            max_stack = max_stack.max(depth);

            let instruction = &instructions[index];
            let (pops, pushes) = instruction.stack_effect(returns_value);
            if pops > depth {
                return Err(imbalance(
                    instructions,
                    index,
                    format!("pops {} with only {} on the stack", pops, depth),
                ));
            }
            depth = depth - pops + pushes;
            max_stack = max_stack.max(depth);

            match instruction.op {
                OpCode::Ret if depth != 0 => {
                    return Err(imbalance(
                        instructions,
                        index,
                        format!("returns with {} extra values on the stack", depth),
                    ));
                }
                OpCode::Endfinally if depth != 0 => {
                    return Err(imbalance(
                        instructions,
                        index,
                        format!("leaves a finally handler with depth {}", depth),
                    ));
                }
                OpCode::Leave => depth = 0,
                _ => {}
            }

            for target in instruction.targets() {
                let position = label_positions
                    .get(target.0 as usize)
                    .copied()
                    .ok_or_else(|| {
                        CilError::internal(format!("branch to undefined label {}", target.0))
                    })?;
                worklist.push((position, depth));
            }

            if instruction.op.ends_flow() {
                break;
            }
            index += 1;
        }
    }

    depths.truncate(instructions.len());
    Ok(StackReport { max_stack, depths })
}

fn imbalance(instructions: &[Instruction], index: usize, message: String) -> CilError {
    CilError::StackImbalance {
        index,
        mnemonic: instructions[index].mnemonic(),
        message,
    }
}
