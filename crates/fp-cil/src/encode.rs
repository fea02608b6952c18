//! Binary encoding of method bodies: opcodes, header and exception section.

use crate::artifact::{ClauseKind, ExceptionClause};
use crate::error::{CilError, Result};
use crate::opcode::{Instruction, Label, OpCode, Operand};
use bytes::{BufMut, BytesMut};
use fp_core::metadata::Token;

const TINY_FORMAT: u8 = 0x2;
const FAT_FORMAT: u16 = 0x3;
const FAT_HEADER_DWORDS: u16 = 3 << 12;
const MORE_SECTS: u16 = 0x8;
const INIT_LOCALS: u16 = 0x10;
const SECTION_EH_TABLE: u8 = 0x1;
const SECTION_FAT_FORMAT: u8 = 0x40;
const FAT_CLAUSE_SIZE: u32 = 24;

/// Byte offset of every instruction, plus the end offset of the code.
pub fn instruction_offsets(instructions: &[Instruction]) -> Vec<u32> {
    let mut offsets = Vec::with_capacity(instructions.len() + 1);
    let mut offset = 0u32;
    for instruction in instructions {
        offsets.push(offset);
        offset += instruction.encoded_len() as u32;
    }
    offsets.push(offset);
    offsets
}

/// Encodes the instruction stream, resolving labels to relative offsets.
pub fn encode_code(
    instructions: &[Instruction],
    label_positions: &[usize],
    offsets: &[u32],
) -> Result<Vec<u8>> {
    let code_size = offsets.last().copied().unwrap_or(0);
    let mut buf = Vec::with_capacity(code_size as usize);
    let target_offset = |label: Label| -> Result<i64> {
        label_positions
            .get(label.0 as usize)
            .and_then(|index| offsets.get(*index))
            .map(|offset| i64::from(*offset))
            .ok_or_else(|| CilError::internal(format!("label {} was never marked", label.0)))
    };

    for (index, instruction) in instructions.iter().enumerate() {
        let next = i64::from(offsets[index + 1]);
        let relative = |label: Label| -> Result<i32> {
            Ok((target_offset(label)? - next) as i32)
        };
        match (instruction.op, &instruction.operand) {
            (OpCode::Ldarg, Operand::Arg(arg)) => match *arg {
                0..=3 => buf.put_u8(0x02 + *arg as u8),
                4..=255 => {
                    buf.put_u8(0x0E);
                    buf.put_u8(*arg as u8);
                }
                _ => {
                    buf.put_slice(&[0xFE, 0x09]);
                    buf.put_u16_le(*arg);
                }
            },
            (OpCode::Starg, Operand::Arg(arg)) => {
                if *arg <= 255 {
                    buf.put_u8(0x10);
                    buf.put_u8(*arg as u8);
                } else {
                    buf.put_slice(&[0xFE, 0x0B]);
                    buf.put_u16_le(*arg);
                }
            }
            (OpCode::Ldloc, Operand::Local(local)) => match *local {
                0..=3 => buf.put_u8(0x06 + *local as u8),
                4..=255 => {
                    buf.put_u8(0x11);
                    buf.put_u8(*local as u8);
                }
                _ => {
                    buf.put_slice(&[0xFE, 0x0C]);
                    buf.put_u16_le(*local);
                }
            },
            (OpCode::Stloc, Operand::Local(local)) => match *local {
                0..=3 => buf.put_u8(0x0A + *local as u8),
                4..=255 => {
                    buf.put_u8(0x13);
                    buf.put_u8(*local as u8);
                }
                _ => {
                    buf.put_slice(&[0xFE, 0x0E]);
                    buf.put_u16_le(*local);
                }
            },
            (OpCode::LdcI4, Operand::Int(value)) => match *value {
                -1 => buf.put_u8(0x15),
                0..=8 => buf.put_u8(0x16 + *value as u8),
                -128..=127 => {
                    buf.put_u8(0x1F);
                    buf.put_i8(*value as i8);
                }
                _ => {
                    buf.put_u8(0x20);
                    buf.put_i32_le(*value);
                }
            },
            (OpCode::LdcR8, Operand::Float(value)) => {
                buf.put_u8(0x23);
                buf.put_f64_le(*value);
            }
            (OpCode::Br | OpCode::Brfalse | OpCode::Brtrue | OpCode::Leave, Operand::Label(label)) => {
                buf.put_u8(match instruction.op {
                    OpCode::Br => 0x38,
                    OpCode::Brfalse => 0x39,
                    OpCode::Brtrue => 0x3A,
                    _ => 0xDD,
                });
                buf.put_i32_le(relative(*label)?);
            }
            (OpCode::Switch, Operand::Switch(targets)) => {
                buf.put_u8(0x45);
                buf.put_u32_le(targets.len() as u32);
                for target in targets {
                    buf.put_i32_le(relative(*target)?);
                }
            }
            (op, Operand::Token(token)) => {
                buf.put_u8(token_opcode(op).ok_or_else(|| operand_mismatch(instruction))?);
                buf.put_u32_le(token.0);
            }
            (op @ (OpCode::Call | OpCode::Callvirt | OpCode::Newobj), Operand::Call(site)) => {
                buf.put_u8(match op {
                    OpCode::Call => 0x28,
                    OpCode::Callvirt => 0x6F,
                    _ => 0x73,
                });
                buf.put_u32_le(site.token.0);
            }
            (op, Operand::None) => match simple_opcode(op) {
                Some([0xFE, second]) => buf.put_slice(&[0xFE, second]),
                Some([byte, _]) => buf.put_u8(byte),
                None => return Err(operand_mismatch(instruction)),
            },
            _ => return Err(operand_mismatch(instruction)),
        }
        debug_assert_eq!(buf.len() as u32, offsets[index + 1]);
    }
    Ok(buf)
}

fn operand_mismatch(instruction: &Instruction) -> CilError {
    CilError::internal(format!(
        "{} cannot take operand {:?}",
        instruction.mnemonic(),
        instruction.operand
    ))
}

fn token_opcode(op: OpCode) -> Option<u8> {
    let byte = match op {
        OpCode::Ldstr => 0x72,
        OpCode::Box => 0x8C,
        OpCode::UnboxAny => 0xA5,
        OpCode::Castclass => 0x74,
        OpCode::Isinst => 0x75,
        OpCode::Ldfld => 0x7B,
        OpCode::Stfld => 0x7D,
        OpCode::Newarr => 0x8D,
        _ => return None,
    };
    Some(byte)
}

/// Encoding of operand-less opcodes; two-byte forms start with `0xFE`.
fn simple_opcode(op: OpCode) -> Option<[u8; 2]> {
    let single = |byte: u8| Some([byte, 0]);
    match op {
        OpCode::Nop => single(0x00),
        OpCode::Ldnull => single(0x14),
        OpCode::Dup => single(0x25),
        OpCode::Pop => single(0x26),
        OpCode::Ret => single(0x2A),
        OpCode::Add => single(0x58),
        OpCode::Sub => single(0x59),
        OpCode::Mul => single(0x5A),
        OpCode::Div => single(0x5B),
        OpCode::Rem => single(0x5D),
        OpCode::And => single(0x5F),
        OpCode::Or => single(0x60),
        OpCode::Xor => single(0x61),
        OpCode::Shl => single(0x62),
        OpCode::Shr => single(0x63),
        OpCode::ShrUn => single(0x64),
        OpCode::Neg => single(0x65),
        OpCode::Not => single(0x66),
        OpCode::ConvI4 => single(0x69),
        OpCode::ConvR8 => single(0x6C),
        OpCode::ConvRUn => single(0x76),
        OpCode::Throw => single(0x7A),
        OpCode::Ldlen => single(0x8E),
        OpCode::LdelemRef => single(0x9A),
        OpCode::StelemRef => single(0xA2),
        OpCode::Endfinally => single(0xDC),
        OpCode::Ceq => Some([0xFE, 0x01]),
        OpCode::Cgt => Some([0xFE, 0x02]),
        OpCode::CgtUn => Some([0xFE, 0x03]),
        OpCode::Clt => Some([0xFE, 0x04]),
        OpCode::CltUn => Some([0xFE, 0x05]),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodHeader {
    pub max_stack: u16,
    pub code_size: u32,
    pub local_signature: Token,
    pub init_locals: bool,
}

impl MethodHeader {
    pub fn is_tiny(&self, has_clauses: bool) -> bool {
        self.code_size < 64
            && self.max_stack <= 8
            && self.local_signature.is_nil()
            && !has_clauses
    }
}

/// Writes header, code and exception section. `buf` must start 4-byte aligned.
pub fn write_method_body(
    buf: &mut BytesMut,
    header: &MethodHeader,
    code: &[u8],
    clauses: &[ExceptionClause],
) -> Result<()> {
    let start = buf.len();
    if header.is_tiny(!clauses.is_empty()) {
        buf.put_u8(((header.code_size as u8) << 2) | TINY_FORMAT);
        buf.put_slice(code);
        return Ok(());
    }

    let mut flags = FAT_FORMAT | FAT_HEADER_DWORDS;
    if !clauses.is_empty() {
        flags |= MORE_SECTS;
    }
    if header.init_locals {
        flags |= INIT_LOCALS;
    }
    buf.put_u16_le(flags);
    buf.put_u16_le(header.max_stack);
    buf.put_u32_le(header.code_size);
    buf.put_u32_le(header.local_signature.0);
    buf.put_slice(code);

    if clauses.is_empty() {
        return Ok(());
    }
    while (buf.len() - start) % 4 != 0 {
        buf.put_u8(0);
    }
    let data_size = clauses.len() as u32 * FAT_CLAUSE_SIZE + 4;
    if data_size > 0x00FF_FFFF {
        return Err(CilError::internal(format!(
            "{} exception clauses overflow the section size",
            clauses.len()
        )));
    }
    buf.put_u8(SECTION_EH_TABLE | SECTION_FAT_FORMAT);
    buf.put_u8(data_size as u8);
    buf.put_u16_le((data_size >> 8) as u16);
    for clause in clauses {
        buf.put_u32_le(match clause.kind {
            ClauseKind::Catch => 0,
            ClauseKind::Finally => 2,
        });
        buf.put_u32_le(clause.try_offset);
        buf.put_u32_le(clause.try_length);
        buf.put_u32_le(clause.handler_offset);
        buf.put_u32_le(clause.handler_length);
        buf.put_u32_le(clause.class_token.0);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::CallSite;

    fn ins(op: OpCode, operand: Operand) -> Instruction {
        Instruction::new(op, operand)
    }

    #[test]
    fn short_forms_and_branch_offsets() {
        let code = vec![
            ins(OpCode::Ldarg, Operand::Arg(0)),
            ins(OpCode::Brfalse, Operand::Label(Label(0))),
            ins(OpCode::LdcI4, Operand::Int(100)),
            ins(OpCode::Ret, Operand::None),
            ins(OpCode::LdcI4, Operand::Int(-1)),
            ins(OpCode::Ret, Operand::None),
        ];
        let offsets = instruction_offsets(&code);
        assert_eq!(offsets, vec![0, 1, 6, 8, 9, 10, 11]);
        let bytes = encode_code(&code, &[4], &offsets).unwrap();
        assert_eq!(
            bytes,
            vec![0x02, 0x39, 0x03, 0x00, 0x00, 0x00, 0x1F, 0x64, 0x2A, 0x15, 0x2A]
        );
    }

    #[test]
    fn switch_targets_are_relative_to_the_end_of_the_switch() {
        let code = vec![
            ins(OpCode::Ldloc, Operand::Local(0)),
            ins(OpCode::Switch, Operand::Switch(vec![Label(0), Label(1)])),
            ins(OpCode::Ret, Operand::None),
            ins(OpCode::Ret, Operand::None),
        ];
        let offsets = instruction_offsets(&code);
        let bytes = encode_code(&code, &[2, 3], &offsets).unwrap();
        assert_eq!(
            bytes,
            vec![
                0x06, 0x45, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
                0x00, 0x2A, 0x2A
            ]
        );
    }

    #[test]
    fn two_byte_compares_and_call_tokens() {
        let code = vec![
            ins(OpCode::CgtUn, Operand::None),
            ins(
                OpCode::Call,
                Operand::Call(CallSite {
                    token: Token(0x0A00_0002),
                    pops: 0,
                    pushes: 0,
                }),
            ),
        ];
        let offsets = instruction_offsets(&code);
        let bytes = encode_code(&code, &[], &offsets).unwrap();
        assert_eq!(bytes, vec![0xFE, 0x03, 0x28, 0x02, 0x00, 0x00, 0x0A]);
    }

    #[test]
    fn mismatched_operand_is_rejected() {
        let code = vec![ins(OpCode::Ldfld, Operand::None)];
        let offsets = instruction_offsets(&code);
        assert!(encode_code(&code, &[], &offsets).is_err());
    }

    #[test]
    fn small_bodies_use_the_tiny_header() {
        let mut buf = BytesMut::new();
        let header = MethodHeader {
            max_stack: 1,
            code_size: 1,
            local_signature: Token::NIL,
            init_locals: true,
        };
        write_method_body(&mut buf, &header, &[0x2A], &[]).unwrap();
        assert_eq!(&buf[..], &[0x06, 0x2A]);
    }

    #[test]
    fn exception_clauses_force_a_fat_header_and_aligned_section() {
        let mut buf = BytesMut::new();
        let header = MethodHeader {
            max_stack: 1,
            code_size: 3,
            local_signature: Token::NIL,
            init_locals: false,
        };
        let clause = ExceptionClause {
            kind: ClauseKind::Finally,
            try_offset: 0,
            try_length: 1,
            handler_offset: 1,
            handler_length: 1,
            class_token: Token::NIL,
        };
        write_method_body(&mut buf, &header, &[0x00, 0xDC, 0x2A], &[clause]).unwrap();
        assert_eq!(&buf[..2], &[0x0B, 0x30]);
        // 12 header bytes + 3 code bytes, padded to 16.
        assert_eq!(buf[16], 0x41);
        assert_eq!(buf[17], 28);
        assert_eq!(buf.len(), 16 + 4 + 24);
    }
}
