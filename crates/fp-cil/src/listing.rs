//! Human-readable rendering of an assembled body.

use crate::artifact::ClauseKind;
use crate::builder::AssembledBody;
use crate::opcode::{Instruction, Label, Operand};
use itertools::Itertools;

pub fn format_listing(body: &AssembledBody) -> String {
    let mut output = String::new();
    output.push_str(&format!(".maxstack {}\n", body.max_stack));
    if !body.locals.is_empty() {
        output.push_str(&format!(
            ".locals ({})\n",
            body.locals
                .iter()
                .enumerate()
                .map(|(slot, ty)| format!("[{}] {}", slot, ty))
                .join(", ")
        ));
    }
    for (index, instruction) in body.instructions.iter().enumerate() {
        for label in body.labels_at(index) {
            output.push_str(&format!("  L{}:\n", label.0));
        }
        output.push_str(&format!(
            "    IL_{:04x}: {}\n",
            body.offsets[index],
            format_instruction(instruction, body)
        ));
    }
    for label in body.labels_at(body.instructions.len()) {
        output.push_str(&format!("  L{}:\n", label.0));
    }
    for clause in &body.clauses {
        let handler = match clause.kind {
            ClauseKind::Catch => format!("catch {}", clause.class_token),
            ClauseKind::Finally => "finally".to_string(),
        };
        output.push_str(&format!(
            ".try IL_{:04x} to IL_{:04x} {} handler IL_{:04x} to IL_{:04x}\n",
            clause.try_offset,
            clause.try_offset + clause.try_length,
            handler,
            clause.handler_offset,
            clause.handler_offset + clause.handler_length
        ));
    }
    output
}

fn format_target(label: Label, body: &AssembledBody) -> String {
    match body.label_positions.get(label.0 as usize) {
        Some(position) => format!("L{} (IL_{:04x})", label.0, offset_at(body, *position)),
        None => format!("L{}", label.0),
    }
}

fn offset_at(body: &AssembledBody, index: usize) -> u32 {
    match body.offsets.get(index) {
        Some(offset) => *offset,
        None => body.code.len() as u32,
    }
}

pub fn format_instruction(instruction: &Instruction, body: &AssembledBody) -> String {
    let mnemonic = instruction.mnemonic();
    match &instruction.operand {
        Operand::None => mnemonic.to_string(),
        Operand::Int(value) => format!("{} {}", mnemonic, value),
        Operand::Float(value) => format!("{} {:?}", mnemonic, value),
        Operand::Local(slot) => format!("{} V_{}", mnemonic, slot),
        Operand::Arg(arg) => format!("{} A_{}", mnemonic, arg),
        Operand::Token(token) => format!("{} {}", mnemonic, token),
        Operand::Call(site) => format!(
            "{} {} (pops {}, pushes {})",
            mnemonic, site.token, site.pops, site.pushes
        ),
        Operand::Label(label) => format!("{} {}", mnemonic, format_target(*label, body)),
        Operand::Switch(labels) => format!(
            "{} ({})",
            mnemonic,
            labels
                .iter()
                .map(|label| format_target(*label, body))
                .join(", ")
        ),
    }
}
