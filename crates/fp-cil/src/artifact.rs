//! Products of a compilation: the compiled body record and the method table.

use crate::encode::{write_method_body, MethodHeader};
use crate::error::Result;
use bytes::{BufMut, Bytes, BytesMut};
use fp_core::metadata::{Token, TypeRef};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClauseKind {
    Catch,
    Finally,
}

/// One exception-handling clause with byte offsets into the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionClause {
    pub kind: ClauseKind,
    pub try_offset: u32,
    pub try_length: u32,
    pub handler_offset: u32,
    pub handler_length: u32,
    /// Caught exception type; nil for finally clauses.
    pub class_token: Token,
}

/// Method attribute flags, with the ECMA-335 bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MethodAttributes(pub u16);

impl MethodAttributes {
    pub const PUBLIC: u16 = 0x0006;
    pub const STATIC: u16 = 0x0010;
    pub const VIRTUAL: u16 = 0x0040;
    pub const HIDE_BY_SIG: u16 = 0x0080;
    pub const SPECIAL_NAME: u16 = 0x0800;
    pub const RT_SPECIAL_NAME: u16 = 0x1000;

    pub fn with(self, flag: u16) -> Self {
        MethodAttributes(self.0 | flag)
    }

    pub fn contains(self, flag: u16) -> bool {
        self.0 & flag == flag
    }

    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }

    pub fn is_virtual(self) -> bool {
        self.contains(Self::VIRTUAL)
    }
}

impl fmt::Display for MethodAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::PUBLIC, "public"),
            (Self::HIDE_BY_SIG, "hidebysig"),
            (Self::STATIC, "static"),
            (Self::VIRTUAL, "virtual"),
            (Self::SPECIAL_NAME, "specialname"),
            (Self::RT_SPECIAL_NAME, "rtspecialname"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str(" ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// The encoded body of one method plus what is needed to place it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodBodyBlob {
    /// Header, code and exception section, ready for the method-body heap.
    pub bytes: Bytes,
    pub code_size: u32,
    pub max_stack: u16,
    pub local_types: Vec<TypeRef>,
    pub local_signature: Token,
    pub exception_clauses: Vec<ExceptionClause>,
}

impl MethodBodyBlob {
    pub fn new(
        code: &[u8],
        max_stack: u16,
        local_types: Vec<TypeRef>,
        local_signature: Token,
        exception_clauses: Vec<ExceptionClause>,
        init_locals: bool,
    ) -> Result<Self> {
        let header = MethodHeader {
            max_stack,
            code_size: code.len() as u32,
            local_signature,
            init_locals,
        };
        let mut buf = BytesMut::with_capacity(12 + code.len());
        write_method_body(&mut buf, &header, code, &exception_clauses)?;
        Ok(Self {
            bytes: buf.freeze(),
            code_size: header.code_size,
            max_stack,
            local_types,
            local_signature,
            exception_clauses,
        })
    }

    pub fn has_tiny_header(&self) -> bool {
        self.bytes.first().is_some_and(|byte| byte & 0x3 == 0x2)
    }
}

/// Everything the caller needs to emit one method-table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledMethodBody {
    pub name: String,
    pub owner: TypeRef,
    pub attributes: MethodAttributes,
    /// Method signature blob.
    pub signature: Vec<u8>,
    pub parameter_names: Vec<String>,
    pub body: MethodBodyBlob,
    /// Textual IL listing of the body.
    pub listing: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDefRow {
    pub token: Token,
    pub owner: TypeRef,
    pub name: String,
    pub attributes: MethodAttributes,
    pub signature: Vec<u8>,
    pub parameter_names: Vec<String>,
    /// Offset of the body inside the table's body heap.
    pub rva: u32,
}

/// Method-definition rows plus the heap their bodies live in.
///
/// Rows are numbered in insertion order; every body starts 4-byte aligned.
#[derive(Debug, Default)]
pub struct MethodTable {
    rows: Vec<MethodDefRow>,
    bodies: BytesMut,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, compiled: CompiledMethodBody) -> Token {
        while self.bodies.len() % 4 != 0 {
            self.bodies.put_u8(0);
        }
        let rva = self.bodies.len() as u32;
        self.bodies.put_slice(&compiled.body.bytes);
        let token = Token::new(
            fp_core::metadata::TableKind::MethodDef,
            self.rows.len() as u32 + 1,
        );
        self.rows.push(MethodDefRow {
            token,
            owner: compiled.owner,
            name: compiled.name,
            attributes: compiled.attributes,
            signature: compiled.signature,
            parameter_names: compiled.parameter_names,
            rva,
        });
        token
    }

    pub fn rows(&self) -> &[MethodDefRow] {
        &self.rows
    }

    pub fn body_heap(&self) -> &[u8] {
        &self.bodies
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled(name: &str, code: &[u8]) -> CompiledMethodBody {
        CompiledMethodBody {
            name: name.to_string(),
            owner: TypeRef::named("Functions"),
            attributes: MethodAttributes::default()
                .with(MethodAttributes::PUBLIC)
                .with(MethodAttributes::STATIC),
            signature: vec![0x00, 0x00, 0x01],
            parameter_names: Vec::new(),
            body: MethodBodyBlob::new(code, 0, Vec::new(), Token::NIL, Vec::new(), true)
                .expect("tiny body"),
            listing: String::new(),
        }
    }

    #[test]
    fn table_aligns_bodies_and_numbers_rows() {
        let mut table = MethodTable::new();
        let first = table.push(compiled("a", &[0x2A]));
        let second = table.push(compiled("b", &[0x00, 0x2A]));
        assert_eq!(first.row(), 1);
        assert_eq!(second.row(), 2);
        assert_eq!(table.rows()[1].rva, 4);
        assert_eq!(table.body_heap().len(), 7);
    }

    #[test]
    fn attributes_render_in_declaration_order() {
        let attributes = MethodAttributes::default()
            .with(MethodAttributes::PUBLIC)
            .with(MethodAttributes::HIDE_BY_SIG)
            .with(MethodAttributes::VIRTUAL);
        assert_eq!(attributes.to_string(), "public hidebysig virtual");
        assert!(!attributes.is_static());
    }
}
