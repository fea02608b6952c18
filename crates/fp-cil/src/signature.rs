//! Method and local-variable signature blobs.

use crate::error::{CilError, Result};
use crate::registry::MetadataTokens;
use bytes::BufMut;
use fp_core::metadata::{MethodSig, TableKind, TypeRef};

pub const HASTHIS: u8 = 0x20;
pub const DEFAULT_CALLCONV: u8 = 0x00;
pub const LOCAL_SIG: u8 = 0x07;

pub const ELEMENT_TYPE_VOID: u8 = 0x01;
pub const ELEMENT_TYPE_BOOLEAN: u8 = 0x02;
pub const ELEMENT_TYPE_I4: u8 = 0x08;
pub const ELEMENT_TYPE_R8: u8 = 0x0D;
pub const ELEMENT_TYPE_STRING: u8 = 0x0E;
pub const ELEMENT_TYPE_CLASS: u8 = 0x12;
pub const ELEMENT_TYPE_OBJECT: u8 = 0x1C;
pub const ELEMENT_TYPE_SZARRAY: u8 = 0x1D;

/// Largest value the compressed integer encoding can carry.
pub const MAX_COMPRESSED: u32 = 0x1FFF_FFFF;

pub fn write_compressed(buf: &mut impl BufMut, value: u32) -> Result<()> {
    match value {
        0..=0x7F => buf.put_u8(value as u8),
        0x80..=0x3FFF => buf.put_u16(0x8000 | value as u16),
        0x4000..=MAX_COMPRESSED => buf.put_u32(0xC000_0000 | value),
        _ => {
            return Err(CilError::internal(format!(
                "value {:#x} too large for a compressed integer",
                value
            )))
        }
    }
    Ok(())
}

fn write_type(buf: &mut Vec<u8>, ty: &TypeRef, tokens: &dyn MetadataTokens) -> Result<()> {
    match ty {
        TypeRef::Number => buf.put_u8(ELEMENT_TYPE_R8),
        TypeRef::Boolean => buf.put_u8(ELEMENT_TYPE_BOOLEAN),
        TypeRef::Int32 => buf.put_u8(ELEMENT_TYPE_I4),
        TypeRef::String => buf.put_u8(ELEMENT_TYPE_STRING),
        TypeRef::Object => buf.put_u8(ELEMENT_TYPE_OBJECT),
        TypeRef::ObjectArray => {
            buf.put_u8(ELEMENT_TYPE_SZARRAY);
            buf.put_u8(ELEMENT_TYPE_OBJECT);
        }
        TypeRef::Named(_) => {
            let token = tokens.type_token(ty);
            let tag = match token.table() {
                Some(TableKind::TypeDef) => 0,
                Some(TableKind::TypeRef) => 1,
                Some(TableKind::TypeSpec) => 2,
                _ => {
                    return Err(CilError::internal(format!(
                        "type {} interned as non-type token {}",
                        ty, token
                    )))
                }
            };
            buf.put_u8(ELEMENT_TYPE_CLASS);
            write_compressed(buf, (token.row() << 2) | tag)?;
        }
    }
    Ok(())
}

pub fn method_signature(sig: &MethodSig, tokens: &dyn MetadataTokens) -> Result<Vec<u8>> {
    let mut blob = Vec::with_capacity(3 + sig.params.len());
    blob.put_u8(if sig.has_this {
        HASTHIS
    } else {
        DEFAULT_CALLCONV
    });
    write_compressed(&mut blob, sig.params.len() as u32)?;
    match &sig.returns {
        Some(ty) => write_type(&mut blob, ty, tokens)?,
        None => blob.put_u8(ELEMENT_TYPE_VOID),
    }
    for param in &sig.params {
        write_type(&mut blob, param, tokens)?;
    }
    Ok(blob)
}

pub fn local_signature(locals: &[TypeRef], tokens: &dyn MetadataTokens) -> Result<Vec<u8>> {
    let mut blob = Vec::with_capacity(2 + locals.len());
    blob.put_u8(LOCAL_SIG);
    write_compressed(&mut blob, locals.len() as u32)?;
    for local in locals {
        write_type(&mut blob, local, tokens)?;
    }
    Ok(blob)
}
