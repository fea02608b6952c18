//! Metadata vocabulary shared by the LIR and the CIL backend.
//!
//! Everything the emitted bytecode refers to by token (types, methods, fields,
//! user strings, standalone signatures) is described here in symbolic form; the
//! backend asks a registry to intern these descriptions into [`Token`]s.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Representation of a value as the target VM sees it.
///
/// `Number`, `Boolean` and `Int32` are value types and live unboxed on the
/// evaluation stack; everything else is a reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TypeRef {
    Number,
    Boolean,
    Int32,
    String,
    Object,
    ObjectArray,
    Named(String),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(name.into())
    }

    pub fn is_value_type(&self) -> bool {
        matches!(self, TypeRef::Number | TypeRef::Boolean | TypeRef::Int32)
    }

    pub fn is_reference(&self) -> bool {
        !self.is_value_type()
    }

    /// Reference type strictly narrower than `object`.
    pub fn is_narrow_reference(&self) -> bool {
        matches!(
            self,
            TypeRef::String | TypeRef::ObjectArray | TypeRef::Named(_)
        )
    }

    pub fn full_name(&self) -> &str {
        match self {
            TypeRef::Number => "System.Double",
            TypeRef::Boolean => "System.Boolean",
            TypeRef::Int32 => "System.Int32",
            TypeRef::String => "System.String",
            TypeRef::Object => "System.Object",
            TypeRef::ObjectArray => "System.Object[]",
            TypeRef::Named(name) => name,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.full_name())
    }
}

/// Metadata table a token row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TableKind {
    TypeRef = 0x01,
    TypeDef = 0x02,
    Field = 0x04,
    MethodDef = 0x06,
    MemberRef = 0x0A,
    StandAloneSig = 0x11,
    TypeSpec = 0x1B,
    UserString = 0x70,
}

impl TableKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        let kind = match byte {
            0x01 => TableKind::TypeRef,
            0x02 => TableKind::TypeDef,
            0x04 => TableKind::Field,
            0x06 => TableKind::MethodDef,
            0x0A => TableKind::MemberRef,
            0x11 => TableKind::StandAloneSig,
            0x1B => TableKind::TypeSpec,
            0x70 => TableKind::UserString,
            _ => return None,
        };
        Some(kind)
    }
}

/// A binary metadata token: table id in the high byte, 1-based row below it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[display("{_0:#010x}")]
pub struct Token(pub u32);

impl Token {
    pub const NIL: Token = Token(0);

    pub fn new(table: TableKind, row: u32) -> Self {
        Token(((table as u32) << 24) | (row & 0x00FF_FFFF))
    }

    pub fn table(self) -> Option<TableKind> {
        TableKind::from_byte((self.0 >> 24) as u8)
    }

    pub fn row(self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    pub fn is_nil(self) -> bool {
        self.row() == 0
    }
}

/// Calling shape of a method: receiver, parameter representations and return.
/// `returns == None` is a void method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodSig {
    pub has_this: bool,
    pub params: Vec<TypeRef>,
    pub returns: Option<TypeRef>,
}

impl MethodSig {
    pub fn new(has_this: bool, params: Vec<TypeRef>, returns: Option<TypeRef>) -> Self {
        Self {
            has_this,
            params,
            returns,
        }
    }

    pub fn static_fn(params: Vec<TypeRef>, returns: Option<TypeRef>) -> Self {
        Self::new(false, params, returns)
    }

    pub fn instance(params: Vec<TypeRef>, returns: Option<TypeRef>) -> Self {
        Self::new(true, params, returns)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub owner: TypeRef,
    pub name: String,
    pub sig: MethodSig,
}

impl MethodRef {
    pub const CONSTRUCTOR: &'static str = ".ctor";

    pub fn new(owner: TypeRef, name: impl Into<String>, sig: MethodSig) -> Self {
        Self {
            owner,
            name: name.into(),
            sig,
        }
    }

    pub fn constructor(owner: TypeRef, params: Vec<TypeRef>) -> Self {
        Self::new(owner, Self::CONSTRUCTOR, MethodSig::instance(params, None))
    }

    pub fn is_constructor(&self) -> bool {
        self.name == Self::CONSTRUCTOR
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}(", self.owner, self.name)?;
        for (index, param) in self.sig.params.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", param)?;
        }
        f.write_str(")")?;
        if let Some(ret) = &self.sig.returns {
            write!(f, " : {}", ret)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub owner: TypeRef,
    pub name: String,
    pub ty: TypeRef,
}

impl FieldRef {
    pub fn new(owner: TypeRef, name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            owner,
            name: name.into(),
            ty,
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}::{}", self.ty, self.owner, self.name)
    }
}
