#![allow(dead_code)]

pub mod interp;

use fp_cil::opcode::OpCode;
use fp_cil::registry::{ClassInfo, ClassMethodInfo, ConstructorInfo};
use fp_cil::{AssembledBody, CilOptions, MethodCompiler, SharedRegistry};
use fp_core::lir::{MethodBody, MethodDescriptor, ParameterInfo, ReturnShape};
use fp_core::metadata::TypeRef;

pub const FUNCTIONS: &str = "Program.Functions";
pub const POINT: &str = "Point";
pub const POINT_TYPE: &str = "Classes.Point";

pub fn functions() -> TypeRef {
    TypeRef::named(FUNCTIONS)
}

/// Static function `name(scopes, params...) : object`.
pub fn function(name: &str, params: &[(&str, TypeRef)]) -> MethodDescriptor {
    MethodDescriptor::function(name, functions()).with_params(
        params
            .iter()
            .map(|(name, ty)| ParameterInfo::new(*name, ty.clone()))
            .collect(),
    )
}

pub fn returning(descriptor: MethodDescriptor, ty: TypeRef) -> MethodDescriptor {
    descriptor.with_returns(ReturnShape::Value(ty))
}

pub fn assemble(
    registry: &SharedRegistry,
    descriptor: &MethodDescriptor,
    body: &MethodBody,
) -> AssembledBody {
    try_assemble(registry, CilOptions::default(), descriptor, body).expect("body should assemble")
}

pub fn try_assemble(
    registry: &SharedRegistry,
    options: CilOptions,
    descriptor: &MethodDescriptor,
    body: &MethodBody,
) -> fp_cil::Result<AssembledBody> {
    MethodCompiler::with_options(registry.services(), options).assemble(descriptor, body)
}

pub fn opcodes(body: &AssembledBody) -> Vec<OpCode> {
    body.instructions
        .iter()
        .map(|instruction| instruction.op)
        .collect()
}

/// `class Point { constructor(x, y); x; y; sum(a, b) }` with both
/// constructor arguments optional.
pub fn point_class() -> ClassInfo {
    ClassInfo::new(POINT, TypeRef::named(POINT_TYPE))
        .with_constructor(ConstructorInfo::optional(2))
        .with_field("x", TypeRef::Object)
        .with_field("y", TypeRef::Object)
        .with_method(
            "sum",
            ClassMethodInfo::new(
                vec![TypeRef::Object, TypeRef::Object],
                Some(TypeRef::Number),
            ),
        )
}

pub fn registry_with_point() -> SharedRegistry {
    let registry = SharedRegistry::new();
    registry.register_class(point_class());
    registry
}
