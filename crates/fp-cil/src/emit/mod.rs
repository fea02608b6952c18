//! Lowering of one LIR body into an IL instruction stream.
//!
//! [`MethodEmitter`] owns the per-method state (local layout, label map, open
//! protected regions, resume labels) and walks the LIR once. Dispatch is one
//! exhaustive `match` over [`LirInstruction`]; each arm forwards to the handler
//! of its emission category, implemented in the sibling modules.

mod arithmetic;
mod branch;
mod calls;
mod classes;
mod exceptions;
mod literals;
mod operators;
mod parameters;
mod resumable;
mod returns;
mod scopes;
mod values;

use crate::analysis::TempAnalysis;
use crate::builder::{AssembledBody, IlBuilder};
use crate::config::CilOptions;
use crate::error::{CilError, Result};
use crate::opcode::{Label, OpCode};
use crate::registry::CompilerServices;
use crate::runtime::RuntimeMethod;
use eyre::eyre;
use fp_core::lir::{LabelId, LirInstruction, MethodBody, MethodDescriptor, TempId, TempStorage};
use fp_core::metadata::{MethodRef, TypeRef};
use std::collections::HashMap;
use tracing::trace;

use exceptions::RegionState;
use resumable::ResumeState;

/// Shared `leave` target for returns from inside protected regions.
#[derive(Debug, Clone, Copy)]
struct Epilogue {
    label: Label,
    slot: Option<u16>,
}

pub struct MethodEmitter<'a> {
    descriptor: &'a MethodDescriptor,
    body: &'a MethodBody,
    services: CompilerServices<'a>,
    analysis: TempAnalysis,
    il: IlBuilder,
    leaf_slot: Option<u16>,
    leaf_type: Option<TypeRef>,
    temp_slots: Vec<Option<u16>>,
    labels: HashMap<LabelId, Label>,
    regions: RegionState,
    resume: ResumeState,
    epilogue: Option<Epilogue>,
    scratch: HashMap<TypeRef, u16>,
    /// LIR index being emitted, for diagnostics.
    index: usize,
}

impl<'a> MethodEmitter<'a> {
    pub fn new(
        descriptor: &'a MethodDescriptor,
        body: &'a MethodBody,
        services: CompilerServices<'a>,
        options: &CilOptions,
    ) -> Result<Self> {
        let analysis = TempAnalysis::analyze(body, options.fuse_branches)?;
        let mut il = IlBuilder::new();

        let (leaf_slot, leaf_type) = match &body.leaf_scope {
            Some(scope) => {
                let ty = services.scopes.scope_type(scope).ok_or_else(|| {
                    CilError::Internal(eyre!(
                        "leaf scope {} of method {} has no registered type",
                        scope,
                        descriptor.name
                    ))
                })?;
                (Some(il.declare_local(ty.clone())?), Some(ty))
            }
            None => (None, None),
        };

        let mut variable_slots = Vec::with_capacity(body.variables.len());
        for variable in &body.variables {
            variable_slots.push(il.declare_local(variable.ty.clone())?);
        }

        let mut temp_slots = Vec::with_capacity(body.temps.len());
        for (index, storage) in body.temps.iter().enumerate() {
            let slot = match storage {
                TempStorage::Variable(variable) => {
                    let slot = variable_slots.get(variable.index()).copied();
                    Some(slot.ok_or_else(|| {
                        CilError::Internal(eyre!(
                            "temp t{} aliases undeclared variable {} in method {}",
                            index,
                            variable,
                            descriptor.name
                        ))
                    })?)
                }
                _ if analysis.is_materialized(TempId(index as u32))? => {
                    Some(il.declare_local(storage_type(body, storage))?)
                }
                _ => None,
            };
            temp_slots.push(slot);
        }

        Ok(Self {
            descriptor,
            body,
            services,
            analysis,
            il,
            leaf_slot,
            leaf_type,
            temp_slots,
            labels: HashMap::new(),
            regions: RegionState::default(),
            resume: ResumeState::default(),
            epilogue: None,
            scratch: HashMap::new(),
            index: 0,
        })
    }

    pub fn analysis(&self) -> &TempAnalysis {
        &self.analysis
    }

    /// Emits every instruction, closes the body and assembles it.
    pub fn emit_body(mut self) -> Result<AssembledBody> {
        let body = self.body;
        for (index, instruction) in body.instructions.iter().enumerate() {
            self.index = index;
            trace!(
                index,
                kind = instruction.kind_name(),
                category = <&'static str>::from(instruction.category()),
                "emit"
            );
            self.emit_instruction(instruction)
                .map_err(|err| self.with_context(err, instruction))?;
        }
        self.index = body.instructions.len();

        if !self.il.ends_in_transfer() || !self.il.at_unlabelled_end() {
            self.emit_return(None)?;
        }
        if let Some(epilogue) = self.epilogue {
            self.il.mark_label(epilogue.label)?;
            if let Some(slot) = epilogue.slot {
                self.il.ldloc(slot);
            }
            self.il.op(OpCode::Ret);
        }
        self.resume.check_complete(body, &self.descriptor.name)?;
        self.il.finish(self.descriptor.return_type().is_some())
    }

    fn emit_instruction(&mut self, instruction: &LirInstruction) -> Result<()> {
        use LirInstruction as I;
        match instruction {
            // bookkeeping
            I::Label(label) => {
                let label = self.label(*label);
                self.il.mark_label(label)
            }
            I::LoadConst { value, result } => self.emit_load_const(value, *result),
            I::Copy { source, result } => {
                let pushed = self.load_temp(*source)?;
                self.store_result(Some(*result), Some(pushed))
            }
            I::ConvertToObject { source, result } => {
                self.convert(*source, TypeRef::Object, *result)
            }
            I::ConvertToNumber { source, result } => {
                self.convert(*source, TypeRef::Number, *result)
            }
            I::ConvertToBoolean { source, result } => {
                self.convert(*source, TypeRef::Boolean, *result)
            }
            I::ConvertToString { source, result } => {
                self.convert(*source, TypeRef::String, *result)
            }
            I::Branch { target } => {
                let target = self.label(*target);
                self.il.branch(OpCode::Br, target);
                Ok(())
            }
            I::BranchIfTrue { condition, target } => {
                self.emit_conditional_branch(*condition, *target, true)
            }
            I::BranchIfFalse { condition, target } => {
                self.emit_conditional_branch(*condition, *target, false)
            }
            I::TryBegin { region } => self.emit_try_begin(*region),
            I::CatchBegin { region, exception } => self.emit_catch_begin(*region, *exception),
            I::FinallyBegin { region } => self.emit_finally_begin(*region),
            I::TryEnd { region } => self.emit_try_end(*region),
            I::Leave { target } => {
                let target = self.label(*target);
                self.il.branch(OpCode::Leave, target);
                Ok(())
            }
            I::EndFinally => {
                self.il.op(OpCode::Endfinally);
                Ok(())
            }
            I::Throw { value } => self.emit_throw(*value),

            // dynamic operators
            I::In {
                key,
                object,
                result,
            } => self.emit_runtime_binary(RuntimeMethod::In, *key, *object, *result),
            I::InstanceOf {
                value,
                constructor,
                result,
            } => self.emit_runtime_binary(RuntimeMethod::InstanceOf, *value, *constructor, *result),
            I::DynamicBinary {
                op,
                left,
                right,
                result,
            } => self.emit_runtime_binary(RuntimeMethod::Operator(*op), *left, *right, *result),
            I::LooseEquals {
                left,
                right,
                negated,
                result,
            } => self.emit_equality(RuntimeMethod::LooseEquals, *left, *right, *negated, *result),
            I::StrictEquals {
                left,
                right,
                negated,
                result,
            } => self.emit_equality(RuntimeMethod::StrictEquals, *left, *right, *negated, *result),
            I::UnaryMinus { operand, result } => {
                self.emit_runtime_unary(RuntimeMethod::UnaryMinus, *operand, *result)
            }
            I::TypeOf { operand, result } => {
                self.emit_runtime_unary(RuntimeMethod::TypeOf, *operand, *result)
            }

            // literals and collections
            I::NewArray { elements, result } => self.emit_new_array(elements, *result),
            I::NewObject { properties, result } => self.emit_new_object(properties, *result),
            I::GetItem {
                object,
                key,
                result,
            } => self.emit_runtime_binary(RuntimeMethod::GetItem, *object, *key, *result),
            I::SetItem {
                object,
                key,
                value,
                result,
            } => self.emit_set_item(*object, *key, *value, *result),
            I::GetLength { object, result } => {
                self.emit_runtime_unary(RuntimeMethod::GetLength, *object, *result)
            }
            I::GetProperty {
                object,
                name,
                result,
            } => self.emit_get_property(*object, name, *result),
            I::SetProperty {
                object,
                name,
                value,
            } => self.emit_set_property(*object, name, *value),

            // user-class fields
            I::LoadClassField {
                class,
                field,
                result,
            } => self.emit_load_class_field(class, field, *result),
            I::StoreClassField {
                class,
                field,
                value,
            } => self.emit_store_class_field(class, field, *value),

            // call sites
            I::CallFunction {
                function,
                scopes,
                args,
                result,
            } => self.emit_call_function(function, *scopes, args, *result),
            I::CallClosure {
                callee,
                args,
                result,
            } => self.emit_call_closure(*callee, args, *result),
            I::CallMember {
                receiver,
                name,
                args,
                result,
            } => self.emit_call_member(*receiver, name, args, *result),
            I::CallTyped {
                receiver,
                class,
                method,
                args,
                fallback,
                result,
            } => {
                if *fallback {
                    self.emit_call_typed_with_fallback(*receiver, class, method, args, *result)
                } else {
                    self.emit_call_typed(*receiver, class, method, args, *result)
                }
            }

            // scopes
            I::CreateScopesArray { sources, result } => {
                self.emit_create_scopes_array(sources, *result)
            }
            I::CreateScopeInstance { scope, result } => {
                self.emit_create_scope_instance(scope, *result)
            }
            I::LoadParentScopeField {
                index,
                scope,
                field,
                result,
            } => self.emit_load_parent_field(*index, scope, field, *result),
            I::StoreParentScopeField {
                index,
                scope,
                field,
                value,
            } => self.emit_store_parent_field(*index, scope, field, *value),
            I::CreateLeafScopeInstance { scope } => self.emit_create_leaf_scope(scope),
            I::LoadLeafScopeField { field, result } => self.emit_load_leaf_field(field, *result),
            I::StoreLeafScopeField { field, value } => self.emit_store_leaf_field(field, *value),

            // resumable bodies
            I::Await {
                value,
                suspend,
                result,
            } => self.emit_await(*value, *suspend, *result),
            I::Yield {
                value,
                suspend,
                result,
            } => self.emit_yield(*value, *suspend, *result),

            // scope instances held in temps
            I::LoadScopeField {
                instance,
                scope,
                field,
                result,
            } => self.emit_load_scope_field(*instance, scope, field, *result),
            I::StoreScopeField {
                instance,
                scope,
                field,
                value,
            } => self.emit_store_scope_field(*instance, scope, field, *value),

            // parameters
            I::LoadParameter { index, result } => self.emit_load_parameter(*index, *result),
            I::StoreParameter { index, value } => self.emit_store_parameter(*index, *value),
            I::LoadThis { result } => self.emit_load_this(*result),
            I::LoadScopes { result } => self.emit_load_scopes(*result),

            // typed arithmetic
            I::Binary {
                op,
                left,
                right,
                result,
            } => self.emit_numeric_binary(*op, *left, *right, *result),
            I::Negate { operand, result } => self.emit_negate(*operand, *result),
            I::Not { operand, result } => self.emit_not(*operand, *result),
            I::BitNot { operand, result } => self.emit_bit_not(*operand, *result),
            I::Compare {
                kind,
                left,
                right,
                result,
            } => self.emit_compare(*kind, *left, *right, *result),

            I::CallIntrinsic {
                owner,
                name,
                args,
                result,
            } => self.emit_call_intrinsic(owner.as_deref(), name, args, *result),
            I::NewClass {
                class,
                scopes,
                args,
                result,
            } => self.emit_new_class(class, *scopes, args, *result),
            I::Return { value } => self.emit_return(*value),
        }
    }

    fn with_context(&self, err: CilError, instruction: &LirInstruction) -> CilError {
        match err {
            CilError::Internal(report) => CilError::Internal(report.wrap_err(format!(
                "emitting {} at LIR {} of {}",
                instruction.kind_name(),
                self.index,
                self.descriptor.name
            ))),
            other => other,
        }
    }

    fn label(&mut self, label: LabelId) -> Label {
        if let Some(existing) = self.labels.get(&label) {
            return *existing;
        }
        let fresh = self.il.define_label();
        self.labels.insert(label, fresh);
        fresh
    }

    /// `call`/`callvirt`/`newobj` with the stack shape taken from the signature.
    fn emit_call(&mut self, op: OpCode, method: &MethodRef) {
        let token = self.services.tokens.method_token(method);
        let receiver = u16::from(method.sig.has_this && op != OpCode::Newobj);
        let pops = method.sig.params.len() as u16 + receiver;
        let pushes = if op == OpCode::Newobj {
            1
        } else {
            u16::from(method.sig.returns.is_some())
        };
        self.il.call(op, token, pops, pushes);
    }

    fn call_runtime(&mut self, method: RuntimeMethod) -> Option<TypeRef> {
        let method_ref = method.method_ref();
        let op = if method.is_virtual() {
            OpCode::Callvirt
        } else {
            OpCode::Call
        };
        self.emit_call(op, &method_ref);
        method_ref.sig.returns
    }

    fn leaf_slot(&self) -> Result<u16> {
        self.leaf_slot.ok_or_else(|| {
            CilError::Internal(eyre!(
                "method {} uses its leaf scope but declares none",
                self.descriptor.name
            ))
        })
    }

    fn leaf_type(&self) -> Result<TypeRef> {
        self.leaf_type.clone().ok_or_else(|| {
            CilError::Internal(eyre!(
                "method {} uses its leaf scope but declares none",
                self.descriptor.name
            ))
        })
    }

    fn scopes_arg(&self) -> Result<u16> {
        self.descriptor.scopes_arg().ok_or_else(|| {
            CilError::Internal(eyre!(
                "method {} takes no scopes array",
                self.descriptor.name
            ))
        })
    }

    fn scratch_local(&mut self, ty: TypeRef) -> Result<u16> {
        if let Some(slot) = self.scratch.get(&ty) {
            return Ok(*slot);
        }
        let slot = self.il.declare_local(ty.clone())?;
        self.scratch.insert(ty, slot);
        Ok(slot)
    }
}

fn storage_type(body: &MethodBody, storage: &TempStorage) -> TypeRef {
    match storage {
        TempStorage::Unboxed(kind) => kind.type_ref(),
        TempStorage::Reference(Some(ty)) => ty.clone(),
        TempStorage::Reference(None) => TypeRef::Object,
        TempStorage::Variable(variable) => body
            .variable(*variable)
            .map(|slot| slot.ty.clone())
            .unwrap_or(TypeRef::Object),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SharedRegistry;
    use fp_core::lir::{MethodBodyBuilder, VariableId};

    #[test]
    fn temp_aliasing_an_undeclared_variable_is_an_internal_error() {
        let mut builder = MethodBodyBuilder::new();
        builder.temp(TempStorage::Variable(VariableId(3)));
        let body = builder.build();
        let descriptor = MethodDescriptor::function("orphan", TypeRef::named("Program.Functions"));
        let registry = SharedRegistry::new();

        let err = match MethodEmitter::new(
            &descriptor,
            &body,
            registry.services(),
            &CilOptions::default(),
        ) {
            Ok(_) => panic!("emitter accepted an undeclared variable"),
            Err(err) => err,
        };
        assert!(matches!(err, CilError::Internal(_)), "{}", err);
        assert!(
            err.to_string()
                .contains("temp t0 aliases undeclared variable v3 in method orphan"),
            "{}",
            err
        );
    }
}
