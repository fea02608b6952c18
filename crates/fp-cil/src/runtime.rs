//! The fixed set of runtime-library members emitted code calls into.

use fp_core::lir::DynamicOp;
use fp_core::metadata::{FieldRef, MethodRef, MethodSig, TypeRef};
use strum_macros::IntoStaticStr;

pub const TYPE_UTILITIES: &str = "Runtime.TypeUtilities";
pub const OPERATORS: &str = "Runtime.Operators";
pub const CLOSURE: &str = "Runtime.Closure";
pub const ARRAY: &str = "Runtime.Array";
pub const JS_OBJECT: &str = "Runtime.JsObject";
pub const JS_THROWABLE: &str = "Runtime.JsThrowable";
pub const ASYNC_RUNTIME: &str = "Runtime.AsyncRuntime";
pub const GENERATOR_RUNTIME: &str = "Runtime.GeneratorRuntime";
pub const DEFERRED: &str = "Runtime.Deferred";
pub const PROMISE: &str = "Runtime.Promise";
pub const ITERATOR_RESULT: &str = "Runtime.IteratorResult";
pub const ASYNC_SCOPE: &str = "Runtime.AsyncScope";
pub const GENERATOR_SCOPE: &str = "Runtime.GeneratorScope";
pub const EXCEPTION: &str = "System.Exception";

/// Hidden fields every async leaf scope inherits from [`ASYNC_SCOPE`].
pub const ASYNC_STATE_FIELD: &str = "_asyncState";
pub const ASYNC_DEFERRED_FIELD: &str = "_deferred";
pub const ASYNC_AWAITED_FIELD: &str = "_awaited";

/// Hidden fields every generator leaf scope inherits from [`GENERATOR_SCOPE`].
pub const GENERATOR_STATE_FIELD: &str = "_genState";
pub const GENERATOR_DONE_FIELD: &str = "_done";
pub const GENERATOR_SENT_FIELD: &str = "_sent";

pub fn async_base_field(name: &str) -> Option<FieldRef> {
    let ty = match name {
        ASYNC_STATE_FIELD => TypeRef::Int32,
        ASYNC_DEFERRED_FIELD => TypeRef::named(DEFERRED),
        ASYNC_AWAITED_FIELD => TypeRef::Object,
        _ => return None,
    };
    Some(FieldRef::new(TypeRef::named(ASYNC_SCOPE), name, ty))
}

pub fn generator_base_field(name: &str) -> Option<FieldRef> {
    let ty = match name {
        GENERATOR_STATE_FIELD => TypeRef::Int32,
        GENERATOR_DONE_FIELD => TypeRef::Boolean,
        GENERATOR_SENT_FIELD => TypeRef::Object,
        _ => return None,
    };
    Some(FieldRef::new(TypeRef::named(GENERATOR_SCOPE), name, ty))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum RuntimeMethod {
    ToNumber,
    IsTruthy,
    ToString,
    ToInt32,
    TypeOf,
    IsObjectLike,
    UnwrapException,
    Operator(DynamicOp),
    LooseEquals,
    StrictEquals,
    UnaryMinus,
    In,
    InstanceOf,
    GetItem,
    SetItem,
    GetLength,
    GetProperty,
    SetProperty,
    CallMember,
    InvokeClosure,
    InvokeClosure1,
    ArrayCtor,
    ArrayAdd,
    ObjectCtor,
    ObjectSetProperty,
    ThrowableCtor,
    AsyncBegin,
    AsyncSuspend,
    TakeAwaitResult,
    TakeSentValue,
    DeferredPromise,
    DeferredResolve,
    PromiseResolve,
    IteratorResultCreate,
}

impl RuntimeMethod {
    pub fn method_ref(self) -> MethodRef {
        use TypeRef::{Boolean, Int32, Number, Object, ObjectArray};
        let string = TypeRef::String;
        match self {
            RuntimeMethod::ToNumber => utility("ToNumber", vec![Object], Some(Number)),
            RuntimeMethod::IsTruthy => utility("IsTruthy", vec![Object], Some(Boolean)),
            RuntimeMethod::ToString => utility("ToString", vec![Object], Some(string)),
            RuntimeMethod::ToInt32 => utility("ToInt32", vec![Number], Some(Int32)),
            RuntimeMethod::TypeOf => utility("TypeOf", vec![Object], Some(string)),
            RuntimeMethod::IsObjectLike => utility("IsObjectLike", vec![Object], Some(Boolean)),
            RuntimeMethod::UnwrapException => {
                utility("UnwrapException", vec![TypeRef::named(EXCEPTION)], Some(Object))
            }
            RuntimeMethod::Operator(op) => {
                let returns = if op.is_relational() { Boolean } else { Object };
                operator(op.into(), vec![Object, Object], returns)
            }
            RuntimeMethod::LooseEquals => operator("LooseEquals", vec![Object, Object], Boolean),
            RuntimeMethod::StrictEquals => {
                operator("StrictEquals", vec![Object, Object], Boolean)
            }
            RuntimeMethod::UnaryMinus => operator("UnaryMinus", vec![Object], Object),
            RuntimeMethod::In => operator("In", vec![Object, Object], Boolean),
            RuntimeMethod::InstanceOf => operator("InstanceOf", vec![Object, Object], Boolean),
            RuntimeMethod::GetItem => operator("GetItem", vec![Object, Object], Object),
            RuntimeMethod::SetItem => operator("SetItem", vec![Object, Object, Object], Object),
            RuntimeMethod::GetLength => operator("GetLength", vec![Object], Number),
            RuntimeMethod::GetProperty => operator("GetProperty", vec![Object, string], Object),
            RuntimeMethod::SetProperty => MethodRef::new(
                TypeRef::named(OPERATORS),
                "SetProperty",
                MethodSig::static_fn(vec![Object, string, Object], None),
            ),
            RuntimeMethod::CallMember => {
                operator("CallMember", vec![Object, string, ObjectArray], Object)
            }
            RuntimeMethod::InvokeClosure => MethodRef::new(
                TypeRef::named(CLOSURE),
                "Invoke",
                MethodSig::static_fn(vec![Object, ObjectArray], Some(Object)),
            ),
            RuntimeMethod::InvokeClosure1 => MethodRef::new(
                TypeRef::named(CLOSURE),
                "Invoke1",
                MethodSig::static_fn(vec![Object, Object], Some(Object)),
            ),
            RuntimeMethod::ArrayCtor => MethodRef::constructor(TypeRef::named(ARRAY), vec![Int32]),
            RuntimeMethod::ArrayAdd => MethodRef::new(
                TypeRef::named(ARRAY),
                "Add",
                MethodSig::instance(vec![Object], None),
            ),
            RuntimeMethod::ObjectCtor => MethodRef::constructor(TypeRef::named(JS_OBJECT), vec![]),
            RuntimeMethod::ObjectSetProperty => MethodRef::new(
                TypeRef::named(JS_OBJECT),
                "SetProperty",
                MethodSig::instance(vec![string, Object], None),
            ),
            RuntimeMethod::ThrowableCtor => {
                MethodRef::constructor(TypeRef::named(JS_THROWABLE), vec![Object])
            }
            RuntimeMethod::AsyncBegin => MethodRef::new(
                TypeRef::named(ASYNC_RUNTIME),
                "Begin",
                MethodSig::static_fn(vec![Object], None),
            ),
            RuntimeMethod::AsyncSuspend => MethodRef::new(
                TypeRef::named(ASYNC_RUNTIME),
                "Suspend",
                MethodSig::static_fn(vec![Object, Object], None),
            ),
            RuntimeMethod::TakeAwaitResult => MethodRef::new(
                TypeRef::named(ASYNC_RUNTIME),
                "TakeAwaitResult",
                MethodSig::static_fn(vec![Object], Some(Object)),
            ),
            RuntimeMethod::TakeSentValue => MethodRef::new(
                TypeRef::named(GENERATOR_RUNTIME),
                "TakeSentValue",
                MethodSig::static_fn(vec![Object], Some(Object)),
            ),
            RuntimeMethod::DeferredPromise => MethodRef::new(
                TypeRef::named(DEFERRED),
                "get_Promise",
                MethodSig::instance(vec![], Some(Object)),
            ),
            RuntimeMethod::DeferredResolve => MethodRef::new(
                TypeRef::named(DEFERRED),
                "get_Resolve",
                MethodSig::instance(vec![], Some(Object)),
            ),
            RuntimeMethod::PromiseResolve => MethodRef::new(
                TypeRef::named(PROMISE),
                "Resolve",
                MethodSig::static_fn(vec![Object], Some(Object)),
            ),
            RuntimeMethod::IteratorResultCreate => MethodRef::new(
                TypeRef::named(ITERATOR_RESULT),
                "Create",
                MethodSig::static_fn(vec![Object, Boolean], Some(Object)),
            ),
        }
    }

    /// Invoked with `callvirt` rather than `call`.
    pub fn is_virtual(self) -> bool {
        matches!(
            self,
            RuntimeMethod::ArrayAdd
                | RuntimeMethod::ObjectSetProperty
                | RuntimeMethod::DeferredPromise
                | RuntimeMethod::DeferredResolve
        )
    }
}

fn utility(name: &str, params: Vec<TypeRef>, returns: Option<TypeRef>) -> MethodRef {
    MethodRef::new(
        TypeRef::named(TYPE_UTILITIES),
        name,
        MethodSig::static_fn(params, returns),
    )
}

fn operator(name: &str, params: Vec<TypeRef>, returns: TypeRef) -> MethodRef {
    MethodRef::new(
        TypeRef::named(OPERATORS),
        name,
        MethodSig::static_fn(params, Some(returns)),
    )
}
