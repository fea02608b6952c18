//! Static catalog of global functions and built-in static members.
//!
//! Each entry maps a case-insensitive `(owner, name)` pair to one or more
//! runtime overloads. A trailing `object[]` parameter marks the overload as
//! variadic: it collects every argument past the fixed ones.

use fp_core::metadata::{MethodRef, MethodSig, TypeRef};
use std::collections::HashMap;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Number,
    Boolean,
    String,
    Object,
    /// Rest parameter: every remaining argument, packed into `object[]`.
    Rest,
}

impl Shape {
    pub fn type_ref(self) -> TypeRef {
        match self {
            Shape::Number => TypeRef::Number,
            Shape::Boolean => TypeRef::Boolean,
            Shape::String => TypeRef::String,
            Shape::Object => TypeRef::Object,
            Shape::Rest => TypeRef::ObjectArray,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntrinsicOverload {
    pub owner: Option<&'static str>,
    pub name: &'static str,
    /// Runtime type implementing the member.
    pub runtime_type: &'static str,
    pub runtime_name: &'static str,
    pub params: &'static [Shape],
    /// `None` for members that return nothing.
    pub returns: Option<Shape>,
}

impl IntrinsicOverload {
    pub fn is_variadic(&self) -> bool {
        self.params.last() == Some(&Shape::Rest)
    }

    /// Parameters before the rest parameter, if any.
    pub fn fixed_params(&self) -> &'static [Shape] {
        if self.is_variadic() {
            &self.params[..self.params.len() - 1]
        } else {
            self.params
        }
    }

    pub fn method_ref(&self) -> MethodRef {
        MethodRef::new(
            TypeRef::named(self.runtime_type),
            self.runtime_name,
            MethodSig::static_fn(
                self.params.iter().map(|shape| shape.type_ref()).collect(),
                self.returns.map(Shape::type_ref),
            ),
        )
    }

    pub fn return_type(&self) -> Option<TypeRef> {
        self.returns.map(Shape::type_ref)
    }
}

const fn global(
    name: &'static str,
    runtime_name: &'static str,
    params: &'static [Shape],
    returns: Option<Shape>,
) -> IntrinsicOverload {
    IntrinsicOverload {
        owner: None,
        name,
        runtime_type: "Runtime.GlobalFunctions",
        runtime_name,
        params,
        returns,
    }
}

const fn member(
    owner: &'static str,
    name: &'static str,
    runtime_type: &'static str,
    runtime_name: &'static str,
    params: &'static [Shape],
    returns: Option<Shape>,
) -> IntrinsicOverload {
    IntrinsicOverload {
        owner: Some(owner),
        name,
        runtime_type,
        runtime_name,
        params,
        returns,
    }
}

use self::Shape::{Boolean, Number, Object, Rest, String as Str};

const CONSOLE: &str = "Runtime.Console";
const MATH: &str = "Runtime.MathObject";
const OBJECT: &str = "Runtime.ObjectConstructor";
const ARRAY: &str = "Runtime.ArrayConstructor";
const JSON: &str = "Runtime.Json";
const PROMISE: &str = "Runtime.Promise";
const DATE: &str = "Runtime.DateConstructor";
const NUMBER: &str = "Runtime.NumberConstructor";

static INTRINSICS: &[IntrinsicOverload] = &[
    global("parseInt", "ParseInt", &[Object, Object], Some(Number)),
    global("parseFloat", "ParseFloat", &[Object], Some(Number)),
    global("isNaN", "IsNaN", &[Object], Some(Boolean)),
    global("isFinite", "IsFinite", &[Object], Some(Boolean)),
    global("String", "String", &[Object], Some(Str)),
    global("Number", "Number", &[Object], Some(Number)),
    global("Boolean", "Boolean", &[Object], Some(Boolean)),
    global("setTimeout", "SetTimeout", &[Object, Object, Rest], Some(Number)),
    global("clearTimeout", "ClearTimeout", &[Object], None),
    global("queueMicrotask", "QueueMicrotask", &[Object], None),
    global(
        "encodeURIComponent",
        "EncodeURIComponent",
        &[Object],
        Some(Str),
    ),
    member("console", "log", CONSOLE, "Log", &[Rest], None),
    member("console", "error", CONSOLE, "Error", &[Rest], None),
    member("console", "warn", CONSOLE, "Warn", &[Rest], None),
    member("console", "info", CONSOLE, "Info", &[Rest], None),
    member("Math", "abs", MATH, "Abs", &[Number], Some(Number)),
    member("Math", "floor", MATH, "Floor", &[Number], Some(Number)),
    member("Math", "ceil", MATH, "Ceil", &[Number], Some(Number)),
    member("Math", "round", MATH, "Round", &[Number], Some(Number)),
    member("Math", "sqrt", MATH, "Sqrt", &[Number], Some(Number)),
    member("Math", "pow", MATH, "Pow", &[Number, Number], Some(Number)),
    member("Math", "max", MATH, "Max", &[Rest], Some(Number)),
    member("Math", "min", MATH, "Min", &[Rest], Some(Number)),
    member("Math", "random", MATH, "Random", &[], Some(Number)),
    member("Math", "trunc", MATH, "Trunc", &[Number], Some(Number)),
    member("Math", "sign", MATH, "Sign", &[Number], Some(Number)),
    member("Object", "keys", OBJECT, "Keys", &[Object], Some(Object)),
    member("Object", "assign", OBJECT, "Assign", &[Object, Rest], Some(Object)),
    member("Array", "isArray", ARRAY, "IsArray", &[Object], Some(Boolean)),
    member("Array", "of", ARRAY, "Of", &[Rest], Some(Object)),
    member("JSON", "stringify", JSON, "Stringify", &[Object], Some(Str)),
    member(
        "JSON",
        "stringify",
        JSON,
        "Stringify",
        &[Object, Object, Object],
        Some(Str),
    ),
    member("JSON", "parse", JSON, "Parse", &[Str], Some(Object)),
    member("Promise", "resolve", PROMISE, "Resolve", &[Object], Some(Object)),
    member("Promise", "reject", PROMISE, "Reject", &[Object], Some(Object)),
    member("Date", "now", DATE, "Now", &[], Some(Number)),
    member("Number", "isInteger", NUMBER, "IsInteger", &[Object], Some(Boolean)),
];

type Key = (Option<std::string::String>, std::string::String);

static BY_NAME: LazyLock<HashMap<Key, Vec<&'static IntrinsicOverload>>> = LazyLock::new(|| {
    let mut map: HashMap<Key, Vec<&'static IntrinsicOverload>> = HashMap::new();
    for overload in INTRINSICS {
        let key = (
            overload.owner.map(str::to_ascii_lowercase),
            overload.name.to_ascii_lowercase(),
        );
        map.entry(key).or_default().push(overload);
    }
    map
});

pub fn all_intrinsics() -> &'static [IntrinsicOverload] {
    INTRINSICS
}

/// Every overload registered under `owner.name`, case-insensitively.
pub fn lookup(owner: Option<&str>, name: &str) -> &'static [&'static IntrinsicOverload] {
    let key = (
        owner.map(str::to_ascii_lowercase),
        name.to_ascii_lowercase(),
    );
    BY_NAME.get(&key).map(Vec::as_slice).unwrap_or(&[])
}

/// Picks the overload for a call with `argc` arguments.
///
/// Preference: exact fixed arity, then a variadic overload whose fixed part
/// fits, then the smallest overload that can be padded, then the largest one
/// (extra arguments are dropped).
pub fn resolve(owner: Option<&str>, name: &str, argc: usize) -> Option<&'static IntrinsicOverload> {
    let candidates = lookup(owner, name);
    if let Some(exact) = candidates
        .iter()
        .find(|overload| !overload.is_variadic() && overload.params.len() == argc)
    {
        return Some(*exact);
    }
    if let Some(variadic) = candidates
        .iter()
        .filter(|overload| overload.is_variadic() && overload.fixed_params().len() <= argc)
        .max_by_key(|overload| overload.fixed_params().len())
    {
        return Some(*variadic);
    }
    if let Some(padded) = candidates
        .iter()
        .filter(|overload| overload.fixed_params().len() > argc)
        .min_by_key(|overload| overload.fixed_params().len())
    {
        return Some(*padded);
    }
    candidates
        .iter()
        .max_by_key(|overload| overload.params.len())
        .copied()
}

/// `owner.name` or `name` for diagnostics.
pub fn display_name(owner: Option<&str>, name: &str) -> std::string::String {
    match owner {
        Some(owner) => format!("{}.{}", owner, name),
        None => name.to_string(),
    }
}
