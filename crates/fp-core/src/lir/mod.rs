//! Low-level IR of one callable body.
//!
//! A body is a flat, ordered list of [`LirInstruction`]s over virtual value
//! slots ([`TempId`]). Control flow is expressed with [`LirInstruction::Label`]
//! markers and branches; protected regions with paired begin/end markers.

pub mod body;
pub mod builder;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

pub use body::{
    MethodBody, MethodDescriptor, MethodKind, ParameterInfo, ResumableInfo, ResumableKind,
    ReturnShape, VariableSlot,
};
pub use builder::MethodBodyBuilder;

use crate::metadata::TypeRef;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[display("t{_0}")]
pub struct TempId(pub u32);

impl TempId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[display("v{_0}")]
pub struct VariableId(pub u32);

impl VariableId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[display("L{_0}")]
pub struct LabelId(pub u32);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[display("r{_0}")]
pub struct RegionId(pub u32);

/// Identifies one suspend point (`await` / `yield`) of a resumable body.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[display("s{_0}")]
pub struct SuspendId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    Number,
    Boolean,
}

impl ScalarKind {
    pub fn type_ref(self) -> TypeRef {
        match self {
            ScalarKind::Number => TypeRef::Number,
            ScalarKind::Boolean => TypeRef::Boolean,
        }
    }
}

/// Inferred storage of a temp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TempStorage {
    /// Fixed-size scalar kept unboxed.
    Unboxed(ScalarKind),
    /// Object-shaped value, with its precise type when known.
    Reference(Option<TypeRef>),
    /// Alias of a named source variable that owns its own slot.
    Variable(VariableId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LirConst {
    Number(f64),
    Boolean(bool),
    String(String),
    Null,
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr)]
pub enum NumericOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
}

/// Operators resolved at run time by the support library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr)]
pub enum DynamicOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Exponent,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    LeftShift,
    RightShift,
    UnsignedRightShift,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl DynamicOp {
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            DynamicOp::LessThan
                | DynamicOp::LessThanOrEqual
                | DynamicOp::GreaterThan
                | DynamicOp::GreaterThanOrEqual
        )
    }
}

/// The pure boolean-producing comparisons that may be fused into branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr)]
pub enum ComparisonKind {
    NumberLessThan,
    NumberGreaterThan,
    NumberLessThanOrEqual,
    NumberGreaterThanOrEqual,
    NumberEqual,
    NumberNotEqual,
    BooleanEqual,
    BooleanNotEqual,
}

impl ComparisonKind {
    pub const ALL: [ComparisonKind; 8] = [
        ComparisonKind::NumberLessThan,
        ComparisonKind::NumberGreaterThan,
        ComparisonKind::NumberLessThanOrEqual,
        ComparisonKind::NumberGreaterThanOrEqual,
        ComparisonKind::NumberEqual,
        ComparisonKind::NumberNotEqual,
        ComparisonKind::BooleanEqual,
        ComparisonKind::BooleanNotEqual,
    ];

    pub fn is_numeric(self) -> bool {
        !matches!(
            self,
            ComparisonKind::BooleanEqual | ComparisonKind::BooleanNotEqual
        )
    }

    pub fn operand_type(self) -> TypeRef {
        if self.is_numeric() {
            TypeRef::Number
        } else {
            TypeRef::Boolean
        }
    }
}

/// Where one entry of a freshly built scopes array comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeSource {
    /// The method's own leaf scope instance.
    Leaf,
    /// An entry of the incoming scopes array.
    Parent(u32),
    /// A scope instance held in a temp.
    Temp(TempId),
    Null,
}

/// Emission category an instruction kind belongs to, in dispatch priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoStaticStr)]
pub enum Category {
    Bookkeeping,
    DynamicOperator,
    Literal,
    Collection,
    ClassField,
    CallSite,
    Scope,
    LeafScope,
    Resumable,
    NamedScope,
    Parameter,
    Arithmetic,
    Intrinsic,
    Construction,
    Return,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, IntoStaticStr)]
pub enum LirInstruction {
    // Bookkeeping
    Label(LabelId),
    LoadConst {
        value: LirConst,
        result: TempId,
    },
    Copy {
        source: TempId,
        result: TempId,
    },
    ConvertToObject {
        source: TempId,
        result: TempId,
    },
    ConvertToNumber {
        source: TempId,
        result: TempId,
    },
    ConvertToBoolean {
        source: TempId,
        result: TempId,
    },
    ConvertToString {
        source: TempId,
        result: TempId,
    },
    Branch {
        target: LabelId,
    },
    BranchIfTrue {
        condition: TempId,
        target: LabelId,
    },
    BranchIfFalse {
        condition: TempId,
        target: LabelId,
    },

    // Protected regions
    TryBegin {
        region: RegionId,
    },
    CatchBegin {
        region: RegionId,
        exception: Option<TempId>,
    },
    FinallyBegin {
        region: RegionId,
    },
    TryEnd {
        region: RegionId,
    },
    Leave {
        target: LabelId,
    },
    EndFinally,
    Throw {
        value: TempId,
    },

    // Dynamic operators
    In {
        key: TempId,
        object: TempId,
        result: TempId,
    },
    InstanceOf {
        value: TempId,
        constructor: TempId,
        result: TempId,
    },
    DynamicBinary {
        op: DynamicOp,
        left: TempId,
        right: TempId,
        result: TempId,
    },
    LooseEquals {
        left: TempId,
        right: TempId,
        negated: bool,
        result: TempId,
    },
    StrictEquals {
        left: TempId,
        right: TempId,
        negated: bool,
        result: TempId,
    },
    UnaryMinus {
        operand: TempId,
        result: TempId,
    },
    TypeOf {
        operand: TempId,
        result: TempId,
    },

    // Literals
    NewArray {
        elements: Vec<TempId>,
        result: TempId,
    },
    NewObject {
        properties: Vec<(String, TempId)>,
        result: TempId,
    },

    // Collections
    GetItem {
        object: TempId,
        key: TempId,
        result: TempId,
    },
    SetItem {
        object: TempId,
        key: TempId,
        value: TempId,
        result: Option<TempId>,
    },
    GetLength {
        object: TempId,
        result: TempId,
    },
    GetProperty {
        object: TempId,
        name: String,
        result: TempId,
    },
    SetProperty {
        object: TempId,
        name: String,
        value: TempId,
    },

    // User-class fields on `this`
    LoadClassField {
        class: String,
        field: String,
        result: TempId,
    },
    StoreClassField {
        class: String,
        field: String,
        value: TempId,
    },

    // Call sites
    CallFunction {
        function: String,
        scopes: Option<TempId>,
        args: Vec<TempId>,
        result: Option<TempId>,
    },
    CallClosure {
        callee: TempId,
        args: Vec<TempId>,
        result: Option<TempId>,
    },
    CallMember {
        receiver: TempId,
        name: String,
        args: Vec<TempId>,
        result: Option<TempId>,
    },
    CallTyped {
        receiver: TempId,
        class: String,
        method: String,
        args: Vec<TempId>,
        fallback: bool,
        result: Option<TempId>,
    },

    // Scopes reached through the scopes array
    CreateScopesArray {
        sources: Vec<ScopeSource>,
        result: TempId,
    },
    CreateScopeInstance {
        scope: String,
        result: TempId,
    },
    LoadParentScopeField {
        index: u32,
        scope: String,
        field: String,
        result: TempId,
    },
    StoreParentScopeField {
        index: u32,
        scope: String,
        field: String,
        value: TempId,
    },

    // Leaf scope
    CreateLeafScopeInstance {
        scope: String,
    },
    LoadLeafScopeField {
        field: String,
        result: TempId,
    },
    StoreLeafScopeField {
        field: String,
        value: TempId,
    },

    // Resumable bodies
    Await {
        value: TempId,
        suspend: SuspendId,
        result: Option<TempId>,
    },
    Yield {
        value: TempId,
        suspend: SuspendId,
        result: Option<TempId>,
    },

    // Scope instances held in temps
    LoadScopeField {
        instance: TempId,
        scope: String,
        field: String,
        result: TempId,
    },
    StoreScopeField {
        instance: TempId,
        scope: String,
        field: String,
        value: TempId,
    },

    // Parameters
    LoadParameter {
        index: u32,
        result: TempId,
    },
    StoreParameter {
        index: u32,
        value: TempId,
    },
    LoadThis {
        result: TempId,
    },
    LoadScopes {
        result: TempId,
    },

    // Typed arithmetic
    Binary {
        op: NumericOp,
        left: TempId,
        right: TempId,
        result: TempId,
    },
    Negate {
        operand: TempId,
        result: TempId,
    },
    Not {
        operand: TempId,
        result: TempId,
    },
    BitNot {
        operand: TempId,
        result: TempId,
    },
    Compare {
        kind: ComparisonKind,
        left: TempId,
        right: TempId,
        result: TempId,
    },

    // Intrinsics: `owner == None` is a global function
    CallIntrinsic {
        owner: Option<String>,
        name: String,
        args: Vec<TempId>,
        result: Option<TempId>,
    },

    NewClass {
        class: String,
        scopes: Option<TempId>,
        args: Vec<TempId>,
        result: Option<TempId>,
    },

    Return {
        value: Option<TempId>,
    },
}

impl LirInstruction {
    pub fn kind_name(&self) -> &'static str {
        self.into()
    }

    pub fn category(&self) -> Category {
        use LirInstruction::*;
        match self {
            Label(_)
            | LoadConst { .. }
            | Copy { .. }
            | ConvertToObject { .. }
            | ConvertToNumber { .. }
            | ConvertToBoolean { .. }
            | ConvertToString { .. }
            | Branch { .. }
            | BranchIfTrue { .. }
            | BranchIfFalse { .. }
            | TryBegin { .. }
            | CatchBegin { .. }
            | FinallyBegin { .. }
            | TryEnd { .. }
            | Leave { .. }
            | EndFinally
            | Throw { .. } => Category::Bookkeeping,
            In { .. }
            | InstanceOf { .. }
            | DynamicBinary { .. }
            | LooseEquals { .. }
            | StrictEquals { .. }
            | UnaryMinus { .. }
            | TypeOf { .. } => Category::DynamicOperator,
            NewArray { .. } | NewObject { .. } => Category::Literal,
            GetItem { .. }
            | SetItem { .. }
            | GetLength { .. }
            | GetProperty { .. }
            | SetProperty { .. } => Category::Collection,
            LoadClassField { .. } | StoreClassField { .. } => Category::ClassField,
            CallFunction { .. } | CallClosure { .. } | CallMember { .. } | CallTyped { .. } => {
                Category::CallSite
            }
            CreateScopesArray { .. }
            | CreateScopeInstance { .. }
            | LoadParentScopeField { .. }
            | StoreParentScopeField { .. } => Category::Scope,
            CreateLeafScopeInstance { .. }
            | LoadLeafScopeField { .. }
            | StoreLeafScopeField { .. } => Category::LeafScope,
            Await { .. } | Yield { .. } => Category::Resumable,
            LoadScopeField { .. } | StoreScopeField { .. } => Category::NamedScope,
            LoadParameter { .. } | StoreParameter { .. } | LoadThis { .. } | LoadScopes { .. } => {
                Category::Parameter
            }
            Binary { .. } | Negate { .. } | Not { .. } | BitNot { .. } | Compare { .. } => {
                Category::Arithmetic
            }
            CallIntrinsic { .. } => Category::Intrinsic,
            NewClass { .. } => Category::Construction,
            Return { .. } => Category::Return,
        }
    }

    /// Temp written by this instruction, if any.
    pub fn result(&self) -> Option<TempId> {
        use LirInstruction::*;
        match self {
            LoadConst { result, .. }
            | Copy { result, .. }
            | ConvertToObject { result, .. }
            | ConvertToNumber { result, .. }
            | ConvertToBoolean { result, .. }
            | ConvertToString { result, .. }
            | In { result, .. }
            | InstanceOf { result, .. }
            | DynamicBinary { result, .. }
            | LooseEquals { result, .. }
            | StrictEquals { result, .. }
            | UnaryMinus { result, .. }
            | TypeOf { result, .. }
            | NewArray { result, .. }
            | NewObject { result, .. }
            | GetItem { result, .. }
            | GetLength { result, .. }
            | GetProperty { result, .. }
            | LoadClassField { result, .. }
            | CreateScopesArray { result, .. }
            | CreateScopeInstance { result, .. }
            | LoadParentScopeField { result, .. }
            | LoadLeafScopeField { result, .. }
            | LoadScopeField { result, .. }
            | LoadParameter { result, .. }
            | LoadThis { result }
            | LoadScopes { result }
            | Binary { result, .. }
            | Negate { result, .. }
            | Not { result, .. }
            | BitNot { result, .. }
            | Compare { result, .. } => Some(*result),
            CatchBegin { exception, .. } => *exception,
            SetItem { result, .. }
            | CallFunction { result, .. }
            | CallClosure { result, .. }
            | CallMember { result, .. }
            | CallTyped { result, .. }
            | Await { result, .. }
            | Yield { result, .. }
            | CallIntrinsic { result, .. }
            | NewClass { result, .. } => *result,
            Label(_)
            | Branch { .. }
            | BranchIfTrue { .. }
            | BranchIfFalse { .. }
            | TryBegin { .. }
            | FinallyBegin { .. }
            | TryEnd { .. }
            | Leave { .. }
            | EndFinally
            | Throw { .. }
            | SetProperty { .. }
            | StoreClassField { .. }
            | StoreParentScopeField { .. }
            | CreateLeafScopeInstance { .. }
            | StoreLeafScopeField { .. }
            | StoreScopeField { .. }
            | StoreParameter { .. }
            | Return { .. } => None,
        }
    }

    /// Temps read by this instruction, in operand order.
    pub fn uses(&self) -> Vec<TempId> {
        use LirInstruction::*;
        match self {
            Copy { source, .. }
            | ConvertToObject { source, .. }
            | ConvertToNumber { source, .. }
            | ConvertToBoolean { source, .. }
            | ConvertToString { source, .. } => vec![*source],
            BranchIfTrue { condition, .. } | BranchIfFalse { condition, .. } => vec![*condition],
            Throw { value } => vec![*value],
            In { key, object, .. } => vec![*key, *object],
            InstanceOf {
                value, constructor, ..
            } => vec![*value, *constructor],
            DynamicBinary { left, right, .. }
            | LooseEquals { left, right, .. }
            | StrictEquals { left, right, .. }
            | Binary { left, right, .. }
            | Compare { left, right, .. } => vec![*left, *right],
            UnaryMinus { operand, .. }
            | TypeOf { operand, .. }
            | Negate { operand, .. }
            | Not { operand, .. }
            | BitNot { operand, .. } => vec![*operand],
            NewArray { elements, .. } => elements.clone(),
            NewObject { properties, .. } => properties.iter().map(|(_, temp)| *temp).collect(),
            GetItem { object, key, .. } => vec![*object, *key],
            SetItem {
                object, key, value, ..
            } => vec![*object, *key, *value],
            GetLength { object, .. } | GetProperty { object, .. } => vec![*object],
            SetProperty { object, value, .. } => vec![*object, *value],
            StoreClassField { value, .. }
            | StoreParentScopeField { value, .. }
            | StoreLeafScopeField { value, .. }
            | StoreParameter { value, .. } => vec![*value],
            CallFunction { scopes, args, .. } | NewClass { scopes, args, .. } => {
                scopes.iter().chain(args.iter()).copied().collect()
            }
            CallClosure { callee, args, .. } => {
                std::iter::once(*callee).chain(args.iter().copied()).collect()
            }
            CallMember { receiver, args, .. } | CallTyped { receiver, args, .. } => {
                std::iter::once(*receiver).chain(args.iter().copied()).collect()
            }
            CreateScopesArray { sources, .. } => sources
                .iter()
                .filter_map(|source| match source {
                    ScopeSource::Temp(temp) => Some(*temp),
                    _ => None,
                })
                .collect(),
            Await { value, .. } | Yield { value, .. } => vec![*value],
            LoadScopeField { instance, .. } => vec![*instance],
            StoreScopeField {
                instance, value, ..
            } => vec![*instance, *value],
            CallIntrinsic { args, .. } => args.clone(),
            Return { value } => value.iter().copied().collect(),
            Label(_)
            | LoadConst { .. }
            | Branch { .. }
            | TryBegin { .. }
            | CatchBegin { .. }
            | FinallyBegin { .. }
            | TryEnd { .. }
            | Leave { .. }
            | EndFinally
            | LoadClassField { .. }
            | CreateScopeInstance { .. }
            | LoadParentScopeField { .. }
            | CreateLeafScopeInstance { .. }
            | LoadLeafScopeField { .. }
            | LoadParameter { .. }
            | LoadThis { .. }
            | LoadScopes { .. } => Vec::new(),
        }
    }

    /// Condition temp when this is a conditional branch.
    pub fn branch_condition(&self) -> Option<TempId> {
        match self {
            LirInstruction::BranchIfTrue { condition, .. }
            | LirInstruction::BranchIfFalse { condition, .. } => Some(*condition),
            _ => None,
        }
    }

    pub fn branch_target(&self) -> Option<LabelId> {
        match self {
            LirInstruction::Branch { target }
            | LirInstruction::BranchIfTrue { target, .. }
            | LirInstruction::BranchIfFalse { target, .. }
            | LirInstruction::Leave { target } => Some(*target),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_uses_list_scopes_before_arguments() {
        let call = LirInstruction::NewClass {
            class: "Point".to_string(),
            scopes: Some(TempId(4)),
            args: vec![TempId(1), TempId(2)],
            result: Some(TempId(5)),
        };
        assert_eq!(call.uses(), vec![TempId(4), TempId(1), TempId(2)]);
        assert_eq!(call.result(), Some(TempId(5)));
        assert_eq!(call.category(), Category::Construction);
        assert_eq!(call.kind_name(), "NewClass");
    }

    #[test]
    fn catch_begin_defines_its_exception_temp() {
        let catch = LirInstruction::CatchBegin {
            region: RegionId(0),
            exception: Some(TempId(3)),
        };
        assert_eq!(catch.result(), Some(TempId(3)));
        assert!(catch.uses().is_empty());
    }

    #[test]
    fn only_boolean_comparisons_take_boolean_operands() {
        let boolean = ComparisonKind::ALL
            .iter()
            .filter(|kind| !kind.is_numeric())
            .count();
        assert_eq!(boolean, 2);
        assert_eq!(
            ComparisonKind::NumberLessThanOrEqual.operand_type(),
            TypeRef::Number
        );
    }
}
