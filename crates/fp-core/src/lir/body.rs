use super::{LabelId, LirInstruction, RegionId, SuspendId, TempId, TempStorage, VariableId};
use crate::error::{Error, Result};
use crate::metadata::TypeRef;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub name: String,
    pub ty: TypeRef,
}

impl ParameterInfo {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodKind {
    Function,
    Method,
    Constructor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnShape {
    Void,
    Value(TypeRef),
    Generator,
    Async,
}

/// Calling convention and shape of the callable being compiled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    /// Type the method is emitted into.
    pub owner: TypeRef,
    pub kind: MethodKind,
    pub is_static: bool,
    pub params: Vec<ParameterInfo>,
    /// Accepts a leading `object[]` of enclosing scope instances.
    pub has_scopes_param: bool,
    pub returns: ReturnShape,
}

impl MethodDescriptor {
    /// A static function taking the scopes array and returning `object`.
    pub fn function(name: impl Into<String>, owner: TypeRef) -> Self {
        Self {
            name: name.into(),
            owner,
            kind: MethodKind::Function,
            is_static: true,
            params: Vec::new(),
            has_scopes_param: true,
            returns: ReturnShape::Value(TypeRef::Object),
        }
    }

    pub fn method(name: impl Into<String>, owner: TypeRef) -> Self {
        Self {
            kind: MethodKind::Method,
            is_static: false,
            has_scopes_param: false,
            ..Self::function(name, owner)
        }
    }

    pub fn constructor(owner: TypeRef) -> Self {
        Self {
            kind: MethodKind::Constructor,
            returns: ReturnShape::Void,
            ..Self::method(".ctor", owner)
        }
    }

    pub fn with_params(mut self, params: Vec<ParameterInfo>) -> Self {
        self.params = params;
        self
    }

    pub fn with_returns(mut self, returns: ReturnShape) -> Self {
        self.returns = returns;
        self
    }

    pub fn with_scopes_param(mut self, has_scopes_param: bool) -> Self {
        self.has_scopes_param = has_scopes_param;
        self
    }

    pub fn has_this(&self) -> bool {
        !self.is_static
    }

    /// Argument index of the scopes array.
    pub fn scopes_arg(&self) -> Option<u16> {
        self.has_scopes_param.then(|| u16::from(self.has_this()))
    }

    /// Argument index of declared parameter `index`.
    pub fn param_arg(&self, index: u32) -> Option<u16> {
        if index as usize >= self.params.len() {
            return None;
        }
        let leading = u16::from(self.has_this()) + u16::from(self.has_scopes_param);
        u16::try_from(index).ok().map(|index| index + leading)
    }

    pub fn is_resumable(&self) -> bool {
        matches!(self.returns, ReturnShape::Generator | ReturnShape::Async)
    }

    /// Representation of the value `ret` hands back, `None` for void.
    pub fn return_type(&self) -> Option<TypeRef> {
        match &self.returns {
            ReturnShape::Void => None,
            ReturnShape::Value(ty) => Some(ty.clone()),
            ReturnShape::Generator | ReturnShape::Async => Some(TypeRef::Object),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSlot {
    pub name: String,
    pub ty: TypeRef,
}

impl VariableSlot {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResumableKind {
    Async,
    Generator,
}

/// Suspend/resume bookkeeping produced by the lowering stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumableInfo {
    pub kind: ResumableKind,
    /// Resume state assigned to each suspend point; states start at 1.
    pub resume_states: BTreeMap<SuspendId, u32>,
    pub max_state: u32,
    pub has_await: bool,
    pub has_yield: bool,
    /// Entry of the scopes array that carries the leaf scope across resumptions.
    pub leaf_scope_slot: u32,
}

impl ResumableInfo {
    pub fn new(kind: ResumableKind, leaf_scope_slot: u32) -> Self {
        Self {
            kind,
            resume_states: BTreeMap::new(),
            max_state: 0,
            has_await: false,
            has_yield: false,
            leaf_scope_slot,
        }
    }

    /// Registers a suspend point with the next free state id.
    pub fn add_suspend_point(&mut self, suspend: SuspendId) -> u32 {
        self.add_suspend_point_with_state(suspend, self.max_state + 1)
    }

    pub fn add_suspend_point_with_state(&mut self, suspend: SuspendId, state: u32) -> u32 {
        self.resume_states.insert(suspend, state);
        self.max_state = self.max_state.max(state);
        match self.kind {
            ResumableKind::Async => self.has_await = true,
            ResumableKind::Generator => self.has_yield = true,
        }
        state
    }

    pub fn has_suspension(&self) -> bool {
        self.has_await || self.has_yield
    }
}

/// Everything known about one body before lowering to bytecode.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MethodBody {
    pub instructions: Vec<LirInstruction>,
    pub temps: Vec<TempStorage>,
    pub variables: Vec<VariableSlot>,
    pub leaf_scope: Option<String>,
    pub resumable: Option<ResumableInfo>,
}

impl MethodBody {
    pub fn temp(&self, temp: TempId) -> Option<&TempStorage> {
        self.temps.get(temp.index())
    }

    pub fn variable(&self, variable: VariableId) -> Option<&VariableSlot> {
        self.variables.get(variable.index())
    }

    /// Checks that every reference in the body resolves.
    pub fn validate(&self) -> Result<()> {
        for (index, storage) in self.temps.iter().enumerate() {
            if let TempStorage::Variable(variable) = storage {
                if self.variable(*variable).is_none() {
                    return Err(Error::InvalidBody(format!(
                        "temp t{} aliases undeclared variable {}",
                        index, variable
                    )));
                }
            }
        }

        let mut labels = HashSet::new();
        for (index, instruction) in self.instructions.iter().enumerate() {
            for temp in instruction.uses().into_iter().chain(instruction.result()) {
                if self.temp(temp).is_none() {
                    return Err(Error::at(
                        index,
                        format!(
                            "{} references undeclared temp {}",
                            instruction.kind_name(),
                            temp
                        ),
                    ));
                }
            }
            if let LirInstruction::Label(label) = instruction {
                if !labels.insert(*label) {
                    return Err(Error::at(index, format!("label {} marked twice", label)));
                }
            }
        }

        for (index, instruction) in self.instructions.iter().enumerate() {
            if let Some(target) = instruction.branch_target() {
                if !labels.contains(&target) {
                    return Err(Error::at(
                        index,
                        format!("branch to unmarked label {}", target),
                    ));
                }
            }
        }

        self.validate_regions()?;
        self.validate_resumable()
    }

    fn validate_regions(&self) -> Result<()> {
        let mut open: Vec<RegionId> = Vec::new();
        let mut handlers: HashMap<RegionId, usize> = HashMap::new();
        for (index, instruction) in self.instructions.iter().enumerate() {
            match instruction {
                LirInstruction::TryBegin { region } => {
                    if open.contains(region) || handlers.contains_key(region) {
                        return Err(Error::at(index, format!("region {} reopened", region)));
                    }
                    open.push(*region);
                }
                LirInstruction::CatchBegin { region, .. }
                | LirInstruction::FinallyBegin { region } => {
                    if open.last() != Some(region) {
                        return Err(Error::at(
                            index,
                            format!("handler for {} outside its try block", region),
                        ));
                    }
                    if handlers.insert(*region, index).is_some() {
                        return Err(Error::at(
                            index,
                            format!("region {} has more than one handler", region),
                        ));
                    }
                }
                LirInstruction::TryEnd { region } => {
                    if open.last() != Some(region) || !handlers.contains_key(region) {
                        return Err(Error::at(
                            index,
                            format!("region {} closed without a handler", region),
                        ));
                    }
                    open.pop();
                }
                _ => {}
            }
        }
        if !open.is_empty() {
            return Err(Error::InvalidBody(format!(
                "unterminated protected regions: {}",
                open.iter().join(", ")
            )));
        }
        Ok(())
    }

    fn validate_resumable(&self) -> Result<()> {
        let Some(info) = &self.resumable else {
            return Ok(());
        };
        if self.leaf_scope.is_none() {
            return Err(Error::InvalidBody(
                "resumable body has no leaf scope to hold its state".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for (suspend, state) in &info.resume_states {
            if *state == 0 || *state > info.max_state {
                return Err(Error::InvalidBody(format!(
                    "suspend point {} maps to state {} outside 1..={}",
                    suspend, state, info.max_state
                )));
            }
            if !seen.insert(*state) {
                return Err(Error::InvalidBody(format!(
                    "resume state {} assigned twice",
                    state
                )));
            }
        }
        for (index, instruction) in self.instructions.iter().enumerate() {
            if let LirInstruction::Await { suspend, .. } | LirInstruction::Yield { suspend, .. } =
                instruction
            {
                if !info.resume_states.contains_key(suspend) {
                    return Err(Error::at(
                        index,
                        format!("suspend point {} has no resume state", suspend),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn label_ids(&self) -> impl Iterator<Item = LabelId> + '_ {
        self.instructions.iter().filter_map(|instruction| match instruction {
            LirInstruction::Label(label) => Some(*label),
            _ => None,
        })
    }
}
