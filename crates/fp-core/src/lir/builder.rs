use super::{
    LabelId, LirInstruction, MethodBody, RegionId, ResumableInfo, ScalarKind, SuspendId, TempId,
    TempStorage, VariableId, VariableSlot,
};
use crate::metadata::TypeRef;

/// Incremental construction of a [`MethodBody`], handing out fresh ids.
#[derive(Debug, Default)]
pub struct MethodBodyBuilder {
    body: MethodBody,
    next_label: u32,
    next_region: u32,
    next_suspend: u32,
}

impl MethodBodyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn temp(&mut self, storage: TempStorage) -> TempId {
        self.body.temps.push(storage);
        TempId((self.body.temps.len() - 1) as u32)
    }

    pub fn number_temp(&mut self) -> TempId {
        self.temp(TempStorage::Unboxed(ScalarKind::Number))
    }

    pub fn boolean_temp(&mut self) -> TempId {
        self.temp(TempStorage::Unboxed(ScalarKind::Boolean))
    }

    pub fn object_temp(&mut self) -> TempId {
        self.temp(TempStorage::Reference(None))
    }

    pub fn variable(&mut self, name: impl Into<String>, ty: TypeRef) -> VariableId {
        self.body.variables.push(VariableSlot::new(name, ty));
        VariableId((self.body.variables.len() - 1) as u32)
    }

    /// Temp aliasing `variable`.
    pub fn variable_temp(&mut self, variable: VariableId) -> TempId {
        self.temp(TempStorage::Variable(variable))
    }

    pub fn label(&mut self) -> LabelId {
        let label = LabelId(self.next_label);
        self.next_label += 1;
        label
    }

    pub fn region(&mut self) -> RegionId {
        let region = RegionId(self.next_region);
        self.next_region += 1;
        region
    }

    pub fn suspend_point(&mut self) -> SuspendId {
        let suspend = SuspendId(self.next_suspend);
        self.next_suspend += 1;
        suspend
    }

    pub fn leaf_scope(&mut self, scope: impl Into<String>) -> &mut Self {
        self.body.leaf_scope = Some(scope.into());
        self
    }

    pub fn resumable(&mut self, info: ResumableInfo) -> &mut Self {
        self.body.resumable = Some(info);
        self
    }

    pub fn resumable_mut(&mut self) -> Option<&mut ResumableInfo> {
        self.body.resumable.as_mut()
    }

    pub fn push(&mut self, instruction: LirInstruction) -> &mut Self {
        self.body.instructions.push(instruction);
        self
    }

    pub fn mark(&mut self, label: LabelId) -> &mut Self {
        self.push(LirInstruction::Label(label))
    }

    pub fn build(self) -> MethodBody {
        self.body
    }
}
