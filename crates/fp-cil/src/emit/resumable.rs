//! Async and generator bodies as re-entrant state machines.
//!
//! The leaf scope instance carries the resume state between invocations and
//! lives in the scopes array slot named by [`ResumableInfo::leaf_scope_slot`].
//! Entry dispatch is a bounded `switch` over `0..=max_state`; every state
//! without a suspend point (including 0) enters the body from the top.

use super::MethodEmitter;
use crate::builder::IlBuilder;
use crate::error::{CilError, Result};
use crate::opcode::{Label, OpCode};
use crate::runtime::{self, RuntimeMethod};
use eyre::eyre;
use fp_core::lir::{MethodBody, ResumableInfo, ResumableKind, SuspendId, TempId};
use fp_core::metadata::FieldRef;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Default)]
pub(super) struct ResumeState {
    labels: BTreeMap<SuspendId, Label>,
    marked: BTreeSet<SuspendId>,
    bootstrapped: bool,
}

impl ResumeState {
    fn label(&mut self, suspend: SuspendId, il: &mut IlBuilder) -> Label {
        *self
            .labels
            .entry(suspend)
            .or_insert_with(|| il.define_label())
    }

    fn mark(&mut self, suspend: SuspendId, il: &mut IlBuilder) -> Result<()> {
        let label = self.label(suspend, il);
        if !self.marked.insert(suspend) {
            return Err(CilError::Internal(eyre!(
                "suspend point {} emitted twice",
                suspend
            )));
        }
        il.mark_label(label)
    }

    /// Every dispatched state must have been emitted, and a body that can
    /// suspend must have built its dispatch.
    pub(super) fn check_complete(&self, body: &MethodBody, method: &str) -> Result<()> {
        let Some(info) = &body.resumable else {
            return Ok(());
        };
        if info.max_state > 0 && !self.bootstrapped {
            return Err(CilError::Internal(eyre!(
                "resumable method {} never creates its leaf scope, so it has no entry dispatch",
                method
            )));
        }
        if let Some(missing) = self
            .labels
            .keys()
            .find(|suspend| !self.marked.contains(suspend))
        {
            return Err(CilError::Internal(eyre!(
                "resume state for {} in method {} has no suspend point in the body",
                missing,
                method
            )));
        }
        Ok(())
    }
}

fn state_field(kind: ResumableKind) -> Option<FieldRef> {
    match kind {
        ResumableKind::Async => runtime::async_base_field(runtime::ASYNC_STATE_FIELD),
        ResumableKind::Generator => runtime::generator_base_field(runtime::GENERATOR_STATE_FIELD),
    }
}

fn hidden_field(field: Option<FieldRef>, name: &str) -> Result<FieldRef> {
    field.ok_or_else(|| CilError::Internal(eyre!("hidden scope field {} is not defined", name)))
}

impl MethodEmitter<'_> {
    fn not_resumable(&self, kind: ResumableKind, what: &str) -> CilError {
        CilError::Internal(eyre!(
            "{} in method {} whose body is not {:?}",
            what,
            self.descriptor.name,
            kind
        ))
    }

    fn resume_state_of(&self, info: &ResumableInfo, suspend: SuspendId) -> Result<u32> {
        info.resume_states.get(&suspend).copied().ok_or_else(|| {
            CilError::Internal(eyre!(
                "suspend point {} of {} has no resume state",
                suspend,
                self.descriptor.name
            ))
        })
    }

    fn ensure_can_suspend(&self, what: &str) -> Result<()> {
        if self.regions.in_protected_region() {
            return Err(CilError::not_supported(format!(
                "{} inside try/catch/finally in {}",
                what, self.descriptor.name
            )));
        }
        Ok(())
    }

    /// Recovers or creates the leaf scope, then dispatches on its resume state.
    pub(super) fn emit_resumable_bootstrap(&mut self) -> Result<()> {
        let body = self.body;
        let Some(info) = &body.resumable else {
            return Err(CilError::internal("bootstrap of a non-resumable body"));
        };
        if self.resume.bootstrapped {
            return Err(CilError::Internal(eyre!(
                "leaf scope of {} created twice",
                self.descriptor.name
            )));
        }
        self.resume.bootstrapped = true;

        let leaf = self.leaf_slot()?;
        let leaf_type = self.leaf_type()?;
        let scopes = self.scopes_arg()?;
        let have = self.il.define_label();

        self.il.ldarg(scopes);
        self.il.ldc_i4(info.leaf_scope_slot as i32);
        self.il.op(OpCode::LdelemRef);
        let leaf_token = self.services.tokens.type_token(&leaf_type);
        self.il.token(OpCode::Isinst, leaf_token);
        self.il.stloc(leaf);
        self.il.ldloc(leaf);
        self.il.branch(OpCode::Brtrue, have);

        self.new_scope(&leaf_type);
        self.il.stloc(leaf);
        self.il.ldarg(scopes);
        self.il.ldc_i4(info.leaf_scope_slot as i32);
        self.il.ldloc(leaf);
        self.il.op(OpCode::StelemRef);
        if info.kind == ResumableKind::Async && info.has_await {
            self.il.ldloc(leaf);
            self.call_runtime(RuntimeMethod::AsyncBegin);
        }
        self.il.mark_label(have)?;

        if info.max_state == 0 {
            return Ok(());
        }
        self.emit_dispatch(info, leaf)
    }

    fn emit_dispatch(&mut self, info: &ResumableInfo, leaf: u16) -> Result<()> {
        let initial = self.il.define_label();
        let by_state: BTreeMap<u32, SuspendId> = info
            .resume_states
            .iter()
            .map(|(suspend, state)| (*state, *suspend))
            .collect();
        let mut targets = Vec::with_capacity(info.max_state as usize + 1);
        for state in 0..=info.max_state {
            let target = match by_state.get(&state) {
                Some(suspend) => self.resume.label(*suspend, &mut self.il),
                None => initial,
            };
            targets.push(target);
        }
        debug!(
            method = %self.descriptor.name,
            states = targets.len(),
            "resumable entry dispatch"
        );

        let field = hidden_field(state_field(info.kind), "resume state")?;
        self.il.ldloc(leaf);
        let token = self.services.tokens.field_token(&field);
        self.il.token(OpCode::Ldfld, token);
        self.il.switch(targets);
        self.il.mark_label(initial)
    }

    fn store_resume_state(&mut self, leaf: u16, field: &FieldRef, state: i32) {
        self.il.ldloc(leaf);
        self.il.ldc_i4(state);
        let token = self.services.tokens.field_token(field);
        self.il.token(OpCode::Stfld, token);
    }

    /// `leaf._deferred.Promise`, left on the stack.
    pub(super) fn load_deferred_promise(&mut self, leaf: u16) -> Result<()> {
        self.load_deferred(leaf)?;
        self.call_runtime(RuntimeMethod::DeferredPromise);
        Ok(())
    }

    pub(super) fn load_deferred(&mut self, leaf: u16) -> Result<()> {
        let deferred = hidden_field(
            runtime::async_base_field(runtime::ASYNC_DEFERRED_FIELD),
            runtime::ASYNC_DEFERRED_FIELD,
        )?;
        self.il.ldloc(leaf);
        let token = self.services.tokens.field_token(&deferred);
        self.il.token(OpCode::Ldfld, token);
        Ok(())
    }

    pub(super) fn emit_await(
        &mut self,
        value: TempId,
        suspend: SuspendId,
        result: Option<TempId>,
    ) -> Result<()> {
        self.ensure_can_suspend("await")?;
        let body = self.body;
        let info = match &body.resumable {
            Some(info) if info.kind == ResumableKind::Async => info,
            _ => return Err(self.not_resumable(ResumableKind::Async, "await")),
        };
        let state = self.resume_state_of(info, suspend)?;
        let leaf = self.leaf_slot()?;
        let field = hidden_field(state_field(ResumableKind::Async), "async state")?;

        self.store_resume_state(leaf, &field, state as i32);
        self.il.ldloc(leaf);
        self.load_object(value)?;
        self.call_runtime(RuntimeMethod::AsyncSuspend);
        self.load_deferred_promise(leaf)?;
        self.il.op(OpCode::Ret);

        self.resume.mark(suspend, &mut self.il)?;
        self.il.ldloc(leaf);
        let pushed = self.call_runtime(RuntimeMethod::TakeAwaitResult);
        self.store_result(result, pushed)
    }

    pub(super) fn emit_yield(
        &mut self,
        value: TempId,
        suspend: SuspendId,
        result: Option<TempId>,
    ) -> Result<()> {
        self.ensure_can_suspend("yield")?;
        let body = self.body;
        let info = match &body.resumable {
            Some(info) if info.kind == ResumableKind::Generator => info,
            _ => return Err(self.not_resumable(ResumableKind::Generator, "yield")),
        };
        let state = self.resume_state_of(info, suspend)?;
        let leaf = self.leaf_slot()?;
        let field = hidden_field(state_field(ResumableKind::Generator), "generator state")?;

        self.store_resume_state(leaf, &field, state as i32);
        self.load_object(value)?;
        self.il.ldc_i4(0);
        self.call_runtime(RuntimeMethod::IteratorResultCreate);
        self.il.op(OpCode::Ret);

        self.resume.mark(suspend, &mut self.il)?;
        self.il.ldloc(leaf);
        let pushed = self.call_runtime(RuntimeMethod::TakeSentValue);
        self.store_result(result, pushed)
    }

    /// Marks an async body complete: `leaf._asyncState = -1`.
    pub(super) fn store_completed_state(&mut self, leaf: u16) -> Result<()> {
        let field = hidden_field(state_field(ResumableKind::Async), "async state")?;
        self.store_resume_state(leaf, &field, -1);
        Ok(())
    }
}
