//! Protected regions and `throw`.

use super::MethodEmitter;
use crate::artifact::ClauseKind;
use crate::builder::ProtectedRegion;
use crate::error::{CilError, Result};
use crate::opcode::{Label, OpCode};
use crate::runtime::{self, RuntimeMethod};
use eyre::eyre;
use fp_core::lir::{RegionId, TempId};
use fp_core::metadata::{Token, TypeRef};

#[derive(Debug, Clone, Copy)]
struct OpenRegion {
    id: RegionId,
    try_start: Label,
    handler: Option<(ClauseKind, Label)>,
}

/// Regions opened by `TryBegin` and not yet closed by `TryEnd`, innermost last.
#[derive(Debug, Default)]
pub(super) struct RegionState {
    open: Vec<OpenRegion>,
}

impl RegionState {
    pub(super) fn in_protected_region(&self) -> bool {
        !self.open.is_empty()
    }

    /// Inside the handler block of a `finally` clause.
    pub(super) fn in_finally_handler(&self) -> bool {
        self.open
            .iter()
            .any(|region| matches!(region.handler, Some((ClauseKind::Finally, _))))
    }

    fn innermost(&mut self, id: RegionId) -> Result<&mut OpenRegion> {
        match self.open.last_mut() {
            Some(region) if region.id == id => Ok(region),
            _ => Err(CilError::Internal(eyre!(
                "region {} is not the innermost open region",
                id
            ))),
        }
    }
}

impl MethodEmitter<'_> {
    pub(super) fn emit_try_begin(&mut self, region: RegionId) -> Result<()> {
        let try_start = self.il.define_label();
        self.il.mark_label(try_start)?;
        self.regions.open.push(OpenRegion {
            id: region,
            try_start,
            handler: None,
        });
        Ok(())
    }

    fn begin_handler(&mut self, region: RegionId, kind: ClauseKind) -> Result<()> {
        let start = self.il.define_label();
        let open = self.regions.innermost(region)?;
        if open.handler.is_some() {
            return Err(CilError::Internal(eyre!(
                "region {} already has a handler",
                region
            )));
        }
        open.handler = Some((kind, start));
        self.il.mark_label(start)
    }

    /// Entered with the caught exception on the stack.
    pub(super) fn emit_catch_begin(
        &mut self,
        region: RegionId,
        exception: Option<TempId>,
    ) -> Result<()> {
        self.begin_handler(region, ClauseKind::Catch)?;
        match exception {
            Some(temp) => {
                let pushed = self.call_runtime(RuntimeMethod::UnwrapException);
                self.store_result(Some(temp), pushed)
            }
            None => {
                self.il.op(OpCode::Pop);
                Ok(())
            }
        }
    }

    pub(super) fn emit_finally_begin(&mut self, region: RegionId) -> Result<()> {
        self.begin_handler(region, ClauseKind::Finally)
    }

    pub(super) fn emit_try_end(&mut self, region: RegionId) -> Result<()> {
        let open = *self.regions.innermost(region)?;
        let Some((kind, handler_start)) = open.handler else {
            return Err(CilError::Internal(eyre!(
                "region {} closed without a handler",
                region
            )));
        };
        self.regions.open.pop();

        let handler_end = self.il.define_label();
        self.il.mark_label(handler_end)?;
        let catch_type = match kind {
            ClauseKind::Catch => self
                .services
                .tokens
                .type_token(&TypeRef::named(runtime::EXCEPTION)),
            ClauseKind::Finally => Token::NIL,
        };
        self.il.add_region(ProtectedRegion {
            kind,
            try_start: open.try_start,
            handler_start,
            handler_end,
            catch_type,
        });
        Ok(())
    }

    pub(super) fn emit_throw(&mut self, value: TempId) -> Result<()> {
        self.load_object(value)?;
        self.emit_call(OpCode::Newobj, &RuntimeMethod::ThrowableCtor.method_ref());
        self.il.op(OpCode::Throw);
        Ok(())
    }
}
