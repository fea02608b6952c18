//! Compiles one LIR body into a method-body artifact.

use crate::artifact::{CompiledMethodBody, MethodAttributes, MethodBodyBlob, MethodTable};
use crate::builder::AssembledBody;
use crate::config::CilOptions;
use crate::emit::MethodEmitter;
use crate::error::Result;
use crate::listing::format_listing;
use crate::registry::CompilerServices;
use crate::signature::{local_signature, method_signature};
use fp_core::lir::{MethodBody, MethodDescriptor, MethodKind};
use fp_core::metadata::{MethodSig, Token, TypeRef};
use tracing::{debug, info_span};

/// Single-use compiler for one callable body.
///
/// A second call to [`MethodCompiler::compile`] (or any other entry point) on
/// the same instance panics.
pub struct MethodCompiler<'a> {
    services: CompilerServices<'a>,
    options: CilOptions,
    used: bool,
}

impl<'a> MethodCompiler<'a> {
    pub fn new(services: CompilerServices<'a>) -> Self {
        Self::with_options(services, CilOptions::default())
    }

    pub fn with_options(services: CompilerServices<'a>, options: CilOptions) -> Self {
        Self {
            services,
            options,
            used: false,
        }
    }

    pub fn options(&self) -> &CilOptions {
        &self.options
    }

    fn claim(&mut self, descriptor: &MethodDescriptor) {
        assert!(
            !self.used,
            "MethodCompiler already compiled a body; create a new compiler for {}",
            descriptor.name
        );
        self.used = true;
    }

    /// Emits and verifies the instruction stream without encoding an artifact.
    pub fn assemble(
        &mut self,
        descriptor: &MethodDescriptor,
        body: &MethodBody,
    ) -> Result<AssembledBody> {
        self.claim(descriptor);
        self.assemble_claimed(descriptor, body)
    }

    fn assemble_claimed(
        &self,
        descriptor: &MethodDescriptor,
        body: &MethodBody,
    ) -> Result<AssembledBody> {
        let _span = info_span!("compile_method", method = %descriptor.name).entered();
        body.validate()?;
        let emitter = MethodEmitter::new(descriptor, body, self.services, &self.options)?;
        let materialized = emitter.analysis().materialized_count();
        let assembled = emitter.emit_body()?;
        debug!(
            instructions = body.instructions.len(),
            temps = body.temps.len(),
            materialized,
            il = assembled.instructions.len(),
            max_stack = assembled.max_stack,
            "assembled method body"
        );
        Ok(assembled)
    }

    /// Two-phase entry point: the caller inserts the artifact into its table.
    pub fn compile(
        &mut self,
        descriptor: &MethodDescriptor,
        body: &MethodBody,
    ) -> Result<CompiledMethodBody> {
        self.claim(descriptor);
        let assembled = self.assemble_claimed(descriptor, body)?;

        let local_token = if assembled.locals.is_empty() {
            Token::NIL
        } else {
            let blob = local_signature(&assembled.locals, self.services.tokens)?;
            self.services.tokens.signature_token(&blob)
        };
        let listing = format_listing(&assembled);
        if self.options.trace_listing {
            debug!(method = %descriptor.name, "\n{}", listing);
        }

        let AssembledBody {
            code,
            max_stack,
            locals,
            clauses,
            ..
        } = assembled;
        let blob = MethodBodyBlob::new(
            &code,
            max_stack,
            locals,
            local_token,
            clauses,
            self.options.init_locals,
        )?;
        let signature = method_signature(&signature_of(descriptor), self.services.tokens)?;

        Ok(CompiledMethodBody {
            name: descriptor.name.clone(),
            owner: descriptor.owner.clone(),
            attributes: attributes_of(descriptor),
            signature,
            parameter_names: parameter_names(descriptor),
            body: blob,
            listing,
        })
    }

    /// Single-phase entry point: compiles and appends the row to `table`.
    pub fn compile_into(
        &mut self,
        table: &mut MethodTable,
        descriptor: &MethodDescriptor,
        body: &MethodBody,
    ) -> Result<Token> {
        let compiled = self.compile(descriptor, body)?;
        Ok(table.push(compiled))
    }
}

pub fn signature_of(descriptor: &MethodDescriptor) -> MethodSig {
    let mut params = Vec::with_capacity(descriptor.params.len() + 1);
    if descriptor.has_scopes_param {
        params.push(TypeRef::ObjectArray);
    }
    params.extend(descriptor.params.iter().map(|param| param.ty.clone()));
    MethodSig::new(descriptor.has_this(), params, descriptor.return_type())
}

pub fn attributes_of(descriptor: &MethodDescriptor) -> MethodAttributes {
    let attributes =
        MethodAttributes::default().with(MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG);
    match (descriptor.kind, descriptor.is_static) {
        (_, true) => attributes.with(MethodAttributes::STATIC),
        (MethodKind::Constructor, false) => {
            attributes.with(MethodAttributes::SPECIAL_NAME | MethodAttributes::RT_SPECIAL_NAME)
        }
        (_, false) => attributes.with(MethodAttributes::VIRTUAL),
    }
}

fn parameter_names(descriptor: &MethodDescriptor) -> Vec<String> {
    let scopes = descriptor
        .has_scopes_param
        .then(|| "scopes".to_string());
    scopes
        .into_iter()
        .chain(descriptor.params.iter().map(|param| param.name.clone()))
        .collect()
}
