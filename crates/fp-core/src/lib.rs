//! Shared vocabulary for the FerroPhase CIL backend.
//!
//! `lir` holds the low-level instruction set a single callable body is expressed
//! in once the dynamic semantics of the source language have been resolved;
//! `metadata` holds the type, member and token vocabulary the bytecode refers to.

pub mod error;
pub mod lir;
pub mod metadata;

// Alias for error types
pub type Error = crate::error::Error;
pub type Result<T> = crate::error::Result<T>;
