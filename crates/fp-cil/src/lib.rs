//! CIL backend: lowers one LIR method body to a verified stack-bytecode body.
//!
//! A [`MethodCompiler`] takes a [`fp_core::lir::MethodDescriptor`] and its
//! [`fp_core::lir::MethodBody`], decides which temps need local slots, emits an
//! IL stream through [`emit::MethodEmitter`], checks stack balance, and encodes
//! the result as a [`CompiledMethodBody`]. Metadata tokens, scope layouts and
//! the program's classes and functions are supplied through
//! [`CompilerServices`].

pub mod analysis;
pub mod artifact;
pub mod builder;
pub mod compiler;
pub mod config;
pub mod emit;
pub mod encode;
pub mod error;
pub mod intrinsics;
pub mod listing;
pub mod opcode;
pub mod registry;
pub mod runtime;
pub mod signature;
pub mod stack;

pub use artifact::{CompiledMethodBody, MethodAttributes, MethodBodyBlob, MethodTable};
pub use builder::AssembledBody;
pub use compiler::MethodCompiler;
pub use config::CilOptions;
pub use error::{CilError, Result};
pub use listing::format_listing;
pub use registry::{CompilerServices, SharedRegistry};
