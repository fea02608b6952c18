use serde::{Deserialize, Serialize};

/// Knobs of one [`MethodCompiler`](crate::MethodCompiler) run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CilOptions {
    /// Fold single-use comparisons into the conditional branch that consumes them.
    pub fuse_branches: bool,
    /// Zero-initialise locals (fat header `InitLocals`).
    pub init_locals: bool,
    /// Log the IL listing of every compiled body at debug level.
    pub trace_listing: bool,
}

impl Default for CilOptions {
    fn default() -> Self {
        Self {
            fuse_branches: true,
            init_locals: true,
            trace_listing: false,
        }
    }
}

impl CilOptions {
    pub fn with_fuse_branches(mut self, fuse: bool) -> Self {
        self.fuse_branches = fuse;
        self
    }

    pub fn with_init_locals(mut self, init: bool) -> Self {
        self.init_locals = init;
        self
    }

    pub fn with_trace_listing(mut self, trace: bool) -> Self {
        self.trace_listing = trace;
        self
    }
}
