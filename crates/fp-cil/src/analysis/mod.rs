//! Per-body analyses run before emission.

pub mod materialize;

pub use materialize::*;
