//! Compile driver: callback contract, external lookups, and the
//! invalidate -> compile -> merge -> diff -> closure loop.

pub mod callback;
pub mod compile;
pub mod lookup;

pub use callback::{AnalysisBuilder, AnalysisCallback, CallbackViolation};
pub use compile::{
    CancelToken, CompileFailure, CompileResult, Compiler, DriverError, IncrementalCompile,
};
pub use lookup::{Lookup, NoLookup};

pub use crate::core::DependencyContext;
