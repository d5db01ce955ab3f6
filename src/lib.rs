#![forbid(unsafe_code)]

pub mod codec;
pub mod config;
pub mod core;
pub mod diff;
pub mod driver;
pub mod error;
pub mod invalidate;
pub mod store;
pub mod telemetry;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::core::{
    api_hash, name_hashes, Access, AnalyzedClass, Analysis, Annotation, AnnotationArgument,
    Annotations, Apis, ClassDefinition, ClassLike, Companions, CompileOrder, CompileSetup,
    Compilation, ContentHash, DefinitionType, FileHash, FileStamper, Interner, InvariantViolation,
    Lazy, MethodParameter, Modifiers, Name, NameHash, ObjectPath, Output, OutputGroup,
    ParameterList, ParameterModifier, PathComponent, Position, Problem, Qualifier, Relation,
    Relations, RemovedEntries, SetupOptions, Severity, SourceDependencies, SourceInfo,
    SourceInfos, Stamp, Stamper, Stamps, Structure, Type, TypeParameter, UseScope, UseScopes,
    UsedName, Variance,
};
pub use config::IncOptions;
pub use diff::{ApiChanges, ModifiedNames};
pub use driver::{
    AnalysisBuilder, AnalysisCallback, CallbackViolation, CancelToken, CompileFailure,
    CompileResult, Compiler, DependencyContext, DriverError, IncrementalCompile, Lookup, NoLookup,
};
pub use invalidate::{InitialChanges, Invalidations};
pub use store::{AnalysisContents, AnalysisStore, StoreError};
