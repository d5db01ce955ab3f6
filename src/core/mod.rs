//! Core analysis data model
//!
//! Module hierarchy follows type dependency order:
//! - lazy: single-shot memoized thunks (Layer 0)
//! - stamp: file fingerprints (Layer 1)
//! - relation: generic bidirectional relation (Layer 1)
//! - api: structural class APIs and name hashes (Layer 2)
//! - hashing: canonical serialization of APIs (Layer 3)
//! - relations: the named relation aggregate (Layer 3)
//! - setup: compile setup persisted across runs (Layer 3)
//! - source_info: per-source problems and main classes (Layer 3)
//! - analysis: the persisted aggregate (Layer 4)

pub mod analysis;
pub mod api;
pub mod hashing;
pub mod lazy;
pub mod relation;
pub mod relations;
pub mod setup;
pub mod source_info;
pub mod stamp;

pub use analysis::{Analysis, Apis, InvariantViolation};
pub use api::{
    Access, AnalyzedClass, Annotation, AnnotationArgument, Annotations, ClassDefinition,
    ClassLike, Companions, DefinitionType, Interner, MethodParameter, Modifiers, Name, NameHash,
    ObjectPath, ParameterList, ParameterModifier, PathComponent, Qualifier, Structure, Type,
    TypeParameter, UseScope, UseScopes, Variance,
};
pub use hashing::{api_hash, name_hashes};
pub use lazy::Lazy;
pub use relation::Relation;
pub use relations::{DependencyContext, Relations, RemovedEntries, SourceDependencies, UsedName};
pub use setup::{
    CompileOrder, CompileSetup, Compilation, FileHash, Output, OutputGroup, SetupOptions,
};
pub use source_info::{Position, Problem, Severity, SourceInfo, SourceInfos};
pub use stamp::{ContentHash, FileStamper, Stamp, Stamper, Stamps};
