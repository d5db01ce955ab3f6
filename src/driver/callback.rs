//! The event stream between the external compiler and the engine.
//!
//! The compiler knows nothing about analyses; it narrates what it sees
//! (dependencies, generated classes, APIs, used names, problems) into
//! an [`AnalysisCallback`]. [`AnalysisBuilder`] is the engine's
//! implementation: it classifies dependencies as internal or external,
//! interns every name, and finalizes into an [`Analysis`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::{
    api_hash, name_hashes, AnalyzedClass, Analysis, Apis, ClassLike, Companions, Compilation,
    DependencyContext, Interner, Lazy, Name, Output, Problem, Relations, SourceInfo, Stamper,
    UseScopes,
};

use super::lookup::Lookup;

/// The compiler broke the callback contract. Fatal: the run aborts and
/// the on-disk analysis is left untouched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallbackViolation {
    #[error("event for unregistered source {path:?}")]
    UnregisteredSource { path: PathBuf },

    #[error("generated class file {product:?} is outside the declared output")]
    ProductOutsideOutput { product: PathBuf },

    #[error("event arrived before any start_source")]
    NoCurrentSource,
}

/// Events streamed by the external compiler, in program order. Events
/// for a single source are totally ordered; implementations are
/// re-entrant across sources but not across threads for one source.
pub trait AnalysisCallback {
    /// Register a source about to be compiled. Must precede any other
    /// event touching that source.
    fn start_source(&mut self, source: &Path) -> Result<(), CallbackViolation>;

    /// `from_class` depends on `on_class`; internal or external is
    /// inferred from whether `on_class` belongs to the current module.
    fn class_dependency(
        &mut self,
        on_class: &str,
        from_class: &str,
        context: DependencyContext,
    ) -> Result<(), CallbackViolation>;

    /// `from_class` depends on a class that resolved to a classpath
    /// binary.
    fn binary_dependency(
        &mut self,
        binary_file: &Path,
        binary_class_name: &str,
        from_class: &str,
        context: DependencyContext,
    ) -> Result<(), CallbackViolation>;

    fn generated_local_class(
        &mut self,
        source: &Path,
        class_file: &Path,
    ) -> Result<(), CallbackViolation>;

    fn generated_non_local_class(
        &mut self,
        source: &Path,
        class_file: &Path,
        binary_class_name: &str,
        src_class_name: &str,
    ) -> Result<(), CallbackViolation>;

    /// The structural API of one class (or module) declared in
    /// `source`. Companion sides arrive as separate events and are
    /// paired by name.
    fn api(&mut self, source: &Path, class: ClassLike) -> Result<(), CallbackViolation>;

    fn used_name(
        &mut self,
        class: &str,
        name: &str,
        scopes: UseScopes,
    ) -> Result<(), CallbackViolation>;

    fn main_class(&mut self, source: &Path, class: &str) -> Result<(), CallbackViolation>;

    fn problem(
        &mut self,
        source: &Path,
        problem: Problem,
        reported: bool,
    ) -> Result<(), CallbackViolation>;
}

#[derive(Default)]
struct PendingCompanions {
    class_api: Option<ClassLike>,
    object_api: Option<ClassLike>,
}

/// Accumulates one compile step's callback events.
pub struct AnalysisBuilder<'a> {
    lookup: &'a dyn Lookup,
    output: Output,
    /// Class names that belong to this module (previous run's classes
    /// plus everything registered during this one).
    internal_classes: BTreeSet<Name>,
    interner: Interner,
    registered_sources: BTreeSet<PathBuf>,
    current_source: Option<PathBuf>,
    relations: Relations,
    pending_apis: BTreeMap<Name, PendingCompanions>,
    external_apis: BTreeMap<Name, AnalyzedClass>,
    source_infos: BTreeMap<PathBuf, SourceInfo>,
    start_time_ms: i64,
}

impl<'a> AnalysisBuilder<'a> {
    pub fn new(
        lookup: &'a dyn Lookup,
        output: Output,
        known_internal_classes: BTreeSet<Name>,
        start_time_ms: i64,
    ) -> Self {
        Self {
            lookup,
            output,
            internal_classes: known_internal_classes,
            interner: Interner::new(),
            registered_sources: BTreeSet::new(),
            current_source: None,
            relations: Relations::new(),
            pending_apis: BTreeMap::new(),
            external_apis: BTreeMap::new(),
            source_infos: BTreeMap::new(),
            start_time_ms,
        }
    }

    fn check_registered(&self, source: &Path) -> Result<(), CallbackViolation> {
        if self.registered_sources.contains(source) {
            Ok(())
        } else {
            Err(CallbackViolation::UnregisteredSource {
                path: source.to_path_buf(),
            })
        }
    }

    fn current_source(&self) -> Result<&PathBuf, CallbackViolation> {
        self.current_source
            .as_ref()
            .ok_or(CallbackViolation::NoCurrentSource)
    }

    /// Snapshot of the problems gathered so far; used when the compile
    /// step fails and the run must still report them.
    pub fn into_source_infos(self) -> BTreeMap<PathBuf, SourceInfo> {
        self.source_infos
    }

    /// Turn the accumulated events into a fresh partial analysis.
    pub fn finalize(mut self, stamper: &dyn Stamper) -> Analysis {
        let mut apis = Apis::new();
        for (name, pending) in std::mem::take(&mut self.pending_apis) {
            let class_api = pending
                .class_api
                .unwrap_or_else(|| ClassLike::empty(name.clone(), crate::core::DefinitionType::ClassDef));
            let object_api = pending
                .object_api
                .unwrap_or_else(|| ClassLike::empty(name.clone(), crate::core::DefinitionType::Module));
            let companions = Companions {
                class_api,
                object_api,
            };
            let analyzed = AnalyzedClass {
                compilation_timestamp: self.start_time_ms,
                name: name.clone(),
                api_hash: api_hash(&companions),
                name_hashes: name_hashes(&companions),
                has_macro: companions.has_macro(),
                api: Lazy::strict(companions),
            };
            apis.internal.insert(name, analyzed);
        }
        apis.external = std::mem::take(&mut self.external_apis);

        let mut analysis = Analysis {
            relations: self.relations,
            apis,
            source_infos: self.source_infos,
            compilations: vec![Compilation {
                start_time_ms: self.start_time_ms,
                output: self.output.clone(),
            }],
            ..Analysis::default()
        };

        for source in &self.registered_sources {
            analysis
                .stamps
                .add_source(source.clone(), stamper.stamp_source(source));
        }
        let products: Vec<PathBuf> = analysis
            .relations
            .src_prod
            .values()
            .cloned()
            .collect();
        for product in products {
            let stamp = stamper.stamp_product(&product);
            analysis.stamps.add_product(product, stamp);
        }
        let binaries: Vec<PathBuf> = analysis
            .relations
            .library_dep
            .values()
            .cloned()
            .collect();
        for binary in binaries {
            let stamp = stamper.stamp_binary(&binary);
            analysis.stamps.add_binary(binary, stamp);
        }

        analysis
    }

    /// Record an external API snapshot for `on_class`, from the owning
    /// module's analysis when it resolves, as an empty placeholder
    /// otherwise (the next change-detection pass treats unresolvable
    /// externals conservatively).
    fn snapshot_external(&mut self, on_class: &Name) {
        if self.external_apis.contains_key(on_class) {
            return;
        }
        let snapshot = self
            .lookup
            .lookup_analysis(on_class)
            .and_then(|analysis| analysis.apis.internal.get(on_class).cloned());
        let analyzed = match snapshot {
            Some(analyzed) => analyzed,
            None => {
                tracing::warn!(class = %on_class, "external class not resolvable; storing placeholder api");
                AnalyzedClass::placeholder(on_class.clone())
            }
        };
        self.external_apis.insert(on_class.clone(), analyzed);
    }
}

impl AnalysisCallback for AnalysisBuilder<'_> {
    fn start_source(&mut self, source: &Path) -> Result<(), CallbackViolation> {
        let source = source.to_path_buf();
        self.registered_sources.insert(source.clone());
        self.source_infos.entry(source.clone()).or_default();
        self.current_source = Some(source);
        Ok(())
    }

    fn class_dependency(
        &mut self,
        on_class: &str,
        from_class: &str,
        context: DependencyContext,
    ) -> Result<(), CallbackViolation> {
        let on = self.interner.intern(on_class);
        let from = self.interner.intern(from_class);
        if self.internal_classes.contains(&on) {
            self.relations.add_internal_class_dependency(from, on, context);
        } else {
            self.relations
                .add_external_class_dependency(from, on.clone(), context);
            self.snapshot_external(&on);
        }
        Ok(())
    }

    fn binary_dependency(
        &mut self,
        binary_file: &Path,
        binary_class_name: &str,
        from_class: &str,
        context: DependencyContext,
    ) -> Result<(), CallbackViolation> {
        let name = self.interner.intern(binary_class_name);
        let tracked = self
            .lookup
            .lookup_analysis_for(binary_file, &name)
            .is_some();
        if tracked {
            // A sibling module's product: treat as an external class
            // dependency so API diffs drive invalidation.
            let from = self.interner.intern(from_class);
            self.relations
                .add_external_class_dependency(from, name.clone(), context);
            self.snapshot_external(&name);
        } else {
            let source = self.current_source()?.clone();
            self.relations
                .add_library_dependency(source, binary_file.to_path_buf());
            self.relations
                .add_library_class_name(binary_file.to_path_buf(), name);
        }
        Ok(())
    }

    fn generated_local_class(
        &mut self,
        source: &Path,
        class_file: &Path,
    ) -> Result<(), CallbackViolation> {
        self.check_registered(source)?;
        if !self.output.contains(class_file) {
            return Err(CallbackViolation::ProductOutsideOutput {
                product: class_file.to_path_buf(),
            });
        }
        self.relations
            .add_product(source.to_path_buf(), class_file.to_path_buf());
        Ok(())
    }

    fn generated_non_local_class(
        &mut self,
        source: &Path,
        class_file: &Path,
        binary_class_name: &str,
        src_class_name: &str,
    ) -> Result<(), CallbackViolation> {
        self.check_registered(source)?;
        if !self.output.contains(class_file) {
            return Err(CallbackViolation::ProductOutsideOutput {
                product: class_file.to_path_buf(),
            });
        }
        let binary = self.interner.intern(binary_class_name);
        let class = self.interner.intern(src_class_name);
        self.relations
            .add_product(source.to_path_buf(), class_file.to_path_buf());
        self.relations.add_class(source.to_path_buf(), class.clone());
        self.relations.add_product_class_name(binary, class.clone());
        self.internal_classes.insert(class);
        Ok(())
    }

    fn api(&mut self, source: &Path, class: ClassLike) -> Result<(), CallbackViolation> {
        self.check_registered(source)?;
        let name = self.interner.intern(&class.name);
        self.internal_classes.insert(name.clone());
        let pending = self.pending_apis.entry(name).or_default();
        if class.definition_type.is_module() {
            pending.object_api = Some(class);
        } else {
            pending.class_api = Some(class);
        }
        Ok(())
    }

    fn used_name(
        &mut self,
        class: &str,
        name: &str,
        scopes: UseScopes,
    ) -> Result<(), CallbackViolation> {
        let class = self.interner.intern(class);
        let name = self.interner.intern(name);
        self.relations.add_used_name(class, name, scopes);
        Ok(())
    }

    fn main_class(&mut self, source: &Path, class: &str) -> Result<(), CallbackViolation> {
        self.check_registered(source)?;
        let class = self.interner.intern(class);
        self.source_infos
            .entry(source.to_path_buf())
            .or_default()
            .main_classes
            .push(class);
        Ok(())
    }

    fn problem(
        &mut self,
        source: &Path,
        problem: Problem,
        reported: bool,
    ) -> Result<(), CallbackViolation> {
        self.check_registered(source)?;
        let info = self.source_infos.entry(source.to_path_buf()).or_default();
        if reported {
            info.reported_problems.push(problem);
        } else {
            info.unreported_problems.push(problem);
        }
        Ok(())
    }
}
