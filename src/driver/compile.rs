//! The incremental compile driver.
//!
//! One invocation is a small state machine:
//!
//! ```text
//! Start -> DetectChanges -> {Clean: Done}
//!                       -> InvalidateSeed
//!                       -> CompileStep -> Merge -> Diff -> Closure
//!                               ↑__________________________| while new invals
//!                       -> Persist -> Done
//! ```
//!
//! The external compiler is driven through the [`Compiler`] trait and
//! narrates into an [`AnalysisBuilder`]. Merging happens only after a
//! compile step returns; persistence only after the final closure, so
//! the on-disk analysis never reflects partial state.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::config::IncOptions;
use crate::core::{Analysis, AnalyzedClass, CompileSetup, Name, SourceInfos, Stamper};
use crate::diff::ApiChanges;
use crate::invalidate::{invalidated_sources, InitialChanges, Invalidations};
use crate::store::{AnalysisContents, AnalysisStore, StoreError};

use super::callback::{AnalysisBuilder, AnalysisCallback, CallbackViolation};
use super::lookup::Lookup;

/// The external compiler. It receives a source subset and streams
/// callback events; the engine never parses or types anything itself.
pub trait Compiler {
    fn compile(
        &mut self,
        sources: &[PathBuf],
        callback: &mut dyn AnalysisCallback,
    ) -> Result<(), CompileFailure>;
}

/// The external compiler reported failure (as opposed to emitting
/// error problems and succeeding).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct CompileFailure {
    pub reason: String,
}

impl CompileFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Cooperative cancellation, checked between compile steps. Once set,
/// the driver aborts without writing.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Callback(#[from] CallbackViolation),

    #[error("external compiler failed: {failure}")]
    Compile {
        failure: CompileFailure,
        /// Problems gathered before the failure, per source.
        problems: SourceInfos,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cancelled before completion")]
    Cancelled,
}

impl DriverError {
    /// All driver errors surface to the caller; decode problems are
    /// downgraded internally and never reach here.
    pub fn is_recoverable(&self) -> bool {
        false
    }
}

#[derive(Debug)]
pub struct CompileResult {
    pub analysis: Analysis,
    pub setup: CompileSetup,
    /// Sources handed to the compiler over all cycles.
    pub recompiled: BTreeSet<PathBuf>,
    pub cycles: u32,
    pub full_rebuild: bool,
}

impl CompileResult {
    pub fn was_incremental(&self) -> bool {
        !self.full_rebuild
    }
}

/// One incremental compile invocation.
pub struct IncrementalCompile<'a> {
    pub sources: BTreeSet<PathBuf>,
    pub setup: CompileSetup,
    pub options: IncOptions,
    pub compiler: &'a mut dyn Compiler,
    pub stamper: &'a dyn Stamper,
    pub lookup: &'a dyn Lookup,
    pub store: &'a AnalysisStore,
    pub cancel: CancelToken,
}

impl IncrementalCompile<'_> {
    pub fn run(self) -> Result<CompileResult, DriverError> {
        let mut setup = self.setup.clone();
        setup.store_apis = self.options.store_apis;
        setup.compile_order = self.options.compile_order;

        // Load the previous analysis; a decode failure means starting
        // clean, not aborting.
        let previous = match self.store.get() {
            Ok(found) => found,
            Err(err) if err.is_recoverable() => {
                tracing::warn!(error = %err, "previous analysis unreadable, starting clean");
                None
            }
            Err(err) => return Err(err.into()),
        };
        let mut analysis = match previous {
            Some(prev) if setup.compatible_with(&prev.setup) => prev.analysis,
            Some(_) => {
                tracing::info!("compile setup changed, previous analysis discarded");
                Analysis::new()
            }
            None => Analysis::new(),
        };

        // DetectChanges.
        let changes = InitialChanges::collect(&analysis, &self.sources, self.stamper, self.lookup);
        if changes.is_clean() {
            tracing::debug!("no changes detected");
            let contents = AnalysisContents { analysis, setup };
            self.store.set(&contents)?;
            return Ok(CompileResult {
                analysis: contents.analysis,
                setup: contents.setup,
                recompiled: BTreeSet::new(),
                cycles: 0,
                full_rebuild: false,
            });
        }

        // InvalidateSeed.
        let initial_classes = changes.initial_invalid_classes(&analysis, &self.options);
        let mut pending = invalidated_sources(&analysis.relations, &initial_classes);
        pending.extend(changes.modified_sources.iter().cloned());
        pending.retain(|source| self.sources.contains(source));

        let total_classes = analysis.apis.internal.len();
        let mut full_rebuild = self
            .options
            .exceeds_recompile_fraction(initial_classes.len(), total_classes);
        if full_rebuild {
            pending = self.sources.clone();
        }
        tracing::debug!(
            modified = changes.modified_sources.len(),
            removed = changes.removed_sources.len(),
            binaries = changes.modified_binaries.len(),
            seed_classes = initial_classes.len(),
            seed_sources = pending.len(),
            full_rebuild,
            "initial invalidation computed"
        );

        analysis.remove_sources(&changes.removed_sources);

        let mut recompiled: BTreeSet<PathBuf> = BTreeSet::new();
        let mut cycles = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(DriverError::Cancelled);
            }
            if pending.is_empty() {
                break;
            }
            if cycles >= self.options.transitive_step && !full_rebuild {
                tracing::debug!(cycles, "transitive step budget exhausted, recompiling everything");
                full_rebuild = true;
                pending = self.sources.clone();
            }
            cycles += 1;
            let compiling_everything = full_rebuild;
            let batch: Vec<PathBuf> = pending.iter().cloned().collect();

            // Snapshot the APIs the batch is about to replace; the
            // diff below compares against these.
            let mut old_subset: BTreeMap<Name, AnalyzedClass> = BTreeMap::new();
            for source in &batch {
                for class in analysis.relations.classes_of(source) {
                    if let Some(api) = analysis.apis.internal.get(class) {
                        old_subset.insert(class.clone(), api.clone());
                    }
                }
            }
            let known_internal: BTreeSet<Name> = analysis.apis.internal.keys().cloned().collect();

            // Merge removes entries for recompiled sources first; a
            // class that then produces no api event is gone for good.
            analysis.remove_sources(&batch);

            // CompileStep.
            let mut builder = AnalysisBuilder::new(
                self.lookup,
                setup.output.clone(),
                known_internal,
                current_time_ms(),
            );
            tracing::debug!(cycle = cycles, sources = batch.len(), "compile step");
            if let Err(failure) = self.compiler.compile(&batch, &mut builder) {
                return Err(DriverError::Compile {
                    failure,
                    problems: builder.into_source_infos(),
                });
            }
            let fresh = builder.finalize(self.stamper);
            let fresh_classes: BTreeSet<Name> = fresh.apis.internal.keys().cloned().collect();

            // Diff, then Merge.
            let api_changes = ApiChanges::between(&old_subset, &fresh.apis.internal);
            analysis.merge(fresh);
            recompiled.extend(batch);
            debug_assert_eq!(analysis.verify(), Ok(()));

            if compiling_everything {
                // Everything was just compiled against the same world;
                // nothing left to invalidate.
                break;
            }

            // Closure.
            let invalidations = Invalidations::compute(
                &api_changes,
                &analysis.relations,
                &self.options,
                analysis.apis.internal.len(),
            );
            if invalidations.recompile_all {
                full_rebuild = true;
                pending = self.sources.clone();
            } else {
                // Classes compiled in this batch are self-consistent;
                // only dependents outside it still need a compile.
                let next_classes: BTreeSet<Name> = invalidations
                    .classes
                    .iter()
                    .filter(|class| {
                        !fresh_classes.contains(*class) && !old_subset.contains_key(*class)
                    })
                    .cloned()
                    .collect();
                pending = invalidated_sources(&analysis.relations, &next_classes);
                pending.retain(|source| self.sources.contains(source));
                // Re-invalidating an already-recompiled source means a
                // dependency cycle crossed the batch boundary; redo the
                // module wholesale rather than chase it.
                if pending.iter().any(|source| recompiled.contains(source)) {
                    full_rebuild = true;
                    pending = self.sources.clone();
                }
            }
            tracing::debug!(
                cycle = cycles,
                invalid_classes = invalidations.classes.len(),
                next_sources = pending.len(),
                "closure complete"
            );
        }

        if self.cancel.is_cancelled() {
            return Err(DriverError::Cancelled);
        }

        // Persist.
        let contents = AnalysisContents { analysis, setup };
        self.store.set(&contents)?;
        Ok(CompileResult {
            analysis: contents.analysis,
            setup: contents.setup,
            recompiled,
            cycles,
            full_rebuild,
        })
    }
}

fn current_time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
