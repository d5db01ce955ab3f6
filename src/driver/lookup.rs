//! External resolution consumed by the engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::{Analysis, Name};

/// Resolves binary class names against the outside world: the
/// classpath, and the analyses of sibling modules whose products are
/// on it. Used to classify binary dependencies as tracked (a sibling's
/// product, diffed by API) vs untracked (an external library, diffed
/// by stamp).
pub trait Lookup {
    /// The classpath entry providing `binary_class_name`, if any.
    fn lookup_on_classpath(&self, binary_class_name: &Name) -> Option<PathBuf>;

    /// The analysis of the module that compiled `binary_class_name`.
    fn lookup_analysis(&self, binary_class_name: &Name) -> Option<Arc<Analysis>>;

    /// Same, keyed by the already-resolved binary file.
    fn lookup_analysis_for(
        &self,
        binary_file: &Path,
        binary_class_name: &Name,
    ) -> Option<Arc<Analysis>> {
        let _ = binary_file;
        self.lookup_analysis(binary_class_name)
    }
}

/// A module with no siblings and an unresolvable classpath. Useful for
/// single-module setups and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLookup;

impl Lookup for NoLookup {
    fn lookup_on_classpath(&self, _binary_class_name: &Name) -> Option<PathBuf> {
        None
    }

    fn lookup_analysis(&self, _binary_class_name: &Name) -> Option<Arc<Analysis>> {
        None
    }
}
