//! Layer 4: the persisted aggregate.

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

use super::api::{AnalyzedClass, Name};
use super::relations::{Relations, RemovedEntries};
use super::setup::Compilation;
use super::source_info::SourceInfos;
use super::stamp::Stamps;

/// Analyzed classes by name. `internal` holds classes compiled in this
/// module; `external` holds snapshots of classes compiled elsewhere
/// that this module depends on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Apis {
    pub internal: BTreeMap<Name, AnalyzedClass>,
    pub external: BTreeMap<Name, AnalyzedClass>,
}

impl Apis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.internal.is_empty() && self.external.is_empty()
    }

    pub fn internal_api(&self, class: &Name) -> Option<&AnalyzedClass> {
        self.internal.get(class)
    }

    pub fn external_api(&self, class: &Name) -> Option<&AnalyzedClass> {
        self.external.get(class)
    }
}

/// Everything the engine knows about one compile unit: stamps,
/// relations, APIs, per-source infos, and compile provenance.
///
/// Read at the start of a compile, partially rewritten as sources are
/// recompiled, written once at the end. Never mutated concurrently.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Analysis {
    pub stamps: Stamps,
    pub relations: Relations,
    pub apis: Apis,
    pub source_infos: SourceInfos,
    pub compilations: Vec<Compilation>,
}

/// A broken derived invariant. These indicate a bug in whoever mutated
/// the analysis, so they carry enough context to point at the culprit.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("relation forward/reverse maps out of lockstep")]
    RelationInconsistent,

    #[error("stamp roles overlap for some file")]
    StampRolesOverlap,

    #[error("class {class} is declared in sources but has no internal API")]
    MissingInternalApi { class: Name },

    #[error("external dependency target {class} has no external API")]
    MissingExternalApi { class: Name },

    #[error("product {product:?} has {owners} source owners, expected exactly one")]
    ProductOwnership { product: PathBuf, owners: usize },
}

impl Analysis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
            && self.relations.is_empty()
            && self.apis.is_empty()
            && self.source_infos.is_empty()
            && self.compilations.is_empty()
    }

    /// All source files this analysis knows about.
    pub fn sources(&self) -> impl Iterator<Item = &PathBuf> {
        self.stamps.sources.keys()
    }

    /// Drop every entry owned by `sources`: their stamps, their
    /// products, their classes' APIs, relations, and infos. Called
    /// before merging fresh compile output for those sources.
    pub fn remove_sources<'a>(
        &mut self,
        sources: impl IntoIterator<Item = &'a PathBuf> + Clone,
    ) -> RemovedEntries {
        let removed = self.relations.remove_sources(sources.clone());
        for source in sources {
            self.stamps.remove_source(source);
            self.source_infos.remove(source);
        }
        for product in &removed.products {
            self.stamps.remove_product(product);
        }
        for class in &removed.classes {
            self.apis.internal.remove(class);
        }
        removed
    }

    /// Union in the output of one compile step. `fresh` wins keywise.
    pub fn merge(&mut self, fresh: Analysis) {
        self.stamps.merge(fresh.stamps);
        self.relations.union(fresh.relations);
        self.apis.internal.extend(fresh.apis.internal);
        self.apis.external.extend(fresh.apis.external);
        self.source_infos.extend(fresh.source_infos);
        self.compilations.extend(fresh.compilations);
    }

    /// Check every derived invariant. O(n); the driver runs this in
    /// debug builds after each step, tests run it always.
    pub fn verify(&self) -> Result<(), InvariantViolation> {
        if !self.relations.is_consistent() {
            return Err(InvariantViolation::RelationInconsistent);
        }
        if !self.stamps.roles_disjoint() {
            return Err(InvariantViolation::StampRolesOverlap);
        }
        for class in self.relations.all_classes() {
            if !self.apis.internal.contains_key(class) {
                return Err(InvariantViolation::MissingInternalApi {
                    class: class.clone(),
                });
            }
        }
        let external_targets = self
            .relations
            .member_ref
            .external
            .values()
            .chain(self.relations.inheritance.external.values())
            .chain(self.relations.local_inheritance.external.values());
        for class in external_targets {
            if !self.apis.external.contains_key(class) {
                return Err(InvariantViolation::MissingExternalApi {
                    class: class.clone(),
                });
            }
        }
        for (product, owners) in self.relations.src_prod.reverse_map() {
            if owners.len() != 1 {
                return Err(InvariantViolation::ProductOwnership {
                    product: product.clone(),
                    owners: owners.len(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::api::{Companions, UseScopes};
    use crate::core::hashing::{api_hash, name_hashes};
    use crate::core::lazy::Lazy;
    use crate::core::relations::DependencyContext;
    use crate::core::stamp::Stamp;
    use std::sync::Arc;

    fn name(s: &str) -> Name {
        Arc::from(s)
    }

    fn analyzed(class: &str) -> AnalyzedClass {
        let companions = Companions::empty(name(class));
        AnalyzedClass {
            compilation_timestamp: 0,
            name: name(class),
            api_hash: api_hash(&companions),
            name_hashes: name_hashes(&companions),
            has_macro: false,
            api: Lazy::strict(companions),
        }
    }

    fn sample() -> Analysis {
        let mut analysis = Analysis::new();
        analysis
            .stamps
            .add_source(PathBuf::from("a.src"), Stamp::LastModified(1));
        analysis
            .stamps
            .add_product(PathBuf::from("A.class"), Stamp::LastModified(1));
        analysis
            .relations
            .add_class(PathBuf::from("a.src"), name("A"));
        analysis
            .relations
            .add_product(PathBuf::from("a.src"), PathBuf::from("A.class"));
        analysis.apis.internal.insert(name("A"), analyzed("A"));
        analysis
    }

    #[test]
    fn sample_passes_verify() {
        assert_eq!(sample().verify(), Ok(()));
    }

    #[test]
    fn missing_internal_api_is_flagged() {
        let mut analysis = sample();
        analysis.apis.internal.remove(&name("A"));
        assert_eq!(
            analysis.verify(),
            Err(InvariantViolation::MissingInternalApi { class: name("A") })
        );
    }

    #[test]
    fn dangling_external_dependency_is_flagged() {
        let mut analysis = sample();
        analysis.relations.add_external_class_dependency(
            name("A"),
            name("lib.Gone"),
            DependencyContext::MemberRef,
        );
        assert!(matches!(
            analysis.verify(),
            Err(InvariantViolation::MissingExternalApi { .. })
        ));
        analysis
            .apis
            .external
            .insert(name("lib.Gone"), analyzed("lib.Gone"));
        assert_eq!(analysis.verify(), Ok(()));
    }

    #[test]
    fn shared_product_is_flagged() {
        let mut analysis = sample();
        analysis
            .relations
            .add_class(PathBuf::from("b.src"), name("B"));
        analysis.apis.internal.insert(name("B"), analyzed("B"));
        analysis
            .relations
            .add_product(PathBuf::from("b.src"), PathBuf::from("A.class"));
        assert!(matches!(
            analysis.verify(),
            Err(InvariantViolation::ProductOwnership { owners: 2, .. })
        ));
    }

    #[test]
    fn remove_sources_drops_all_traces() {
        let mut analysis = sample();
        analysis
            .relations
            .add_used_name(name("A"), name("foo"), UseScopes::DEFAULT);
        let removed = analysis.remove_sources([&PathBuf::from("a.src")]);
        assert!(removed.classes.contains(&name("A")));
        assert!(analysis.is_empty(), "single-source analysis empties out");
    }

    #[test]
    fn merge_prefers_fresh_entries() {
        let mut analysis = sample();
        let mut fresh = sample();
        fresh
            .apis
            .internal
            .get_mut(&name("A"))
            .expect("A present")
            .compilation_timestamp = 42;
        analysis.merge(fresh);
        assert_eq!(
            analysis.apis.internal[&name("A")].compilation_timestamp,
            42
        );
        assert_eq!(analysis.verify(), Ok(()));
    }
}
