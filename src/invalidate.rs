//! Invalidation engine: what must be recompiled, and why.
//!
//! Two stages live here. `InitialChanges` turns stamps and external
//! API drift into the first invalid set before any compiler runs.
//! `Invalidations` closes a set of API changes over the dependency
//! graphs: member-reference edges pruned by used-name hashes,
//! inheritance edges unscoped (subclasses re-synthesize members, so a
//! parent change invalidates them no matter which names they use).

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::config::IncOptions;
use crate::core::{Analysis, Name, Relations, Stamp, Stamper};
use crate::diff::{modified_names, ApiChanges, ModifiedNames};
use crate::driver::Lookup;

/// Everything that changed since the previous analysis was written,
/// before any recompilation.
#[derive(Clone, Debug, Default)]
pub struct InitialChanges {
    pub modified_sources: BTreeSet<PathBuf>,
    pub removed_sources: BTreeSet<PathBuf>,
    pub modified_binaries: BTreeSet<PathBuf>,
    /// Drift in the APIs of externally compiled classes we depend on.
    pub external: ApiChanges,
    /// External classes that no longer resolve anywhere. Their
    /// dependents are invalidated unconditionally.
    pub missing_external: BTreeSet<Name>,
}

impl InitialChanges {
    pub fn is_clean(&self) -> bool {
        self.modified_sources.is_empty()
            && self.removed_sources.is_empty()
            && self.modified_binaries.is_empty()
            && self.external.is_empty()
            && self.missing_external.is_empty()
    }

    /// Detect changes by restamping the world the previous analysis
    /// recorded.
    pub fn collect(
        previous: &Analysis,
        current_sources: &BTreeSet<PathBuf>,
        stamper: &dyn Stamper,
        lookup: &dyn Lookup,
    ) -> Self {
        let mut changes = Self::default();

        for source in current_sources {
            let old = previous.stamps.source(source);
            let new = stamper.stamp_source(source);
            if Stamp::modified(&old, &new) {
                changes.modified_sources.insert(source.clone());
                continue;
            }
            // Unchanged source whose product vanished or drifted is
            // treated as source-modified.
            let product_stale = previous.relations.src_prod.forward(source).any(|product| {
                Stamp::modified(&previous.stamps.product(product), &stamper.stamp_product(product))
            });
            if product_stale {
                changes.modified_sources.insert(source.clone());
            }
        }

        for source in previous.sources() {
            if !current_sources.contains(source) {
                changes.removed_sources.insert(source.clone());
            }
        }

        for (binary, old) in &previous.stamps.binaries {
            let new = stamper.stamp_binary(binary);
            if Stamp::modified(old, &new) {
                changes.modified_binaries.insert(binary.clone());
            }
        }

        for (class, old_api) in &previous.apis.external {
            let resolved = lookup
                .lookup_analysis(class)
                .and_then(|analysis| analysis.apis.internal.get(class).cloned());
            match resolved {
                Some(new_api) => {
                    if old_api.api_hash != new_api.api_hash
                        || old_api.has_macro != new_api.has_macro
                    {
                        changes
                            .external
                            .modified
                            .insert(class.clone(), modified_names(old_api, &new_api));
                        if !old_api.has_macro && new_api.has_macro {
                            changes.external.macro_flipped.insert(class.clone());
                        }
                    }
                }
                None => {
                    // A class that was already recorded as unresolved
                    // is stable, not newly missing.
                    if old_api.is_placeholder() {
                        continue;
                    }
                    tracing::warn!(class = %class, "external class no longer resolves; invalidating dependents");
                    changes.missing_external.insert(class.clone());
                    changes.external.removed.insert(class.clone());
                    changes
                        .external
                        .modified
                        .insert(class.clone(), ModifiedNames::all_of(old_api));
                }
            }
        }

        changes
    }

    /// Stage 1: the classes that must go into the first compile step.
    pub fn initial_invalid_classes(
        &self,
        previous: &Analysis,
        options: &IncOptions,
    ) -> BTreeSet<Name> {
        let relations = &previous.relations;
        let mut invalid = BTreeSet::new();

        for source in self.modified_sources.iter().chain(&self.removed_sources) {
            invalid.extend(relations.classes_of(source).cloned());
        }

        // A changed classpath entry dirties every source that was
        // compiled against it.
        for binary in &self.modified_binaries {
            for source in relations.library_dep.reverse(binary) {
                invalid.extend(relations.classes_of(source).cloned());
            }
        }

        for (class, names) in &self.external.modified {
            let unconditional = !options.name_hashing
                || self.external.macro_flipped.contains(class)
                || self.missing_external.contains(class);
            invalid.extend(external_dependents(
                relations,
                class,
                names,
                unconditional,
            ));
        }

        // Classes deleted along with their sources never get a
        // post-compile diff, so their dependents are closed over here,
        // with every name of the vanished class counting as modified.
        let mut removed_changes = ApiChanges::default();
        for source in &self.removed_sources {
            for class in relations.classes_of(source) {
                removed_changes.removed.insert(class.clone());
                let names = previous
                    .apis
                    .internal
                    .get(class)
                    .map(ModifiedNames::all_of)
                    .unwrap_or_default();
                removed_changes.modified.insert(class.clone(), names);
            }
        }
        if !removed_changes.is_empty() {
            let closure = Invalidations::compute(
                &removed_changes,
                relations,
                options,
                previous.apis.internal.len(),
            );
            invalid.extend(closure.classes);
        }

        invalid
    }
}

/// Dependents of one externally compiled class: member references
/// pruned by used names, inheritance unscoped.
fn external_dependents(
    relations: &Relations,
    class: &Name,
    names: &ModifiedNames,
    unconditional: bool,
) -> BTreeSet<Name> {
    let mut dependents = BTreeSet::new();
    for dependent in relations.member_ref.external.reverse(class) {
        if unconditional || uses_any(relations, dependent, names) {
            dependents.insert(dependent.clone());
        }
    }
    for dependent in relations
        .inheritance
        .external
        .reverse(class)
        .chain(relations.local_inheritance.external.reverse(class))
    {
        dependents.insert(dependent.clone());
    }
    dependents
}

fn uses_any(relations: &Relations, dependent: &Name, names: &ModifiedNames) -> bool {
    names
        .iter()
        .any(|(name, scope)| relations.uses_name(dependent, name, *scope))
}

/// Result of closing API changes over the dependency graphs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Invalidations {
    /// Invalid classes, including the seeds themselves.
    pub classes: BTreeSet<Name>,
    /// The fraction gate tripped; callers should recompile everything.
    pub recompile_all: bool,
}

impl Invalidations {
    /// Stage 3: transitive closure over internal dependencies.
    ///
    /// Modified names flow down inheritance edges (a subclass
    /// re-exposes its parent's members), then member-reference
    /// dependents of every class reached that way are added when they
    /// use one of the flowing names in a matching scope. Every class
    /// is added at most once, so this terminates.
    pub fn compute(
        changes: &ApiChanges,
        relations: &Relations,
        options: &IncOptions,
        total_classes: usize,
    ) -> Self {
        let mut flowing: BTreeMap<Name, ModifiedNames> = BTreeMap::new();
        let mut reached: BTreeSet<Name> = BTreeSet::new();
        let mut worklist: Vec<Name> = Vec::new();
        for (class, names) in &changes.modified {
            flowing.insert(class.clone(), names.clone());
            reached.insert(class.clone());
            worklist.push(class.clone());
        }

        // Inheritance closure, names propagated along the way. A class
        // re-enters the worklist only when its flowing set grows, so
        // cyclic graphs terminate.
        while let Some(class) = worklist.pop() {
            let names = flowing.get(&class).cloned().unwrap_or_default();
            let subclasses: Vec<Name> = relations
                .inheritance
                .internal
                .reverse(&class)
                .chain(relations.local_inheritance.internal.reverse(&class))
                .cloned()
                .collect();
            for subclass in subclasses {
                let newly_reached = reached.insert(subclass.clone());
                let entry = flowing.entry(subclass.clone()).or_default();
                let before = entry.len();
                entry.union(&names);
                if newly_reached || entry.len() > before {
                    worklist.push(subclass);
                }
            }
        }

        let mut classes: BTreeSet<Name> = reached;

        // One member-reference step from every class reached above;
        // dependents join the invalid set but do not propagate further.
        // Their own API has not changed yet; the driver's next cycle
        // diffs them after recompilation.
        for (class, names) in &flowing {
            let unconditional =
                !options.name_hashing || changes.macro_flipped.contains(class);
            for dependent in relations.member_ref.internal.reverse(class) {
                if classes.contains(dependent) {
                    continue;
                }
                if unconditional || uses_any(relations, dependent, names) {
                    classes.insert(dependent.clone());
                }
            }
        }

        let recompile_all = options.exceeds_recompile_fraction(classes.len(), total_classes);
        if recompile_all {
            tracing::debug!(
                invalidated = classes.len(),
                total = total_classes,
                "invalidated fraction over threshold, recompiling everything"
            );
        }
        Invalidations {
            classes,
            recompile_all,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && !self.recompile_all
    }
}

/// Map invalid classes back to the sources that declare them.
pub fn invalidated_sources(
    relations: &Relations,
    classes: &BTreeSet<Name>,
) -> BTreeSet<PathBuf> {
    let mut sources = BTreeSet::new();
    for class in classes {
        sources.extend(relations.sources_of(class).cloned());
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DependencyContext, UseScope, UseScopes};
    use std::sync::Arc;

    fn name(s: &str) -> Name {
        Arc::from(s)
    }

    /// P <- member-ref Q (uses foo), R (uses bar); S extends P.
    fn sample_relations() -> Relations {
        let mut relations = Relations::new();
        relations.add_class(PathBuf::from("p.src"), name("P"));
        relations.add_class(PathBuf::from("q.src"), name("Q"));
        relations.add_class(PathBuf::from("r.src"), name("R"));
        relations.add_class(PathBuf::from("s.src"), name("S"));
        for from in ["Q", "R"] {
            relations.add_internal_class_dependency(
                name(from),
                name("P"),
                DependencyContext::MemberRef,
            );
        }
        relations.add_internal_class_dependency(
            name("S"),
            name("P"),
            DependencyContext::Inheritance,
        );
        relations.add_used_name(name("Q"), name("foo"), UseScopes::DEFAULT);
        relations.add_used_name(name("R"), name("bar"), UseScopes::DEFAULT);
        relations
    }

    fn changes_with(class: &str, modified: &[&str]) -> ApiChanges {
        let mut names = ModifiedNames::default();
        for n in modified {
            names.insert(name(n), UseScope::Default);
        }
        let mut changes = ApiChanges::default();
        changes.modified.insert(name(class), names);
        changes
    }

    #[test]
    fn member_ref_pruned_by_used_names() {
        let relations = sample_relations();
        let changes = changes_with("P", &["foo"]);
        let invalidations =
            Invalidations::compute(&changes, &relations, &IncOptions::default(), 100);
        assert!(invalidations.classes.contains(&name("Q")), "Q uses foo");
        assert!(
            !invalidations.classes.contains(&name("R")),
            "R only uses bar"
        );
    }

    #[test]
    fn inheritance_is_unscoped() {
        let relations = sample_relations();
        let changes = changes_with("P", &["bar"]);
        let invalidations =
            Invalidations::compute(&changes, &relations, &IncOptions::default(), 100);
        assert!(
            invalidations.classes.contains(&name("S")),
            "subclass invalidated even though it names nothing"
        );
    }

    #[test]
    fn name_hashing_off_invalidates_all_member_refs() {
        let relations = sample_relations();
        let changes = changes_with("P", &["foo"]);
        let options = IncOptions {
            name_hashing: false,
            ..IncOptions::default()
        };
        let invalidations = Invalidations::compute(&changes, &relations, &options, 100);
        assert!(invalidations.classes.contains(&name("R")));
    }

    #[test]
    fn macro_flip_invalidates_all_member_refs() {
        let relations = sample_relations();
        let mut changes = changes_with("P", &[]);
        changes.macro_flipped.insert(name("P"));
        let invalidations =
            Invalidations::compute(&changes, &relations, &IncOptions::default(), 100);
        assert!(invalidations.classes.contains(&name("Q")));
        assert!(invalidations.classes.contains(&name("R")));
    }

    #[test]
    fn names_flow_down_inheritance_chains() {
        // P <-inh- S <-member-ref- T (uses foo): a change to P.foo
        // must reach T through S.
        let mut relations = sample_relations();
        relations.add_class(PathBuf::from("t.src"), name("T"));
        relations.add_internal_class_dependency(
            name("T"),
            name("S"),
            DependencyContext::MemberRef,
        );
        relations.add_used_name(name("T"), name("foo"), UseScopes::DEFAULT);

        let changes = changes_with("P", &["foo"]);
        let invalidations =
            Invalidations::compute(&changes, &relations, &IncOptions::default(), 100);
        assert!(invalidations.classes.contains(&name("T")));
    }

    #[test]
    fn closure_is_idempotent() {
        let relations = sample_relations();
        let changes = changes_with("P", &["foo"]);
        let options = IncOptions::default();
        let first = Invalidations::compute(&changes, &relations, &options, 100);

        // Re-seeding with the same changes plus the already-invalid
        // classes (with no new modified names) adds nothing.
        let mut reseeded = changes.clone();
        for class in &first.classes {
            reseeded
                .modified
                .entry(class.clone())
                .or_default();
        }
        let second = Invalidations::compute(&reseeded, &relations, &options, 100);
        assert_eq!(first.classes, second.classes);
    }

    proptest::proptest! {
        /// Over arbitrary graphs: the closure is deterministic, keeps
        /// its seeds, swallows every transitive inheritance dependent,
        /// and reaches member-reference dependents of everything the
        /// inheritance closure touched (all classes here use the
        /// modified name, so pruning never excuses anyone).
        #[test]
        fn closure_is_conservative_on_random_graphs(
            member_edges in proptest::collection::vec((0u8..6, 0u8..6), 0..20),
            inheritance_edges in proptest::collection::vec((0u8..6, 0u8..6), 0..12),
            seed in 0u8..6,
        ) {
            let class = |i: u8| -> Name { Arc::from(format!("C{i}")) };
            let mut relations = Relations::new();
            for i in 0..6u8 {
                relations.add_class(PathBuf::from(format!("c{i}.src")), class(i));
                relations.add_used_name(class(i), name("m"), UseScopes::DEFAULT);
            }
            for (from, on) in member_edges {
                relations.add_internal_class_dependency(
                    class(from),
                    class(on),
                    DependencyContext::MemberRef,
                );
            }
            for (from, on) in &inheritance_edges {
                relations.add_internal_class_dependency(
                    class(*from),
                    class(*on),
                    DependencyContext::Inheritance,
                );
            }

            let mut changes = ApiChanges::default();
            let mut seed_names = ModifiedNames::default();
            seed_names.insert(name("m"), UseScope::Default);
            changes.modified.insert(class(seed), seed_names);

            let options = IncOptions {
                recompile_all_fraction: 1.1,
                ..IncOptions::default()
            };
            let first = Invalidations::compute(&changes, &relations, &options, 6);
            let second = Invalidations::compute(&changes, &relations, &options, 6);
            proptest::prop_assert_eq!(&first, &second);
            proptest::prop_assert!(first.classes.contains(&class(seed)));

            // Inheritance closure of the seed, computed independently.
            let mut inherited = BTreeSet::from([class(seed)]);
            let mut frontier = vec![class(seed)];
            while let Some(current) = frontier.pop() {
                for (from, on) in &inheritance_edges {
                    if class(*on) == current && inherited.insert(class(*from)) {
                        frontier.push(class(*from));
                    }
                }
            }
            for touched in &inherited {
                proptest::prop_assert!(first.classes.contains(touched));
                for dependent in relations.member_ref.internal.reverse(touched) {
                    proptest::prop_assert!(first.classes.contains(dependent));
                }
            }
        }
    }

    #[test]
    fn fraction_gate_trips() {
        let relations = sample_relations();
        let changes = changes_with("P", &["foo", "bar"]);
        let invalidations =
            Invalidations::compute(&changes, &relations, &IncOptions::default(), 4);
        // P, Q, R, S out of 4 known classes.
        assert!(invalidations.recompile_all);
    }

    #[test]
    fn sources_map_back_through_classes() {
        let relations = sample_relations();
        let sources = invalidated_sources(
            &relations,
            &BTreeSet::from([name("P"), name("S")]),
        );
        assert_eq!(
            sources,
            BTreeSet::from([PathBuf::from("p.src"), PathBuf::from("s.src")])
        );
    }
}
