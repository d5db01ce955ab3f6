//! API differ: old vs new `AnalyzedClass`, reduced to the names whose
//! hash moved.
//!
//! The differ never walks structures when it can avoid it: a matching
//! `api_hash` (with a stable macro flag) short-circuits to "no
//! change", which is what makes body-only edits cheap.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::{AnalyzedClass, Name, UseScope};

/// `(name, scope)` pairs whose hash changed between two snapshots of
/// one class.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModifiedNames {
    names: BTreeSet<(Name, UseScope)>,
}

impl ModifiedNames {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn contains(&self, name: &Name, scope: UseScope) -> bool {
        self.names.contains(&(name.clone(), scope))
    }

    pub fn insert(&mut self, name: Name, scope: UseScope) {
        self.names.insert((name, scope));
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Name, UseScope)> {
        self.names.iter()
    }

    pub fn union(&mut self, other: &ModifiedNames) {
        self.names
            .extend(other.names.iter().cloned());
    }

    /// Every name of `class`, for classes that disappeared outright.
    pub fn all_of(class: &AnalyzedClass) -> Self {
        let mut modified = Self::default();
        for hash in &class.name_hashes {
            modified.insert(hash.name.clone(), hash.scope);
        }
        modified
    }
}

/// Diff of one class. Empty when the api hash and macro flag both
/// match.
pub fn modified_names(old: &AnalyzedClass, new: &AnalyzedClass) -> ModifiedNames {
    if old.api_hash == new.api_hash && old.has_macro == new.has_macro {
        return ModifiedNames::default();
    }

    let old_hashes: BTreeSet<(&Name, UseScope, i32)> = old
        .name_hashes
        .iter()
        .map(|h| (&h.name, h.scope, h.hash))
        .collect();
    let new_hashes: BTreeSet<(&Name, UseScope, i32)> = new
        .name_hashes
        .iter()
        .map(|h| (&h.name, h.scope, h.hash))
        .collect();

    let mut modified = ModifiedNames::default();
    for (name, scope, _) in old_hashes.symmetric_difference(&new_hashes) {
        modified.insert((*name).clone(), *scope);
    }
    modified
}

/// Diff of two API maps for the same module.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApiChanges {
    /// Classes whose API changed, with the names that moved. A class
    /// can appear with an empty set (e.g. only an unnamed property of
    /// the class itself changed); inheritance invalidation is unscoped
    /// so that still propagates.
    pub modified: BTreeMap<Name, ModifiedNames>,
    /// Classes present only on the old side. Also listed in
    /// `modified` with all of their names.
    pub removed: BTreeSet<Name>,
    /// Classes whose `has_macro` flipped false -> true. Their
    /// member-reference dependents are invalidated unconditionally.
    pub macro_flipped: BTreeSet<Name>,
}

impl ApiChanges {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.removed.is_empty()
    }

    /// Compare per class name; classes only on the new side are
    /// additions and do not invalidate anyone by themselves.
    pub fn between(
        old: &BTreeMap<Name, AnalyzedClass>,
        new: &BTreeMap<Name, AnalyzedClass>,
    ) -> Self {
        let mut changes = Self::default();
        for (name, old_class) in old {
            match new.get(name) {
                Some(new_class) => {
                    let names = modified_names(old_class, new_class);
                    if old_class.api_hash != new_class.api_hash
                        || old_class.has_macro != new_class.has_macro
                    {
                        changes.modified.insert(name.clone(), names);
                    }
                    if !old_class.has_macro && new_class.has_macro {
                        changes.macro_flipped.insert(name.clone());
                    }
                }
                None => {
                    changes.removed.insert(name.clone());
                    changes
                        .modified
                        .insert(name.clone(), ModifiedNames::all_of(old_class));
                }
            }
        }
        changes
    }
}
