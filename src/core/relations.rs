//! Layer 3: the named relation aggregate.
//!
//! Everything the invalidation engine walks lives here: source to
//! product, source to declared class, class-to-class dependency graphs
//! (one per dependency context, split internal/external), and the
//! used-name sets that drive member-reference pruning.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::api::{Name, UseScope, UseScopes};
use super::relation::Relation;

/// How one class depends on another, as reported by the compiler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DependencyContext {
    /// Body or signature mentions a member of the target.
    MemberRef,
    /// Extends or mixes in the target.
    Inheritance,
    /// Inherits the target inside a local scope (a class nested in a
    /// method body).
    LocalInheritance,
}

/// A name referenced by a class, with the scopes it was seen in.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct UsedName {
    pub name: Name,
    pub scopes: UseScopes,
}

/// One dependency graph, split by whether the target class belongs to
/// this module (`internal`) or was compiled elsewhere (`external`).
/// Forward direction is `from -> on`; `reverse(on)` yields dependents.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceDependencies {
    pub internal: Relation<Name, Name>,
    pub external: Relation<Name, Name>,
}

impl SourceDependencies {
    pub fn is_empty(&self) -> bool {
        self.internal.is_empty() && self.external.is_empty()
    }

    fn union(&mut self, other: SourceDependencies) {
        self.internal.union(other.internal);
        self.external.union(other.external);
    }

    fn remove_from_class(&mut self, class: &Name) {
        self.internal.remove_key(class);
        self.external.remove_key(class);
    }
}

/// What a batch of source removals took with it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemovedEntries {
    pub classes: BTreeSet<Name>,
    pub products: BTreeSet<PathBuf>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Relations {
    /// Source file <-> emitted class file.
    pub src_prod: Relation<PathBuf, PathBuf>,
    /// Source file <-> classpath entry it depends on.
    pub library_dep: Relation<PathBuf, PathBuf>,
    /// Classpath entry <-> binary class name found in it.
    pub library_class_name: Relation<PathBuf, Name>,
    /// Source file <-> non-local class name declared in it.
    pub classes: Relation<PathBuf, Name>,
    /// Binary class name <-> source class name.
    pub product_class_name: Relation<Name, Name>,
    pub member_ref: SourceDependencies,
    pub inheritance: SourceDependencies,
    pub local_inheritance: SourceDependencies,
    /// Per class: simple names it references, with scopes.
    pub names: BTreeMap<Name, BTreeMap<Name, UseScopes>>,
}

impl Relations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.src_prod.is_empty()
            && self.library_dep.is_empty()
            && self.library_class_name.is_empty()
            && self.classes.is_empty()
            && self.product_class_name.is_empty()
            && self.member_ref.is_empty()
            && self.inheritance.is_empty()
            && self.local_inheritance.is_empty()
            && self.names.is_empty()
    }

    pub fn add_product(&mut self, source: PathBuf, product: PathBuf) {
        self.src_prod.add(source, product);
    }

    pub fn add_library_dependency(&mut self, source: PathBuf, library: PathBuf) {
        self.library_dep.add(source, library);
    }

    pub fn add_library_class_name(&mut self, library: PathBuf, binary_name: Name) {
        self.library_class_name.add(library, binary_name);
    }

    pub fn add_class(&mut self, source: PathBuf, class: Name) {
        self.classes.add(source, class);
    }

    pub fn add_product_class_name(&mut self, binary_name: Name, source_name: Name) {
        self.product_class_name.add(binary_name, source_name);
    }

    pub fn add_internal_class_dependency(
        &mut self,
        from: Name,
        on: Name,
        context: DependencyContext,
    ) {
        self.dependencies_mut(context).internal.add(from, on);
    }

    pub fn add_external_class_dependency(
        &mut self,
        from: Name,
        on: Name,
        context: DependencyContext,
    ) {
        self.dependencies_mut(context).external.add(from, on);
    }

    pub fn add_used_name(&mut self, from: Name, name: Name, scopes: UseScopes) {
        let entry = self
            .names
            .entry(from)
            .or_default()
            .entry(name)
            .or_default();
        for scope in scopes.iter() {
            entry.insert(scope);
        }
    }

    pub fn dependencies(&self, context: DependencyContext) -> &SourceDependencies {
        match context {
            DependencyContext::MemberRef => &self.member_ref,
            DependencyContext::Inheritance => &self.inheritance,
            DependencyContext::LocalInheritance => &self.local_inheritance,
        }
    }

    fn dependencies_mut(&mut self, context: DependencyContext) -> &mut SourceDependencies {
        match context {
            DependencyContext::MemberRef => &mut self.member_ref,
            DependencyContext::Inheritance => &mut self.inheritance,
            DependencyContext::LocalInheritance => &mut self.local_inheritance,
        }
    }

    /// Classes declared in `source`.
    pub fn classes_of(&self, source: &Path) -> impl Iterator<Item = &Name> {
        self.classes.forward(source)
    }

    /// Sources declaring `class`.
    pub fn sources_of(&self, class: &Name) -> impl Iterator<Item = &PathBuf> {
        self.classes.reverse(class)
    }

    /// Does `class` reference `name` in `scope`?
    pub fn uses_name(&self, class: &Name, name: &Name, scope: UseScope) -> bool {
        self.names
            .get(class)
            .and_then(|used| used.get(name))
            .is_some_and(|scopes| scopes.contains(scope))
    }

    pub fn used_names(&self, class: &Name) -> impl Iterator<Item = UsedName> + '_ {
        self.names
            .get(class)
            .into_iter()
            .flatten()
            .map(|(name, scopes)| UsedName {
                name: name.clone(),
                scopes: *scopes,
            })
    }

    /// All class names declared anywhere in the module.
    pub fn all_classes(&self) -> impl Iterator<Item = &Name> {
        self.classes.values()
    }

    /// Cascade removal for deleted or about-to-be-recompiled sources.
    /// Outgoing edges of their classes go away; incoming edges from
    /// surviving classes stay (those dependents get invalidated, not
    /// rewritten).
    pub fn remove_sources<'a>(
        &mut self,
        sources: impl IntoIterator<Item = &'a PathBuf>,
    ) -> RemovedEntries {
        let mut removed = RemovedEntries::default();
        for source in sources {
            removed
                .products
                .extend(self.src_prod.forward(source).cloned());
            self.src_prod.remove_key(source);
            self.library_dep.remove_key(source);

            let class_names: Vec<Name> = self.classes.forward(source).cloned().collect();
            self.classes.remove_key(source);
            for class in class_names {
                self.product_class_name.remove_value(&class);
                self.member_ref.remove_from_class(&class);
                self.inheritance.remove_from_class(&class);
                self.local_inheritance.remove_from_class(&class);
                self.names.remove(&class);
                removed.classes.insert(class);
            }
        }
        removed
    }

    /// Keywise union with callback output from a compile step.
    pub fn union(&mut self, other: Relations) {
        self.src_prod.union(other.src_prod);
        self.library_dep.union(other.library_dep);
        self.library_class_name.union(other.library_class_name);
        self.classes.union(other.classes);
        self.product_class_name.union(other.product_class_name);
        self.member_ref.union(other.member_ref);
        self.inheritance.union(other.inheritance);
        self.local_inheritance.union(other.local_inheritance);
        for (from, used) in other.names {
            for (name, scopes) in used {
                self.add_used_name(from.clone(), name, scopes);
            }
        }
    }

    /// Lockstep invariant across every contained relation.
    pub fn is_consistent(&self) -> bool {
        self.src_prod.is_consistent()
            && self.library_dep.is_consistent()
            && self.library_class_name.is_consistent()
            && self.classes.is_consistent()
            && self.product_class_name.is_consistent()
            && self.member_ref.internal.is_consistent()
            && self.member_ref.external.is_consistent()
            && self.inheritance.internal.is_consistent()
            && self.inheritance.external.is_consistent()
            && self.local_inheritance.internal.is_consistent()
            && self.local_inheritance.external.is_consistent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn name(s: &str) -> Name {
        Arc::from(s)
    }

    fn sample() -> Relations {
        let mut relations = Relations::new();
        relations.add_class(PathBuf::from("a.src"), name("A"));
        relations.add_class(PathBuf::from("b.src"), name("B"));
        relations.add_product(PathBuf::from("a.src"), PathBuf::from("A.class"));
        relations.add_product_class_name(name("A"), name("A"));
        relations.add_internal_class_dependency(name("B"), name("A"), DependencyContext::MemberRef);
        relations.add_used_name(name("B"), name("foo"), UseScopes::DEFAULT);
        relations
    }

    #[test]
    fn dependents_via_reverse() {
        let relations = sample();
        let dependents: Vec<_> = relations
            .member_ref
            .internal
            .reverse(&name("A"))
            .cloned()
            .collect();
        assert_eq!(dependents, vec![name("B")]);
    }

    #[test]
    fn used_name_scope_lookup() {
        let relations = sample();
        assert!(relations.uses_name(&name("B"), &name("foo"), UseScope::Default));
        assert!(!relations.uses_name(&name("B"), &name("foo"), UseScope::Implicit));
        assert!(!relations.uses_name(&name("A"), &name("foo"), UseScope::Default));
    }

    #[test]
    fn used_name_scopes_accumulate() {
        let mut relations = sample();
        relations.add_used_name(name("B"), name("foo"), UseScopes::of(UseScope::Implicit));
        assert!(relations.uses_name(&name("B"), &name("foo"), UseScope::Default));
        assert!(relations.uses_name(&name("B"), &name("foo"), UseScope::Implicit));
        assert_eq!(relations.used_names(&name("B")).count(), 1);
    }

    #[test]
    fn remove_sources_cascades() {
        let mut relations = sample();
        let removed = relations.remove_sources([&PathBuf::from("a.src")]);
        assert!(removed.classes.contains(&name("A")));
        assert!(removed.products.contains(&PathBuf::from("A.class")));
        assert_eq!(relations.classes_of(Path::new("a.src")).count(), 0);
        assert!(relations.product_class_name.is_empty());
        // B's edge onto A survives; B is invalid, not rewritten.
        assert!(relations
            .member_ref
            .internal
            .contains(&name("B"), &name("A")));
        assert!(relations.is_consistent());
    }

    #[test]
    fn union_merges_names() {
        let mut relations = sample();
        let mut other = Relations::new();
        other.add_used_name(name("B"), name("bar"), UseScopes::DEFAULT);
        relations.union(other);
        assert!(relations.uses_name(&name("B"), &name("bar"), UseScope::Default));
        assert!(relations.uses_name(&name("B"), &name("foo"), UseScope::Default));
    }

    #[test]
    fn empty_detects_all_fields() {
        assert!(Relations::new().is_empty());
        assert!(!sample().is_empty());
    }
}
