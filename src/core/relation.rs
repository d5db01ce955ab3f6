//! Layer 1: generic bidirectional many-to-many relation.
//!
//! Forward and reverse maps are maintained in lockstep; the reverse
//! map is what makes "who depends on this class" queries cheap during
//! invalidation. BTree maps keep iteration deterministic, which the
//! codec relies on for byte-stable output.

use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};

/// Invariant: `b in forward(a)` iff `a in reverse(b)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relation<A, B> {
    forward: BTreeMap<A, BTreeSet<B>>,
    reverse: BTreeMap<B, BTreeSet<A>>,
}

impl<A: Ord + Clone, B: Ord + Clone> Default for Relation<A, B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Ord + Clone, B: Ord + Clone> Relation<A, B> {
    pub fn new() -> Self {
        Self {
            forward: BTreeMap::new(),
            reverse: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty() && self.reverse.is_empty()
    }

    pub fn add(&mut self, a: A, b: B) {
        self.forward
            .entry(a.clone())
            .or_default()
            .insert(b.clone());
        self.reverse.entry(b).or_default().insert(a);
    }

    pub fn add_many(&mut self, a: A, bs: impl IntoIterator<Item = B>) {
        for b in bs {
            self.add(a.clone(), b);
        }
    }

    pub fn remove(&mut self, a: &A, b: &B) {
        if let Some(set) = self.forward.get_mut(a) {
            set.remove(b);
            if set.is_empty() {
                self.forward.remove(a);
            }
        }
        if let Some(set) = self.reverse.get_mut(b) {
            set.remove(a);
            if set.is_empty() {
                self.reverse.remove(b);
            }
        }
    }

    /// Remove every pair keyed by `a`.
    pub fn remove_key(&mut self, a: &A) {
        let Some(bs) = self.forward.remove(a) else {
            return;
        };
        for b in bs {
            if let Some(set) = self.reverse.get_mut(&b) {
                set.remove(a);
                if set.is_empty() {
                    self.reverse.remove(&b);
                }
            }
        }
    }

    /// Remove every pair whose value is `b`.
    pub fn remove_value(&mut self, b: &B) {
        let Some(as_) = self.reverse.remove(b) else {
            return;
        };
        for a in as_ {
            if let Some(set) = self.forward.get_mut(&a) {
                set.remove(b);
                if set.is_empty() {
                    self.forward.remove(&a);
                }
            }
        }
    }

    pub fn contains(&self, a: &A, b: &B) -> bool {
        self.forward.get(a).is_some_and(|set| set.contains(b))
    }

    /// Values related to `a`, empty when `a` is unknown.
    pub fn forward<'s, Q>(&'s self, a: &Q) -> impl Iterator<Item = &'s B> + 's
    where
        A: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.forward.get(a).into_iter().flatten()
    }

    /// Keys related to `b`, empty when `b` is unknown.
    pub fn reverse<'s, Q>(&'s self, b: &Q) -> impl Iterator<Item = &'s A> + 's
    where
        B: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.reverse.get(b).into_iter().flatten()
    }

    pub fn forward_map(&self) -> &BTreeMap<A, BTreeSet<B>> {
        &self.forward
    }

    pub fn reverse_map(&self) -> &BTreeMap<B, BTreeSet<A>> {
        &self.reverse
    }

    pub fn keys(&self) -> impl Iterator<Item = &A> {
        self.forward.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &B> {
        self.reverse.keys()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&A, &B)> {
        self.forward
            .iter()
            .flat_map(|(a, bs)| bs.iter().map(move |b| (a, b)))
    }

    pub fn len(&self) -> usize {
        self.forward.values().map(BTreeSet::len).sum()
    }

    /// Keywise union.
    pub fn union(&mut self, other: Relation<A, B>) {
        for (a, bs) in other.forward {
            self.add_many(a, bs);
        }
    }

    /// Rebuild the reverse map from a forward map.
    pub fn reconstruct(forward: BTreeMap<A, BTreeSet<B>>) -> Self {
        let mut reverse: BTreeMap<B, BTreeSet<A>> = BTreeMap::new();
        for (a, bs) in &forward {
            for b in bs {
                reverse.entry(b.clone()).or_default().insert(a.clone());
            }
        }
        Self { forward, reverse }
    }

    /// Verifies the lockstep invariant. O(n); meant for assertions and
    /// tests, not hot paths.
    pub fn is_consistent(&self) -> bool {
        let fwd_ok = self.forward.iter().all(|(a, bs)| {
            !bs.is_empty()
                && bs
                    .iter()
                    .all(|b| self.reverse.get(b).is_some_and(|set| set.contains(a)))
        });
        let rev_ok = self.reverse.iter().all(|(b, as_)| {
            !as_.is_empty()
                && as_
                    .iter()
                    .all(|a| self.forward.get(a).is_some_and(|set| set.contains(b)))
        });
        fwd_ok && rev_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> Relation<String, String> {
        let mut rel = Relation::new();
        rel.add("a".to_string(), "x".to_string());
        rel.add("a".to_string(), "y".to_string());
        rel.add("b".to_string(), "x".to_string());
        rel
    }

    #[test]
    fn add_updates_both_directions() {
        let rel = sample();
        assert!(rel.contains(&"a".into(), &"x".into()));
        let deps: Vec<_> = rel.reverse(&"x".to_string()).cloned().collect();
        assert_eq!(deps, vec!["a".to_string(), "b".to_string()]);
        assert!(rel.is_consistent());
    }

    #[test]
    fn remove_key_clears_reverse_entries() {
        let mut rel = sample();
        rel.remove_key(&"a".to_string());
        assert!(!rel.contains(&"a".into(), &"x".into()));
        assert_eq!(rel.reverse(&"y".to_string()).count(), 0);
        assert_eq!(rel.reverse(&"x".to_string()).count(), 1);
        assert!(rel.is_consistent());
    }

    #[test]
    fn remove_value_clears_forward_entries() {
        let mut rel = sample();
        rel.remove_value(&"x".to_string());
        assert!(!rel.contains(&"a".into(), &"x".into()));
        assert!(!rel.contains(&"b".into(), &"x".into()));
        assert!(rel.contains(&"a".into(), &"y".into()));
        assert!(rel.is_consistent());
    }

    #[test]
    fn empty_iff_both_maps_empty() {
        let mut rel = sample();
        assert!(!rel.is_empty());
        rel.remove_key(&"a".to_string());
        rel.remove_key(&"b".to_string());
        assert!(rel.is_empty());
    }

    #[test]
    fn union_merges_keywise() {
        let mut rel = sample();
        let mut other = Relation::new();
        other.add("b".to_string(), "z".to_string());
        rel.union(other);
        assert!(rel.contains(&"b".into(), &"z".into()));
        assert!(rel.contains(&"b".into(), &"x".into()));
        assert!(rel.is_consistent());
    }

    #[test]
    fn reconstruct_matches_incremental_build() {
        let rel = sample();
        let rebuilt = Relation::reconstruct(rel.forward_map().clone());
        assert_eq!(rel, rebuilt);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8, u8),
        Remove(u8, u8),
        RemoveKey(u8),
        RemoveValue(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..8, 0u8..8).prop_map(|(a, b)| Op::Add(a, b)),
            (0u8..8, 0u8..8).prop_map(|(a, b)| Op::Remove(a, b)),
            (0u8..8).prop_map(Op::RemoveKey),
            (0u8..8).prop_map(Op::RemoveValue),
        ]
    }

    proptest! {
        #[test]
        fn invariant_holds_under_random_ops(ops in proptest::collection::vec(op_strategy(), 0..64)) {
            let mut rel: Relation<u8, u8> = Relation::new();
            for op in ops {
                match op {
                    Op::Add(a, b) => rel.add(a, b),
                    Op::Remove(a, b) => rel.remove(&a, &b),
                    Op::RemoveKey(a) => rel.remove_key(&a),
                    Op::RemoveValue(b) => rel.remove_value(&b),
                }
                prop_assert!(rel.is_consistent());
            }
            let rebuilt = Relation::reconstruct(rel.forward_map().clone());
            prop_assert_eq!(rel, rebuilt);
        }
    }
}
