//! Patch engine
//!
//! A `Delta` is the raw change of a batch of publish/unpublish operations.
//! A `Patch` is a delta seen through one pattern: the added and removed
//! matches, each paired with its captures.

use crate::assertion::Value;
use crate::pattern::{Captures, Pattern};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Net change of the visible population over a batch
///
/// `added` and `removed` are always disjoint: an add followed by a remove of
/// the same value cancels out, and vice versa.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    added: BTreeSet<Value>,
    removed: BTreeSet<Value>,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a value became visible
    pub fn add(&mut self, value: Value) {
        if !self.removed.remove(&value) {
            self.added.insert(value);
        }
    }

    /// Record that a value stopped being visible
    pub fn remove(&mut self, value: Value) {
        if !self.added.remove(&value) {
            self.removed.insert(value);
        }
    }

    /// Compose this delta with a later one
    pub fn join(mut self, later: Delta) -> Delta {
        for value in later.removed {
            self.remove(value);
        }
        for value in later.added {
            self.add(value);
        }
        self
    }

    /// Intersect the delta with a pattern
    pub fn restrict(&self, pattern: &Pattern) -> Patch {
        Patch {
            added: matching(self.added.iter(), pattern),
            removed: matching(self.removed.iter(), pattern),
        }
    }

    pub fn added(&self) -> impl Iterator<Item = &Value> {
        self.added.iter()
    }

    pub fn removed(&self) -> impl Iterator<Item = &Value> {
        self.removed.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Number of changed values
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len()
    }

    /// Every changed value, added ones first
    pub fn changed(&self) -> impl Iterator<Item = &Value> {
        self.added.iter().chain(self.removed.iter())
    }
}

/// Added and removed matches of one pattern
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub added: BTreeMap<Value, Captures>,
    pub removed: BTreeMap<Value, Captures>,
}

impl Patch {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Minimal patch taking the matches of `old` to the matches of `new`
    pub fn between<'a>(
        old: impl IntoIterator<Item = &'a Value>,
        new: impl IntoIterator<Item = &'a Value>,
        pattern: &Pattern,
    ) -> Patch {
        let old = matching(old, pattern);
        let new = matching(new, pattern);
        let added = new
            .iter()
            .filter(|(value, _)| !old.contains_key(*value))
            .map(|(value, captures)| (value.clone(), captures.clone()))
            .collect();
        let removed = old
            .into_iter()
            .filter(|(value, _)| !new.contains_key(value))
            .collect();
        Patch { added, removed }
    }

    /// `added`-only patch carrying every match in a population
    pub fn initial<'a>(
        population: impl IntoIterator<Item = &'a Value>,
        pattern: &Pattern,
    ) -> Patch {
        Patch {
            added: matching(population, pattern),
            removed: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len()
    }

    /// Apply to a running match set, as a subscriber accumulates patches
    pub fn apply(&self, matches: &mut BTreeMap<Value, Captures>) {
        for value in self.removed.keys() {
            matches.remove(value);
        }
        for (value, captures) in &self.added {
            matches.insert(value.clone(), captures.clone());
        }
    }
}

fn matching<'a>(
    values: impl IntoIterator<Item = &'a Value>,
    pattern: &Pattern,
) -> BTreeMap<Value, Captures> {
    values
        .into_iter()
        .filter_map(|value| pattern.matches(value).map(|captures| (value.clone(), captures)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    fn pattern(text: &str) -> Pattern {
        text.parse().unwrap()
    }

    #[test]
    fn test_between() {
        let old = [record!("task", 1i64), record!("task", 2i64), record!("job", 1i64)];
        let new = [record!("task", 2i64), record!("task", 3i64)];
        let patch = Patch::between(&old, &new, &pattern("task($)"));
        assert_eq!(
            patch.added.into_iter().collect::<Vec<_>>(),
            vec![(record!("task", 3i64), vec![Value::int(3)])]
        );
        assert_eq!(
            patch.removed.into_iter().collect::<Vec<_>>(),
            vec![(record!("task", 1i64), vec![Value::int(1)])]
        );
    }

    #[test]
    fn test_zero_change_is_empty() {
        let population = [record!("task", 1i64)];
        assert!(Patch::between(&population, &population, &Pattern::Discard).is_empty());
    }

    #[test]
    fn test_delta_cancellation() {
        let mut delta = Delta::new();
        delta.add(record!("a"));
        delta.remove(record!("a"));
        assert!(delta.is_empty());

        delta.remove(record!("b"));
        delta.add(record!("b"));
        assert!(delta.is_empty());
    }

    #[test]
    fn test_join_then_restrict() {
        let mut first = Delta::new();
        first.add(record!("task", 1i64));
        first.add(record!("job", 1i64));
        let mut second = Delta::new();
        second.remove(record!("task", 1i64));
        second.add(record!("task", 2i64));

        let joined = first.join(second);
        assert_eq!(joined.len(), 2);
        let patch = joined.restrict(&pattern("task($)"));
        assert_eq!(patch.added.len(), 1);
        assert!(patch.added.contains_key(&record!("task", 2i64)));
        assert!(patch.removed.is_empty());
    }

    #[test]
    fn test_apply_accumulates() {
        let mut seen = BTreeMap::new();
        let p = pattern("$");
        Patch::initial(&[Value::int(1), Value::int(2)], &p).apply(&mut seen);
        Patch::between(&[Value::int(1), Value::int(2)], &[Value::int(2)], &p).apply(&mut seen);
        assert_eq!(seen.keys().cloned().collect::<Vec<_>>(), vec![Value::int(2)]);
    }
}
