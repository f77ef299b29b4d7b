//! Shape-partitioned indexes over assertions and subscriptions

use crate::assertion::{Shape, Value};
use crate::pattern::Pattern;
use crate::types::SubscriptionId;
use std::collections::{BTreeMap, BTreeSet};

/// Committed assertions grouped by shape
#[derive(Debug, Default)]
pub(crate) struct AssertionIndex {
    by_shape: BTreeMap<Shape, BTreeSet<Value>>,
    len: usize,
}

impl AssertionIndex {
    pub(crate) fn insert(&mut self, value: Value) {
        if self.by_shape.entry(value.shape()).or_default().insert(value) {
            self.len += 1;
        }
    }

    pub(crate) fn remove(&mut self, value: &Value) {
        let shape = value.shape();
        if let Some(bucket) = self.by_shape.get_mut(&shape) {
            if bucket.remove(value) {
                self.len -= 1;
            }
            if bucket.is_empty() {
                self.by_shape.remove(&shape);
            }
        }
    }

    /// Values that could match the pattern, narrowed by its shape
    pub(crate) fn candidates<'a>(
        &'a self,
        pattern: &Pattern,
    ) -> Box<dyn Iterator<Item = &'a Value> + 'a> {
        match pattern.shape() {
            Some(shape) => Box::new(self.by_shape.get(&shape).into_iter().flatten()),
            None => Box::new(self.by_shape.values().flatten()),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Value> {
        self.by_shape.values().flatten()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

/// Where a subscription lives in the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IndexKey {
    /// Pattern with a discard or capture at the top
    Any,
    /// Fixed shape, no constant first field
    Shape(Shape),
    /// Fixed shape and a constant first field
    Keyed(Shape, Value),
}

impl IndexKey {
    pub(crate) fn for_pattern(pattern: &Pattern) -> Self {
        match pattern.shape() {
            None => IndexKey::Any,
            Some(shape) => match pattern.first_field_literal() {
                Some(first) => IndexKey::Keyed(shape, first),
                None => IndexKey::Shape(shape),
            },
        }
    }
}

/// Subscriptions bucketed so a change only reaches its shape's buckets
#[derive(Debug, Default)]
pub(crate) struct SubscriptionIndex {
    any: BTreeSet<SubscriptionId>,
    by_shape: BTreeMap<Shape, BTreeSet<SubscriptionId>>,
    by_key: BTreeMap<(Shape, Value), BTreeSet<SubscriptionId>>,
}

impl SubscriptionIndex {
    pub(crate) fn insert(&mut self, key: &IndexKey, id: SubscriptionId) {
        match key {
            IndexKey::Any => {
                self.any.insert(id);
            }
            IndexKey::Shape(shape) => {
                self.by_shape.entry(shape.clone()).or_default().insert(id);
            }
            IndexKey::Keyed(shape, first) => {
                self.by_key
                    .entry((shape.clone(), first.clone()))
                    .or_default()
                    .insert(id);
            }
        }
    }

    pub(crate) fn remove(&mut self, key: &IndexKey, id: SubscriptionId) {
        match key {
            IndexKey::Any => {
                self.any.remove(&id);
            }
            IndexKey::Shape(shape) => {
                if let Some(bucket) = self.by_shape.get_mut(shape) {
                    bucket.remove(&id);
                    if bucket.is_empty() {
                        self.by_shape.remove(shape);
                    }
                }
            }
            IndexKey::Keyed(shape, first) => {
                let slot = (shape.clone(), first.clone());
                if let Some(bucket) = self.by_key.get_mut(&slot) {
                    bucket.remove(&id);
                    if bucket.is_empty() {
                        self.by_key.remove(&slot);
                    }
                }
            }
        }
    }

    /// Subscriptions whose bucket covers this value, in id order
    pub(crate) fn candidates(&self, value: &Value) -> BTreeSet<SubscriptionId> {
        let shape = value.shape();
        let mut found: BTreeSet<SubscriptionId> = self.any.iter().copied().collect();
        if let Some(bucket) = self.by_shape.get(&shape) {
            found.extend(bucket.iter().copied());
        }
        if let Some(first) = value.field(0) {
            if let Some(bucket) = self.by_key.get(&(shape, first.clone())) {
                found.extend(bucket.iter().copied());
            }
        }
        found
    }
}
