//! Dataspace: the shared, indexed population of live assertions
//!
//! A dataspace is the conversational space of one ground network. Facets:
//! - Publish assertions (visible while at least one facet owns them)
//! - Subscribe to patterns (receive patches as the match set changes)
//! - Send messages (routed once to matching message subscriptions)
//!
//! Changes accumulate into a pending `Delta` and become visible to
//! subscribers only at `commit`, which resolves "what changed" into
//! "who is notified".

mod index;

use crate::assertion::{ShapeRegistry, Value};
use crate::patch::{Delta, Patch};
use crate::pattern::{Captures, Pattern, PatternError};
use crate::types::{FacetId, SubscriptionId};
use index::{AssertionIndex, IndexKey, SubscriptionIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, trace};

/// What a subscription receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionKind {
    /// Patches over the live assertion population
    Assertions,
    /// Messages, delivered once each
    Messages,
}

/// A live subscription
#[derive(Debug, Clone)]
pub struct Subscription {
    pub facet: FacetId,
    pub pattern: Pattern,
    pub kind: SubscriptionKind,
    key: IndexKey,
}

/// Payload delivered to a subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delivery {
    Patch(Patch),
    Message { value: Value, captures: Captures },
}

/// One notification produced by a commit
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub subscription: SubscriptionId,
    pub facet: FacetId,
    pub delivery: Delivery,
}

/// Counters describing a dataspace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataspaceStats {
    pub assertions: usize,
    pub subscriptions: usize,
    pub commits: u64,
    pub patches: u64,
    pub messages: u64,
}

/// Indexed store of assertions and subscriptions for one ground network
#[derive(Debug)]
pub struct Dataspace {
    name: String,
    shapes: ShapeRegistry,
    /// Owning facets of every visible value
    owners: HashMap<Value, BTreeSet<FacetId>>,
    /// Values owned by each facet
    owned: HashMap<FacetId, BTreeSet<Value>>,
    /// Population as of the last commit
    committed: AssertionIndex,
    pending: Delta,
    outbox: Vec<Value>,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    index: SubscriptionIndex,
    next_subscription: u64,
    stats: DataspaceStats,
}

impl Dataspace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shapes: ShapeRegistry::new(),
            owners: HashMap::new(),
            owned: HashMap::new(),
            committed: AssertionIndex::default(),
            pending: Delta::new(),
            outbox: Vec::new(),
            subscriptions: BTreeMap::new(),
            index: SubscriptionIndex::default(),
            next_subscription: 0,
            stats: DataspaceStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shapes(&self) -> &ShapeRegistry {
        &self.shapes
    }

    /// Fix the arity of a record label
    pub fn declare_shape(&mut self, label: &str, arity: usize) -> Result<(), PatternError> {
        self.shapes.declare(label, arity)
    }

    /// Add `facet` as an owner of `value`
    ///
    /// Returns whether the facet did not already own it. The value becomes
    /// visible when its first owner appears.
    pub fn publish(&mut self, facet: FacetId, value: Value) -> Result<bool, PatternError> {
        self.shapes.check_value(&value)?;
        let owners = self.owners.entry(value.clone()).or_default();
        if !owners.insert(facet) {
            return Ok(false);
        }
        if owners.len() == 1 {
            self.pending.add(value.clone());
        }
        self.owned.entry(facet).or_default().insert(value);
        Ok(true)
    }

    /// Drop `facet` as an owner of `value`
    ///
    /// Returns whether the facet owned it. The value stops being visible
    /// when its last owner leaves.
    pub fn unpublish(&mut self, facet: FacetId, value: &Value) -> bool {
        let Some(owners) = self.owners.get_mut(value) else {
            return false;
        };
        if !owners.remove(&facet) {
            return false;
        }
        if owners.is_empty() {
            self.owners.remove(value);
            self.pending.remove(value.clone());
        }
        if let Some(values) = self.owned.get_mut(&facet) {
            values.remove(value);
            if values.is_empty() {
                self.owned.remove(&facet);
            }
        }
        true
    }

    /// Drop every value owned by `facet`, returning how many there were
    pub fn unpublish_facet(&mut self, facet: FacetId) -> usize {
        let values = self.owned.remove(&facet).unwrap_or_default();
        for value in &values {
            if let Some(owners) = self.owners.get_mut(value) {
                owners.remove(&facet);
                if owners.is_empty() {
                    self.owners.remove(value);
                    self.pending.remove(value.clone());
                }
            }
        }
        values.len()
    }

    /// Register a subscription
    ///
    /// For assertion subscriptions the initial patch carries the full
    /// committed match set; message subscriptions start empty.
    pub fn subscribe(
        &mut self,
        facet: FacetId,
        pattern: Pattern,
        kind: SubscriptionKind,
    ) -> Result<(SubscriptionId, Patch), PatternError> {
        pattern.validate(&self.shapes)?;
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        let initial = match kind {
            SubscriptionKind::Assertions => {
                Patch::initial(self.committed.candidates(&pattern), &pattern)
            }
            SubscriptionKind::Messages => Patch::empty(),
        };
        let key = IndexKey::for_pattern(&pattern);
        self.index.insert(&key, id);
        trace!(%id, %facet, %pattern, initial = initial.added.len(), "subscribed");
        self.subscriptions.insert(
            id,
            Subscription {
                facet,
                pattern,
                kind,
                key,
            },
        );
        Ok((id, initial))
    }

    /// Stop delivery to a subscription; no final patch is produced
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        match self.subscriptions.remove(&id) {
            Some(subscription) => {
                self.index.remove(&subscription.key, id);
                true
            }
            None => false,
        }
    }

    pub fn subscription(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.subscriptions.get(&id)
    }

    /// Queue a message for the next commit
    pub fn send(&mut self, message: Value) -> Result<(), PatternError> {
        self.shapes.check_value(&message)?;
        self.outbox.push(message);
        Ok(())
    }

    /// Drop queued messages without delivering them
    pub fn discard_messages(&mut self) -> usize {
        std::mem::take(&mut self.outbox).len()
    }

    /// Whether a commit would produce anything
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || !self.outbox.is_empty()
    }

    /// Publish the pending delta and messages
    ///
    /// Produces one patch per assertion subscription whose pattern
    /// intersects the delta (in subscription id order), followed by one
    /// dispatch per message and matching message subscription.
    pub fn commit(&mut self) -> Vec<Dispatch> {
        if !self.has_pending() {
            return Vec::new();
        }
        let delta = std::mem::take(&mut self.pending);
        let messages = std::mem::take(&mut self.outbox);
        self.stats.commits += 1;

        let mut patches: BTreeMap<SubscriptionId, Patch> = BTreeMap::new();
        for (value, added) in delta
            .added()
            .map(|v| (v, true))
            .chain(delta.removed().map(|v| (v, false)))
        {
            for id in self.index.candidates(value) {
                let Some(subscription) = self.subscriptions.get(&id) else {
                    continue;
                };
                if subscription.kind != SubscriptionKind::Assertions {
                    continue;
                }
                if let Some(captures) = subscription.pattern.matches(value) {
                    let patch = patches.entry(id).or_default();
                    let side = if added {
                        &mut patch.added
                    } else {
                        &mut patch.removed
                    };
                    side.insert(value.clone(), captures);
                }
            }
        }
        for value in delta.added() {
            self.committed.insert(value.clone());
        }
        for value in delta.removed() {
            self.committed.remove(value);
        }

        let mut dispatches = Vec::with_capacity(patches.len());
        for (id, patch) in patches {
            if let Some(subscription) = self.subscriptions.get(&id) {
                dispatches.push(Dispatch {
                    subscription: id,
                    facet: subscription.facet,
                    delivery: Delivery::Patch(patch),
                });
            }
        }
        self.stats.patches += dispatches.len() as u64;

        for message in messages {
            for id in self.index.candidates(&message) {
                let Some(subscription) = self.subscriptions.get(&id) else {
                    continue;
                };
                if subscription.kind != SubscriptionKind::Messages {
                    continue;
                }
                if let Some(captures) = subscription.pattern.matches(&message) {
                    self.stats.messages += 1;
                    dispatches.push(Dispatch {
                        subscription: id,
                        facet: subscription.facet,
                        delivery: Delivery::Message {
                            value: message.clone(),
                            captures,
                        },
                    });
                }
            }
        }

        debug!(
            dataspace = %self.name,
            changed = delta.len(),
            dispatches = dispatches.len(),
            "commit"
        );
        dispatches
    }

    /// Committed assertions matching a pattern
    pub fn query(&self, pattern: &Pattern) -> Vec<Value> {
        self.committed
            .candidates(pattern)
            .filter(|value| pattern.is_match(value))
            .cloned()
            .collect()
    }

    /// All committed assertions
    pub fn assertions(&self) -> Vec<Value> {
        self.committed.iter().cloned().collect()
    }

    /// Number of facets currently owning a value (committed or not)
    pub fn owner_count(&self, value: &Value) -> usize {
        self.owners.get(value).map_or(0, BTreeSet::len)
    }

    pub fn stats(&self) -> DataspaceStats {
        DataspaceStats {
            assertions: self.committed.len(),
            subscriptions: self.subscriptions.len(),
            ..self.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    fn pattern(text: &str) -> Pattern {
        text.parse().unwrap()
    }

    fn patch_of(dispatch: &Dispatch) -> &Patch {
        match &dispatch.delivery {
            Delivery::Patch(patch) => patch,
            other => panic!("expected patch, got {other:?}"),
        }
    }

    #[test]
    fn test_publish_is_idempotent_per_facet() {
        let mut ds = Dataspace::new("test");
        let v = record!("account", "a@x");
        assert!(ds.publish(FacetId(1), v.clone()).unwrap());
        assert!(!ds.publish(FacetId(1), v.clone()).unwrap());
        assert!(ds.publish(FacetId(2), v.clone()).unwrap());
        ds.commit();
        assert_eq!(ds.owner_count(&v), 2);

        assert!(ds.unpublish(FacetId(1), &v));
        assert!(!ds.unpublish(FacetId(1), &v));
        assert!(!ds.has_pending());
        assert_eq!(ds.assertions(), vec![v.clone()]);

        ds.unpublish(FacetId(2), &v);
        ds.commit();
        assert!(ds.assertions().is_empty());
    }

    #[test]
    fn test_subscribe_initial_patch_is_committed_set() {
        let mut ds = Dataspace::new("test");
        for n in 0..3i64 {
            ds.publish(FacetId(1), record!("task", n)).unwrap();
        }
        ds.commit();
        ds.publish(FacetId(1), record!("task", 9i64)).unwrap();

        let (id, initial) = ds
            .subscribe(FacetId(2), pattern("task($)"), SubscriptionKind::Assertions)
            .unwrap();
        assert_eq!(initial.added.len(), 3);
        assert!(initial.removed.is_empty());

        let dispatches = ds.commit();
        assert_eq!(dispatches.len(), 1);
        assert_eq!(dispatches[0].subscription, id);
        assert!(patch_of(&dispatches[0])
            .added
            .contains_key(&record!("task", 9i64)));
    }

    #[test]
    fn test_commit_coalesces_batch() {
        let mut ds = Dataspace::new("test");
        ds.subscribe(FacetId(9), pattern("$"), SubscriptionKind::Assertions)
            .unwrap();
        ds.publish(FacetId(1), Value::int(1)).unwrap();
        ds.unpublish(FacetId(1), &Value::int(1));
        assert!(ds.commit().is_empty());

        ds.publish(FacetId(1), Value::int(2)).unwrap();
        ds.publish(FacetId(1), Value::int(3)).unwrap();
        let dispatches = ds.commit();
        assert_eq!(dispatches.len(), 1);
        assert_eq!(patch_of(&dispatches[0]).added.len(), 2);
    }

    #[test]
    fn test_unpublish_facet_is_one_patch() {
        let mut ds = Dataspace::new("test");
        ds.subscribe(FacetId(9), pattern("task($)"), SubscriptionKind::Assertions)
            .unwrap();
        for n in 0..4i64 {
            ds.publish(FacetId(1), record!("task", n)).unwrap();
        }
        ds.commit();
        assert_eq!(ds.unpublish_facet(FacetId(1)), 4);
        let dispatches = ds.commit();
        assert_eq!(dispatches.len(), 1);
        assert_eq!(patch_of(&dispatches[0]).removed.len(), 4);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let mut ds = Dataspace::new("test");
        let (id, _) = ds
            .subscribe(FacetId(9), pattern("$"), SubscriptionKind::Assertions)
            .unwrap();
        assert!(ds.unsubscribe(id));
        ds.publish(FacetId(1), Value::int(1)).unwrap();
        assert!(ds.commit().is_empty());
    }

    #[test]
    fn test_messages_reach_message_subscriptions_only() {
        let mut ds = Dataspace::new("test");
        ds.subscribe(FacetId(1), pattern("ping($)"), SubscriptionKind::Assertions)
            .unwrap();
        let (id, initial) = ds
            .subscribe(FacetId(2), pattern("ping($)"), SubscriptionKind::Messages)
            .unwrap();
        assert!(initial.is_empty());
        ds.send(record!("ping", 7i64)).unwrap();
        let dispatches = ds.commit();
        assert_eq!(dispatches.len(), 1);
        assert_eq!(dispatches[0].subscription, id);
        assert_eq!(
            dispatches[0].delivery,
            Delivery::Message {
                value: record!("ping", 7i64),
                captures: vec![Value::int(7)],
            }
        );
        assert!(ds.assertions().is_empty());
    }

    #[test]
    fn test_declared_shapes_reject_malformed() {
        let mut ds = Dataspace::new("test");
        ds.declare_shape("account", 1).unwrap();
        assert!(ds.publish(FacetId(1), record!("account", "a", "b")).is_err());
        assert!(ds
            .subscribe(FacetId(1), pattern("account($, $)"), SubscriptionKind::Assertions)
            .is_err());
        assert!(ds.send(record!("account")).is_err());
    }

    #[test]
    fn test_query_reads_committed_state() {
        let mut ds = Dataspace::new("test");
        ds.publish(FacetId(1), record!("task", 1i64)).unwrap();
        assert!(ds.query(&pattern("task(_)")).is_empty());
        ds.commit();
        assert_eq!(ds.query(&pattern("task(_)")), vec![record!("task", 1i64)]);
        assert_eq!(ds.stats().assertions, 1);
    }
}
