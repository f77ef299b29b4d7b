//! Facet - unit of structured teardown within an actor
//!
//! Facets form a tree per actor:
//! - When a facet stops, all its children stop first
//! - Assertions, subscriptions, fields and dataflow blocks are owned by a facet
//! - Everything a facet owns is withdrawn the instant it stops

use super::{Compute, FlowBody, Hook};
use crate::assertion::Value;
use crate::types::{ActorId, DataflowId, EndpointId, FacetId, FieldId, SubscriptionId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Lifecycle of a facet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FacetState {
    /// Booting: endpoints evaluated, subscriptions registered, hooks recorded
    Pending,
    /// Linked to its parent and reacting to events
    Active,
    /// Teardown in progress (on-stop hooks running)
    Stopping,
    /// Torn down
    Stopped,
}

impl FacetState {
    /// Whether the facet may still acquire endpoints, subscriptions and children
    pub fn is_live(self) -> bool {
        matches!(self, FacetState::Pending | FacetState::Active)
    }
}

impl fmt::Display for FacetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FacetState::Pending => "pending",
            FacetState::Active => "active",
            FacetState::Stopping => "stopping",
            FacetState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Arena node for one facet
pub(crate) struct Facet {
    pub(crate) actor: ActorId,
    pub(crate) parent: Option<FacetId>,
    pub(crate) children: BTreeSet<FacetId>,
    pub(crate) state: FacetState,
    pub(crate) endpoints: BTreeSet<EndpointId>,
    pub(crate) subscriptions: BTreeSet<SubscriptionId>,
    pub(crate) fields: BTreeSet<FieldId>,
    pub(crate) dataflows: BTreeSet<DataflowId>,
    /// Contribution counts of this facet's published set
    published: BTreeMap<Value, usize>,
    pub(crate) on_start: Vec<Hook>,
    pub(crate) on_stop: Vec<Hook>,
}

impl Facet {
    pub(crate) fn new(actor: ActorId, parent: Option<FacetId>) -> Self {
        Self {
            actor,
            parent,
            children: BTreeSet::new(),
            state: FacetState::Pending,
            endpoints: BTreeSet::new(),
            subscriptions: BTreeSet::new(),
            fields: BTreeSet::new(),
            dataflows: BTreeSet::new(),
            published: BTreeMap::new(),
            on_start: Vec::new(),
            on_stop: Vec::new(),
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.state.is_live()
    }

    /// Add one contribution of `value`; true when it is the first
    pub(crate) fn contribute(&mut self, value: Value) -> bool {
        let count = self.published.entry(value).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Remove one contribution of `value`; true when it was the last
    pub(crate) fn withdraw(&mut self, value: &Value) -> bool {
        match self.published.get_mut(value) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.published.remove(value);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn published(&self) -> impl Iterator<Item = &Value> {
        self.published.keys()
    }
}

/// An assert endpoint: a value (re)computed from fields and kept published
pub(crate) struct Endpoint {
    pub(crate) facet: FacetId,
    /// Taken out while the endpoint is being evaluated
    pub(crate) compute: Option<Compute>,
    pub(crate) current: Option<Value>,
}

/// A dataflow block, re-run whenever a field it read changes
pub(crate) struct Dataflow {
    pub(crate) facet: FacetId,
    pub(crate) body: Option<FlowBody>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_facet_is_pending() {
        let facet = Facet::new(ActorId(1), None);
        assert_eq!(facet.state, FacetState::Pending);
        assert!(facet.is_live());
        assert!(!FacetState::Stopping.is_live());
    }

    #[test]
    fn test_contributions_are_counted() {
        let mut facet = Facet::new(ActorId(1), Some(FacetId(2)));
        let v = Value::symbol("ready");
        assert!(facet.contribute(v.clone()));
        assert!(!facet.contribute(v.clone()));
        assert!(!facet.withdraw(&v));
        assert!(facet.withdraw(&v));
        assert!(!facet.withdraw(&v));
        assert_eq!(facet.published().count(), 0);
    }
}
