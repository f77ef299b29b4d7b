//! Actor model primitives
//!
//! This module provides the core actor abstractions:
//! - `Actor`: a root facet plus a name
//! - `Facet`/`FacetState`: nested reactive scopes, the unit of teardown
//! - `Field`: reactive state owned by a facet
//! - `Event`: what a handler reacts to
//! - `Entity`: trait for object-style handlers

mod entity;
mod facet;
mod field;

pub use entity::Entity;
pub use facet::FacetState;
pub use field::Field;

pub(crate) use facet::{Dataflow, Endpoint, Facet};
pub(crate) use field::{FieldStore, Reader};

use crate::assertion::Value;
use crate::dataspace::{Delivery, SubscriptionKind};
use crate::pattern::{Captures, Pattern};
use crate::runtime::{ActorResult, Turn};
use crate::types::{ActorId, FacetId};
use std::fmt;

/// Hook run once in a facet's context (on-start, on-stop, continuations)
pub type Hook = Box<dyn FnOnce(&mut Turn<'_>) -> ActorResult<()>>;

/// Computes the current value of an assert endpoint
pub(crate) type Compute = Box<dyn FnMut(&mut Turn<'_>) -> ActorResult<Option<Value>>>;

/// Body of a dataflow block
pub(crate) type FlowBody = Box<dyn FnMut(&mut Turn<'_>) -> ActorResult<()>>;

/// Subscription handler receiving raw deliveries
pub(crate) type Reaction = Box<dyn FnMut(&mut Turn<'_>, &Delivery) -> ActorResult<()>>;

/// An actor: a distinguished root facet plus a name used for logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    pub root: FacetId,
}

/// What a handler reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A matching assertion appeared
    Asserted(Pattern),
    /// A matching assertion was withdrawn
    Retracted(Pattern),
    /// A matching message was sent
    Message(Pattern),
}

impl Event {
    pub fn asserted(pattern: Pattern) -> Self {
        Event::Asserted(pattern)
    }

    pub fn retracted(pattern: Pattern) -> Self {
        Event::Retracted(pattern)
    }

    pub fn message(pattern: Pattern) -> Self {
        Event::Message(pattern)
    }

    pub fn pattern(&self) -> &Pattern {
        match self {
            Event::Asserted(p) | Event::Retracted(p) | Event::Message(p) => p,
        }
    }

    pub(crate) fn kind(&self) -> SubscriptionKind {
        match self {
            Event::Asserted(_) | Event::Retracted(_) => SubscriptionKind::Assertions,
            Event::Message(_) => SubscriptionKind::Messages,
        }
    }

    /// The (value, captures) pairs of a delivery this event fires on
    pub(crate) fn firings(&self, delivery: &Delivery) -> Vec<(Value, Captures)> {
        match (self, delivery) {
            (Event::Asserted(_), Delivery::Patch(patch)) => patch
                .added
                .iter()
                .map(|(v, c)| (v.clone(), c.clone()))
                .collect(),
            (Event::Retracted(_), Delivery::Patch(patch)) => patch
                .removed
                .iter()
                .map(|(v, c)| (v.clone(), c.clone()))
                .collect(),
            (Event::Message(_), Delivery::Message { value, captures }) => {
                vec![(value.clone(), captures.clone())]
            }
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Asserted(p) => write!(f, "asserted {p}"),
            Event::Retracted(p) => write!(f, "retracted {p}"),
            Event::Message(p) => write!(f, "message {p}"),
        }
    }
}
