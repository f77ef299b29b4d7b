//! Core identity types for the agora runtime
//!
//! Every runtime object lives in an arena owned by its ground network and is
//! addressed by a small integer id. Ids are never reused within a network, so
//! a lookup on a torn-down id simply reports "absent".

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            /// Raw arena index
            pub fn index(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Actor identifier
    ///
    /// An actor is a distinguished root facet plus a name used for logging.
    ActorId,
    "actor"
);

arena_id!(
    /// Facet identifier
    ///
    /// Facets are units of structured teardown. When a facet stops, all
    /// assertions and subscriptions made through it are withdrawn.
    FacetId,
    "facet"
);

arena_id!(
    /// Subscription identifier, shared by the dataspace and the facet tree
    SubscriptionId,
    "sub"
);

arena_id!(
    /// Assert endpoint identifier
    EndpointId,
    "ep"
);

arena_id!(
    /// Reactive field identifier
    FieldId,
    "field"
);

arena_id!(
    /// Dataflow block identifier
    DataflowId,
    "flow"
);

/// Turn identifier for causality tracking
///
/// Each turn of a network is assigned a monotonically increasing id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TurnId(pub u64);

impl TurnId {
    /// The genesis turn (before any computation)
    pub fn genesis() -> Self {
        Self(0)
    }

    /// The turn following this one
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::genesis()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "turn:{}", self.0)
    }
}

/// Per-network id source
///
/// A single counter backs every id kind the network allocates, so ids are
/// unique across kinds, which keeps trace output unambiguous. Subscription
/// ids are allocated by the dataspace itself.
#[derive(Debug, Default)]
pub(crate) struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    fn bump(&mut self) -> u64 {
        self.next += 1;
        self.next
    }

    pub(crate) fn actor(&mut self) -> ActorId {
        ActorId(self.bump())
    }

    pub(crate) fn facet(&mut self) -> FacetId {
        FacetId(self.bump())
    }

    pub(crate) fn endpoint(&mut self) -> EndpointId {
        EndpointId(self.bump())
    }

    pub(crate) fn field(&mut self) -> FieldId {
        FieldId(self.bump())
    }

    pub(crate) fn dataflow(&mut self) -> DataflowId {
        DataflowId(self.bump())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_across_kinds() {
        let mut ids = IdAllocator::default();
        let a = ids.actor();
        let f = ids.facet();
        let e = ids.endpoint();
        assert_ne!(a.index(), f.index());
        assert_ne!(f.index(), e.index());
    }

    #[test]
    fn test_turn_ordering() {
        let t1 = TurnId::genesis();
        let t2 = t1.next();
        assert!(t1 < t2);
        assert_eq!(t2.to_string(), "turn:1");
    }

    #[test]
    fn test_display_prefixes() {
        assert_eq!(FacetId(7).to_string(), "facet:7");
        assert_eq!(SubscriptionId(3).to_string(), "sub:3");
    }
}
