//! Agora - assertion-indexed dataspace and facet-based actor runtime
//!
//! Actors coordinate by publishing assertions into a shared dataspace and
//! subscribing to patterns over it. Every change is delivered to each
//! interested subscriber as a minimal patch of matches that appeared and
//! matches that went away.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Network (one per ground)                 │
//! │                                                              │
//! │   stimulus ──► Turn ──► fields dirty? ──► re-run readers     │
//! │                 ▲                               │            │
//! │                 │                               ▼            │
//! │           deliveries ◄── Dataspace::commit ◄── publish /     │
//! │           (FIFO queue)   (patch per subscriber) unpublish    │
//! │                                                              │
//! │   Actors ─► Facet tree ─► endpoints, subscriptions, fields   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Core Concepts
//!
//! ## Dataspace
//!
//! Assertions are [`Value`]s. The visible population is the union of what
//! every facet publishes; the dataspace indexes it by shape and turns each
//! committed batch of changes into one [`patch::Patch`] per subscriber.
//!
//! ## Facets
//!
//! An actor is a tree of facets. A facet owns assert endpoints,
//! subscriptions, reactive fields and child facets; stopping it withdraws
//! everything in its subtree in one step.
//!
//! ## Turns
//!
//! Each stimulus runs as a turn: dirty fields are propagated, changes are
//! committed and deliveries are handed out until nothing is pending.
//!
//! ## Derived views
//!
//! [`query`] keeps field-backed containers in step with a pattern, and
//! [`demand`] spawns one handler actor per unmet demand.
//!
//! # Example
//!
//! ```rust
//! use agora::runtime::Network;
//! use agora::{record, Pattern, Value};
//!
//! let mut network = Network::default();
//!
//! // A session exists while its account is asserted
//! network
//!     .spawn("sessions", |t| {
//!         t.during("account($)".parse().unwrap(), |t, captures| {
//!             t.assert(Value::record("session", captures.clone()))?;
//!             Ok(())
//!         })?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let account = network
//!     .spawn("account", |t| {
//!         t.assert(record!("account", "a@x"))?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let sessions: Pattern = "session(_)".parse().unwrap();
//! assert_eq!(network.query(&sessions), vec![record!("session", "a@x")]);
//!
//! network.terminate(account).unwrap();
//! assert!(network.query(&sessions).is_empty());
//! ```

pub mod actor;
pub mod assertion;
pub mod dataspace;
pub mod demand;
pub mod patch;
pub mod pattern;
pub mod query;
pub mod runtime;
pub mod types;

pub use actor::{Actor, Entity, Event, FacetState, Field};
pub use assertion::{Shape, ShapeRegistry, Value};
pub use dataspace::{Dataspace, Delivery, SubscriptionKind};
pub use patch::{Delta, Patch};
pub use pattern::{Captures, Pattern, PatternError};
pub use query::{HashQuery, QueryHash, QueryHashSet, QuerySet, SetQuery};
pub use runtime::{
    ActorError, ActorResult, Ground, Network, NetworkConfig, RuntimeError, RuntimeStats, Turn,
    TurnSummary,
};
pub use types::{ActorId, DataflowId, EndpointId, FacetId, FieldId, SubscriptionId, TurnId};
