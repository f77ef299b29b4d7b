//! Error types for the agora runtime

use crate::assertion::InteropError;
use crate::pattern::PatternError;
use crate::types::{ActorId, EndpointId, FacetId, FieldId, SubscriptionId, TurnId};
use thiserror::Error;

/// Top-level runtime error
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Actor-related errors surfacing at a network boundary
    #[error("Actor error: {0}")]
    Actor(#[from] ActorError),

    /// Malformed pattern or assertion
    #[error("Pattern error: {0}")]
    Pattern(#[from] PatternError),

    /// Preserves value with no `Value` counterpart
    #[error("Preserves conversion error: {0}")]
    Interop(#[from] InteropError),

    /// The fixpoint bound was exceeded
    #[error("{turn} did not reach quiescence within {rounds} rounds")]
    Livelock { turn: TurnId, rounds: usize },

    /// Stimulus addressed to an actor that is not alive
    #[error("Actor {0} not found")]
    UnknownActor(ActorId),

    /// The ground thread is no longer accepting stimuli
    #[error("Ground network {0} has shut down")]
    GroundClosed(String),

    /// The ground thread could not be started
    #[error("Failed to start ground network: {0}")]
    Init(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors raised while an actor handles an event
#[derive(Debug, Error)]
pub enum ActorError {
    /// Operation on a facet that is stopping, stopped or unknown
    #[error("Facet {0} is not live")]
    FacetNotLive(FacetId),

    /// Facet belongs to another actor
    #[error("Facet {facet} does not belong to {actor}")]
    ForeignFacet { facet: FacetId, actor: ActorId },

    /// Field of a stopped facet
    #[error("Field {0} is not live")]
    FieldNotLive(FieldId),

    /// Field accessed from outside its actor
    #[error("Field {field} belongs to {owner}, not {actor}")]
    ForeignField {
        field: FieldId,
        owner: ActorId,
        actor: ActorId,
    },

    /// Field accessed at the wrong type
    #[error("Field {0} holds a different type")]
    FieldType(FieldId),

    /// Unknown assert endpoint
    #[error("Endpoint {0} not found")]
    EndpointNotFound(EndpointId),

    /// Unknown subscription, or one owned by another actor
    #[error("Subscription {0} not found")]
    SubscriptionNotFound(SubscriptionId),

    /// Malformed pattern or assertion issued by a handler
    #[error("Pattern error: {0}")]
    Pattern(#[from] PatternError),

    /// A flush did not reach quiescence
    #[error("Flush did not reach quiescence within {rounds} rounds")]
    Livelock { rounds: usize },

    /// Application-level handler failure
    #[error("Handler failed: {0}")]
    Failed(String),
}

impl ActorError {
    /// Application-level failure with a message
    pub fn failed(message: impl Into<String>) -> Self {
        ActorError::Failed(message.into())
    }

    /// Invariant violations terminate the whole actor; other faults only
    /// stop the faulting facet's subtree.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ActorError::FacetNotLive(_)
                | ActorError::ForeignFacet { .. }
                | ActorError::FieldNotLive(_)
                | ActorError::ForeignField { .. }
                | ActorError::FieldType(_)
                | ActorError::EndpointNotFound(_)
                | ActorError::SubscriptionNotFound(_)
        )
    }
}

/// Result type using RuntimeError
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Result type using ActorError
pub type ActorResult<T> = std::result::Result<T, ActorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(ActorError::FacetNotLive(FacetId(1)).is_fatal());
        assert!(ActorError::FieldType(FieldId(1)).is_fatal());
        assert!(!ActorError::failed("boom").is_fatal());
        assert!(!ActorError::from(PatternError::EmptyLabel).is_fatal());
    }

    #[test]
    fn test_messages() {
        let err = RuntimeError::Livelock {
            turn: TurnId(3),
            rounds: 10,
        };
        assert_eq!(
            err.to_string(),
            "turn:3 did not reach quiescence within 10 rounds"
        );
        let err: RuntimeError = ActorError::failed("boom").into();
        assert_eq!(err.to_string(), "Actor error: Handler failed: boom");
    }
}
