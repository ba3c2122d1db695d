//! Replay-time error taxonomy (spec.md §7).

use pericarp_events::EventId;
use thiserror::Error;

/// Errors raised by [`crate::EntityBase::apply_event`] and
/// [`crate::EntityBase::record_event`].
///
/// These indicate corrupt or misrouted inputs, not retryable business
/// conditions — a [`EntityError::DuplicateEvent`] during replay means the
/// caller handed the same envelope twice, not that a retry will help.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EntityError {
    /// The envelope's `aggregate_id` doesn't match this entity's.
    #[error("event aggregate_id does not match this entity")]
    WrongAggregate,

    /// The envelope's `id` was already applied to this entity.
    #[error("event {0} already applied to this entity")]
    DuplicateEvent(EventId),

    /// The envelope's `sequence_no` isn't `current + 1`.
    #[error("expected sequence_no {expected}, got {actual}")]
    InvalidEventSequenceNo { expected: i64, actual: i64 },

    /// The supplied cancellation token was already cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// An internal lock was poisoned by a panicking holder.
    #[error("entity lock poisoned")]
    LockPoisoned,

    /// Authoring a new event failed to serialize its payload.
    #[error("failed to serialize event payload: {0}")]
    Serialization(String),
}
