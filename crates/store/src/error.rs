//! Store-level error taxonomy (spec.md §7).

use pericarp_events::{AggregateId, EventId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A nil envelope, empty event id, or an envelope whose `aggregate_id`
    /// doesn't match the stream being appended to.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// `append`'s `expected_version` didn't match the stream's current
    /// version. Always retryable: rebuild the aggregate and retry.
    #[error("concurrency conflict on {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: i64,
        actual: i64,
    },

    /// `get_event_by_id` found no envelope with that id.
    #[error("event {0} not found")]
    EventNotFound(EventId),

    /// The supplied cancellation token was already cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// An internal lock was poisoned by a panicking holder.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// A wrapped I/O or (de)serialization failure from the file-backed
    /// store. The error kind is preserved in the message rather than lost
    /// behind a generic "io error".
    #[error("store I/O error: {0}")]
    Io(String),
}

impl StoreError {
    pub fn io(err: impl core::fmt::Display) -> Self {
        Self::Io(err.to_string())
    }
}
