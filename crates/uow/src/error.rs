//! Unit-of-work error taxonomy (spec.md §7).

use pericarp_events::AggregateId;
use pericarp_store::StoreError;
use thiserror::Error;

/// `track` rejects a batch as a whole when any entity in it fails
/// validation (spec.md §4.3: "If any check fails, no entity from the batch
/// is tracked").
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackError {
    #[error("aggregate {0} is already tracked by this unit-of-work")]
    AlreadyTracked(AggregateId),

    #[error("aggregate {0} appears more than once in the same track() batch")]
    DuplicateInBatch(AggregateId),

    /// An internal lock was poisoned by a panicking holder.
    #[error("unit-of-work lock poisoned")]
    LockPoisoned,
}

/// Errors raised by [`crate::UnitOfWork::commit`].
#[derive(Debug, Error)]
pub enum CommitError {
    /// The supplied cancellation token was already cancelled; `commit`
    /// checks this before touching any tracked entity (spec.md §5: "every
    /// operation taking a context short-circuits when cancelled").
    #[error("commit cancelled")]
    Cancelled,

    /// An internal lock was poisoned by a panicking holder.
    #[error("unit-of-work lock poisoned")]
    LockPoisoned,

    /// `append` failed while persisting `aggregate_id`'s events. The
    /// unit-of-work has already rolled back its tracking (spec.md §4.3:
    /// "on any failure, invoke rollback... and return the underlying error
    /// wrapped with the offending aggregate_id").
    #[error("commit failed for aggregate {aggregate_id}: {source}")]
    Store {
        aggregate_id: AggregateId,
        #[source]
        source: StoreError,
    },
}

impl CommitError {
    /// The aggregate whose `append` failed, if this is a
    /// [`CommitError::Store`]. `None` for `Cancelled`/`LockPoisoned`, which
    /// aren't tied to any one aggregate.
    pub fn aggregate_id(&self) -> Option<&AggregateId> {
        match self {
            CommitError::Store { aggregate_id, .. } => Some(aggregate_id),
            CommitError::Cancelled | CommitError::LockPoisoned => None,
        }
    }
}
