//! The `EventStore` boundary (spec.md §4.1/§6): an append-only, per-aggregate
//! log with optimistic concurrency control and ID-addressable lookup.
//!
//! `-1` is the sentinel used throughout: "no check" for `expected_version`,
//! "unknown/empty stream" for `current_version`, and "open-ended" for range
//! query bounds (spec.md §9, "Versioning sentinel"). This matches the
//! 0-based-at-the-entity convention `pericarp-core` uses — see DESIGN.md for
//! the reasoning behind resolving spec.md's sequence-numbering open question
//! this way.

use std::sync::Arc;

use async_trait::async_trait;
use pericarp_events::{AggregateId, EventEnvelope, EventId, NO_VERSION_CHECK};
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;

/// Append-only per-aggregate event log with optimistic concurrency control.
///
/// Implementations: [`crate::in_memory::InMemoryEventStore`] (development,
/// tests) and [`crate::file::FileEventStore`] (local persistence). Both
/// satisfy identical semantics (spec.md §4.1).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append `events` to `aggregate_id`'s stream.
    ///
    /// If `expected_version != NO_VERSION_CHECK`, the current stream version
    /// (last `sequence_no`, or `NO_VERSION_CHECK` if the stream is empty)
    /// must equal it exactly or the call fails with
    /// [`StoreError::ConcurrencyConflict`]. Every supplied envelope's
    /// `sequence_no` is overwritten with a contiguous run starting at
    /// `current_version + 1`, and every envelope's `aggregate_id` must equal
    /// `aggregate_id`. An empty `events` is a no-op success. Either every
    /// envelope is persisted or none are.
    async fn append(
        &self,
        ctx: &CancellationToken,
        aggregate_id: &AggregateId,
        expected_version: i64,
        events: Vec<EventEnvelope>,
    ) -> Result<(), StoreError>;

    /// All envelopes for `aggregate_id`, in ascending `sequence_no` order.
    /// An empty vec if the stream doesn't exist.
    async fn get_events(&self, ctx: &CancellationToken, aggregate_id: &AggregateId) -> Result<Vec<EventEnvelope>, StoreError>;

    /// The suffix of `aggregate_id`'s stream with `sequence_no >= from_seq`.
    async fn get_events_from(
        &self,
        ctx: &CancellationToken,
        aggregate_id: &AggregateId,
        from_seq: i64,
    ) -> Result<Vec<EventEnvelope>, StoreError>;

    /// The contiguous slice of `aggregate_id`'s stream with `from <=
    /// sequence_no <= to`. `NO_VERSION_CHECK` for `from` means "from the
    /// start"; `NO_VERSION_CHECK` for `to` means "through the end". `to <
    /// from` yields an empty vec rather than an error.
    async fn get_events_range(
        &self,
        ctx: &CancellationToken,
        aggregate_id: &AggregateId,
        from: i64,
        to: i64,
    ) -> Result<Vec<EventEnvelope>, StoreError>;

    /// The single envelope with this id, across every aggregate stream.
    async fn get_event_by_id(&self, ctx: &CancellationToken, event_id: &EventId) -> Result<EventEnvelope, StoreError>;

    /// The last `sequence_no` appended for `aggregate_id`, or
    /// `NO_VERSION_CHECK` if the stream is unknown/empty.
    async fn current_version(&self, ctx: &CancellationToken, aggregate_id: &AggregateId) -> Result<i64, StoreError>;

    /// Release resources held by this store. Behavior of subsequent calls on
    /// this instance is undefined (spec.md §4.1).
    async fn close(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn append(
        &self,
        ctx: &CancellationToken,
        aggregate_id: &AggregateId,
        expected_version: i64,
        events: Vec<EventEnvelope>,
    ) -> Result<(), StoreError> {
        (**self).append(ctx, aggregate_id, expected_version, events).await
    }

    async fn get_events(&self, ctx: &CancellationToken, aggregate_id: &AggregateId) -> Result<Vec<EventEnvelope>, StoreError> {
        (**self).get_events(ctx, aggregate_id).await
    }

    async fn get_events_from(
        &self,
        ctx: &CancellationToken,
        aggregate_id: &AggregateId,
        from_seq: i64,
    ) -> Result<Vec<EventEnvelope>, StoreError> {
        (**self).get_events_from(ctx, aggregate_id, from_seq).await
    }

    async fn get_events_range(
        &self,
        ctx: &CancellationToken,
        aggregate_id: &AggregateId,
        from: i64,
        to: i64,
    ) -> Result<Vec<EventEnvelope>, StoreError> {
        (**self).get_events_range(ctx, aggregate_id, from, to).await
    }

    async fn get_event_by_id(&self, ctx: &CancellationToken, event_id: &EventId) -> Result<EventEnvelope, StoreError> {
        (**self).get_event_by_id(ctx, event_id).await
    }

    async fn current_version(&self, ctx: &CancellationToken, aggregate_id: &AggregateId) -> Result<i64, StoreError> {
        (**self).current_version(ctx, aggregate_id).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        (**self).close().await
    }
}

/// Shared range-bound normalization: `NO_VERSION_CHECK` sentinels resolved
/// to concrete bounds, `to < from` flagged so callers can short-circuit to
/// an empty result.
pub(crate) fn normalize_range(from: i64, to: i64) -> (i64, i64) {
    let from = if from == NO_VERSION_CHECK { 0 } else { from };
    let to = if to == NO_VERSION_CHECK { i64::MAX } else { to };
    (from, to)
}
