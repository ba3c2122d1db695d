//! In-process event store: development and tests (spec.md §4.1).

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use pericarp_events::{AggregateId, EventEnvelope, EventId, NO_VERSION_CHECK};
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::store_trait::{normalize_range, EventStore};

#[derive(Default)]
struct Inner {
    streams: HashMap<AggregateId, Vec<EventEnvelope>>,
    index: HashMap<EventId, EventEnvelope>,
}

/// Process-level map from `aggregate_id` to its ordered envelope list, plus
/// the `event_id -> envelope` secondary index (spec.md §3). No disk I/O, so
/// the lock never needs to be held across an `.await`; a plain
/// `std::sync::RwLock` is enough.
#[derive(Default)]
pub struct InMemoryEventStore {
    inner: RwLock<Inner>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version_locked(inner: &Inner, aggregate_id: &AggregateId) -> i64 {
        inner
            .streams
            .get(aggregate_id)
            .and_then(|stream| stream.last())
            .map(|e| e.sequence_no)
            .unwrap_or(NO_VERSION_CHECK)
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        ctx: &CancellationToken,
        aggregate_id: &AggregateId,
        expected_version: i64,
        events: Vec<EventEnvelope>,
    ) -> Result<(), StoreError> {
        if ctx.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        if events.is_empty() {
            return Ok(());
        }
        for event in &events {
            if event.aggregate_id != *aggregate_id {
                return Err(StoreError::InvalidEvent(format!(
                    "event aggregate_id {} does not match target stream {aggregate_id}",
                    event.aggregate_id
                )));
            }
        }

        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        let current = Self::current_version_locked(&inner, aggregate_id);

        if expected_version != NO_VERSION_CHECK && expected_version != current {
            return Err(StoreError::ConcurrencyConflict {
                aggregate_id: aggregate_id.clone(),
                expected: expected_version,
                actual: current,
            });
        }

        let mut next = current + 1;
        let mut assigned = Vec::with_capacity(events.len());
        for mut event in events {
            event.sequence_no = next;
            next += 1;
            assigned.push(event);
        }

        let stream = inner.streams.entry(aggregate_id.clone()).or_default();
        stream.extend(assigned.iter().cloned());
        for event in &assigned {
            inner.index.insert(event.id, event.clone());
        }

        tracing::debug!(%aggregate_id, appended = assigned.len(), new_version = next - 1, "appended events");

        Ok(())
    }

    async fn get_events(&self, ctx: &CancellationToken, aggregate_id: &AggregateId) -> Result<Vec<EventEnvelope>, StoreError> {
        if ctx.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.streams.get(aggregate_id).cloned().unwrap_or_default())
    }

    async fn get_events_from(
        &self,
        ctx: &CancellationToken,
        aggregate_id: &AggregateId,
        from_seq: i64,
    ) -> Result<Vec<EventEnvelope>, StoreError> {
        if ctx.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner
            .streams
            .get(aggregate_id)
            .map(|stream| stream.iter().filter(|e| e.sequence_no >= from_seq).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_events_range(
        &self,
        ctx: &CancellationToken,
        aggregate_id: &AggregateId,
        from: i64,
        to: i64,
    ) -> Result<Vec<EventEnvelope>, StoreError> {
        if ctx.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let (from, to) = normalize_range(from, to);
        if to < from {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner
            .streams
            .get(aggregate_id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|e| e.sequence_no >= from && e.sequence_no <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_event_by_id(&self, ctx: &CancellationToken, event_id: &EventId) -> Result<EventEnvelope, StoreError> {
        if ctx.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        inner.index.get(event_id).cloned().ok_or(StoreError::EventNotFound(*event_id))
    }

    async fn current_version(&self, ctx: &CancellationToken, aggregate_id: &AggregateId) -> Result<i64, StoreError> {
        if ctx.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(Self::current_version_locked(&inner, aggregate_id))
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Debug, Serialize)]
    struct Created {
        name: String,
    }

    fn aggregate_id() -> AggregateId {
        AggregateId::new("A1").unwrap()
    }

    fn envelope(event_type: &str) -> EventEnvelope {
        EventEnvelope::new(aggregate_id(), event_type, &Created { name: "ada".into() }).unwrap()
    }

    #[tokio::test]
    async fn fresh_append_assigns_contiguous_sequence_numbers() {
        let store = InMemoryEventStore::new();
        let ctx = CancellationToken::new();
        let e1 = envelope("user.created");
        let e2 = envelope("user.updated");

        store
            .append(&ctx, &aggregate_id(), NO_VERSION_CHECK, vec![e1, e2])
            .await
            .unwrap();

        assert_eq!(store.current_version(&ctx, &aggregate_id()).await.unwrap(), 1);
        let events = store.get_events(&ctx, &aggregate_id()).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence_no, 0);
        assert_eq!(events[1].sequence_no, 1);
    }

    #[tokio::test]
    async fn concurrency_conflict_leaves_stream_unchanged() {
        let store = InMemoryEventStore::new();
        let ctx = CancellationToken::new();
        store
            .append(&ctx, &aggregate_id(), NO_VERSION_CHECK, vec![envelope("user.created")])
            .await
            .unwrap();

        let err = store
            .append(&ctx, &aggregate_id(), 5, vec![envelope("user.updated")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConcurrencyConflict { expected: 5, actual: 0, .. }));

        assert_eq!(store.get_events(&ctx, &aggregate_id()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_append_is_a_no_op() {
        let store = InMemoryEventStore::new();
        let ctx = CancellationToken::new();
        store.append(&ctx, &aggregate_id(), NO_VERSION_CHECK, vec![]).await.unwrap();
        assert_eq!(store.current_version(&ctx, &aggregate_id()).await.unwrap(), NO_VERSION_CHECK);
    }

    #[tokio::test]
    async fn get_event_by_id_finds_across_streams() {
        let store = InMemoryEventStore::new();
        let ctx = CancellationToken::new();
        let e1 = envelope("user.created");
        let id = e1.id;
        store.append(&ctx, &aggregate_id(), NO_VERSION_CHECK, vec![e1]).await.unwrap();

        let found = store.get_event_by_id(&ctx, &id).await.unwrap();
        assert_eq!(found.id, id);

        let missing = EventId::new();
        assert!(matches!(
            store.get_event_by_id(&ctx, &missing).await.unwrap_err(),
            StoreError::EventNotFound(_)
        ));
    }

    #[tokio::test]
    async fn get_events_range_handles_sentinels_and_inverted_bounds() {
        let store = InMemoryEventStore::new();
        let ctx = CancellationToken::new();
        let events: Vec<_> = (0..5).map(|_| envelope("user.updated")).collect();
        store.append(&ctx, &aggregate_id(), NO_VERSION_CHECK, events).await.unwrap();

        let all = store.get_events_range(&ctx, &aggregate_id(), NO_VERSION_CHECK, NO_VERSION_CHECK).await.unwrap();
        assert_eq!(all.len(), 5);

        let mid = store.get_events_range(&ctx, &aggregate_id(), 1, 3).await.unwrap();
        assert_eq!(mid.iter().map(|e| e.sequence_no).collect::<Vec<_>>(), vec![1, 2, 3]);

        let inverted = store.get_events_range(&ctx, &aggregate_id(), 3, 1).await.unwrap();
        assert!(inverted.is_empty());
    }

    #[tokio::test]
    async fn append_rejects_events_for_a_different_aggregate() {
        let store = InMemoryEventStore::new();
        let ctx = CancellationToken::new();
        let mismatched = EventEnvelope::new(AggregateId::new("other").unwrap(), "user.created", &Created {
            name: "ada".into(),
        })
        .unwrap();

        let err = store
            .append(&ctx, &aggregate_id(), NO_VERSION_CHECK, vec![mismatched])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidEvent(_)));
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let store = InMemoryEventStore::new();
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = store.get_events(&ctx, &aggregate_id()).await.unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
    }
}
