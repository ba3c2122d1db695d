//! Atomic multi-aggregate commit with rollback (spec.md §4.3).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use pericarp_core::Entity;
use pericarp_events::{AggregateId, Dispatcher, EventEnvelope};
use pericarp_store::EventStore;
use tokio_util::sync::CancellationToken;

use crate::error::{CommitError, TrackError};

#[derive(Default)]
struct State {
    tracked: HashMap<AggregateId, Arc<dyn Entity>>,
    expected_versions: HashMap<AggregateId, i64>,
}

/// Groups one or more tracked entities into a single atomic write against
/// the event store, then signals the dispatcher (spec.md §2 overview
/// diagram: `track` then `commit`).
///
/// Ephemeral: construct one per logical transaction. `store` is generic
/// over any [`EventStore`] (including `Arc<dyn EventStore>`, which the
/// blanket `EventStore for Arc<S>` impl makes a drop-in fit); `dispatcher`
/// is shared via `Arc` since it is process-level.
pub struct UnitOfWork<S> {
    store: S,
    dispatcher: Arc<Dispatcher>,
    state: RwLock<State>,
}

impl<S: EventStore> UnitOfWork<S> {
    pub fn new(store: S, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            state: RwLock::new(State::default()),
        }
    }

    /// Validate and register entities for this transaction. All-or-nothing:
    /// if any entity is already tracked or duplicated within `entities`, no
    /// entity from the batch is tracked (spec.md §4.3). Captures each
    /// entity's current `sequence_no` as its expected version.
    #[must_use = "a dropped track() result may hide a validation failure, silently losing the entity from this transaction"]
    pub fn track<I>(&self, entities: I) -> Result<(), TrackError>
    where
        I: IntoIterator<Item = Arc<dyn Entity>>,
    {
        let entities: Vec<_> = entities.into_iter().collect();

        let mut state = self.state.write().map_err(|_| TrackError::LockPoisoned)?;

        let mut seen_in_batch = HashSet::new();
        for entity in &entities {
            let id = entity.get_id().clone();
            if state.tracked.contains_key(&id) {
                return Err(TrackError::AlreadyTracked(id));
            }
            if !seen_in_batch.insert(id.clone()) {
                return Err(TrackError::DuplicateInBatch(id));
            }
        }

        for entity in entities {
            let id = entity.get_id().clone();
            let expected_version = entity.get_sequence_no();
            state.expected_versions.insert(id.clone(), expected_version);
            state.tracked.insert(id, entity);
        }

        Ok(())
    }

    /// Persist every tracked entity's uncommitted events, then fan them out
    /// to the dispatcher. Short-circuits with [`CommitError::Cancelled`] if
    /// `ctx` is already cancelled, even if nothing would otherwise be
    /// appended (spec.md §5: "every operation taking a context
    /// short-circuits when cancelled" applies to `commit` as much as to
    /// `append`/`dispatch`). On any store failure, rolls back tracking (not
    /// entity buffers) and returns the offending aggregate id; aggregates
    /// persisted before the failure stay persisted (spec.md §4.3,
    /// "Ordering" — this is a documented limitation, not a bug). Dispatch
    /// failures after a successful commit are logged but do not fail the
    /// commit (eventual consistency for projections).
    pub async fn commit(&self, ctx: &CancellationToken) -> Result<(), CommitError> {
        if ctx.is_cancelled() {
            return Err(CommitError::Cancelled);
        }

        let snapshot: Vec<(AggregateId, Arc<dyn Entity>, i64)> = {
            let state = self.state.write().map_err(|_| CommitError::LockPoisoned)?;
            state
                .tracked
                .iter()
                .map(|(id, entity)| (id.clone(), Arc::clone(entity), state.expected_versions[id]))
                .collect()
        };

        let mut persisted: Vec<EventEnvelope> = Vec::new();

        for (aggregate_id, entity, expected_version) in &snapshot {
            let events = entity.uncommitted_events();
            if events.is_empty() {
                continue;
            }

            if let Err(source) = self.store.append(ctx, aggregate_id, *expected_version, events.clone()).await {
                tracing::debug!(%aggregate_id, error = %source, "commit failed, rolling back tracking");
                if let Err(rollback_err) = self.rollback() {
                    tracing::warn!(error = %rollback_err, "rollback after failed commit also hit a poisoned lock");
                }
                return Err(CommitError::Store {
                    aggregate_id: aggregate_id.clone(),
                    source,
                });
            }

            persisted.extend(events);
        }

        {
            let mut state = self.state.write().map_err(|_| CommitError::LockPoisoned)?;
            for (_, entity, _) in &snapshot {
                entity.clear_uncommitted_events();
            }
            state.tracked.clear();
            state.expected_versions.clear();
        }

        for envelope in persisted {
            if let Err(err) = self.dispatcher.dispatch(ctx.clone(), envelope).await {
                tracing::warn!(error = %err, "post-commit dispatch reported handler failures");
            }
        }

        Ok(())
    }

    /// Clear tracking (not entity buffers), so the same uncommitted events
    /// can be retried in a new unit-of-work (spec.md §4.3).
    pub fn rollback(&self) -> Result<(), TrackError> {
        let mut state = self.state.write().map_err(|_| TrackError::LockPoisoned)?;
        state.tracked.clear();
        state.expected_versions.clear();
        Ok(())
    }

    /// Number of entities currently tracked, mainly useful in tests.
    pub fn tracked_len(&self) -> usize {
        self.state.read().map(|state| state.tracked.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pericarp_core::{AggregateState, EntityBase};
    use pericarp_store::InMemoryEventStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
    struct Counter {
        value: i64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Incremented {
        by: i64,
    }

    impl AggregateState for Counter {
        fn apply(&mut self, envelope: &EventEnvelope) {
            let payload: Incremented = envelope.typed_payload().expect("valid payload");
            self.value += payload.by;
        }
    }

    fn dispatcher() -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new())
    }

    #[tokio::test]
    async fn tracking_the_same_aggregate_twice_is_rejected_and_tracks_nothing() {
        let store = InMemoryEventStore::new();
        let uow = UnitOfWork::new(store, dispatcher());

        let a = Arc::new(EntityBase::new(AggregateId::new("A1").unwrap(), Counter::default())) as Arc<dyn Entity>;
        let b = Arc::new(EntityBase::new(AggregateId::new("A1").unwrap(), Counter::default())) as Arc<dyn Entity>;

        let err = uow.track(vec![a, b]).unwrap_err();
        assert!(matches!(err, TrackError::DuplicateInBatch(_)));
        assert_eq!(uow.tracked_len(), 0);
    }

    #[tokio::test]
    async fn commit_persists_events_and_clears_uncommitted_buffers() {
        let store = InMemoryEventStore::new();
        let uow = UnitOfWork::new(store, dispatcher());

        let entity = EntityBase::new(AggregateId::new("A1").unwrap(), Counter::default());
        entity.record_event(&Incremented { by: 4 }, "counter.incremented").unwrap();
        let entity: Arc<dyn Entity> = Arc::new(entity);

        uow.track(vec![Arc::clone(&entity)]).unwrap();
        uow.commit(&CancellationToken::new()).await.unwrap();

        assert!(entity.uncommitted_events().is_empty());
        assert_eq!(uow.tracked_len(), 0);
    }

    #[tokio::test]
    async fn rollback_clears_tracking_but_leaves_uncommitted_events_intact() {
        let store = InMemoryEventStore::new();
        let uow = UnitOfWork::new(store, dispatcher());

        let entity = EntityBase::new(AggregateId::new("A1").unwrap(), Counter::default());
        entity.record_event(&Incremented { by: 1 }, "counter.incremented").unwrap();
        let entity: Arc<dyn Entity> = Arc::new(entity);

        uow.track(vec![Arc::clone(&entity)]).unwrap();
        let before = entity.uncommitted_events();
        uow.rollback().unwrap();

        assert_eq!(uow.tracked_len(), 0);
        assert_eq!(entity.uncommitted_events(), before);
    }

    #[tokio::test]
    async fn concurrency_conflict_rolls_back_tracking_but_keeps_uncommitted_events() {
        let store = Arc::new(InMemoryEventStore::new());
        let aggregate_id = AggregateId::new("A1").unwrap();

        // First writer commits an event, advancing the stream to version 0.
        let uow1 = UnitOfWork::new(Arc::clone(&store), dispatcher());
        let e1 = EntityBase::new(aggregate_id.clone(), Counter::default());
        e1.record_event(&Incremented { by: 1 }, "counter.incremented").unwrap();
        let e1: Arc<dyn Entity> = Arc::new(e1);
        uow1.track(vec![Arc::clone(&e1)]).unwrap();
        uow1.commit(&CancellationToken::new()).await.unwrap();

        // A second writer loaded the aggregate before the first commit, so
        // its expected_version (-1) is now stale.
        let uow2 = UnitOfWork::new(Arc::clone(&store), dispatcher());
        let e2 = EntityBase::new(aggregate_id.clone(), Counter::default());
        e2.record_event(&Incremented { by: 1 }, "counter.incremented").unwrap();
        let e2: Arc<dyn Entity> = Arc::new(e2);
        uow2.track(vec![Arc::clone(&e2)]).unwrap();

        let err = uow2.commit(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.aggregate_id(), Some(&aggregate_id));
        assert_eq!(uow2.tracked_len(), 0);
        assert_eq!(e2.uncommitted_events().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits_commit_even_with_nothing_to_append() {
        let store = InMemoryEventStore::new();
        let uow = UnitOfWork::new(store, dispatcher());

        // Tracked but never recorded on, so the append loop body would never
        // run even without the cancellation check.
        let entity = Arc::new(EntityBase::new(AggregateId::new("A1").unwrap(), Counter::default())) as Arc<dyn Entity>;
        uow.track(vec![entity]).unwrap();

        let ctx = CancellationToken::new();
        ctx.cancel();

        let err = uow.commit(&ctx).await.unwrap_err();
        assert!(matches!(err, CommitError::Cancelled));
        assert_eq!(uow.tracked_len(), 1, "a cancelled commit must not mutate tracking");
    }
}
