//! Embeddable event-sourced entity state: identity, sequence accounting,
//! idempotent replay, and the uncommitted-event buffer (spec.md §4.2).

use std::collections::HashSet;
use std::sync::RwLock;

use pericarp_events::{AggregateId, Event, EventEnvelope, EventId};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::EntityError;

/// External interface every event-sourced domain object exposes, regardless
/// of what domain state it wraps (spec.md §6). `Send + Sync` so a
/// unit-of-work can hold a `Arc<dyn Entity>` across an `.await` during
/// commit.
pub trait Entity: Send + Sync {
    fn get_id(&self) -> &AggregateId;
    fn get_sequence_no(&self) -> i64;
    fn uncommitted_events(&self) -> Vec<EventEnvelope>;
    fn clear_uncommitted_events(&self);
}

/// The subtype-supplied hook spec.md §4.2 refers to: the domain-specific
/// state transition invoked from inside `apply_event`, guaranteed to see
/// events in strict order exactly once.
pub trait AggregateState: Send + Sync {
    fn apply(&mut self, envelope: &EventEnvelope);
}

struct Inner<S> {
    sequence_no: i64,
    applied_event_ids: HashSet<EventId>,
    uncommitted_events: Vec<EventEnvelope>,
    state: S,
}

/// Embeddable base for event-sourced aggregates.
///
/// A domain aggregate holds one of these (composition, not inheritance —
/// there is no `Self: EntityBase` supertrait) and forwards `Entity`'s
/// methods to it. All bookkeeping lives behind one `RwLock` so reads
/// (`uncommitted_events`, `get_sequence_no`) can run concurrently with each
/// other while `apply_event`/`record_event`/`clear_uncommitted_events` take
/// the writer side (spec.md §5, "Entity state: reader/writer lock").
pub struct EntityBase<S> {
    aggregate_id: AggregateId,
    inner: RwLock<Inner<S>>,
}

impl<S: AggregateState> EntityBase<S> {
    /// Construct a fresh entity: `sequence_no = -1`, empty buffers.
    pub fn new(aggregate_id: AggregateId, state: S) -> Self {
        Self {
            aggregate_id,
            inner: RwLock::new(Inner {
                sequence_no: -1,
                applied_event_ids: HashSet::new(),
                uncommitted_events: Vec::new(),
                state,
            }),
        }
    }

    /// Replay path: hydrate from a stored envelope. Fails on aggregate
    /// mismatch, duplicate application, or a non-contiguous sequence number;
    /// on success, the hook observes the event exactly once before the
    /// bookkeeping (`sequence_no`, `applied_event_ids`) advances.
    pub fn apply_event(&self, ctx: &CancellationToken, envelope: EventEnvelope) -> Result<(), EntityError> {
        if ctx.is_cancelled() {
            return Err(EntityError::Cancelled);
        }

        let mut inner = self.inner.write().map_err(|_| EntityError::LockPoisoned)?;

        if envelope.aggregate_id != self.aggregate_id {
            return Err(EntityError::WrongAggregate);
        }
        if inner.applied_event_ids.contains(&envelope.id) {
            return Err(EntityError::DuplicateEvent(envelope.id));
        }
        let expected = inner.sequence_no + 1;
        if envelope.sequence_no != expected {
            return Err(EntityError::InvalidEventSequenceNo {
                expected,
                actual: envelope.sequence_no,
            });
        }

        inner.state.apply(&envelope);
        inner.applied_event_ids.insert(envelope.id);
        inner.sequence_no = envelope.sequence_no;

        tracing::trace!(
            aggregate_id = %self.aggregate_id,
            event_type = %envelope.event_type,
            sequence_no = envelope.sequence_no,
            "applied event"
        );

        Ok(())
    }

    /// Authoring path: append a new event to the uncommitted buffer with an
    /// explicit event-type tag. `payload` is erased to JSON immediately, as
    /// the store and dispatcher traffic in erased envelopes.
    pub fn record_event<P: Serialize>(
        &self,
        payload: &P,
        event_type: impl Into<String>,
    ) -> Result<EventEnvelope, EntityError> {
        let mut inner = self.inner.write().map_err(|_| EntityError::LockPoisoned)?;

        let next_seq = inner.sequence_no + 1;
        let mut envelope = EventEnvelope::new(self.aggregate_id.clone(), event_type, payload)
            .map_err(|e| EntityError::Serialization(e.to_string()))?;
        envelope.sequence_no = next_seq;

        if inner.applied_event_ids.contains(&envelope.id) {
            return Err(EntityError::DuplicateEvent(envelope.id));
        }

        inner.state.apply(&envelope);
        inner.applied_event_ids.insert(envelope.id.clone());
        inner.sequence_no = envelope.sequence_no;
        inner.uncommitted_events.push(envelope.clone());

        Ok(envelope)
    }

    /// Convenience for payloads implementing [`pericarp_events::Event`]:
    /// pulls `event_type` off the payload instead of repeating it.
    pub fn record_typed_event<P: Event>(&self, payload: &P) -> Result<EventEnvelope, EntityError> {
        self.record_event(payload, payload.event_type())
    }

    /// Read the domain state under the reader lock. Panics only if the lock
    /// is poisoned by an earlier panicking writer.
    pub fn state(&self) -> StateRef<'_, S> {
        StateRef {
            guard: self.inner.read().expect("entity lock poisoned"),
        }
    }
}

/// A read guard over an [`EntityBase`]'s domain state, derefing straight to
/// `S` so callers don't need to know about the internal `Inner<S>` wrapper.
pub struct StateRef<'a, S> {
    guard: std::sync::RwLockReadGuard<'a, Inner<S>>,
}

impl<S> std::ops::Deref for StateRef<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.guard.state
    }
}

impl<S: AggregateState> Entity for EntityBase<S> {
    fn get_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    fn get_sequence_no(&self) -> i64 {
        self.inner.read().map(|inner| inner.sequence_no).unwrap_or(-1)
    }

    fn uncommitted_events(&self) -> Vec<EventEnvelope> {
        self.inner
            .read()
            .map(|inner| inner.uncommitted_events.clone())
            .unwrap_or_default()
    }

    fn clear_uncommitted_events(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.uncommitted_events.clear();
        }
    }
}
