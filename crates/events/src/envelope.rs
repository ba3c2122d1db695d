//! The event envelope: the single transport unit that flows from authoring,
//! through the store, to the dispatcher.

use std::any::Any;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::{AggregateId, EventId};

/// Sentinel used in a handful of places as "no value supplied": `-1` means
/// "skip the optimistic-concurrency check" in `append`, "fresh entity" for a
/// sequence number, and "open-ended" for a range-query bound. See spec.md §9
/// ("Versioning sentinel") for the rationale; kept as a plain `i64` rather
/// than `Option<i64>` to match the vocabulary the rest of this crate family
/// uses at its boundary (store, entity, dispatcher all compare against it).
pub const NO_VERSION_CHECK: i64 = -1;

/// The persisted, wire-format event: payload erased to JSON, everything else
/// strongly typed. This is what the event store and dispatcher traffic in;
/// typed payloads only exist transiently at the authoring and handler
/// boundaries (see [`crate::dispatcher::Dispatcher::subscribe`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: EventId,

    pub aggregate_id: AggregateId,

    /// Dotted event type, e.g. `"user.created"`.
    pub event_type: String,

    pub payload: JsonValue,

    #[serde(rename = "timestamp")]
    pub created: DateTime<Utc>,

    pub sequence_no: i64,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, JsonValue>,
}

impl EventEnvelope {
    /// Build a fresh envelope from a typed payload, serializing it to JSON.
    /// `sequence_no` is a placeholder here; the store or the entity base
    /// overwrites it before persistence (spec.md §4.1: "Assign the envelopes
    /// sequential `sequence_no` values... overwriting any prior value").
    pub fn new<P: Serialize>(
        aggregate_id: AggregateId,
        event_type: impl Into<String>,
        payload: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: EventId::new(),
            aggregate_id,
            event_type: event_type.into(),
            payload: serde_json::to_value(payload)?,
            created: Utc::now(),
            sequence_no: NO_VERSION_CHECK,
            metadata: HashMap::new(),
        })
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, JsonValue>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Deserialize the erased payload into a concrete type. Used by typed
    /// dispatcher handlers and by callers replaying a stream into a
    /// strongly-typed aggregate.
    pub fn typed_payload<P: for<'de> Deserialize<'de>>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// An envelope handed to a typed dispatcher handler: same metadata as
/// [`EventEnvelope`], payload already downcast to `P`.
#[derive(Debug, Clone)]
pub struct TypedEnvelope<P> {
    pub id: EventId,
    pub aggregate_id: AggregateId,
    pub event_type: String,
    pub payload: P,
    pub created: DateTime<Utc>,
    pub sequence_no: i64,
    pub metadata: HashMap<String, JsonValue>,
}

/// The result of [`crate::dispatcher::Dispatcher::unmarshal_event`]: same
/// shape as [`EventEnvelope`] but with the payload reconstructed via the
/// registered factory into a `dyn Any`, ready for the caller to downcast.
pub struct ErasedEnvelope {
    pub id: EventId,
    pub aggregate_id: AggregateId,
    pub event_type: String,
    pub payload: Box<dyn Any + Send + Sync>,
    pub created: DateTime<Utc>,
    pub sequence_no: i64,
    pub metadata: HashMap<String, JsonValue>,
}
