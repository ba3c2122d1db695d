//! Marker trait for strongly-typed domain events authored at the entity
//! boundary, before they are erased into an [`crate::envelope::EventEnvelope`].

use serde::Serialize;

/// A domain event: a fact, named and serializable.
///
/// Mirrors the `event_type` convention used throughout this library
/// (`{entity}.{action}`, e.g. `"user.created"`). Implementing this is
/// optional — [`crate::envelope::EventEnvelope::new`] takes any `Serialize`
/// payload plus an explicit type string — but it lets
/// `EntityBase::record_typed_event` and [`crate::dispatcher::Dispatcher::subscribe`]
/// pull the type string off the payload instead of repeating it at every
/// call site.
pub trait Event: Serialize + Send + Sync + 'static {
    fn event_type(&self) -> &'static str;
}

