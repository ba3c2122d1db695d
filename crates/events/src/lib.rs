//! Event envelope, typed event marker trait, and the in-process dispatcher.
//!
//! This crate has no dependency on the event store or the unit-of-work: the
//! dispatcher only knows how to fan an already-built [`EventEnvelope`] out to
//! subscribers (spec.md §2, "The Dispatcher has no dependency on the Event
//! Store").

mod dispatcher;
mod envelope;
mod event;
mod id;
mod pattern;

pub use dispatcher::{BoxFuture, DispatchError, Dispatcher, HandlerFailure};
pub use envelope::{ErasedEnvelope, EventEnvelope, TypedEnvelope, NO_VERSION_CHECK};
pub use event::Event;
pub use id::{AggregateId, EmptyAggregateId, EventId};
pub use pattern::{matches, matching_patterns};
