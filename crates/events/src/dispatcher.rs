//! In-process publish/subscribe with exact, pattern, and wildcard
//! subscriptions, plus a type registry for JSON → typed payload
//! reconstruction (spec.md §4.4).

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use futures::stream::{FuturesUnordered, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::envelope::{ErasedEnvelope, EventEnvelope, TypedEnvelope};
use crate::pattern;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type ErasedHandler =
    Arc<dyn Fn(CancellationToken, EventEnvelope) -> BoxFuture<'static, Result<(), anyhow::Error>> + Send + Sync>;

type TypeFactory =
    Arc<dyn Fn(JsonValue) -> Result<Box<dyn Any + Send + Sync>, serde_json::Error> + Send + Sync>;

/// One handler's failure, tagged with the event type it was invoked for.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub event_type: String,
    pub message: String,
}

impl core::fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.event_type, self.message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatch cancelled")]
    Cancelled,

    #[error("{} handler(s) failed", .0.len())]
    Aggregate(Vec<HandlerFailure>),

    #[error("no type registered for event type {0:?}")]
    UnknownType(String),

    #[error("failed to parse envelope: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("dispatcher lock poisoned")]
    LockPoisoned,
}

impl DispatchError {
    pub fn failures(&self) -> &[HandlerFailure] {
        match self {
            DispatchError::Aggregate(failures) => failures,
            _ => &[],
        }
    }
}

/// Process-level pub/sub registry. Cheap to construct; share one instance
/// behind an `Arc` across tasks/threads (it is already `Send + Sync` and all
/// mutation goes through internal locks, so `Arc<Dispatcher>` needs no
/// wrapper trait — callers just clone the `Arc`).
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<String, Vec<ErasedHandler>>>,
    wildcard_handlers: RwLock<Vec<ErasedHandler>>,
    type_registry: RwLock<HashMap<String, TypeFactory>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a typed handler under `pattern`. A pattern containing `*`
    /// is matched component-wise against dispatched event types (see
    /// [`pattern`]); a pattern without `*` matches only that exact type.
    ///
    /// The first `subscribe::<T>` for a given pattern also registers a type
    /// factory for it (spec.md §4.4, "Type registry"), so `unmarshal_event`
    /// can later reconstruct the same payload type without a separate
    /// `register_type` call.
    #[must_use = "a dropped subscription result may hide a lock-poisoning error"]
    pub fn subscribe<T, F, Fut>(&self, pattern: impl Into<String>, handler: F) -> Result<(), DispatchError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
        F: Fn(CancellationToken, TypedEnvelope<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let pattern = pattern.into();

        self.register_type_factory(pattern.clone(), |value| {
            serde_json::from_value::<T>(value).map(|t| Box::new(t) as Box<dyn Any + Send + Sync>)
        })?;

        let handler = Arc::new(handler);
        let erased: ErasedHandler = Arc::new(move |ctx, envelope| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                if ctx.is_cancelled() {
                    return Err(anyhow::anyhow!("dispatch cancelled"));
                }
                let payload = envelope.typed_payload::<T>()?;
                let typed = TypedEnvelope {
                    id: envelope.id,
                    aggregate_id: envelope.aggregate_id,
                    event_type: envelope.event_type,
                    payload,
                    created: envelope.created,
                    sequence_no: envelope.sequence_no,
                    metadata: envelope.metadata,
                };
                handler(ctx, typed).await
            })
        });

        self.handlers
            .write()
            .map_err(|_| DispatchError::LockPoisoned)?
            .entry(pattern)
            .or_default()
            .push(erased);

        Ok(())
    }

    /// Subscribe a handler invoked for every dispatched event, erased
    /// payload and all.
    #[must_use = "a dropped subscription result may hide a lock-poisoning error"]
    pub fn subscribe_wildcard<F, Fut>(&self, handler: F) -> Result<(), DispatchError>
    where
        F: Fn(CancellationToken, EventEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: ErasedHandler = Arc::new(move |ctx, envelope| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                if ctx.is_cancelled() {
                    return Err(anyhow::anyhow!("dispatch cancelled"));
                }
                handler(ctx, envelope).await
            })
        });

        self.wildcard_handlers
            .write()
            .map_err(|_| DispatchError::LockPoisoned)?
            .push(erased);

        Ok(())
    }

    /// Register a type factory for `event_type` without subscribing a
    /// handler. A no-op if one is already registered (first registration
    /// wins, matching `subscribe`'s behavior).
    pub fn register_type<T>(&self, event_type: impl Into<String>) -> Result<(), DispatchError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.register_type_factory(event_type.into(), |value| {
            serde_json::from_value::<T>(value).map(|t| Box::new(t) as Box<dyn Any + Send + Sync>)
        })
    }

    fn register_type_factory(
        &self,
        event_type: String,
        factory: impl Fn(JsonValue) -> Result<Box<dyn Any + Send + Sync>, serde_json::Error> + Send + Sync + 'static,
    ) -> Result<(), DispatchError> {
        let mut registry = self.type_registry.write().map_err(|_| DispatchError::LockPoisoned)?;
        registry.entry(event_type).or_insert_with(|| Arc::new(factory));
        Ok(())
    }

    /// Parse a JSON envelope and reconstruct its payload via the factory
    /// registered for `event_type`.
    pub fn unmarshal_event(
        &self,
        ctx: &CancellationToken,
        bytes: &[u8],
        event_type: &str,
    ) -> Result<ErasedEnvelope, DispatchError> {
        if ctx.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let envelope: EventEnvelope = serde_json::from_slice(bytes)?;

        let factory = {
            let registry = self.type_registry.read().map_err(|_| DispatchError::LockPoisoned)?;
            registry
                .get(event_type)
                .cloned()
                .ok_or_else(|| DispatchError::UnknownType(event_type.to_string()))?
        };

        let payload = factory(envelope.payload.clone())?;

        Ok(ErasedEnvelope {
            id: envelope.id,
            aggregate_id: envelope.aggregate_id,
            event_type: envelope.event_type,
            payload,
            created: envelope.created,
            sequence_no: envelope.sequence_no,
            metadata: envelope.metadata,
        })
    }

    /// Fan an event out to every matching pattern/exact handler, then to
    /// every wildcard handler, concurrently within each phase. Handler
    /// failures are collected, not short-circuited: every matched handler
    /// runs to completion regardless of its peers (spec.md §4.4, "Dispatch
    /// semantics").
    pub async fn dispatch(&self, ctx: CancellationToken, envelope: EventEnvelope) -> Result<(), DispatchError> {
        if ctx.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let _span = tracing::debug_span!("dispatch", event_type = %envelope.event_type, event_id = %envelope.id).entered();

        let matched = {
            let mut patterns: Vec<String> = pattern::matching_patterns(&envelope.event_type).into_iter().collect();
            patterns.sort();

            let handlers = self.handlers.read().map_err(|_| DispatchError::LockPoisoned)?;
            let mut out = Vec::new();
            for key in &patterns {
                if let Some(list) = handlers.get(key) {
                    out.extend(list.iter().cloned());
                }
            }
            out
        };

        tracing::trace!(matched = matched.len(), "pattern handlers resolved");

        let mut failures = Vec::new();
        run_phase(&matched, &ctx, &envelope, &mut failures).await;

        let wildcard = self
            .wildcard_handlers
            .read()
            .map_err(|_| DispatchError::LockPoisoned)?
            .clone();
        run_phase(&wildcard, &ctx, &envelope, &mut failures).await;

        if !failures.is_empty() {
            tracing::debug!(failed = failures.len(), "dispatch completed with handler failures");
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::Aggregate(failures))
        }
    }
}

async fn run_phase(
    handlers: &[ErasedHandler],
    ctx: &CancellationToken,
    envelope: &EventEnvelope,
    failures: &mut Vec<HandlerFailure>,
) {
    if handlers.is_empty() {
        return;
    }

    let mut running = FuturesUnordered::new();
    for handler in handlers {
        let ctx = ctx.clone();
        let envelope = envelope.clone();
        let handler = Arc::clone(handler);
        running.push(async move { handler(ctx, envelope).await });
    }

    while let Some(result) = running.next().await {
        if let Err(err) = result {
            failures.push(HandlerFailure {
                event_type: envelope.event_type.clone(),
                message: err.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::AggregateId;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Serialize, Deserialize)]
    struct UserCreated {
        name: String,
    }

    fn envelope(event_type: &str) -> EventEnvelope {
        EventEnvelope::new(
            AggregateId::new("A1").unwrap(),
            event_type,
            &UserCreated { name: "ada".into() },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn pattern_fan_out_invokes_every_matching_subscription_once() {
        let dispatcher = Dispatcher::new();
        let hits: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));

        for pattern in ["user.created", "user.*", "*.created", "*.*"] {
            let hits = Arc::clone(&hits);
            dispatcher
                .subscribe::<UserCreated, _, _>(pattern, move |_ctx, _env| {
                    let hits = Arc::clone(&hits);
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .unwrap();
        }

        let wildcard_hits = Arc::new(AtomicUsize::new(0));
        {
            let wildcard_hits = Arc::clone(&wildcard_hits);
            dispatcher
                .subscribe_wildcard(move |_ctx, _env| {
                    let wildcard_hits = Arc::clone(&wildcard_hits);
                    async move {
                        wildcard_hits.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .unwrap();
        }

        dispatcher
            .dispatch(CancellationToken::new(), envelope("user.created"))
            .await
            .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 4);
        assert_eq!(wildcard_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_errors_are_collected_not_short_circuited() {
        let dispatcher = Dispatcher::new();
        let ran = Arc::new(AtomicUsize::new(0));

        dispatcher
            .subscribe::<UserCreated, _, _>("user.created", |_ctx, _env| async { Err(anyhow::anyhow!("boom")) })
            .unwrap();

        {
            let ran = Arc::clone(&ran);
            dispatcher
                .subscribe::<UserCreated, _, _>("user.created", move |_ctx, _env| {
                    let ran = Arc::clone(&ran);
                    async move {
                        ran.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .unwrap();
        }

        let err = dispatcher
            .dispatch(CancellationToken::new(), envelope("user.created"))
            .await
            .unwrap_err();

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(err.failures().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits_without_invoking_handlers() {
        let dispatcher = Dispatcher::new();
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let ran = Arc::clone(&ran);
            dispatcher
                .subscribe::<UserCreated, _, _>("user.created", move |_ctx, _env| {
                    let ran = Arc::clone(&ran);
                    async move {
                        ran.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .unwrap();
        }

        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = dispatcher.dispatch(ctx, envelope("user.created")).await.unwrap_err();

        assert!(matches!(err, DispatchError::Cancelled));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn type_mismatch_reports_error_without_panicking() {
        #[derive(Debug, Serialize, Deserialize)]
        struct Other {
            #[serde(rename = "does_not_exist")]
            _marker: (),
        }

        let dispatcher = Dispatcher::new();
        dispatcher
            .subscribe::<Other, _, _>("user.created", |_ctx, _env| async { Ok(()) })
            .unwrap();

        let err = dispatcher
            .dispatch(CancellationToken::new(), envelope("user.created"))
            .await
            .unwrap_err();

        assert_eq!(err.failures().len(), 1);
    }

    #[test]
    fn unmarshal_event_round_trips_registered_type() {
        let dispatcher = Dispatcher::new();
        dispatcher.register_type::<UserCreated>("user.created").unwrap();

        let envelope = envelope("user.created");
        let bytes = serde_json::to_vec(&envelope).unwrap();

        let erased = dispatcher
            .unmarshal_event(&CancellationToken::new(), &bytes, "user.created")
            .unwrap();

        let payload = erased.payload.downcast_ref::<UserCreated>().unwrap();
        assert_eq!(payload.name, "ada");
    }

    #[test]
    fn unmarshal_event_fails_descriptively_without_factory() {
        let dispatcher = Dispatcher::new();
        let envelope = envelope("user.created");
        let bytes = serde_json::to_vec(&envelope).unwrap();

        let err = dispatcher
            .unmarshal_event(&CancellationToken::new(), &bytes, "user.created")
            .unwrap_err();

        assert!(matches!(err, DispatchError::UnknownType(_)));
    }
}
