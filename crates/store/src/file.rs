//! File-backed event store: one JSON file per aggregate under a base
//! directory, with an in-memory read cache rebuilt eagerly at construction
//! and maintained on every write (spec.md §4.1, "File-store layout").

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pericarp_events::{AggregateId, EventEnvelope, EventId, NO_VERSION_CHECK};
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::store_trait::{normalize_range, EventStore};

struct Inner {
    streams: HashMap<AggregateId, Vec<EventEnvelope>>,
    index: HashMap<EventId, EventEnvelope>,
}

/// Local-disk event store. Each aggregate stream lives in its own
/// `{sanitized aggregate_id}.json` file containing a JSON array of
/// envelopes; writes go through a write-temp-then-rename sequence so a
/// crash mid-write never leaves a half-written file live (spec.md §4.1,
/// "Atomicity").
///
/// The writer lock spans the disk write itself (spec.md §5: "File-store
/// disk writes are serialized by the writer lock"), so this uses
/// `tokio::sync::RwLock` rather than `std::sync::RwLock` — the guard is
/// held across an `.await`.
pub struct FileEventStore {
    base_dir: PathBuf,
    inner: tokio::sync::RwLock<Inner>,
}

impl FileEventStore {
    /// Open (creating if missing) a store rooted at `base_dir`, eagerly
    /// scanning it to rebuild the in-memory cache (spec.md §4.1: "eagerly
    /// rebuilt at construction by scanning the base directory").
    pub async fn open(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).await.map_err(StoreError::io)?;

        let mut streams = HashMap::new();
        let mut index = HashMap::new();

        let mut entries = fs::read_dir(&base_dir).await.map_err(StoreError::io)?;
        while let Some(entry) = entries.next_entry().await.map_err(StoreError::io)? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let contents = fs::read_to_string(&path).await.map_err(StoreError::io)?;
            let envelopes: Vec<EventEnvelope> = serde_json::from_str(&contents).map_err(|e| StoreError::io(e))?;
            if let Some(first) = envelopes.first() {
                let aggregate_id = first.aggregate_id.clone();
                for envelope in &envelopes {
                    index.insert(envelope.id, envelope.clone());
                }
                streams.insert(aggregate_id, envelopes);
            }
        }

        Ok(Self {
            base_dir,
            inner: tokio::sync::RwLock::new(Inner { streams, index }),
        })
    }

    fn file_path(&self, aggregate_id: &AggregateId) -> PathBuf {
        self.base_dir.join(format!("{}.json", sanitize_filename(aggregate_id.as_str())))
    }

    /// Write-temp-then-rename: serialize the full stream to `{file}.tmp`,
    /// rename it over `{file}`; on rename failure, delete the temp file
    /// rather than leaving it behind.
    async fn persist_stream(&self, aggregate_id: &AggregateId, stream: &[EventEnvelope]) -> Result<(), StoreError> {
        let path = self.file_path(aggregate_id);
        let tmp_path = path.with_extension("json.tmp");

        let body = serde_json::to_vec_pretty(stream).map_err(|e| StoreError::io(e))?;
        fs::write(&tmp_path, &body).await.map_err(StoreError::io)?;

        if let Err(err) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::io(err));
        }

        Ok(())
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

/// Escape every byte outside `[a-zA-Z0-9_-]` as `%xx`. Reversible (unlike a
/// lossy truncation), and collapses consecutive dots or path separators in
/// the aggregate id into a flat, unambiguous leaf name (spec.md §9, "File
/// store sanitization").
fn sanitize_filename(aggregate_id: &str) -> String {
    let mut out = String::with_capacity(aggregate_id.len());
    for byte in aggregate_id.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02x}")),
        }
    }
    out
}

#[async_trait]
impl EventStore for FileEventStore {
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

        let mut inner = self.inner.write().await;
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

        let mut stream = inner.streams.get(aggregate_id).cloned().unwrap_or_default();
        stream.extend(assigned.iter().cloned());

        self.persist_stream(aggregate_id, &stream).await?;

        for event in &assigned {
            inner.index.insert(event.id, event.clone());
        }
        inner.streams.insert(aggregate_id.clone(), stream);

        tracing::debug!(%aggregate_id, appended = assigned.len(), new_version = next - 1, "appended events to disk");

        Ok(())
    }

    async fn get_events(&self, ctx: &CancellationToken, aggregate_id: &AggregateId) -> Result<Vec<EventEnvelope>, StoreError> {
        if ctx.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let inner = self.inner.read().await;
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
        let inner = self.inner.read().await;
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
        let inner = self.inner.read().await;
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
        let inner = self.inner.read().await;
        inner.index.get(event_id).cloned().ok_or(StoreError::EventNotFound(*event_id))
    }

    async fn current_version(&self, ctx: &CancellationToken, aggregate_id: &AggregateId) -> Result<i64, StoreError> {
        if ctx.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let inner = self.inner.read().await;
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
    async fn durability_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CancellationToken::new();

        {
            let store = FileEventStore::open(dir.path()).await.unwrap();
            let events = vec![envelope("user.created"), envelope("user.updated"), envelope("user.updated")];
            store.append(&ctx, &aggregate_id(), NO_VERSION_CHECK, events).await.unwrap();
        }

        let reopened = FileEventStore::open(dir.path()).await.unwrap();
        let events = reopened.get_events(&ctx, &aggregate_id()).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events.iter().map(|e| e.sequence_no).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(reopened.current_version(&ctx, &aggregate_id()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn sanitizes_aggregate_ids_with_path_separators_and_dots() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CancellationToken::new();
        let store = FileEventStore::open(dir.path()).await.unwrap();

        let dangerous = AggregateId::new("../etc/passwd..").unwrap();
        let e = EventEnvelope::new(dangerous.clone(), "user.created", &Created { name: "ada".into() }).unwrap();
        store.append(&ctx, &dangerous, NO_VERSION_CHECK, vec![e]).await.unwrap();

        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert!(names.iter().all(|n| !n.contains("..") && !n.contains('/')));

        let events = store.get_events(&ctx, &dangerous).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn concurrency_conflict_leaves_file_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CancellationToken::new();
        let store = FileEventStore::open(dir.path()).await.unwrap();
        store
            .append(&ctx, &aggregate_id(), NO_VERSION_CHECK, vec![envelope("user.created")])
            .await
            .unwrap();

        let err = store.append(&ctx, &aggregate_id(), 9, vec![envelope("user.updated")]).await.unwrap_err();
        assert!(matches!(err, StoreError::ConcurrencyConflict { .. }));

        let reopened = FileEventStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get_events(&ctx, &aggregate_id()).await.unwrap().len(), 1);
    }
}
