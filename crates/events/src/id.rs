//! Identifiers used on the event envelope.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique, sortable identifier for a single event envelope.
///
/// Backed by a UUIDv7: the leading 48 bits are a millisecond timestamp, so
/// lexicographic ordering of the string form agrees with creation order
/// (the "27-char KSUID" the spec mentions is a sibling scheme with the same
/// property; we reuse the `Uuid` crate already in the dependency tree rather
/// than add a second ID format).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Generate a fresh, time-ordered event id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for EventId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for EventId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// Identity of the aggregate stream an envelope belongs to.
///
/// The spec models this as a plain non-empty string rather than a UUID
/// newtype, since callers mint their own aggregate identities (often from a
/// natural key). [`AggregateId::new`] rejects the empty string so the
/// invariant holds at construction time rather than being re-checked by every
/// caller.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(String);

/// An aggregate id was empty.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("aggregate id must not be empty")]
pub struct EmptyAggregateId;

impl AggregateId {
    pub fn new(id: impl Into<String>) -> Result<Self, EmptyAggregateId> {
        let id = id.into();
        if id.is_empty() {
            return Err(EmptyAggregateId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl core::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AggregateId {
    type Err = EmptyAggregateId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
