//! `User`: the sample event-sourced aggregate spec.md §1 refers to as an
//! external collaborator used only to exercise the core library — not part
//! of its public surface.

use pericarp_core::{AggregateState, Entity, EntityBase, EntityError};
use pericarp_events::{AggregateId, Event, EventEnvelope};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::UserError;

#[derive(Debug, Serialize, Deserialize)]
pub struct UserCreated {
    pub name: String,
    pub email: String,
}

impl Event for UserCreated {
    fn event_type(&self) -> &'static str {
        "user.created"
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserRenamed {
    pub name: String,
}

impl Event for UserRenamed {
    fn event_type(&self) -> &'static str {
        "user.renamed"
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserDeactivated;

impl Event for UserDeactivated {
    fn event_type(&self) -> &'static str {
        "user.deactivated"
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
struct UserState {
    name: String,
    email: String,
    active: bool,
}

impl AggregateState for UserState {
    fn apply(&mut self, envelope: &EventEnvelope) {
        match envelope.event_type.as_str() {
            "user.created" => {
                let payload: UserCreated = envelope.typed_payload().expect("user.created payload");
                self.name = payload.name;
                self.email = payload.email;
                self.active = true;
            }
            "user.renamed" => {
                let payload: UserRenamed = envelope.typed_payload().expect("user.renamed payload");
                self.name = payload.name;
            }
            "user.deactivated" => {
                self.active = false;
            }
            other => tracing::warn!(event_type = other, "User aggregate received an unknown event type"),
        }
    }
}

/// Identity aggregate: created active, renamable while active, and
/// deactivatable exactly once.
pub struct User {
    base: EntityBase<UserState>,
}

impl User {
    /// Hydrate an empty `User` for replay (spec.md §4.2, "created fresh OR
    /// hydrated by replaying stored envelopes").
    pub fn hydrate(aggregate_id: AggregateId) -> Self {
        Self {
            base: EntityBase::new(aggregate_id, UserState::default()),
        }
    }

    /// Author a fresh `User` and its `user.created` event in one step.
    pub fn create(aggregate_id: AggregateId, name: impl Into<String>, email: impl Into<String>) -> Result<Self, UserError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(UserError::EmptyName);
        }
        let user = Self::hydrate(aggregate_id);
        user.base.record_typed_event(&UserCreated { name, email: email.into() })?;
        Ok(user)
    }

    pub fn rename(&self, name: impl Into<String>) -> Result<(), UserError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(UserError::EmptyName);
        }
        if !self.is_active() {
            return Err(UserError::InactiveCannotRename);
        }
        self.base.record_typed_event(&UserRenamed { name })?;
        Ok(())
    }

    pub fn deactivate(&self) -> Result<(), UserError> {
        if !self.is_active() {
            return Err(UserError::AlreadyDeactivated);
        }
        self.base.record_typed_event(&UserDeactivated)?;
        Ok(())
    }

    pub fn apply_event(&self, ctx: &CancellationToken, envelope: EventEnvelope) -> Result<(), EntityError> {
        self.base.apply_event(ctx, envelope)
    }

    pub fn name(&self) -> String {
        self.base.state().name.clone()
    }

    pub fn email(&self) -> String {
        self.base.state().email.clone()
    }

    pub fn is_active(&self) -> bool {
        self.base.state().active
    }
}

impl Entity for User {
    fn get_id(&self) -> &AggregateId {
        self.base.get_id()
    }

    fn get_sequence_no(&self) -> i64 {
        self.base.get_sequence_no()
    }

    fn uncommitted_events(&self) -> Vec<EventEnvelope> {
        self.base.uncommitted_events()
    }

    fn clear_uncommitted_events(&self) {
        self.base.clear_uncommitted_events()
    }
}
