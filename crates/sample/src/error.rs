//! Domain errors for the sample `User` aggregate. Not part of the core
//! error taxonomy in spec.md §7 — this is the "external collaborator"
//! spec.md §1 says the library doesn't redesign, kept here only to
//! exercise `EntityBase` with a realistic invariant-bearing aggregate.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UserError {
    #[error("user name must not be empty")]
    EmptyName,

    #[error("user is already deactivated")]
    AlreadyDeactivated,

    #[error("deactivated user cannot be renamed")]
    InactiveCannotRename,

    #[error(transparent)]
    Entity(#[from] pericarp_core::EntityError),
}
