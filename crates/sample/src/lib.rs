//! Sample event-sourced aggregate exercising `pericarp-core`, used only in
//! tests (spec.md §1, "sample user aggregate" as an external collaborator).

mod error;
mod user;

pub use error::UserError;
pub use user::{User, UserCreated, UserDeactivated, UserRenamed};
