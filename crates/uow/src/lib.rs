//! The unit-of-work: atomic multi-aggregate commit against the event store,
//! with dispatcher fan-out after a successful persist (spec.md §4.3).

mod error;
mod unit_of_work;


pub use error::{CommitError, TrackError};
pub use unit_of_work::UnitOfWork;
