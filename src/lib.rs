pub mod config;
pub mod error;
pub mod scheduling;
pub mod store;

pub use error::{AssociationError, InvariantViolation, SchedulerError, StoreError};
pub use scheduling::{Scheduler, SchedulerConfig};
