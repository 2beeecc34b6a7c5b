//! Domain layer for run-notifier.
//!
//! Runs and workspaces are owned by other services; this module holds the
//! read-only views of them that the notifier consumes.

pub mod run;
pub mod value_objects;
pub mod workspace;

pub use run::{RunEvent, RunStatus, StatusTimestamp};
pub use value_objects::BackoffPolicy;
pub use workspace::Workspace;
