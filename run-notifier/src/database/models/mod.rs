//! Database models for run-notifier.
//!
//! These models map directly to the database schema and handle
//! serialization/deserialization of JSON fields.

pub mod lease;
pub mod notification;
pub mod workspace;

pub use lease::*;
pub use notification::*;
pub use workspace::*;
