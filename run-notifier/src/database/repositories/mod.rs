//! Repository layer for database access.
//!
//! Each repository is a trait with a SQLx implementation so services can be
//! tested against in-memory fakes.

pub mod config_outbox;
pub mod lease;
pub mod notification;
pub mod workspace;

pub use config_outbox::*;
pub use lease::*;
pub use notification::*;
pub use workspace::*;
