//! Service layer module.
//!
//! Collaborators consumed by the notifier and the service container that
//! wires the application together.

pub mod container;
pub mod hostname;
pub mod workspace;

pub use container::ServiceContainer;
pub use hostname::{HostnameService, StaticHostname};
pub use workspace::{RepositoryWorkspaceService, WorkspaceService};
