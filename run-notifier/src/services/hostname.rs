//! Externally reachable hostname of the platform.

/// Supplies the hostname used to build run URLs.
pub trait HostnameService: Send + Sync {
    fn hostname(&self) -> String;
}

/// Hostname fixed at startup.
#[derive(Debug, Clone)]
pub struct StaticHostname(String);

impl StaticHostname {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self(hostname.into())
    }
}

impl HostnameService for StaticHostname {
    fn hostname(&self) -> String {
        self.0.clone()
    }
}
