//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Unsupported notification destination type: {0}")]
    UnsupportedDestinationType(String),

    #[error("URL must be specified for this destination")]
    DestinationRequiresUrl,

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid notification trigger: {0}")]
    InvalidTrigger(String),

    #[error("Invalid pub/sub URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Invalid GCP project ID: {0:?}")]
    InvalidProjectId(String),

    #[error("Invalid GCP pub/sub topic: {0:?}")]
    InvalidTopic(String),

    #[error("Delivery to {destination} failed: {message}")]
    Delivery {
        destination: &'static str,
        message: String,
    },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Destination client is closed")]
    ClientClosed,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn delivery(destination: &'static str, msg: impl Into<String>) -> Self {
        Self::Delivery {
            destination,
            message: msg.into(),
        }
    }

    /// Whether this error was raised while validating user-supplied
    /// configuration, as opposed to a runtime failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::MissingParameter(_)
                | Self::UnsupportedDestinationType(_)
                | Self::DestinationRequiresUrl
                | Self::InvalidUrl { .. }
                | Self::InvalidTrigger(_)
                | Self::InvalidScheme(_)
                | Self::InvalidProjectId(_)
                | Self::InvalidTopic(_)
        )
    }
}
