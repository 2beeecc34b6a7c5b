//! Notification configuration database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Notification configuration database model.
///
/// Enumerations are stored as their wire strings and the trigger set as a
/// JSON array; see [`NotificationConfig::from_db_model`] for the conversion.
///
/// [`NotificationConfig::from_db_model`]: crate::notification::NotificationConfig::from_db_model
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct NotificationConfigDbModel {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    /// generic, slack, gcppubsub or email
    pub destination_type: String,
    pub enabled: bool,
    pub token: Option<String>,
    /// JSON array of trigger labels
    pub triggers: String,
    pub url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
