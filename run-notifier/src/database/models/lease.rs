//! Leader lease database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A cluster-wide exclusive lease.
///
/// The lease is held by `holder` until `expires_at` (epoch milliseconds);
/// an expired row is free to be taken over.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct LeaderLeaseDbModel {
    pub lock_id: i64,
    pub holder: String,
    pub expires_at: i64,
}
