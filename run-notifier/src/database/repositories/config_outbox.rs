//! Outbox of notification configuration changes.
//!
//! Writers append to the outbox in the same transaction as the change itself,
//! so the feed and the configuration table never disagree. Readers follow the
//! feed by sequence number; rows are never marked delivered because every
//! replica reads them independently, and old rows are pruned by age.

use async_trait::async_trait;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::Result;
use crate::database::time::now_ms;
use crate::notification::ConfigEvent;

/// Transactional operations for the configuration outbox.
///
/// These methods operate within an existing transaction and do NOT commit.
pub struct ConfigOutboxTxOps;

impl ConfigOutboxTxOps {
    /// Append a configuration event written by `origin`.
    pub async fn enqueue_event(
        tx: &mut SqliteConnection,
        origin: &str,
        event: &ConfigEvent,
    ) -> Result<()> {
        let payload = serde_json::to_string(event)?;

        sqlx::query(
            r#"
            INSERT INTO notification_config_outbox (origin, event_type, config_id, payload, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(origin)
        .bind(event.kind())
        .bind(&event.config().id)
        .bind(payload)
        .bind(now_ms())
        .execute(tx)
        .await?;

        Ok(())
    }
}

/// An entry from the outbox table.
#[derive(Debug, Clone)]
pub struct ConfigOutboxEntry {
    pub seq: i64,
    pub origin: String,
    pub payload: String,
    pub created_at: i64,
}

/// Read side of the configuration outbox.
#[async_trait]
pub trait ConfigOutboxRepository: Send + Sync {
    /// Highest sequence number written so far, 0 when empty.
    async fn latest_seq(&self) -> Result<i64>;
    /// Entries with a sequence number greater than `seq`, oldest first.
    async fn fetch_after(&self, seq: i64, limit: i64) -> Result<Vec<ConfigOutboxEntry>>;
    /// Delete entries written before `cutoff_ms`, returning how many.
    async fn prune_before(&self, cutoff_ms: i64) -> Result<u64>;
}

/// SQLx implementation of ConfigOutboxRepository.
pub struct SqlxConfigOutboxRepository {
    pool: SqlitePool,
}

impl SqlxConfigOutboxRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigOutboxRepository for SqlxConfigOutboxRepository {
    async fn latest_seq(&self) -> Result<i64> {
        let seq: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) FROM notification_config_outbox")
                .fetch_one(&self.pool)
                .await?;
        Ok(seq)
    }

    async fn fetch_after(&self, seq: i64, limit: i64) -> Result<Vec<ConfigOutboxEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, origin, payload, created_at
            FROM notification_config_outbox
            WHERE seq > ?
            ORDER BY seq
            LIMIT ?
            "#,
        )
        .bind(seq)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let entries = rows
            .into_iter()
            .map(|row| ConfigOutboxEntry {
                seq: row.get("seq"),
                origin: row.get("origin"),
                payload: row.get("payload"),
                created_at: row.get("created_at"),
            })
            .collect();

        Ok(entries)
    }

    async fn prune_before(&self, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM notification_config_outbox WHERE created_at < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
