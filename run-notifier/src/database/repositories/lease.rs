//! Leader lease repository.
//!
//! SQLite has no advisory locks, so exclusivity is a row per lock id holding
//! the current holder and an expiry. A lease can be taken when it is absent,
//! expired, or already held by the caller.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::LeaderLeaseDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;

#[async_trait]
pub trait LeaseRepository: Send + Sync {
    /// Try to take the lease for `ttl`. Returns whether `holder` now holds it.
    async fn try_acquire(&self, lock_id: i64, holder: &str, ttl: Duration) -> Result<bool>;
    /// Extend a held lease. Returns `false` if `holder` no longer holds it.
    async fn renew(&self, lock_id: i64, holder: &str, ttl: Duration) -> Result<bool>;
    /// Give the lease up. A no-op unless `holder` holds it.
    async fn release(&self, lock_id: i64, holder: &str) -> Result<()>;
    async fn get_lease(&self, lock_id: i64) -> Result<Option<LeaderLeaseDbModel>>;
}

/// SQLx implementation of LeaseRepository.
pub struct SqlxLeaseRepository {
    pool: SqlitePool,
}

impl SqlxLeaseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn ttl_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl LeaseRepository for SqlxLeaseRepository {
    async fn try_acquire(&self, lock_id: i64, holder: &str, ttl: Duration) -> Result<bool> {
        retry_on_sqlite_busy("lease_acquire", || async {
            let now = now_ms();
            let result = sqlx::query(
                r#"
                INSERT INTO leader_leases (lock_id, holder, expires_at)
                VALUES (?, ?, ?)
                ON CONFLICT(lock_id) DO UPDATE SET
                    holder = excluded.holder,
                    expires_at = excluded.expires_at
                WHERE leader_leases.expires_at <= ? OR leader_leases.holder = excluded.holder
                "#,
            )
            .bind(lock_id)
            .bind(holder)
            .bind(now.saturating_add(ttl_ms(ttl)))
            .bind(now)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }

    async fn renew(&self, lock_id: i64, holder: &str, ttl: Duration) -> Result<bool> {
        retry_on_sqlite_busy("lease_renew", || async {
            let result = sqlx::query(
                "UPDATE leader_leases SET expires_at = ? WHERE lock_id = ? AND holder = ?",
            )
            .bind(now_ms().saturating_add(ttl_ms(ttl)))
            .bind(lock_id)
            .bind(holder)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }

    async fn release(&self, lock_id: i64, holder: &str) -> Result<()> {
        retry_on_sqlite_busy("lease_release", || async {
            sqlx::query("DELETE FROM leader_leases WHERE lock_id = ? AND holder = ?")
                .bind(lock_id)
                .bind(holder)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn get_lease(&self, lock_id: i64) -> Result<Option<LeaderLeaseDbModel>> {
        let lease = sqlx::query_as::<_, LeaderLeaseDbModel>(
            "SELECT * FROM leader_leases WHERE lock_id = ?",
        )
        .bind(lock_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(lease)
    }
}
