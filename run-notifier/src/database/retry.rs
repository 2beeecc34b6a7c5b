//! Retry helpers for database operations.
//!
//! Lease writes from several notifier replicas can collide on SQLite's write
//! lock even with a busy timeout configured; such writes are retried with a
//! short capped backoff.

use std::borrow::Cow;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::domain::BackoffPolicy;
use crate::{Error, Result};

const SQLITE_BUSY_MAX_RETRIES: u32 = 12;

static SQLITE_BUSY_BACKOFF: LazyLock<BackoffPolicy> =
    LazyLock::new(|| BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(2000)));

/// SQLite result codes SQLITE_BUSY (5) and SQLITE_LOCKED (6).
fn is_busy_code(code: Option<&str>) -> bool {
    matches!(code, Some("5") | Some("6"))
}

fn is_busy_message(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}

pub(crate) fn is_sqlite_busy_error(err: &Error) -> bool {
    let Error::DatabaseSqlx(sqlx_err) = err else {
        return false;
    };

    let sqlx::Error::Database(db_err) = sqlx_err else {
        return is_busy_message(&sqlx_err.to_string());
    };

    let code = db_err.code().map(Cow::into_owned);
    is_busy_code(code.as_deref()) || is_busy_message(db_err.message())
}

/// Run `op`, retrying while it fails with a SQLite busy/locked error.
pub async fn retry_on_sqlite_busy<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_sqlite_busy_error(&err) && attempt < SQLITE_BUSY_MAX_RETRIES => {
                let delay = SQLITE_BUSY_BACKOFF.delay_for_attempt(attempt);
                debug!(
                    "SQLite busy during {}, retrying in {:?} (attempt {}/{})",
                    op_name,
                    delay,
                    attempt + 1,
                    SQLITE_BUSY_MAX_RETRIES
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
