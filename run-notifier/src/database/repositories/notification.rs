//! Notification configuration repository.

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};

use super::config_outbox::ConfigOutboxTxOps;
use crate::database::models::NotificationConfigDbModel;
use crate::notification::ConfigEvent;
use crate::{Error, Result};

/// Notification configuration repository trait.
#[async_trait]
pub trait NotificationConfigRepository: Send + Sync {
    async fn get_config(&self, id: &str) -> Result<NotificationConfigDbModel>;
    async fn list_configs(&self, workspace_id: &str) -> Result<Vec<NotificationConfigDbModel>>;
    /// Every configuration across all workspaces.
    async fn list_all_configs(&self) -> Result<Vec<NotificationConfigDbModel>>;
    async fn create_config(&self, config: &NotificationConfigDbModel) -> Result<()>;
    async fn update_config(&self, config: &NotificationConfigDbModel) -> Result<()>;
    async fn delete_config(&self, id: &str) -> Result<()>;
    /// Apply a configuration change and append it to the cluster-wide
    /// outbox as `origin`, atomically.
    async fn apply_change(&self, origin: &str, event: &ConfigEvent) -> Result<()>;
}

/// SQLx implementation of NotificationConfigRepository.
pub struct SqlxNotificationConfigRepository {
    pool: SqlitePool,
}

impl SqlxNotificationConfigRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationConfigRepository for SqlxNotificationConfigRepository {
    async fn get_config(&self, id: &str) -> Result<NotificationConfigDbModel> {
        sqlx::query_as::<_, NotificationConfigDbModel>(
            "SELECT * FROM notification_configurations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("NotificationConfiguration", id))
    }

    async fn list_configs(&self, workspace_id: &str) -> Result<Vec<NotificationConfigDbModel>> {
        let configs = sqlx::query_as::<_, NotificationConfigDbModel>(
            "SELECT * FROM notification_configurations WHERE workspace_id = ? ORDER BY created_at, id",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(configs)
    }

    async fn list_all_configs(&self) -> Result<Vec<NotificationConfigDbModel>> {
        let configs = sqlx::query_as::<_, NotificationConfigDbModel>(
            "SELECT * FROM notification_configurations ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(configs)
    }

    async fn create_config(&self, config: &NotificationConfigDbModel) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_config(&mut conn, config).await
    }

    async fn update_config(&self, config: &NotificationConfigDbModel) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        update_config(&mut conn, config).await
    }

    async fn delete_config(&self, id: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        delete_config(&mut conn, id).await
    }

    async fn apply_change(&self, origin: &str, event: &ConfigEvent) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        match event {
            ConfigEvent::Created(config) => insert_config(&mut tx, &config.to_db_model()?).await?,
            ConfigEvent::Updated(config) => update_config(&mut tx, &config.to_db_model()?).await?,
            ConfigEvent::Deleted(config) => delete_config(&mut tx, &config.id).await?,
        }
        ConfigOutboxTxOps::enqueue_event(&mut tx, origin, event).await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn insert_config(
    conn: &mut SqliteConnection,
    config: &NotificationConfigDbModel,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO notification_configurations (
            id, workspace_id, name, destination_type, enabled,
            token, triggers, url, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&config.id)
    .bind(&config.workspace_id)
    .bind(&config.name)
    .bind(&config.destination_type)
    .bind(config.enabled)
    .bind(&config.token)
    .bind(&config.triggers)
    .bind(&config.url)
    .bind(config.created_at)
    .bind(config.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn update_config(
    conn: &mut SqliteConnection,
    config: &NotificationConfigDbModel,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE notification_configurations SET
            name = ?,
            enabled = ?,
            token = ?,
            triggers = ?,
            url = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&config.name)
    .bind(config.enabled)
    .bind(&config.token)
    .bind(&config.triggers)
    .bind(&config.url)
    .bind(config.updated_at)
    .bind(&config.id)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::not_found("NotificationConfiguration", &config.id));
    }
    Ok(())
}

async fn delete_config(conn: &mut SqliteConnection, id: &str) -> Result<()> {
    let result = sqlx::query("DELETE FROM notification_configurations WHERE id = ?")
        .bind(id)
        .execute(conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::not_found("NotificationConfiguration", id));
    }
    Ok(())
}
