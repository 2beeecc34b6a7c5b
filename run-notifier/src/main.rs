use anyhow::Context;
use run_notifier::config::AppConfig;
use run_notifier::services::ServiceContainer;
use run_notifier::{database, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    let _log_guard = logging::init_logging(&config.log)?;

    tracing::debug!(?config, "Loaded configuration");

    let pool = database::init_pool_with_size(&config.database_url, config.db_pool_size)
        .await
        .context("failed to open database")?;
    database::run_migrations(&pool).await?;

    let services = ServiceContainer::new(pool, &config);
    let notifier = services.start_notifier();

    tracing::info!(hostname = %config.hostname, "run-notifier started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    services.shutdown(notifier).await?;
    Ok(())
}
