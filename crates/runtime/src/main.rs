mod analytics_http;
mod bootstrap;
mod scheduler;

use std::time::Duration;

use anyhow::Result;
use cadence_core::config::{resolve_config_path, AppConfig, LoadOptions, LogFormat};
use tracing_subscriber::EnvFilter;

use crate::scheduler::BatchScheduler;

const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn init_logging(config: &AppConfig) {
    // RUST_LOG wins over the configured level when set.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let options = LoadOptions::default();
    let config_path = resolve_config_path(options.config_path.as_deref());
    let config = AppConfig::load(options)?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config, config_path).await?;
    let scheduler = BatchScheduler::spawn(
        app.engine.clone(),
        app.purchases.clone(),
        app.config_path.clone(),
        Duration::from_secs(app.config.batch.interval_secs),
    );

    tracing::info!(
        event_name = "system.runtime.started",
        correlation_id = "bootstrap",
        batch_interval_secs = app.config.batch.interval_secs,
        analytics_forwarding = app.analytics().is_some(),
        "cadence runtime started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.runtime.stopping",
        correlation_id = "shutdown",
        "cadence runtime stopping"
    );

    scheduler.stop().await;
    app.shutdown(SHUTDOWN_DRAIN_TIMEOUT).await;
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
