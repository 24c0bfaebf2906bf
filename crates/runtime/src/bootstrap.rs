use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cadence_core::config::{resolve_config_path, AppConfig, ConfigError, LoadOptions};
use cadence_core::{
    AnalyticsDispatcher, EngineDependencies, PersonalizationEngine, RetryPolicy, UserDataPurger,
};
use cadence_db::{
    connect_with_config, migrations, DbPool, SqlPreferenceFlagsRepository,
    SqlPurchaseHistoryRepository,
};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::analytics_http::HttpAnalyticsSink;

pub struct Application {
    pub config: AppConfig,
    pub config_path: Option<PathBuf>,
    pub db_pool: DbPool,
    pub engine: Arc<PersonalizationEngine>,
    pub purchases: Arc<SqlPurchaseHistoryRepository>,
    analytics: Option<(AnalyticsDispatcher, JoinHandle<()>)>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("analytics client could not be built: {0}")]
    AnalyticsClient(#[source] reqwest::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config_path = resolve_config_path(options.config_path.as_deref());
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config, config_path).await
}

pub async fn bootstrap_with_config(
    config: AppConfig,
    config_path: Option<PathBuf>,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let analytics = match HttpAnalyticsSink::from_config(&config.analytics)
        .map_err(BootstrapError::AnalyticsClient)?
    {
        Some(sink) => {
            let dispatcher = AnalyticsDispatcher::new(config.analytics.queue_capacity);
            let worker = dispatcher.spawn_worker(
                Arc::new(sink),
                RetryPolicy {
                    max_retries: config.analytics.max_retries,
                    backoff_base: Duration::from_millis(config.analytics.backoff_base_ms),
                },
            );
            Some((dispatcher, worker))
        }
        None => None,
    };
    info!(
        event_name = "system.bootstrap.analytics",
        correlation_id = "bootstrap",
        forwarding = analytics.is_some(),
        "analytics forwarding initialized"
    );

    let purchases = Arc::new(SqlPurchaseHistoryRepository::new(db_pool.clone()));
    let engine = PersonalizationEngine::new(
        config.engine.clone(),
        EngineDependencies {
            flags_repository: Arc::new(SqlPreferenceFlagsRepository::new(db_pool.clone())),
            history_source: Some(purchases.clone()),
            analytics: analytics.as_ref().map(|(dispatcher, _)| dispatcher.clone()),
            purgers: vec![purchases.clone() as Arc<dyn UserDataPurger>],
        },
    )?
    .with_read_deadline(Duration::from_millis(config.batch.recompute_deadline_ms));

    Ok(Application {
        config,
        config_path,
        db_pool,
        engine: Arc::new(engine),
        purchases,
        analytics,
    })
}

impl Application {
    pub fn analytics(&self) -> Option<&AnalyticsDispatcher> {
        self.analytics.as_ref().map(|(dispatcher, _)| dispatcher)
    }

    /// Stops analytics intake, gives the worker a bounded time to drain, then closes the pool.
    pub async fn shutdown(self, drain_timeout: Duration) {
        if let Some((dispatcher, worker)) = self.analytics {
            dispatcher.close();
            if tokio::time::timeout(drain_timeout, worker).await.is_err() {
                warn!(
                    event_name = "system.shutdown.analytics_drain_timeout",
                    correlation_id = "shutdown",
                    pending = dispatcher.len(),
                    "analytics queue not drained before shutdown"
                );
            }
        }
        self.db_pool.close().await;
    }
}
