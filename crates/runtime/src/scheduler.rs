use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cadence_core::config::AppConfig;
use cadence_core::PersonalizationEngine;
use cadence_db::SqlPurchaseHistoryRepository;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub users_refreshed: usize,
    pub snapshots_recomputed: usize,
    pub settings_reloaded: bool,
}

/// One batch pass: pick up edited engine settings, pull stored history, recompute stale insights.
pub async fn run_batch(
    engine: &Arc<PersonalizationEngine>,
    purchases: &SqlPurchaseHistoryRepository,
    config_path: Option<&Path>,
) -> BatchReport {
    let mut report = BatchReport::default();
    let correlation_id = format!("batch-{}", Uuid::new_v4());

    if let Some(path) = config_path {
        let reloaded = AppConfig::reload_engine_settings(path)
            .and_then(|settings| engine.reload_settings(settings));
        match reloaded {
            Ok(()) => report.settings_reloaded = true,
            Err(error) => warn!(
                event_name = "runtime.batch.settings_reload_failed",
                correlation_id = %correlation_id,
                path = %path.display(),
                error = %error,
                "keeping previous engine settings"
            ),
        }
    }

    match purchases.users().await {
        Ok(users) => {
            for user in users {
                if let Some(refresh) = engine.refresh_history(&user) {
                    if refresh.await.is_ok() {
                        report.users_refreshed += 1;
                    }
                }
            }
        }
        Err(error) => warn!(
            event_name = "runtime.batch.history_listing_failed",
            correlation_id = %correlation_id,
            error = %error,
            "recomputing from in-memory history only"
        ),
    }

    let batch_engine = Arc::clone(engine);
    report.snapshots_recomputed =
        match tokio::task::spawn_blocking(move || batch_engine.recompute_all(Utc::now())).await {
            Ok(count) => count,
            Err(error) => {
                warn!(
                    event_name = "runtime.batch.recompute_failed",
                    correlation_id = %correlation_id,
                    error = %error,
                    "batch recompute task failed"
                );
                0
            }
        };

    info!(
        event_name = "runtime.batch.completed",
        correlation_id = %correlation_id,
        users_refreshed = report.users_refreshed,
        snapshots_recomputed = report.snapshots_recomputed,
        settings_reloaded = report.settings_reloaded,
        "batch recompute completed"
    );
    report
}

pub struct BatchScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BatchScheduler {
    /// Runs a batch every `interval`, starting one interval from now.
    pub fn spawn(
        engine: Arc<PersonalizationEngine>,
        purchases: Arc<SqlPurchaseHistoryRepository>,
        config_path: Option<PathBuf>,
        interval: Duration,
    ) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_batch(&engine, &purchases, config_path.as_deref()).await;
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        Self { shutdown, handle }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    use cadence_core::{
        EngineDependencies, EngineSettings, InMemoryPreferenceFlagsRepository,
        PersonalizationEngine, PurchaseRecord, UserId,
    };
    use cadence_db::{connect_with_settings, migrations, SqlPurchaseHistoryRepository};
    use chrono::{Duration as ChronoDuration, Utc};

    use super::{run_batch, BatchScheduler};

    async fn fixture() -> (Arc<PersonalizationEngine>, Arc<SqlPurchaseHistoryRepository>) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let purchases = Arc::new(SqlPurchaseHistoryRepository::new(pool));
        let engine = PersonalizationEngine::new(
            EngineSettings::default(),
            EngineDependencies {
                flags_repository: Arc::new(InMemoryPreferenceFlagsRepository::default()),
                history_source: Some(purchases.clone()),
                analytics: None,
                purgers: Vec::new(),
            },
        )
        .expect("engine");
        (Arc::new(engine), purchases)
    }

    async fn seed(purchases: &SqlPurchaseHistoryRepository) {
        let records: Vec<PurchaseRecord> = (1..=3)
            .map(|week| {
                let ordered_at = Utc::now() - ChronoDuration::days(week * 7);
                PurchaseRecord::new("shopper-1", "sku-rice", 1, ordered_at, format!("o{week}"))
            })
            .collect();
        purchases.insert_purchases(&records).await.expect("seed");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn batch_pulls_stored_history_and_recomputes_once() {
        let (engine, purchases) = fixture().await;
        seed(&purchases).await;

        let first = run_batch(&engine, &purchases, None).await;
        assert_eq!(first.users_refreshed, 1);
        assert_eq!(first.snapshots_recomputed, 1);
        assert!(!first.settings_reloaded);
        assert!(engine.insights().get(&UserId::new("shopper-1")).is_some());

        let second = run_batch(&engine, &purchases, None).await;
        assert_eq!(second.snapshots_recomputed, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn batch_reloads_engine_settings_from_config_file() {
        let (engine, purchases) = fixture().await;
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[engine.usual]\nmin_purchase_count = 5").expect("write config");

        let report = run_batch(&engine, &purchases, Some(file.path())).await;

        assert!(report.settings_reloaded);
        assert_eq!(engine.settings().usual.min_purchase_count, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn scheduler_stops_on_request() {
        let (engine, purchases) = fixture().await;
        let scheduler = BatchScheduler::spawn(engine, purchases, None, Duration::from_secs(3600));

        tokio::time::timeout(Duration::from_secs(5), scheduler.stop()).await.expect("stopped");
    }
}
