use std::sync::Arc;
use std::time::Duration;

use cadence_core::config::AppConfig;
use cadence_core::{
    Assessed, EngineDependencies, PersonalizationEngine, ReorderBundle, ReorderCycle, UserId,
    UsualBasketItem,
};
use cadence_db::{DbPool, SqlPreferenceFlagsRepository, SqlPurchaseHistoryRepository};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::commands::{with_migrated_database, CommandResult, Failure};

/// A one-off report waits for the full recompute.
const ANALYZE_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct AnalyzeReport {
    command: &'static str,
    status: &'static str,
    user_id: String,
    evaluated_at: DateTime<Utc>,
    history_records: usize,
    usual_basket: Assessed<Vec<UsualBasketItem>>,
    due_reorders: Assessed<Vec<ReorderCycle>>,
    bundles: Assessed<Vec<ReorderBundle>>,
}

pub fn run(user: &str, at: Option<&str>) -> CommandResult {
    let report = parse_arguments(user, at).and_then(|(user_id, evaluated_at)| {
        with_migrated_database(move |config, pool| analyze(config, pool, user_id, evaluated_at))
    });

    match report {
        Ok(report) => CommandResult::json(0, &report),
        Err(failure) => failure.into_result("analyze"),
    }
}

fn parse_arguments(user: &str, at: Option<&str>) -> Result<(UserId, DateTime<Utc>), Failure> {
    let user = user.trim();
    if user.is_empty() {
        return Err(Failure::invalid_input("--user must not be blank"));
    }
    let evaluated_at = match at {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map_err(|error| {
                Failure::invalid_input(format!("--at must be an RFC 3339 timestamp: {error}"))
            })?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    Ok((UserId::new(user), evaluated_at))
}

/// Replays the user's stored purchases through a throwaway engine; nothing is written back.
async fn analyze(
    config: AppConfig,
    pool: DbPool,
    user_id: UserId,
    evaluated_at: DateTime<Utc>,
) -> Result<AnalyzeReport, Failure> {
    let records = SqlPurchaseHistoryRepository::new(pool.clone())
        .purchases_for(&user_id)
        .await
        .map_err(|error| Failure::database("db_query", error))?;
    let history_records = records.len();

    let engine = PersonalizationEngine::new(
        config.engine,
        EngineDependencies {
            flags_repository: Arc::new(SqlPreferenceFlagsRepository::new(pool)),
            history_source: None,
            analytics: None,
            purgers: Vec::new(),
        },
    )
    .map_err(Failure::config)?
    .with_read_deadline(ANALYZE_DEADLINE);
    engine
        .record_purchases(records)
        .map_err(|error| Failure::new("invalid_history", error.to_string(), 6))?;

    Ok(AnalyzeReport {
        command: "analyze",
        status: "ok",
        user_id: user_id.to_string(),
        evaluated_at,
        history_records,
        usual_basket: engine.usual_basket(&user_id, evaluated_at).await,
        due_reorders: engine.due_reorders(&user_id, evaluated_at).await,
        bundles: engine.reorder_bundles(&user_id, evaluated_at).await,
    })
}
