use cadence_core::config::{AppConfig, LoadOptions};
use cadence_db::{connect_with_config, migrations, DbPool};
use serde::Serialize;

use crate::commands::{current_thread_runtime, escape_json, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

impl CheckStatus {
    fn marker(self) -> &'static str {
        match self {
            Self::Pass => "ok",
            Self::Fail => "fail",
            Self::Skipped => "skip",
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, because: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {because}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    fn from_checks(checks: Vec<DoctorCheck>) -> Self {
        let failed = checks.iter().filter(|check| check.status != CheckStatus::Pass).count();
        let (overall_status, summary) = if failed == 0 {
            (CheckStatus::Pass, "doctor: all readiness checks passed".to_string())
        } else {
            (CheckStatus::Fail, format!("doctor: {failed} of {} checks did not pass", checks.len()))
        };
        Self { overall_status, summary, checks }
    }

    fn render_human(&self) -> String {
        std::iter::once(self.summary.clone())
            .chain(self.checks.iter().map(|check| {
                format!("- [{}] {}: {}", check.status.marker(), check.name, check.details)
            }))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn run(json_output: bool) -> CommandResult {
    let report = DoctorReport::from_checks(collect_checks());
    let exit_code = u8::from(report.overall_status != CheckStatus::Pass);

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        report.render_human()
    };

    CommandResult { exit_code, output }
}

fn collect_checks() -> Vec<DoctorCheck> {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            let mut checks = vec![DoctorCheck::fail("config_validation", error.to_string())];
            checks.extend(
                ["analytics_readiness", "database_connectivity", "schema_version"]
                    .into_iter()
                    .map(|name| DoctorCheck::skipped(name, "configuration did not load")),
            );
            return checks;
        }
    };

    let mut checks = vec![
        DoctorCheck::pass("config_validation", "configuration loaded and validated"),
        analytics_check(&config),
    ];
    checks.extend(database_checks(&config));
    checks
}

fn analytics_check(config: &AppConfig) -> DoctorCheck {
    let analytics = &config.analytics;
    match analytics.endpoint.as_deref().filter(|_| analytics.enabled) {
        Some(endpoint) => DoctorCheck::pass(
            "analytics_readiness",
            format!(
                "forwarding to `{endpoint}` (queue {} events, {} retries)",
                analytics.queue_capacity, analytics.max_retries
            ),
        ),
        None => DoctorCheck::pass("analytics_readiness", "analytics forwarding disabled"),
    }
}

/// Unlike `migrate` and `analyze`, this never applies migrations; it only reports them.
fn database_checks(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::fail(
                    "database_connectivity",
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::skipped("schema_version", "no async runtime was available"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped("schema_version", "the database is unreachable"),
                ];
            }
        };

        let checks = vec![
            DoctorCheck::pass(
                "database_connectivity",
                format!("connected using `{}`", config.database.url),
            ),
            schema_check(&pool).await,
        ];
        pool.close().await;
        checks
    })
}

async fn schema_check(pool: &DbPool) -> DoctorCheck {
    let applied = match migrations::applied_versions(pool).await {
        Ok(applied) => applied,
        Err(error) => {
            return DoctorCheck::fail(
                "schema_version",
                format!("could not read migration history: {error}"),
            );
        }
    };

    let pending: Vec<i64> =
        migrations::known_versions().into_iter().filter(|version| !applied.contains(version)).collect();
    if pending.is_empty() {
        DoctorCheck::pass("schema_version", format!("{} migrations applied", applied.len()))
    } else {
        DoctorCheck::fail("schema_version", format!("pending migrations {pending:?}; run `cadence migrate`"))
    }
}
