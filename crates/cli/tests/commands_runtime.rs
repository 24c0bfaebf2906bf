use std::env;
use std::sync::{Mutex, OnceLock};

use cadence_cli::commands::{analyze, config, doctor, migrate};
use cadence_core::PurchaseRecord;
use cadence_db::{connect_with_settings, migrations, SqlPurchaseHistoryRepository};
use chrono::{Duration, TimeZone, Utc};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("CADENCE_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("CADENCE_DATABASE_URL", "postgres://localhost/cadence")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn config_reports_env_sources_and_redacts_api_key() {
    with_env(
        &[
            ("CADENCE_DATABASE_URL", "sqlite::memory:"),
            ("CADENCE_ANALYTICS_ENABLED", "true"),
            ("CADENCE_ANALYTICS_ENDPOINT", "https://analytics.example.com/events"),
            ("CADENCE_ANALYTICS_API_KEY", "sk-live-very-secret"),
        ],
        || {
            let output = config::run();

            assert!(output.contains("- database.url = sqlite::memory: (source: env (CADENCE_DATABASE_URL))"));
            assert!(output.contains("- analytics.api_key = <redacted>"));
            assert!(output.contains("- batch.interval_secs = 86400 (source: default)"));
            assert!(!output.contains("sk-live-very-secret"));
        },
    );
}

#[test]
fn doctor_fails_on_unmigrated_database_then_passes() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}", dir.path().join("doctor.db").display());

    with_env(&[("CADENCE_DATABASE_URL", url.as_str())], || {
        let before = doctor::run(true);
        assert_eq!(before.exit_code, 1);
        let report = parse_payload(&before.output);
        assert_eq!(report["overall_status"], "fail");
        assert_eq!(check_status(&report, "database_connectivity"), "pass");
        assert_eq!(check_status(&report, "schema_version"), "fail");

        assert_eq!(migrate::run().exit_code, 0);

        let after = doctor::run(true);
        assert_eq!(after.exit_code, 0, "doctor output: {}", after.output);
        assert_eq!(parse_payload(&after.output)["overall_status"], "pass");
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[("CADENCE_ANALYTICS_ENABLED", "true")], || {
        let result = doctor::run(false);

        assert_eq!(result.exit_code, 1);
        assert!(result.output.contains("- [fail] config_validation"));
        assert!(result.output.contains("- [skip] database_connectivity"));
    });
}

#[test]
fn analyze_reports_insights_from_stored_history() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}", dir.path().join("analyze.db").display());
    let first_order = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).single().expect("timestamp");
    seed_history(&url, first_order);

    with_env(&[("CADENCE_DATABASE_URL", url.as_str())], || {
        let at = (first_order + Duration::days(40)).to_rfc3339();
        let result = analyze::run("shopper-1", Some(&at));
        assert_eq!(result.exit_code, 0, "analyze output: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "analyze");
        assert_eq!(payload["history_records"], 4);
        assert_eq!(payload["usual_basket"]["value"][0]["sku"], "sku-coffee");
        assert_eq!(payload["due_reorders"]["value"][0]["sku"], "sku-coffee");
    });
}

#[test]
fn analyze_rejects_malformed_timestamp() {
    with_env(&[("CADENCE_DATABASE_URL", "sqlite::memory:")], || {
        let result = analyze::run("shopper-1", Some("next tuesday"));

        assert_eq!(result.exit_code, 6);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_input");
    });
}

fn seed_history(url: &str, first_order: chrono::DateTime<Utc>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    runtime.block_on(async {
        let pool = connect_with_settings(url, 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let records: Vec<PurchaseRecord> = (0..4)
            .map(|week| {
                let ordered_at = first_order + Duration::days(week * 10);
                PurchaseRecord::new("shopper-1", "sku-coffee", 1, ordered_at, format!("o{week}"))
            })
            .collect();
        SqlPurchaseHistoryRepository::new(pool.clone())
            .insert_purchases(&records)
            .await
            .expect("seed");
        pool.close().await;
    });
}

fn check_status(report: &Value, name: &str) -> String {
    report["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .and_then(|check| check["status"].as_str())
        .unwrap_or_default()
        .to_string()
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "CADENCE_DATABASE_URL",
        "CADENCE_DATABASE_MAX_CONNECTIONS",
        "CADENCE_DATABASE_TIMEOUT_SECS",
        "CADENCE_ANALYTICS_ENABLED",
        "CADENCE_ANALYTICS_ENDPOINT",
        "CADENCE_ANALYTICS_API_KEY",
        "CADENCE_ANALYTICS_QUEUE_CAPACITY",
        "CADENCE_ANALYTICS_MAX_RETRIES",
        "CADENCE_BATCH_INTERVAL_SECS",
        "CADENCE_BATCH_RECOMPUTE_DEADLINE_MS",
        "CADENCE_LOGGING_LEVEL",
        "CADENCE_LOGGING_FORMAT",
        "CADENCE_LOG_LEVEL",
        "CADENCE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
