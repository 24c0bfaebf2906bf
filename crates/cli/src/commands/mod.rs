pub mod analyze;
pub mod config;
pub mod doctor;
pub mod migrate;

use std::future::Future;

use cadence_core::config::{AppConfig, LoadOptions};
use cadence_db::{connect_with_config, migrations, DbPool};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct StatusPayload<'a> {
    command: &'a str,
    status: &'static str,
    error_class: Option<&'a str>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload =
            StatusPayload { command, status: "ok", error_class: None, message: message.into() };
        Self::json(0, &payload)
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = StatusPayload {
            command,
            status: "error",
            error_class: Some(error_class),
            message: message.into(),
        };
        Self::json(exit_code, &payload)
    }

    pub(crate) fn json(exit_code: u8, payload: &impl Serialize) -> Self {
        Self { exit_code, output: serialize_payload(payload) }
    }
}

/// A command that stopped early. Exit codes: 2 config, 3 runtime, 4 database, 5 migration,
/// 6 invalid input.
#[derive(Debug)]
pub(crate) struct Failure {
    class: &'static str,
    message: String,
    exit_code: u8,
}

impl Failure {
    pub(crate) fn new(class: &'static str, message: impl Into<String>, exit_code: u8) -> Self {
        Self { class, message: message.into(), exit_code }
    }

    pub(crate) fn config(error: impl std::fmt::Display) -> Self {
        Self::new("config_validation", format!("configuration issue: {error}"), 2)
    }

    pub(crate) fn database(class: &'static str, error: impl std::fmt::Display) -> Self {
        Self::new(class, error.to_string(), 4)
    }

    pub(crate) fn migration(error: impl std::fmt::Display) -> Self {
        Self::new("migration", error.to_string(), 5)
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::new("invalid_input", message, 6)
    }

    pub(crate) fn into_result(self, command: &str) -> CommandResult {
        CommandResult::failure(command, self.class, self.message, self.exit_code)
    }
}

/// Loads config, opens the pool with migrations applied, and runs `work` on a
/// single-threaded runtime. The pool is closed whether or not `work` succeeds.
pub(crate) fn with_migrated_database<T, F, Fut>(work: F) -> Result<T, Failure>
where
    F: FnOnce(AppConfig, DbPool) -> Fut,
    Fut: Future<Output = Result<T, Failure>>,
{
    let config = AppConfig::load(LoadOptions::default()).map_err(Failure::config)?;
    let runtime = current_thread_runtime().map_err(|error| {
        Failure::new("runtime_init", format!("failed to initialize async runtime: {error}"), 3)
    })?;

    runtime.block_on(async move {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| Failure::database("db_connectivity", error))?;
        if let Err(error) = migrations::run_pending(&pool).await {
            pool.close().await;
            return Err(Failure::migration(error));
        }
        let outcome = work(config, pool.clone()).await;
        pool.close().await;
        outcome
    })
}

pub(crate) fn serialize_payload(payload: &impl Serialize) -> String {
    serde_json::to_string(payload).unwrap_or_else(|error| {
        format!(
            "{{\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            escape_json(&error.to_string())
        )
    })
}

pub(crate) fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

pub(crate) fn current_thread_runtime() -> Result<tokio::runtime::Runtime, std::io::Error> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}
