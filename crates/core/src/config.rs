use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::settings::EngineSettings;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub analytics: AnalyticsConfig,
    pub batch: BatchConfig,
    pub logging: LoggingConfig,
    pub engine: EngineSettings,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AnalyticsConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub api_key: Option<SecretString>,
    pub queue_capacity: usize,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct BatchConfig {
    pub interval_secs: u64,
    pub recompute_deadline_ms: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub analytics_enabled: Option<bool>,
    pub analytics_endpoint: Option<String>,
    pub analytics_api_key: Option<String>,
    pub batch_interval_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://cadence.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            analytics: AnalyticsConfig {
                enabled: false,
                endpoint: None,
                api_key: None,
                queue_capacity: 1024,
                max_retries: 3,
                backoff_base_ms: 200,
                timeout_secs: 5,
            },
            batch: BatchConfig { interval_secs: 86_400, recompute_deadline_ms: 50 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            engine: EngineSettings::default(),
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("cadence.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Re-reads only the `[engine]` table, for hot reload between requests.
    pub fn reload_engine_settings(path: &Path) -> Result<EngineSettings, ConfigError> {
        let patch = read_patch(path)?;
        let settings = patch.engine.unwrap_or_default();
        settings.validate()?;
        Ok(settings)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(analytics) = patch.analytics {
            if let Some(enabled) = analytics.enabled {
                self.analytics.enabled = enabled;
            }
            if let Some(endpoint) = analytics.endpoint {
                self.analytics.endpoint = Some(endpoint);
            }
            if let Some(api_key_value) = analytics.api_key {
                self.analytics.api_key = Some(secret_value(api_key_value));
            }
            if let Some(queue_capacity) = analytics.queue_capacity {
                self.analytics.queue_capacity = queue_capacity;
            }
            if let Some(max_retries) = analytics.max_retries {
                self.analytics.max_retries = max_retries;
            }
            if let Some(backoff_base_ms) = analytics.backoff_base_ms {
                self.analytics.backoff_base_ms = backoff_base_ms;
            }
            if let Some(timeout_secs) = analytics.timeout_secs {
                self.analytics.timeout_secs = timeout_secs;
            }
        }

        if let Some(batch) = patch.batch {
            if let Some(interval_secs) = batch.interval_secs {
                self.batch.interval_secs = interval_secs;
            }
            if let Some(recompute_deadline_ms) = batch.recompute_deadline_ms {
                self.batch.recompute_deadline_ms = recompute_deadline_ms;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(engine) = patch.engine {
            self.engine = engine;
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(url) = read_env("CADENCE_DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(max) = env_override("CADENCE_DATABASE_MAX_CONNECTIONS")? {
            self.database.max_connections = max;
        }
        if let Some(secs) = env_override("CADENCE_DATABASE_TIMEOUT_SECS")? {
            self.database.timeout_secs = secs;
        }

        if let Some(enabled) = env_override("CADENCE_ANALYTICS_ENABLED")? {
            self.analytics.enabled = enabled;
        }
        if let Some(endpoint) = read_env("CADENCE_ANALYTICS_ENDPOINT") {
            self.analytics.endpoint = Some(endpoint);
        }
        if let Some(api_key) = read_env("CADENCE_ANALYTICS_API_KEY") {
            self.analytics.api_key = Some(secret_value(api_key));
        }
        if let Some(capacity) = env_override("CADENCE_ANALYTICS_QUEUE_CAPACITY")? {
            self.analytics.queue_capacity = capacity;
        }
        if let Some(retries) = env_override("CADENCE_ANALYTICS_MAX_RETRIES")? {
            self.analytics.max_retries = retries;
        }

        if let Some(secs) = env_override("CADENCE_BATCH_INTERVAL_SECS")? {
            self.batch.interval_secs = secs;
        }
        if let Some(ms) = env_override("CADENCE_BATCH_RECOMPUTE_DEADLINE_MS")? {
            self.batch.recompute_deadline_ms = ms;
        }

        // The short LOG_* spellings are accepted as aliases.
        if let Some(level) =
            read_env("CADENCE_LOGGING_LEVEL").or_else(|| read_env("CADENCE_LOG_LEVEL"))
        {
            self.logging.level = level;
        }
        if let Some(format) =
            read_env("CADENCE_LOGGING_FORMAT").or_else(|| read_env("CADENCE_LOG_FORMAT"))
        {
            self.logging.format = format.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(enabled) = overrides.analytics_enabled {
            self.analytics.enabled = enabled;
        }
        if let Some(endpoint) = overrides.analytics_endpoint {
            self.analytics.endpoint = Some(endpoint);
        }
        if let Some(api_key) = overrides.analytics_api_key {
            self.analytics.api_key = Some(secret_value(api_key));
        }
        if let Some(interval_secs) = overrides.batch_interval_secs {
            self.batch.interval_secs = interval_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_analytics(&self.analytics)?;
        validate_batch(&self.batch)?;
        validate_logging(&self.logging)?;
        self.engine.validate()?;
        Ok(())
    }
}

/// The config file `load` would read: the explicit path if it exists, else the first default location found.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("cadence.toml"), PathBuf::from("config/cadence.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Expands `${VAR}` references from the process environment.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find("${") {
        output.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let close = after_open.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let var = &after_open[..close];
        let value = env::var(var)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: var.to_string() })?;
        output.push_str(&value);
        rest = &after_open[close + 1..];
    }
    output.push_str(rest);

    Ok(output)
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Validation(message.to_string())
}

fn require(condition: bool, message: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(invalid(message))
    }
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    require(
        ["sqlite://", "sqlite::"].iter().any(|prefix| url.starts_with(prefix)) || url == ":memory:",
        "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)",
    )?;
    require(database.max_connections > 0, "database.max_connections must be greater than zero")?;
    require(
        (1..=300).contains(&database.timeout_secs),
        "database.timeout_secs must be in range 1..=300",
    )
}

fn validate_analytics(analytics: &AnalyticsConfig) -> Result<(), ConfigError> {
    require(analytics.queue_capacity > 0, "analytics.queue_capacity must be greater than zero")?;
    require(
        (1..=60).contains(&analytics.timeout_secs),
        "analytics.timeout_secs must be in range 1..=60",
    )?;
    if !analytics.enabled {
        return Ok(());
    }

    let endpoint = analytics.endpoint.as_deref().map(str::trim).unwrap_or_default();
    require(!endpoint.is_empty(), "analytics.endpoint is required when analytics.enabled is true")?;
    require(
        endpoint.starts_with("http://") || endpoint.starts_with("https://"),
        "analytics.endpoint must start with http:// or https://",
    )?;
    let blank_key = analytics
        .api_key
        .as_ref()
        .is_some_and(|key| key.expose_secret().trim().is_empty());
    require(!blank_key, "analytics.api_key must not be blank when set")
}

fn validate_batch(batch: &BatchConfig) -> Result<(), ConfigError> {
    require(batch.interval_secs >= 60, "batch.interval_secs must be at least 60")?;
    require(batch.recompute_deadline_ms > 0, "batch.recompute_deadline_ms must be greater than zero")
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    require(
        matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error"),
        "logging.level must be one of trace|debug|info|warn|error",
    )
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_override<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    read_env(key)
        .map(|value| {
            value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
                key: key.to_string(),
                value,
            })
        })
        .transpose()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    analytics: Option<AnalyticsPatch>,
    batch: Option<BatchPatch>,
    logging: Option<LoggingPatch>,
    engine: Option<EngineSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalyticsPatch {
    enabled: Option<bool>,
    endpoint: Option<String>,
    api_key: Option<String>,
    queue_capacity: Option<usize>,
    max_retries: Option<u32>,
    backoff_base_ms: Option<u64>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct BatchPatch {
    interval_secs: Option<u64>,
    recompute_deadline_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
