use std::env;
use std::fs;
use std::path::Path;

use cadence_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Field {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields = [
        Field {
            key: "database.url",
            env_keys: &["CADENCE_DATABASE_URL"],
            value: config.database.url.clone(),
        },
        Field {
            key: "database.max_connections",
            env_keys: &["CADENCE_DATABASE_MAX_CONNECTIONS"],
            value: config.database.max_connections.to_string(),
        },
        Field {
            key: "database.timeout_secs",
            env_keys: &["CADENCE_DATABASE_TIMEOUT_SECS"],
            value: config.database.timeout_secs.to_string(),
        },
        Field {
            key: "analytics.enabled",
            env_keys: &["CADENCE_ANALYTICS_ENABLED"],
            value: config.analytics.enabled.to_string(),
        },
        Field {
            key: "analytics.endpoint",
            env_keys: &["CADENCE_ANALYTICS_ENDPOINT"],
            value: config.analytics.endpoint.clone().unwrap_or_else(|| "<unset>".to_string()),
        },
        Field {
            key: "analytics.api_key",
            env_keys: &["CADENCE_ANALYTICS_API_KEY"],
            value: redact_secret(
                config.analytics.api_key.as_ref().map(|key| key.expose_secret()),
            ),
        },
        Field {
            key: "analytics.queue_capacity",
            env_keys: &["CADENCE_ANALYTICS_QUEUE_CAPACITY"],
            value: config.analytics.queue_capacity.to_string(),
        },
        Field {
            key: "analytics.max_retries",
            env_keys: &["CADENCE_ANALYTICS_MAX_RETRIES"],
            value: config.analytics.max_retries.to_string(),
        },
        Field {
            key: "batch.interval_secs",
            env_keys: &["CADENCE_BATCH_INTERVAL_SECS"],
            value: config.batch.interval_secs.to_string(),
        },
        Field {
            key: "batch.recompute_deadline_ms",
            env_keys: &["CADENCE_BATCH_RECOMPUTE_DEADLINE_MS"],
            value: config.batch.recompute_deadline_ms.to_string(),
        },
        Field {
            key: "logging.level",
            env_keys: &["CADENCE_LOGGING_LEVEL", "CADENCE_LOG_LEVEL"],
            value: config.logging.level.clone(),
        },
        Field {
            key: "logging.format",
            env_keys: &["CADENCE_LOGGING_FORMAT", "CADENCE_LOG_FORMAT"],
            value: format!("{:?}", config.logging.format).to_lowercase(),
        },
        Field { key: "engine", env_keys: &[], value: "<table>".to_string() },
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in &fields {
        let source = field_source(field, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }
    lines.join("\n")
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    field: &Field,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = field.env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, field.key) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn redact_secret(secret: Option<&str>) -> String {
    match secret.map(str::trim) {
        None => "<unset>".to_string(),
        Some("") => "<empty>".to_string(),
        Some(_) => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{contains_path, redact_secret};

    #[test]
    fn secrets_never_render_in_clear() {
        assert_eq!(redact_secret(Some("sk-live-123")), "<redacted>");
        assert_eq!(redact_secret(Some("  ")), "<empty>");
        assert_eq!(redact_secret(None), "<unset>");
    }

    #[test]
    fn dotted_paths_walk_nested_tables() {
        let doc: toml::Value = "[analytics]\nenabled = true\n".parse().expect("toml");

        assert!(contains_path(&doc, "analytics.enabled"));
        assert!(!contains_path(&doc, "analytics.endpoint"));
        assert!(!contains_path(&doc, "batch.interval_secs"));
    }
}
