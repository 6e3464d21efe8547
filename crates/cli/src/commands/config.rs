use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use foms_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Sources {
    file_path: Option<PathBuf>,
    file_doc: Option<Value>,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let file_path = detect_config_path();
    let file_doc = load_config_file_doc(file_path.as_deref());
    let sources = Sources { file_path, file_doc };

    let reminder_days = config
        .workflow
        .reminder_days
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let api_token = config.security.api_token.as_ref().map(|token| redact_token(token.expose_secret()));

    let fields: Vec<(&str, String, &[&str])> = vec![
        ("database.url", config.database.url.clone(), &["FOMS_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["FOMS_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["FOMS_DATABASE_TIMEOUT_SECS"],
        ),
        ("server.bind_address", config.server.bind_address.clone(), &["FOMS_SERVER_BIND_ADDRESS"]),
        ("server.port", config.server.port.to_string(), &["FOMS_SERVER_PORT"]),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["FOMS_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        ("logging.level", config.logging.level.clone(), &["FOMS_LOGGING_LEVEL", "FOMS_LOG_LEVEL"]),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            &["FOMS_LOGGING_FORMAT", "FOMS_LOG_FORMAT"],
        ),
        (
            "workflow.drawing_sla_hours",
            config.workflow.drawing_sla_hours.to_string(),
            &["FOMS_WORKFLOW_DRAWING_SLA_HOURS"],
        ),
        ("workflow.reminder_days", reminder_days, &["FOMS_WORKFLOW_REMINDER_DAYS"]),
        (
            "workflow.auto_advance",
            config.workflow.auto_advance.to_string(),
            &["FOMS_WORKFLOW_AUTO_ADVANCE"],
        ),
        (
            "security.api_token",
            api_token.unwrap_or_else(|| "<unset>".to_string()),
            &["FOMS_SECURITY_API_TOKEN"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in fields {
        lines.push(render_line(key, &value, field_source(key, env_keys, &sources)));
    }
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("foms.toml"), PathBuf::from("config/foms.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(key_path: &str, env_keys: &[&str], sources: &Sources) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = &sources.file_doc {
        if contains_path(doc, key_path) {
            let file_path = sources
                .file_path
                .as_ref()
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

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps the last four characters so operators can tell tokens apart.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    let tail: String = trimmed.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("<redacted>...{tail}")
}
