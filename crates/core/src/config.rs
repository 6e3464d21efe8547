use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::sla::SlaPolicy;
use crate::workflow::WorkflowPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub workflow: WorkflowConfig,
    pub security: SecurityConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub drawing_sla_hours: u32,
    pub reminder_days: Vec<u32>,
    pub auto_advance: bool,
}

#[derive(Clone, Debug, Default)]
pub struct SecurityConfig {
    /// Shared token required on API requests when set.
    pub api_token: Option<SecretString>,
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
    pub server_port: Option<u16>,
    pub auto_advance: Option<bool>,
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
        let sla = SlaPolicy::default();
        Self {
            database: DatabaseConfig {
                url: "sqlite://foms.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            workflow: WorkflowConfig {
                drawing_sla_hours: sla.drawing_sla_hours,
                reminder_days: sla.reminder_days,
                auto_advance: false,
            },
            security: SecurityConfig::default(),
        }
    }
}

impl std::str::FromStr for LogFormat {
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

impl WorkflowConfig {
    pub fn policy(&self) -> WorkflowPolicy {
        WorkflowPolicy { auto_advance: self.auto_advance }
    }

    pub fn sla_policy(&self) -> SlaPolicy {
        SlaPolicy {
            drawing_sla_hours: self.drawing_sla_hours,
            reminder_days: self.reminder_days.clone(),
        }
    }
}

type HmacSha256 = Hmac<Sha256>;

impl SecurityConfig {
    /// True when no token is configured or `presented` matches it.
    pub fn accepts(&self, presented: Option<&str>) -> bool {
        match &self.api_token {
            None => true,
            Some(expected) => {
                presented.is_some_and(|token| tokens_match(expected.expose_secret(), token))
            }
        }
    }
}

/// Compares fixed-size MAC tags so timing reveals neither the length nor a
/// matching prefix of the configured token.
fn tokens_match(expected: &str, presented: &str) -> bool {
    let tag = |token: &str| {
        HmacSha256::new_from_slice(expected.as_bytes()).map(|mut mac| {
            mac.update(token.as_bytes());
            mac
        })
    };
    match (tag(expected), tag(presented)) {
        (Ok(expected_mac), Ok(presented_mac)) => {
            presented_mac.verify_slice(&expected_mac.finalize().into_bytes()).is_ok()
        }
        _ => false,
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("foms.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
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

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
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

        if let Some(workflow) = patch.workflow {
            if let Some(drawing_sla_hours) = workflow.drawing_sla_hours {
                self.workflow.drawing_sla_hours = drawing_sla_hours;
            }
            if let Some(reminder_days) = workflow.reminder_days {
                self.workflow.reminder_days = reminder_days;
            }
            if let Some(auto_advance) = workflow.auto_advance {
                self.workflow.auto_advance = auto_advance;
            }
        }

        if let Some(security) = patch.security {
            if let Some(api_token) = security.api_token {
                self.security.api_token = Some(api_token.into());
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("FOMS_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("FOMS_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("FOMS_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("FOMS_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("FOMS_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FOMS_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("FOMS_SERVER_PORT") {
            self.server.port = parse_u16("FOMS_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("FOMS_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("FOMS_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("FOMS_LOGGING_LEVEL").or_else(|| read_env("FOMS_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("FOMS_LOGGING_FORMAT").or_else(|| read_env("FOMS_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        if let Some(value) = read_env("FOMS_WORKFLOW_DRAWING_SLA_HOURS") {
            self.workflow.drawing_sla_hours = parse_u32("FOMS_WORKFLOW_DRAWING_SLA_HOURS", &value)?;
        }
        if let Some(value) = read_env("FOMS_WORKFLOW_REMINDER_DAYS") {
            self.workflow.reminder_days = parse_u32_list("FOMS_WORKFLOW_REMINDER_DAYS", &value)?;
        }
        if let Some(value) = read_env("FOMS_WORKFLOW_AUTO_ADVANCE") {
            self.workflow.auto_advance = parse_bool("FOMS_WORKFLOW_AUTO_ADVANCE", &value)?;
        }

        if let Some(value) = read_env("FOMS_SECURITY_API_TOKEN") {
            self.security.api_token = Some(value.into());
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
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(auto_advance) = overrides.auto_advance {
            self.workflow.auto_advance = auto_advance;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        validate_workflow(&self.workflow)?;
        validate_security(&self.security)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("foms.toml"), PathBuf::from("config/foms.toml")]
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

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if workflow.drawing_sla_hours == 0 || workflow.drawing_sla_hours > 24 * 30 {
        return Err(ConfigError::Validation(
            "workflow.drawing_sla_hours must be in range 1..=720".to_string(),
        ));
    }

    if workflow.reminder_days.iter().any(|days| *days > 60) {
        return Err(ConfigError::Validation(
            "workflow.reminder_days entries must be at most 60".to_string(),
        ));
    }

    let mut seen = workflow.reminder_days.clone();
    seen.sort_unstable();
    seen.dedup();
    if seen.len() != workflow.reminder_days.len() {
        return Err(ConfigError::Validation(
            "workflow.reminder_days must not contain duplicates".to_string(),
        ));
    }

    Ok(())
}

fn validate_security(security: &SecurityConfig) -> Result<(), ConfigError> {
    if let Some(token) = &security.api_token {
        if token.expose_secret().trim().len() < 16 {
            return Err(ConfigError::Validation(
                "security.api_token must be at least 16 characters when set".to_string(),
            ));
        }
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Comma-separated list, e.g. `4,3,2`.
fn parse_u32_list(key: &str, value: &str) -> Result<Vec<u32>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| parse_u32(key, part))
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
    workflow: Option<WorkflowPatch>,
    security: Option<SecurityPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    drawing_sla_hours: Option<u32>,
    reminder_days: Option<Vec<u32>>,
    auto_advance: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct SecurityPatch {
    api_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid_without_a_file() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.workflow.reminder_days == vec![4, 3, 2], "default reminders are D-4/3/2")?;
        ensure(config.workflow.drawing_sla_hours == 48, "default drawing SLA is 48h")?;
        ensure(!config.workflow.auto_advance, "auto advance is off by default")?;
        ensure(config.security.api_token.is_none(), "no api token by default")?;
        ensure(config.security.accepts(None), "open api accepts anonymous requests")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_FOMS_API_TOKEN", "token-from-environment");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("foms.toml");
            fs::write(
                &path,
                r#"
[security]
api_token = "${TEST_FOMS_API_TOKEN}"

[workflow]
reminder_days = [7, 1]
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let token = config.security.api_token.as_ref().map(|token| token.expose_secret().to_string());
            ensure(
                token.as_deref() == Some("token-from-environment"),
                "api token should be loaded from environment",
            )?;
            ensure(config.workflow.reminder_days == vec![7, 1], "reminders come from file")?;
            ensure(config.security.accepts(Some("token-from-environment")), "token accepted")?;
            ensure(!config.security.accepts(Some("other")), "wrong token rejected")?;
            ensure(
                !config.security.accepts(Some("token-from-environmen")),
                "token prefix rejected",
            )?;
            ensure(
                !config.security.accepts(Some("token-from-environment ")),
                "token with trailing bytes rejected",
            )?;
            ensure(!config.security.accepts(None), "missing token rejected")?;
            Ok(())
        })();

        clear_vars(&["TEST_FOMS_API_TOKEN"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FOMS_LOG_LEVEL", "warn");
        env::set_var("FOMS_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["FOMS_LOG_LEVEL", "FOMS_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FOMS_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("FOMS_WORKFLOW_REMINDER_DAYS", "5, 2");
        env::set_var("FOMS_SERVER_PORT", "9000");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("foms.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[server]
port = 8181

[workflow]
reminder_days = [4]
drawing_sla_hours = 24

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.server.port == 9000, "env port should win over file")?;
            ensure(config.workflow.reminder_days == vec![5, 2], "env reminders should win over file")?;
            ensure(config.workflow.drawing_sla_hours == 24, "file SLA should win over default")?;
            Ok(())
        })();

        clear_vars(&["FOMS_DATABASE_URL", "FOMS_WORKFLOW_REMINDER_DAYS", "FOMS_SERVER_PORT"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FOMS_SECURITY_API_TOKEN", "short");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("security.api_token")
            );
            ensure(has_message, "validation failure should mention security.api_token")
        })();

        clear_vars(&["FOMS_SECURITY_API_TOKEN"]);
        result
    }

    #[test]
    fn invalid_env_number_names_the_variable() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FOMS_WORKFLOW_DRAWING_SLA_HOURS", "two days");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected env parse failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. }
                        if key == "FOMS_WORKFLOW_DRAWING_SLA_HOURS"
                ),
                "error should name the variable",
            )
        })();

        clear_vars(&["FOMS_WORKFLOW_DRAWING_SLA_HOURS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FOMS_SECURITY_API_TOKEN", "super-secret-api-token");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("super-secret-api-token"),
                "debug output should not contain api token",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["FOMS_SECURITY_API_TOKEN"]);
        result
    }
}
