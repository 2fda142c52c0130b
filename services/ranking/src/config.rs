use crate::auth::AuthPolicy;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors found while validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main configuration for the ranking service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Chat platform configuration
    pub telegram: TelegramConfig,
    /// Participation record configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Command authorization
    pub auth: AuthConfig,
    /// Ranking presentation
    #[serde(default)]
    pub ranking: RankingConfig,
    /// Read-only HTTP API
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log format (json or pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Prometheus exporter port, 0 disables the exporter
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Telegram Bot API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot token
    #[serde(default)]
    pub token: String,
    /// Bot API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Long-poll timeout in seconds
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Pause after a failed poll in seconds
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
    /// Bot username; when set, `/command@otherbot` mentions are ignored
    #[serde(default)]
    pub bot_username: Option<String>,
}

/// Durable participation record configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// JSON file holding the historical tally
    #[serde(default = "default_participation_file")]
    pub participation_file: PathBuf,
}

/// Command authorization configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Platform user id of the bot operator
    pub operator_id: i64,
    /// Who besides the operator may run privileged commands
    #[serde(default)]
    pub policy: AuthPolicy,
    /// Let anyone run the top-N ranking command
    #[serde(default = "default_true")]
    pub public_quick_view: bool,
}

/// Ranking presentation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RankingConfig {
    /// Entries shown by the quick ranking command
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Prefix of the label shown when a name cannot be resolved
    #[serde(default = "default_fallback_label")]
    pub fallback_label: String,
}

/// API configuration for the ranking endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Serve the HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default)]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "tally-ranking".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_retry_backoff_secs() -> u64 {
    5
}

fn default_participation_file() -> PathBuf {
    PathBuf::from("participation_data.json")
}

fn default_true() -> bool {
    true
}

fn default_top_n() -> usize {
    5
}

fn default_fallback_label() -> String {
    "User".to_string()
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from config files and the environment
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", default_service_name())?
            .set_default("service.log_level", default_log_level())?
            .add_source(config::File::with_name("config/ranking").required(false))
            .add_source(config::File::with_name("/etc/tally/ranking").required(false))
            // TALLY__AUTH__OPERATOR_ID -> auth.operator_id
            .add_source(
                config::Environment::with_prefix("TALLY")
                    .separator("__")
                    .try_parsing(true),
            )
            // The bot token is conventionally handed over as TOKEN
            .set_override_option("telegram.token", std::env::var("TOKEN").ok())?
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.token.trim().is_empty() {
            return Err(ConfigError::MissingRequired("telegram.token".to_string()));
        }
        if self.auth.operator_id == 0 {
            return Err(ConfigError::MissingRequired("auth.operator_id".to_string()));
        }
        if self.telegram.api_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired("telegram.api_url".to_string()));
        }
        if self.storage.participation_file.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired(
                "storage.participation_file".to_string(),
            ));
        }
        if self.ranking.top_n == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ranking.top_n".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Long-poll timeout as Duration
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.telegram.poll_timeout_secs)
    }

    /// Backoff after a failed poll as Duration
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.telegram.retry_backoff_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            participation_file: default_participation_file(),
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            fallback_label: default_fallback_label(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: false,
            cors_origins: Vec::new(),
        }
    }
}
