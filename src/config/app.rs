//! Main application configuration
//!
//! Settings come from defaults, then an optional TOML file or environment
//! variables, then command-line overrides. `validate_config` runs last.

use crate::auth::DEFAULT_JWT_SECRET;
use crate::store::{StoreEndpoint, DEFAULT_KEY_PREFIX};
use crate::transport::DEFAULT_MAX_CHAT_LENGTH;
use crate::types::{MAX_DURATION_MINUTES, MIN_DURATION_MINUTES};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub store: StoreSettings,
    pub auth: AuthSettings,
    pub transport: TransportSettings,
    pub matchmaking: MatchmakingSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and health output
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Bind address for both listeners
    pub host: String,
    /// Port for the admin, health and metrics HTTP server
    pub http_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Match store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// `redis://host[:port]` URL of the key/value store
    pub url: String,
    /// Namespace prepended to every match key
    pub key_prefix: String,
    /// Idle timeout for a single store request in milliseconds
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// HS256 secret shared with the identity issuer
    pub jwt_secret: String,
}

/// Real-time transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Port of the upgrade listener
    pub ws_port: u16,
    /// Request path prefix accepted for upgrades
    pub path_prefix: String,
    /// Longest accepted chat message, in characters
    pub max_chat_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// Duration recorded on matches formed by the queue
    pub default_duration_minutes: u32,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "social-arena".to_string(),
            log_level: "info".to_string(),
            host: "0.0.0.0".to_string(),
            http_port: 3001,
            shutdown_timeout_seconds: 10,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            request_timeout_ms: 2000,
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            ws_port: 3002,
            path_prefix: "/ws/match".to_string(),
            max_chat_length: DEFAULT_MAX_CHAT_LENGTH,
        }
    }
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            default_duration_minutes: MIN_DURATION_MINUTES,
        }
    }
}

fn env_parsed<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("Invalid {} value: {}", name, raw)),
        Err(_) => Ok(None),
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file; missing keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        validate_config(&config)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Ok(host) = env::var("HOST") {
            self.service.host = host;
        }
        if let Some(port) = env_parsed("HTTP_PORT")? {
            self.service.http_port = port;
        }
        if let Some(timeout) = env_parsed("SHUTDOWN_TIMEOUT_SECONDS")? {
            self.service.shutdown_timeout_seconds = timeout;
        }

        // Store settings
        if let Ok(url) = env::var("REDIS_URL") {
            self.store.url = url;
        }
        if let Ok(prefix) = env::var("STORE_KEY_PREFIX") {
            self.store.key_prefix = prefix;
        }
        if let Some(timeout) = env_parsed("STORE_REQUEST_TIMEOUT_MS")? {
            self.store.request_timeout_ms = timeout;
        }

        if let Ok(secret) = env::var("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }

        // Transport settings
        if let Some(port) = env_parsed("WS_PORT")? {
            self.transport.ws_port = port;
        }
        if let Ok(prefix) = env::var("WS_PATH_PREFIX") {
            self.transport.path_prefix = prefix;
        }
        if let Some(length) = env_parsed("MAX_CHAT_LENGTH")? {
            self.transport.max_chat_length = length;
        }

        if let Some(minutes) = env_parsed("DEFAULT_MATCH_DURATION_MINUTES")? {
            self.matchmaking.default_duration_minutes = minutes;
        }

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    pub fn store_request_timeout(&self) -> Duration {
        Duration::from_millis(self.store.request_timeout_ms)
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.service.host, self.service.http_port)
    }

    pub fn ws_addr(&self) -> String {
        format!("{}:{}", self.service.host, self.transport.ws_port)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    // Validate ports
    if config.service.http_port == 0 {
        return Err(anyhow!("HTTP port cannot be 0"));
    }
    if config.transport.ws_port == 0 {
        return Err(anyhow!("WebSocket port cannot be 0"));
    }
    if config.service.http_port == config.transport.ws_port {
        return Err(anyhow!(
            "HTTP and WebSocket ports must differ (both {})",
            config.service.http_port
        ));
    }

    // Validate timeouts
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }
    if config.store.request_timeout_ms == 0 {
        return Err(anyhow!("Store request timeout must be greater than 0"));
    }

    // Validate store settings
    StoreEndpoint::parse(&config.store.url)
        .map_err(|e| anyhow!("Invalid store URL {}: {}", config.store.url, e))?;
    if config.store.key_prefix.is_empty() {
        return Err(anyhow!("Store key prefix cannot be empty"));
    }

    if config.auth.jwt_secret.is_empty() {
        return Err(anyhow!("JWT secret cannot be empty"));
    }

    // Validate transport settings
    if !config.transport.path_prefix.starts_with('/') {
        return Err(anyhow!(
            "WebSocket path prefix must start with '/': {}",
            config.transport.path_prefix
        ));
    }
    if config.transport.max_chat_length == 0 {
        return Err(anyhow!("Max chat length must be greater than 0"));
    }

    let minutes = config.matchmaking.default_duration_minutes;
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&minutes) {
        return Err(anyhow!(
            "Default match duration must be within {}..{} minutes, got {}",
            MIN_DURATION_MINUTES,
            MAX_DURATION_MINUTES,
            minutes
        ));
    }

    Ok(())
}
