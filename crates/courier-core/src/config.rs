// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container configuration.
//!
//! Loaded once from a YAML file, then selectively overridden from environment
//! variables, validated, and passed by reference into every component.
//!
//! ```yaml
//! api_url: http://engine:1922
//! input_message_bus:
//!   name: rpa_bus
//!   class: http
//!   url: http://127.0.0.1:1923/input
//! web_server:
//!   host: 0.0.0.0
//!   port: 1923
//! local_service:
//!   - name: gc
//!     service: gc
//!   - name: text
//!     service: text
//! runner:
//!   sleep_ms: 1000
//!   fetch_requests_num: 1000
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

/// Complete container configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging options.
    #[serde(default)]
    pub log: LogConfig,
    /// Base URL of the upstream engine API.
    #[serde(default)]
    pub api_url: String,
    /// Timeout for each upstream API call.
    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,
    /// The bus this process reads requests from.
    #[serde(default)]
    pub input_message_bus: Option<InputBusConfig>,
    /// Services hosted by this process.
    #[serde(default)]
    pub local_service: Vec<LocalServiceConfig>,
    /// Listener for bus receive hooks.
    #[serde(default)]
    pub web_server: Option<WebServerConfig>,
    /// Runner tuning.
    #[serde(default)]
    pub runner: RunnerConfig,
}

fn default_api_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Load, override from the environment, and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&text)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML without environment overrides or validation.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply overrides from environment variables.
    ///
    /// - `COURIER_API_URL`: upstream engine base URL
    /// - `COURIER_WEB_HOST` / `COURIER_WEB_PORT`: receive hook listener
    /// - `COURIER_LOG_LEVEL`: default log level
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = std::env::var("COURIER_API_URL") {
            self.api_url = url;
        }
        if let Ok(level) = std::env::var("COURIER_LOG_LEVEL") {
            self.log.level = level;
        }

        let host = std::env::var("COURIER_WEB_HOST").ok();
        let port = match std::env::var("COURIER_WEB_PORT") {
            Ok(p) => Some(p.parse::<u16>().map_err(|_| {
                ConfigError::Invalid("COURIER_WEB_PORT", "must be a valid port number".into())
            })?),
            Err(_) => None,
        };
        if host.is_some() || port.is_some() {
            let web = self.web_server.get_or_insert_with(WebServerConfig::default);
            if let Some(host) = host {
                web.host = host;
            }
            if let Some(port) = port {
                web.port = port;
            }
        }
        Ok(())
    }

    /// Reject configurations the container cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::Missing("api_url"));
        }
        url::Url::parse(&self.api_url)
            .map_err(|e| ConfigError::Invalid("api_url", e.to_string()))?;

        if let Some(bus) = &self.input_message_bus {
            if bus.name.is_empty() {
                return Err(ConfigError::Missing("input_message_bus.name"));
            }
            if bus.class.is_empty() {
                return Err(ConfigError::Missing("input_message_bus.class"));
            }
        }

        let mut names = HashSet::new();
        for service in &self.local_service {
            if service.name.is_empty() {
                return Err(ConfigError::Missing("local_service.name"));
            }
            if !names.insert(service.name.as_str()) {
                return Err(ConfigError::Invalid(
                    "local_service",
                    format!("duplicate service name: {}", service.name),
                ));
            }
        }
        // Local services are registered with the input bus as their reply-to.
        if !self.local_service.is_empty() && self.input_message_bus.is_none() {
            return Err(ConfigError::Missing("input_message_bus"));
        }

        if self.runner.executor_workers == 0 {
            return Err(ConfigError::Invalid(
                "runner.executor_workers",
                "must be at least 1".into(),
            ));
        }
        if self.runner.response_workers == 0 {
            return Err(ConfigError::Invalid(
                "runner.response_workers",
                "must be at least 1".into(),
            ));
        }
        if self.runner.fetch_requests_num == 0 {
            return Err(ConfigError::Invalid(
                "runner.fetch_requests_num",
                "must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Upstream API call timeout.
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

/// Logging options.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log file; stdout only when absent.
    #[serde(default)]
    pub filename: Option<PathBuf>,
    /// Default level filter.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// File rotation period.
    #[serde(default)]
    pub rotation: LogRotation,
    /// Number of rotated files to keep.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_files() -> usize {
    3
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filename: None,
            level: default_log_level(),
            rotation: LogRotation::default(),
            max_files: default_max_files(),
        }
    }
}

/// Log file rotation period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// Rotate every minute.
    Minutely,
    /// Rotate every hour.
    Hourly,
    /// Rotate every day.
    #[default]
    Daily,
    /// Never rotate.
    Never,
}

/// Declaration of the input message bus.
///
/// The whole mapping (including extra keys) is sent to the upstream engine
/// when registering the bus.
#[derive(Debug, Clone, Deserialize)]
pub struct InputBusConfig {
    /// Unique bus name.
    pub name: String,
    /// Implementation class identifier.
    pub class: String,
    /// Implementation-specific options (e.g. `url`).
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl InputBusConfig {
    /// The full mapping as a JSON object.
    pub fn to_value(&self) -> Value {
        let mut map = self.options.clone();
        map.insert("name".into(), Value::from(self.name.clone()));
        map.insert("class".into(), Value::from(self.class.clone()));
        Value::Object(map)
    }
}

/// Declaration of a locally hosted service.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalServiceConfig {
    /// Service name as known to the upstream engine.
    pub name: String,
    /// Key of the factory that builds the handler.
    pub service: String,
    /// Handler configuration, passed to `Service::init`.
    #[serde(default = "empty_object")]
    pub config: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Receive hook listener.
#[derive(Debug, Clone, Deserialize)]
pub struct WebServerConfig {
    /// Bind host.
    #[serde(default = "default_web_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_web_port")]
    pub port: u16,
}

fn default_web_host() -> String {
    "0.0.0.0".to_string()
}

fn default_web_port() -> u16 {
    1923
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
        }
    }
}

impl WebServerConfig {
    /// Resolve the bind address.
    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ConfigError::Invalid("web_server", "invalid host or port".into()))
    }
}

/// Executor implementation selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// Task executor bounded by a fixed number of permits.
    #[default]
    #[serde(alias = "thread_pool")]
    Bounded,
}

/// Runner tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Executor implementation.
    #[serde(default)]
    pub executor: ExecutorKind,
    /// Concurrent service batches.
    #[serde(default = "default_executor_workers")]
    pub executor_workers: usize,
    /// Pause between iterations, in milliseconds.
    #[serde(default = "default_sleep_ms")]
    pub sleep_ms: u64,
    /// Maximum requests fetched per iteration.
    #[serde(default = "default_fetch_requests_num")]
    pub fetch_requests_num: usize,
    /// Concurrent response writes.
    #[serde(default = "default_response_workers")]
    pub response_workers: usize,
    /// Wait for response writes, in milliseconds.
    #[serde(default = "default_send_response_timeout_ms")]
    pub send_response_timeout_ms: u64,
    /// Refresh registries but never dispatch work.
    #[serde(default)]
    pub only_refresh: bool,
}

fn default_executor_workers() -> usize {
    10
}

fn default_sleep_ms() -> u64 {
    1000
}

fn default_fetch_requests_num() -> usize {
    1000
}

fn default_response_workers() -> usize {
    4
}

fn default_send_response_timeout_ms() -> u64 {
    10_000
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorKind::default(),
            executor_workers: default_executor_workers(),
            sleep_ms: default_sleep_ms(),
            fetch_requests_num: default_fetch_requests_num(),
            response_workers: default_response_workers(),
            send_response_timeout_ms: default_send_response_timeout_ms(),
            only_refresh: false,
        }
    }
}

impl RunnerConfig {
    /// Pause between iterations.
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_millis(self.sleep_ms)
    }

    /// Wait for response writes.
    pub fn send_response_timeout(&self) -> Duration {
        Duration::from_millis(self.send_response_timeout_ms)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A required key is missing.
    #[error("missing required config key: {0}")]
    Missing(&'static str),

    /// A key has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
