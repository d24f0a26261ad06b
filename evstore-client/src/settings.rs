//! Client settings.
//!
//! Settings are loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML settings file (if specified via EVSTORE_CONFIG)
//! 3. Environment variables

use evstore_protocol::{Credentials, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What happens to live subscriptions when their connection closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionRecovery {
    /// Drop every subscription with `ConnectionClosed`.
    #[default]
    Drop,
    /// Re-issue the subscribe request on the next connection.
    Resubscribe,
}

/// Client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Candidate nodes. A single entry means a single-node deployment.
    pub endpoints: Vec<SocketAddr>,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Inbound idle time before a heartbeat probe is sent.
    pub heartbeat_interval_ms: u64,
    /// Time a heartbeat probe may stay unanswered.
    pub heartbeat_timeout_ms: u64,
    /// Time an operation may wait for a response before it is retried.
    /// Also bounds the authentication handshake.
    pub operation_timeout_ms: u64,
    /// How often in-flight operations are scanned for timeouts.
    pub operation_timeout_check_interval_ms: u64,
    /// Retries allowed per operation before it fails.
    pub max_operation_retries: u32,
    /// Reconnect attempts before the client gives up. `None` is unlimited.
    pub max_reconnections: Option<u32>,
    /// Delay before a reconnect attempt.
    pub reconnection_delay_ms: u64,
    /// Fail timed-out operations instead of retrying them.
    pub fail_on_no_server_response: bool,
    /// Assign a fresh correlation id on every retry.
    pub rotate_correlation_on_retry: bool,
    pub subscription_recovery: SubscriptionRecovery,
    /// Ask the server to refuse the request unless it is the master node.
    pub require_master: bool,
    /// Connection-level credentials used for the authentication handshake.
    #[serde(default)]
    pub credentials: Option<Credentials>,
    pub tls: TlsSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoints: vec![SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))],
            connect_timeout_ms: 1000,
            heartbeat_interval_ms: 500,
            heartbeat_timeout_ms: 1500,
            operation_timeout_ms: 7000,
            operation_timeout_check_interval_ms: 1000,
            max_operation_retries: 10,
            max_reconnections: Some(10),
            reconnection_delay_ms: 100,
            fail_on_no_server_response: false,
            rotate_correlation_on_retry: true,
            subscription_recovery: SubscriptionRecovery::Drop,
            require_master: true,
            credentials: None,
            tls: TlsSettings::default(),
        }
    }
}

impl Settings {
    /// Settings for a single node.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            endpoints: vec![addr],
            ..Self::default()
        }
    }

    /// Settings for a cluster described by its candidate nodes.
    pub fn cluster(endpoints: Vec<SocketAddr>) -> Self {
        Self {
            endpoints,
            ..Self::default()
        }
    }

    /// Loads settings from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Ok(path) = std::env::var("EVSTORE_CONFIG") {
            settings = Self::from_file(&path)?;
        }

        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Loads settings from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let settings: Settings = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(settings)
    }

    /// Loads settings from environment variables only.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env_overrides();
        settings
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("EVSTORE_ADDR") {
            if let Ok(parsed) = addr.parse() {
                self.endpoints = vec![parsed];
            }
        }

        if let Some(list) = lookup("EVSTORE_CLUSTER") {
            let parsed: Vec<SocketAddr> = list
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if !parsed.is_empty() {
                self.endpoints = parsed;
            }
        }

        if let Some(user) = lookup("EVSTORE_USER") {
            let password = lookup("EVSTORE_PASSWORD").unwrap_or_default();
            self.credentials = Some(Credentials::new(user, password));
        }

        parse_into(&lookup, "EVSTORE_HEARTBEAT_INTERVAL_MS", &mut self.heartbeat_interval_ms);
        parse_into(&lookup, "EVSTORE_HEARTBEAT_TIMEOUT_MS", &mut self.heartbeat_timeout_ms);
        parse_into(&lookup, "EVSTORE_OPERATION_TIMEOUT_MS", &mut self.operation_timeout_ms);
        parse_into(&lookup, "EVSTORE_MAX_RETRIES", &mut self.max_operation_retries);

        if let Some(max) = lookup("EVSTORE_MAX_RECONNECTIONS") {
            if max == "unlimited" {
                self.max_reconnections = None;
            } else if let Ok(n) = max.parse() {
                self.max_reconnections = Some(n);
            }
        }

        self.tls.apply_overrides(&lookup);
    }

    /// Validates the settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one endpoint is required".to_string(),
            ));
        }
        if self.heartbeat_interval_ms == 0 || self.heartbeat_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "heartbeat interval and timeout must be positive".to_string(),
            ));
        }
        if self.operation_timeout_ms == 0 || self.operation_timeout_check_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "operation timeout and check interval must be positive".to_string(),
            ));
        }
        self.tls.validate()
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self.heartbeat_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_operation_timeout_check_interval(mut self, interval: Duration) -> Self {
        self.operation_timeout_check_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_max_operation_retries(mut self, retries: u32) -> Self {
        self.max_operation_retries = retries;
        self
    }

    pub fn with_max_reconnections(mut self, max: Option<u32>) -> Self {
        self.max_reconnections = max;
        self
    }

    pub fn with_reconnection_delay(mut self, delay: Duration) -> Self {
        self.reconnection_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_fail_on_no_server_response(mut self, fail: bool) -> Self {
        self.fail_on_no_server_response = fail;
        self
    }

    pub fn with_rotate_correlation_on_retry(mut self, rotate: bool) -> Self {
        self.rotate_correlation_on_retry = rotate;
        self
    }

    pub fn with_subscription_recovery(mut self, recovery: SubscriptionRecovery) -> Self {
        self.subscription_recovery = recovery;
        self
    }

    pub fn with_require_master(mut self, require_master: bool) -> Self {
        self.require_master = require_master;
        self
    }

    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = tls;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn operation_timeout_check_interval(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_check_interval_ms)
    }

    pub fn reconnection_delay(&self) -> Duration {
        Duration::from_millis(self.reconnection_delay_ms)
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(value) = lookup(key) {
        if let Ok(parsed) = value.parse() {
            *target = parsed;
        }
    }
}

/// TLS settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Connect over TLS, preferring a node's secure endpoint when it has one.
    #[serde(default)]
    pub enabled: bool,
    /// PEM-encoded CA certificate(s). Falls back to the webpki roots.
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
    /// Name to verify the server certificate against. Defaults to the node IP.
    #[serde(default)]
    pub server_name: Option<String>,
}

impl TlsSettings {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(enabled) = lookup("EVSTORE_TLS") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Some(path) = lookup("EVSTORE_TLS_CA") {
            self.ca_cert_path = Some(PathBuf::from(path));
        }
        if let Some(name) = lookup("EVSTORE_TLS_SERVER_NAME") {
            self.server_name = Some(name);
        }
    }

    /// Validates TLS settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if let Some(path) = &self.ca_cert_path {
            if !path.exists() {
                return Err(ConfigError::ValidationError(format!(
                    "TLS CA file '{}' does not exist",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Settings error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read settings file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse settings file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "settings validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
