use config::ConfigError as ConfigLibError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileReadError(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    ParseError(String),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Config library error: {0}")]
    ConfigLibError(#[from] ConfigLibError),
}

/// Resolved runtime configuration.
///
/// Built once at startup and shared read-only by every session.
#[derive(Deserialize, Clone)]
pub struct Config {
    /// Listen host
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username expected in the RFC 1929 sub-negotiation
    #[serde(default = "default_username")]
    pub username: String,
    /// Password expected in the RFC 1929 sub-negotiation
    #[serde(default = "default_password")]
    pub password: String,
    /// Backend that receives every non-SOCKS5 connection
    #[serde(default = "default_redirect_host")]
    pub redirect_host: String,
    #[serde(default = "default_redirect_port")]
    pub redirect_port: u16,
    /// Keep retrying when the listen address cannot be bound
    #[serde(default, rename = "try_fork")]
    pub retry_on_bind_failure: bool,
    /// Move to the next port on every bind retry
    #[serde(default, rename = "random_port")]
    pub increment_port_on_retry: bool,
    /// Shell commands executed once before the listener starts
    #[serde(default)]
    pub commands: Vec<String>,
    /// Relay chunk size and client read buffer size
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Seconds to wait for the SOCKS5 greeting before falling back to the redirect
    #[serde(default = "default_detect_timeout")]
    pub detect_timeout: u64,
    /// Seconds allowed for method selection, authentication and request
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,
    /// Seconds allowed for name resolution plus TCP connect
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Initial delay between bind attempts, doubled up to `MAX_BIND_RETRY_DELAY`
    #[serde(default = "default_bind_retry_delay_ms")]
    pub bind_retry_delay_ms: u64,
    #[serde(default)]
    pub reuse_address: bool,
    /// Answer `[5, 0xFF]` instead of closing silently when method 2 is not offered
    #[serde(default)]
    pub reject_unsupported_methods: bool,
    /// Log configuration
    #[serde(default)]
    pub log: LoggerConfig,
}

pub const MAX_BIND_RETRY_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize, Clone)]
pub struct LoggerConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path, empty to log to stderr only
    #[serde(default = "default_log_path")]
    pub path: String,
    /// Log file archive pattern
    #[serde(default = "default_archive_pattern")]
    pub archive_pattern: String,
    /// Number of log files to keep
    #[serde(default = "default_file_count")]
    pub file_count: u32,
    /// Size of each log file (MB)
    #[serde(default = "default_file_size")]
    pub file_size: u64,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            path: default_log_path(),
            archive_pattern: default_archive_pattern(),
            file_count: default_file_count(),
            file_size: default_file_size(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: default_username(),
            password: default_password(),
            redirect_host: default_redirect_host(),
            redirect_port: default_redirect_port(),
            retry_on_bind_failure: false,
            increment_port_on_retry: false,
            commands: Vec::new(),
            buffer_size: default_buffer_size(),
            detect_timeout: default_detect_timeout(),
            handshake_timeout: default_handshake_timeout(),
            connect_timeout: default_connect_timeout(),
            bind_retry_delay_ms: default_bind_retry_delay_ms(),
            reuse_address: false,
            reject_unsupported_methods: false,
            log: LoggerConfig::default(),
        }
    }
}

// The password never reaches the logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("redirect_host", &self.redirect_host)
            .field("redirect_port", &self.redirect_port)
            .field("retry_on_bind_failure", &self.retry_on_bind_failure)
            .field("increment_port_on_retry", &self.increment_port_on_retry)
            .field("commands", &self.commands.len())
            .field("buffer_size", &self.buffer_size)
            .field("detect_timeout", &self.detect_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    10883
}

fn default_username() -> String {
    "username".to_string()
}

fn default_password() -> String {
    "password".to_string()
}

fn default_redirect_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redirect_port() -> u16 {
    443
}

/// Default log level
fn default_log_level() -> String {
    "Info".to_string()
}

/// Default log path
fn default_log_path() -> String {
    "logs/socks-trampoline.log".to_string()
}

/// Default archive pattern
fn default_archive_pattern() -> String {
    "logs/archive/socks-trampoline-{}.log".to_string()
}

/// Default file count
fn default_file_count() -> u32 {
    5
}

/// Default file size in MB
fn default_file_size() -> u64 {
    10
}

fn default_buffer_size() -> usize {
    8192
}

fn default_detect_timeout() -> u64 {
    5
}

fn default_handshake_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_bind_retry_delay_ms() -> u64 {
    500
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileReadError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )));
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(ConfigError::ConfigLibError)?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate if configuration is valid
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Listen host cannot be empty".to_string(),
            ));
        }

        if self.redirect_host.is_empty() || self.redirect_port == 0 {
            return Err(ConfigError::InvalidConfig(format!(
                "Invalid redirect address: {}:{}",
                self.redirect_host, self.redirect_port
            )));
        }

        // RFC 1929 carries both fields with a one-byte length
        for (name, value) in [("username", &self.username), ("password", &self.password)] {
            if value.is_empty() || value.len() > 255 {
                return Err(ConfigError::InvalidConfig(format!(
                    "Invalid {} length: {}. Must be between 1 and 255 bytes",
                    name,
                    value.len()
                )));
            }
        }

        if self.buffer_size == 0 || self.buffer_size > 65536 {
            return Err(ConfigError::InvalidConfig(format!(
                "Invalid buffer size: {}. Must be between 1 and 65536",
                self.buffer_size
            )));
        }

        if self.detect_timeout == 0 || self.handshake_timeout == 0 || self.connect_timeout == 0 {
            return Err(ConfigError::InvalidConfig(
                "Timeouts must be at least one second".to_string(),
            ));
        }

        Ok(())
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_secs(self.detect_timeout)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn bind_retry_delay(&self) -> Duration {
        Duration::from_millis(self.bind_retry_delay_ms)
    }
}
