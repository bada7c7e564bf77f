//! Configuration for the tormon daemon
//!
//! Loaded from an optional TOML file; the binary then applies CLI flags and
//! environment variables on top and calls [`DaemonConfig::validate`].
//!
//! ```toml
//! fingerprint = "9695DFC35FFEB861329B9F1AB04C46397020CE31"
//!
//! [sink]
//! host = "localhost"
//! port = 8086
//! database = "tor"
//!
//! [control]
//! host = "127.0.0.1"
//! port = 9051
//! password = "secret"
//!
//! [tags]
//! host = "relay1"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::control::Credential;
use crate::error::ConfigError;
use crate::event::Tags;
use crate::logging::LogConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Fingerprint of the monitored relay, used for `ns/id/<fingerprint>`
    #[serde(default)]
    pub fingerprint: String,

    /// Metrics store settings
    #[serde(default)]
    pub sink: SinkConfig,

    /// Control port settings
    #[serde(default)]
    pub control: ControlConfig,

    /// Tags attached to every event
    #[serde(default)]
    pub tags: Tags,

    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
}

/// InfluxDB settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_sink_host")]
    pub host: String,

    #[serde(default = "default_sink_port")]
    pub port: u16,

    #[serde(default = "default_database")]
    pub database: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            host: default_sink_host(),
            port: default_sink_port(),
            database: default_database(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl SinkConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_sink_host() -> String {
    "localhost".to_string()
}

fn default_sink_port() -> u16 {
    8086
}

fn default_database() -> String {
    "tor".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

/// Tor control port settings
#[derive(Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_host")]
    pub host: String,

    #[serde(default = "default_control_port")]
    pub port: u16,

    /// Control port password (`HashedControlPassword`)
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Path to `control_auth_cookie` (`CookieAuthentication`)
    #[serde(default)]
    pub cookie_file: Option<PathBuf>,

    /// Per-command timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            host: default_control_host(),
            port: default_control_port(),
            password: None,
            cookie_file: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl fmt::Debug for ControlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("cookie_file", &self.cookie_file)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ControlConfig {
    /// `host:port`, bracketing bare IPv6 addresses.
    #[must_use]
    pub fn addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    #[must_use]
    pub fn credential(&self) -> Credential {
        match (&self.password, &self.cookie_file) {
            (Some(password), _) => Credential::Password(password.clone()),
            (None, Some(path)) => Credential::Cookie(path.clone()),
            (None, None) => Credential::None,
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_control_host() -> String {
    "127.0.0.1".to_string()
}

fn default_control_port() -> u16 {
    9051
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected one of: pretty, json")),
        }
    }
}

impl DaemonConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject configurations the daemon cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fingerprint = self.fingerprint.trim();
        if fingerprint.is_empty() {
            return Err(ConfigError::Missing("fingerprint"));
        }
        if fingerprint.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(ConfigError::Invalid {
                field: "fingerprint",
                reason: format!("{fingerprint:?} is not a relay fingerprint"),
            });
        }

        if self.sink.host.trim().is_empty() {
            return Err(ConfigError::Missing("sink.host"));
        }
        if self.sink.database.trim().is_empty() {
            return Err(ConfigError::Missing("sink.database"));
        }
        if self.sink.port == 0 {
            return Err(invalid_port("sink.port"));
        }
        if self.sink.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "sink.timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.control.host.trim().is_empty() {
            return Err(ConfigError::Missing("control.host"));
        }
        if self.control.port == 0 {
            return Err(invalid_port("control.port"));
        }
        if self.control.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "control.timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.control.password.is_some() && self.control.cookie_file.is_some() {
            return Err(ConfigError::Invalid {
                field: "control",
                reason: "password and cookie_file are mutually exclusive".to_string(),
            });
        }

        if let Err(err) = tracing_subscriber::EnvFilter::try_new(&self.log.level) {
            return Err(ConfigError::Invalid {
                field: "log.level",
                reason: err.to_string(),
            });
        }

        Ok(())
    }
}

fn invalid_port(field: &'static str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: "port must be between 1 and 65535".to_string(),
    }
}
