//! Error types for tormon-core

use std::fmt::Write;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a diagnostic command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for tormon-core
#[derive(Error, Debug)]
pub enum Error {
    /// Control port errors after (or while) talking to the relay
    #[error("Tor control error: {0}")]
    Control(#[from] ControlError),

    /// Authentication did not succeed within the retry budget
    #[error("Authentication failed after {attempts} attempts: {last_error}")]
    AuthExhausted { attempts: u32, last_error: String },

    /// A control response did not have the expected shape for its query
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Metrics sink errors
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A job tick panicked
    #[error("Task panicked: {0}")]
    Panicked(String),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Control(err) => Some(err.remediation()),
            Self::AuthExhausted { .. } => Some(
                Remediation::new(
                    "Check the control port credential and that the relay finished starting.",
                )
                .command("Check cookie auth", "grep -i CookieAuthentication /etc/tor/torrc")
                .command("Hash a password", "tor --hash-password <password>")
                .alternative("Set TORCONTROL_PASSWORD or TORCONTROL_COOKIE_FILE, not both."),
            ),
            Self::Parse(_) => Some(
                Remediation::new("The relay returned an unexpected response; verify its version.")
                    .command("Check version", "tor --version"),
            ),
            Self::Sink(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Json(_) | Self::Panicked(_) => None,
        }
    }

    /// Whether this error is recovered at the job boundary (tick skipped).
    #[must_use]
    pub fn is_tick_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Control(_) | Self::AuthExhausted { .. } | Self::Parse(_) | Self::Panicked(_)
        )
    }
}

/// Control-port errors (transport and protocol level)
#[derive(Error, Debug)]
pub enum ControlError {
    /// The control endpoint could not be reached
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O failure on an established connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The relay closed the connection
    #[error("control connection closed by peer")]
    Disconnected,

    /// The command timed out
    #[error("control command timed out after {0} seconds")]
    Timeout(u64),

    /// The relay rejected the credential (status 515)
    #[error("authentication rejected: {0}")]
    AuthenticationFailed(String),

    /// The relay answered with a non-2xx status
    #[error("command rejected with status {code}: {message}")]
    Rejected { code: u16, message: String },

    /// A reply line did not follow the control protocol framing
    #[error("malformed reply line: {0:?}")]
    MalformedReply(String),

    /// GETINFO succeeded but the reply did not contain the requested key
    #[error("reply did not contain key {0:?}")]
    MissingKey(String),

    /// The authentication cookie file could not be read
    #[error("could not read cookie file {path}: {source}")]
    Cookie {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ControlError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Connect { addr, .. } => {
                Remediation::new(format!("Make sure the relay exposes its control port at {addr}."))
                    .command("Check listener", "ss -ltnp | grep 9051")
                    .alternative("Add `ControlPort 9051` to torrc and reload tor.")
            }
            Self::Io(_) | Self::Disconnected | Self::Timeout(_) => {
                Remediation::new("The control connection dropped; it is re-established on the next query.")
                    .command("Check tor status", "systemctl status tor")
            }
            Self::AuthenticationFailed(_) | Self::Cookie { .. } => Remediation::new(
                "Check the control port credential.",
            )
            .command("Hash a password", "tor --hash-password <password>")
            .alternative("Use TORCONTROL_COOKIE_FILE with the relay's control_auth_cookie."),
            Self::Rejected { .. } | Self::MalformedReply(_) | Self::MissingKey(_) => {
                Remediation::new("The relay rejected or garbled a request; verify its version.")
                    .command("Check version", "tor --version")
            }
        }
    }
}

/// Response normalization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Router status had no `s ` flags line
    #[error("router status has no flags line")]
    MissingFlags,

    /// Router status had no `Bandwidth=<digits>` token
    #[error("router status has no Bandwidth= token")]
    MissingBandwidth,

    /// An integer-valued query returned something else
    #[error("{key}: expected an integer, got {raw:?}")]
    InvalidInteger { key: String, raw: String },

    /// A query produced a different shape than the caller asked for
    #[error("{key}: unexpected response shape")]
    UnexpectedShape { key: String },
}

/// Metrics sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with a non-2xx status
    #[error("request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The event could not be encoded
    #[error("could not encode event: {0}")]
    Encode(String),
}

impl SinkError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Http(_) => Remediation::new("Make sure InfluxDB is running and reachable.")
                .command("Ping InfluxDB", "curl -i http://localhost:8086/ping")
                .alternative("Set INFLUX_HOST/INFLUX_PORT to the right address."),
            Self::Rejected { .. } => {
                Remediation::new("InfluxDB rejected the request; check credentials and database.")
                    .command("List databases", "influx -execute 'SHOW DATABASES'")
            }
            Self::Encode(_) => Remediation::new("A field value could not be encoded."),
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("could not read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Missing(field) => Remediation::new(format!("Provide `{field}`."))
                .command("Show options", "tormon --help")
                .alternative("Set it in the TOML file passed with --config."),
            Self::Invalid { field, .. } => Remediation::new(format!("Fix the value of `{field}`."))
                .command("Show options", "tormon --help"),
            Self::Read { path, .. } => {
                Remediation::new(format!("Check that {path} exists and is readable."))
            }
            Self::Parse(_) => Remediation::new("Fix the TOML syntax of the config file."),
        }
    }
}

/// Format an error with remediation text when available.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    match error.remediation() {
        Some(remediation) => format!("Error: {error}\n\n{}", remediation.render_plain()),
        None => format!("Error: {error}"),
    }
}
