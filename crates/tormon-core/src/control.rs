//! Tor control-port client.
//!
//! [`ControlClient`] is the seam the rest of the crate talks to: it can
//! authenticate a session and answer `GETINFO` queries. [`TorControlClient`]
//! implements it over a single TCP connection speaking the line-based control
//! protocol:
//!
//! ```text
//! C: AUTHENTICATE "secret"
//! S: 250 OK
//! C: GETINFO traffic/read
//! S: 250-traffic/read=123456
//! S: 250 OK
//! C: GETINFO ns/id/ABCD
//! S: 250+ns/id/ABCD=
//! S: r moria1 ...
//! S: s Fast Running Valid
//! S: .
//! S: 250 OK
//! ```
//!
//! The connection is shared by every job. Command/reply pairs are serialized
//! behind an async mutex; a connection that failed, or on which the relay
//! rejected `AUTHENTICATE` (Tor hangs up after that), is dropped and reopened
//! on the next command.

use std::fmt;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::ControlError;

/// Status code the relay uses for a rejected credential.
pub const AUTH_REJECTED: u16 = 515;

/// Control future type.
pub type ControlFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ControlError>> + Send + 'a>>;

/// Async control-port interface.
pub trait ControlClient: Send + Sync {
    /// Authenticate the current session.
    fn authenticate<'a>(&'a self, credential: &'a Credential) -> ControlFuture<'a, ()>;

    /// Raw value of a `GETINFO` key.
    fn get_info<'a>(&'a self, key: &'a str) -> ControlFuture<'a, String>;
}

/// Control-port credential.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Credential {
    /// No authentication configured on the relay.
    #[default]
    None,
    /// `HashedControlPassword` authentication.
    Password(String),
    /// `CookieAuthentication`; the cookie file is read on every attempt.
    Cookie(PathBuf),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::Cookie(path) => f.debug_tuple("Cookie").field(path).finish(),
        }
    }
}

impl Credential {
    /// Build the full `AUTHENTICATE` command line (without CRLF).
    pub async fn authenticate_command(&self) -> Result<String, ControlError> {
        match self {
            Self::None => Ok("AUTHENTICATE".to_string()),
            Self::Password(password) => Ok(format!("AUTHENTICATE {}", quote(password))),
            Self::Cookie(path) => {
                let cookie = tokio::fs::read(path)
                    .await
                    .map_err(|source| ControlError::Cookie {
                        path: path.display().to_string(),
                        source,
                    })?;
                Ok(format!("AUTHENTICATE {}", hex::encode_upper(cookie)))
            }
        }
    }
}

/// Quote a string argument, escaping `\` and `"`.
#[must_use]
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ch == '\\' || ch == '"' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

// =============================================================================
// Reply framing
// =============================================================================

/// Separator after the status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// `NNN-` more lines follow
    Mid,
    /// `NNN+` a dot-terminated data block follows
    Data,
    /// `NNN ` last line of the reply
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    pub code: u16,
    pub kind: LineKind,
    pub text: String,
    /// Body of a data block, lines joined with `\n`.
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControlReply {
    pub lines: Vec<ReplyLine>,
}

impl ControlReply {
    /// Status code of the final line.
    #[must_use]
    pub fn code(&self) -> u16 {
        self.lines.last().map_or(0, |line| line.code)
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.code())
    }

    /// Text of the final line.
    #[must_use]
    pub fn message(&self) -> &str {
        self.lines.last().map_or("", |line| line.text.as_str())
    }

    /// Value for `key` in a `GETINFO` reply.
    #[must_use]
    pub fn getinfo_value(&self, key: &str) -> Option<String> {
        self.lines.iter().find_map(|line| {
            let (name, value) = line.text.split_once('=')?;
            if name != key {
                return None;
            }
            match (&line.kind, &line.data) {
                (LineKind::Data, Some(data)) => Some(data.clone()),
                _ => Some(value.to_string()),
            }
        })
    }
}

/// Split a reply line into status code, separator, and text.
pub fn parse_line(line: &str) -> Result<(u16, LineKind, &str), ControlError> {
    let malformed = || ControlError::MalformedReply(line.to_string());
    if line.len() < 4 || !line.is_char_boundary(3) || !line.is_char_boundary(4) {
        return Err(malformed());
    }
    let (code, rest) = line.split_at(3);
    if !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let code = code.parse::<u16>().map_err(|_| malformed())?;
    let kind = match rest.as_bytes()[0] {
        b'-' => LineKind::Mid,
        b'+' => LineKind::Data,
        b' ' => LineKind::End,
        _ => return Err(malformed()),
    };
    Ok((code, kind, &rest[1..]))
}

async fn read_trimmed<R>(reader: &mut R, buf: &mut String) -> Result<(), ControlError>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_line(buf).await? == 0 {
        return Err(ControlError::Disconnected);
    }
    let trimmed = buf.trim_end_matches(['\r', '\n']).len();
    buf.truncate(trimmed);
    Ok(())
}

/// Read one complete reply.
pub async fn read_reply<R>(reader: &mut R) -> Result<ControlReply, ControlError>
where
    R: AsyncBufRead + Unpin,
{
    let mut reply = ControlReply::default();
    let mut buf = String::new();

    loop {
        read_trimmed(reader, &mut buf).await?;
        let (code, kind, text) = parse_line(&buf)?;
        let mut line = ReplyLine {
            code,
            kind,
            text: text.to_string(),
            data: None,
        };

        if kind == LineKind::Data {
            let mut data = Vec::new();
            loop {
                read_trimmed(reader, &mut buf).await?;
                if buf == "." {
                    break;
                }
                let body = buf.strip_prefix('.').filter(|s| s.starts_with('.'));
                data.push(body.unwrap_or(&buf).to_string());
            }
            line.data = Some(data.join("\n"));
        }

        reply.lines.push(line);
        if kind == LineKind::End {
            return Ok(reply);
        }
    }
}

// =============================================================================
// TCP client
// =============================================================================

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn exchange(&mut self, command: &str) -> Result<ControlReply, ControlError> {
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        read_reply(&mut self.reader).await
    }
}

/// [`ControlClient`] over one TCP control connection.
pub struct TorControlClient {
    addr: String,
    timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

impl TorControlClient {
    /// Connect to the control port. Fails if the endpoint is unreachable or
    /// does not accept the connection within `timeout`.
    pub async fn connect(addr: impl Into<String>, timeout: Duration) -> Result<Self, ControlError> {
        let addr = addr.into();
        let conn = Self::open(&addr, timeout).await?;
        debug!(addr = %addr, "Connected to control port");
        Ok(Self {
            addr,
            timeout,
            conn: Mutex::new(Some(conn)),
        })
    }

    async fn open(addr: &str, timeout: Duration) -> Result<Connection, ControlError> {
        let stream = connect_within(addr, timeout, TcpStream::connect(addr)).await?;
        let (read, write) = stream.into_split();
        Ok(Connection {
            reader: BufReader::new(read),
            writer: write,
        })
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one command and read its reply.
    pub async fn command(&self, command: &str) -> Result<ControlReply, ControlError> {
        self.round_trip(command, false).await
    }

    /// Send one command; the connection is dropped on a non-2xx reply.
    async fn round_trip(
        &self,
        command: &str,
        close_unless_ok: bool,
    ) -> Result<ControlReply, ControlError> {
        let verb = command.split_whitespace().next().unwrap_or_default();
        let mut guard = self.conn.lock().await;

        if guard.is_none() {
            *guard = Some(Self::open(&self.addr, self.timeout).await?);
            debug!(addr = %self.addr, "Reopened control connection");
        }
        let Some(conn) = guard.as_mut() else {
            return Err(ControlError::Disconnected);
        };

        match tokio::time::timeout(self.timeout, conn.exchange(command)).await {
            Ok(Ok(reply)) => {
                if close_unless_ok && !reply.is_ok() {
                    // The relay hangs up after rejecting a command of this kind.
                    debug!(verb, code = reply.code(), "Closing control connection after rejection");
                    *guard = None;
                }
                Ok(reply)
            }
            Ok(Err(err)) => {
                if matches!(
                    err,
                    ControlError::Io(_) | ControlError::Disconnected | ControlError::MalformedReply(_)
                ) {
                    warn!(verb, error = %err, "Dropping control connection");
                    *guard = None;
                }
                Err(err)
            }
            Err(_) => {
                warn!(verb, timeout_secs = self.timeout.as_secs(), "Control command timed out");
                *guard = None;
                Err(ControlError::Timeout(self.timeout.as_secs()))
            }
        }
    }
}

/// Await `connecting`, giving up after `timeout`.
async fn connect_within<F>(addr: &str, timeout: Duration, connecting: F) -> Result<TcpStream, ControlError>
where
    F: Future<Output = io::Result<TcpStream>>,
{
    let result = match tokio::time::timeout(timeout, connecting).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no answer within {}s", timeout.as_secs()),
        )),
    };
    result.map_err(|source| ControlError::Connect {
        addr: addr.to_string(),
        source,
    })
}

impl fmt::Debug for TorControlClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TorControlClient")
            .field("addr", &self.addr)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ControlClient for TorControlClient {
    fn authenticate<'a>(&'a self, credential: &'a Credential) -> ControlFuture<'a, ()> {
        Box::pin(async move {
            let command = credential.authenticate_command().await?;
            let reply = self.round_trip(&command, true).await?;
            match reply.code() {
                code if (200..300).contains(&code) => Ok(()),
                AUTH_REJECTED => Err(ControlError::AuthenticationFailed(
                    reply.message().to_string(),
                )),
                code => Err(ControlError::Rejected {
                    code,
                    message: reply.message().to_string(),
                }),
            }
        })
    }

    fn get_info<'a>(&'a self, key: &'a str) -> ControlFuture<'a, String> {
        Box::pin(async move {
            let reply = self.command(&format!("GETINFO {key}")).await?;
            if !reply.is_ok() {
                return Err(ControlError::Rejected {
                    code: reply.code(),
                    message: reply.message().to_string(),
                });
            }
            reply
                .getinfo_value(key)
                .ok_or_else(|| ControlError::MissingKey(key.to_string()))
        })
    }
}
