//! Response normalization: raw control-port text into typed, storable values.
//!
//! Every GETINFO reply is plain text. Which shape it has depends on the key
//! that was asked for, so normalization is keyed by [`QueryKind`]:
//!
//! | Key                                              | Result                         |
//! |--------------------------------------------------|--------------------------------|
//! | `network-liveness`                               | `up` → 1, `down` → 0, else -1  |
//! | `ns/id/<fingerprint>`                            | [`RouterStatus`] (flags + bw)  |
//! | `traffic/read`, `traffic/written`, `dormant`, `uptime` | base-10 integer          |
//! | `entry-guards`                                   | spaces → `:`, newlines → `, `  |
//! | anything else                                    | text, unchanged                |
//!
//! Nothing here performs I/O or holds state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::error::ParseError;

static FLAGS_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^s (.*)$").unwrap());
static BANDWIDTH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Bandwidth=([0-9]+)").unwrap());

/// Keys whose replies are decimal integers.
pub const INTEGER_KEYS: [&str; 4] = ["traffic/read", "traffic/written", "dormant", "uptime"];

/// Number of tracked relay flags.
pub const FLAG_COUNT: usize = 15;

/// A single storable field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Text(String),
    /// A mapping already encoded as a JSON object string.
    Json(String),
}

impl Value {
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Json(s) => Some(s),
            Self::Integer(_) => None,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Fields of one measurement, ordered by name.
pub type Fields = BTreeMap<String, Value>;

/// How a query key's reply must be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    NetworkLiveness,
    RouterStatus,
    Integer,
    EntryGuards,
    Passthrough,
}

impl QueryKind {
    /// Classify a GETINFO key.
    #[must_use]
    pub fn of(key: &str) -> Self {
        if key == "network-liveness" {
            Self::NetworkLiveness
        } else if key.starts_with("ns/id/") {
            Self::RouterStatus
        } else if INTEGER_KEYS.contains(&key) {
            Self::Integer
        } else if key == "entry-guards" {
            Self::EntryGuards
        } else {
            Self::Passthrough
        }
    }
}

/// Relay flags reported in a router status entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayFlag {
    Authority,
    BadExit,
    BadDirectory,
    Exit,
    Fast,
    Guard,
    HSDir,
    Named,
    NoEdConsensus,
    Stable,
    StaleDesc,
    Running,
    Unnamed,
    Valid,
    V2Dir,
}

impl RelayFlag {
    /// Every tracked flag, in emission order.
    pub const ALL: [Self; FLAG_COUNT] = [
        Self::Authority,
        Self::BadExit,
        Self::BadDirectory,
        Self::Exit,
        Self::Fast,
        Self::Guard,
        Self::HSDir,
        Self::Named,
        Self::NoEdConsensus,
        Self::Stable,
        Self::StaleDesc,
        Self::Running,
        Self::Unnamed,
        Self::Valid,
        Self::V2Dir,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Authority => "Authority",
            Self::BadExit => "BadExit",
            Self::BadDirectory => "BadDirectory",
            Self::Exit => "Exit",
            Self::Fast => "Fast",
            Self::Guard => "Guard",
            Self::HSDir => "HSDir",
            Self::Named => "Named",
            Self::NoEdConsensus => "NoEdConsensus",
            Self::Stable => "Stable",
            Self::StaleDesc => "StaleDesc",
            Self::Running => "Running",
            Self::Unnamed => "Unnamed",
            Self::Valid => "Valid",
            Self::V2Dir => "V2Dir",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|flag| flag.as_str() == name)
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for RelayFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence set over [`RelayFlag::ALL`].
///
/// Serializes as an object with one `0`/`1` entry per tracked flag, always in
/// [`RelayFlag::ALL`] order. Flags the relay reports that are not tracked are
/// ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayFlags {
    present: [bool; FLAG_COUNT],
}

impl RelayFlags {
    /// Build from a whitespace-separated flag list (the body of an `s ` line).
    #[must_use]
    pub fn from_list(list: &str) -> Self {
        let mut flags = Self::default();
        for flag in list.split_whitespace().filter_map(RelayFlag::from_name) {
            flags.present[flag.index()] = true;
        }
        flags
    }

    #[must_use]
    pub fn contains(&self, flag: RelayFlag) -> bool {
        self.present[flag.index()]
    }

    /// Flags that are set, in emission order.
    pub fn iter(&self) -> impl Iterator<Item = RelayFlag> + '_ {
        RelayFlag::ALL.into_iter().filter(|flag| self.contains(*flag))
    }

    /// Encode as the JSON object stored in the `srv_flags` field.
    #[must_use]
    pub fn to_json(&self) -> String {
        // Serializing a fixed map of &str -> u8 cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl Serialize for RelayFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FLAG_COUNT))?;
        for flag in RelayFlag::ALL {
            map.serialize_entry(flag.as_str(), &u8::from(self.contains(flag)))?;
        }
        map.end()
    }
}

/// Parsed `ns/id/<fingerprint>` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouterStatus {
    pub flags: RelayFlags,
    pub bandwidth: i64,
}

/// Result of normalizing one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Value(Value),
    RouterStatus(RouterStatus),
}

impl Normalized {
    /// Unwrap a plain field value; router statuses are not a single field.
    pub fn into_value(self, key: &str) -> Result<Value, ParseError> {
        match self {
            Self::Value(value) => Ok(value),
            Self::RouterStatus(_) => Err(ParseError::UnexpectedShape {
                key: key.to_string(),
            }),
        }
    }

    pub fn into_router_status(self, key: &str) -> Result<RouterStatus, ParseError> {
        match self {
            Self::RouterStatus(status) => Ok(status),
            Self::Value(_) => Err(ParseError::UnexpectedShape {
                key: key.to_string(),
            }),
        }
    }
}

/// Normalize the raw reply for `key`.
pub fn normalize(key: &str, raw: &str) -> Result<Normalized, ParseError> {
    let value = match QueryKind::of(key) {
        QueryKind::NetworkLiveness => Value::Integer(normalize_liveness(raw)),
        QueryKind::RouterStatus => return parse_router_status(raw).map(Normalized::RouterStatus),
        QueryKind::Integer => Value::Integer(parse_integer(key, raw)?),
        QueryKind::EntryGuards => Value::Text(normalize_entry_guards(raw)),
        QueryKind::Passthrough => Value::Text(raw.to_string()),
    };
    Ok(Normalized::Value(value))
}

/// `up` → 1, `down` → 0, anything else → -1.
#[must_use]
pub fn normalize_liveness(raw: &str) -> i64 {
    match raw {
        "up" => 1,
        "down" => 0,
        _ => -1,
    }
}

/// Flatten the guard list into one line: spaces become `:`, newlines `, `.
#[must_use]
pub fn normalize_entry_guards(raw: &str) -> String {
    raw.replace(' ', ":").replace('\n', ", ")
}

/// Base-10 integer reply.
pub fn parse_integer(key: &str, raw: &str) -> Result<i64, ParseError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ParseError::InvalidInteger {
            key: key.to_string(),
            raw: raw.to_string(),
        })
}

/// Flags from the first `s ` line of a router status entry.
pub fn parse_flags(status: &str) -> Result<RelayFlags, ParseError> {
    let caps = FLAGS_LINE.captures(status).ok_or(ParseError::MissingFlags)?;
    Ok(RelayFlags::from_list(&caps[1]))
}

/// Value of the first `Bandwidth=<digits>` token.
pub fn parse_bandwidth(status: &str) -> Result<i64, ParseError> {
    let caps = BANDWIDTH
        .captures(status)
        .ok_or(ParseError::MissingBandwidth)?;
    caps[1].parse::<i64>().map_err(|_| ParseError::InvalidInteger {
        key: "Bandwidth".to_string(),
        raw: caps[1].to_string(),
    })
}

pub fn parse_router_status(status: &str) -> Result<RouterStatus, ParseError> {
    Ok(RouterStatus {
        flags: parse_flags(status)?,
        bandwidth: parse_bandwidth(status)?,
    })
}
