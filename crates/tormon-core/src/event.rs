//! Measurement events and their InfluxDB line-protocol encoding.

use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Serialize, Serializer};

use crate::error::SinkError;
use crate::normalize::{Fields, Value};

/// Tags attached to every event. Sorted, which is also the order InfluxDB
/// prefers on the wire.
pub type Tags = BTreeMap<String, String>;

/// One timestamped, tagged group of fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeasurementEvent {
    pub measurement: String,
    pub tags: Tags,
    #[serde(serialize_with = "serialize_time")]
    pub time: DateTime<Utc>,
    pub fields: Fields,
}

fn serialize_time<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(time))
}

/// RFC3339 UTC with millisecond precision, e.g. `2024-05-01T12:00:00.123Z`.
#[must_use]
pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl MeasurementEvent {
    /// Event stamped with the current time.
    #[must_use]
    pub fn new(measurement: impl Into<String>, tags: Tags, fields: Fields) -> Self {
        Self::at(measurement, tags, fields, Utc::now())
    }

    /// Event stamped with `time`, truncated to milliseconds.
    #[must_use]
    pub fn at(
        measurement: impl Into<String>,
        tags: Tags,
        fields: Fields,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            measurement: measurement.into(),
            tags,
            time: time.trunc_subsecs(3),
            fields,
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> String {
        format_timestamp(&self.time)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Encode as one line of InfluxDB line protocol with a millisecond
    /// timestamp. Tags with empty values are left out.
    pub fn to_line_protocol(&self) -> Result<String, SinkError> {
        if self.measurement.is_empty() {
            return Err(SinkError::Encode("empty measurement name".into()));
        }
        if self.fields.is_empty() {
            return Err(SinkError::Encode(format!(
                "{}: event has no fields",
                self.measurement
            )));
        }

        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            if key.is_empty() || value.is_empty() {
                continue;
            }
            let _ = write!(
                line,
                ",{}={}",
                escape(key, KEY_SPECIALS),
                escape(value, KEY_SPECIALS)
            );
        }

        let mut sep = ' ';
        for (key, value) in &self.fields {
            line.push(sep);
            sep = ',';
            line.push_str(&escape(key, KEY_SPECIALS));
            line.push('=');
            line.push_str(&field_value(value));
        }

        let _ = write!(line, " {}", self.time.timestamp_millis());
        Ok(line)
    }
}

const KEY_SPECIALS: &[char] = &[',', '=', ' '];

fn escape(raw: &str, specials: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if specials.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn field_value(value: &Value) -> String {
    match value {
        Value::Integer(n) => format!("{n}i"),
        Value::Text(s) | Value::Json(s) => format!("\"{}\"", escape(s, &['\\', '"'])),
    }
}
