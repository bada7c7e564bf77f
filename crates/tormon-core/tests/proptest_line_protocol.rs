//! Property-based tests for MeasurementEvent encoding.
//!
//! Verifies:
//! - A line always splits into exactly three sections (series, fields,
//!   timestamp) on unescaped, unquoted spaces
//! - Tags appear sorted by key; empty tag values are dropped
//! - Integer fields carry the `i` suffix; string fields unescape back to
//!   the original text
//! - The timestamp is the event time in milliseconds
//! - JSON form always carries an RFC3339 millisecond UTC timestamp

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use tormon_core::event::{MeasurementEvent, Tags};
use tormon_core::normalize::{Fields, Value};

// ────────────────────────────────────────────────────────────────────
// Strategies
// ────────────────────────────────────────────────────────────────────

fn arb_name() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_ ,=]{0,12}"
}

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::Integer),
        "[ -~]{0,24}".prop_map(Value::Text),
        "[ -~]{0,24}".prop_map(|s| Value::Json(format!("{{\"k\":\"{s}\"}}"))),
    ]
}

fn arb_time() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_000_000_000_000).prop_map(|ms| Utc.timestamp_millis_opt(ms).unwrap())
}

fn arb_event() -> impl Strategy<Value = MeasurementEvent> {
    (
        arb_name(),
        proptest::collection::btree_map(arb_name(), "[a-zA-Z0-9 ,=._-]{0,12}", 0..4),
        proptest::collection::btree_map(arb_name(), arb_value(), 1..5),
        arb_time(),
    )
        .prop_map(|(measurement, tags, fields, time)| {
            MeasurementEvent::at(measurement, tags, fields, time)
        })
}

// ────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────

/// Split on spaces that are neither escaped nor inside a quoted string.
fn split_sections(line: &str) -> Vec<String> {
    let mut sections = vec![String::new()];
    let mut escaped = false;
    let mut quoted = false;
    for ch in line.chars() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == '"' {
            quoted = !quoted;
        } else if ch == ' ' && !quoted {
            sections.push(String::new());
            continue;
        }
        sections.last_mut().unwrap().push(ch);
    }
    sections
}

fn unescape_string_field(encoded: &str) -> String {
    let inner = &encoded[1..encoded.len() - 1];
    let mut out = String::new();
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

// ────────────────────────────────────────────────────────────────────
// Properties
// ────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_line_has_three_sections(event in arb_event()) {
        let line = event.to_line_protocol().unwrap();
        let sections = split_sections(&line);
        prop_assert_eq!(sections.len(), 3, "line: {}", line);
        prop_assert_eq!(&sections[2], &event.time.timestamp_millis().to_string());
    }

    #[test]
    fn prop_tags_sorted_and_non_empty(event in arb_event()) {
        let line = event.to_line_protocol().unwrap();
        let kept: Vec<&String> = event
            .tags
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, _)| k)
            .collect();
        let mut last = 0;
        for key in kept {
            let escaped = key.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ");
            let needle = format!(",{escaped}=");
            let pos = line[last..].find(&needle);
            prop_assert!(pos.is_some(), "missing tag {} in {}", key, line);
            last += pos.unwrap() + needle.len();
        }
    }

    #[test]
    fn prop_single_field_value_encoding(value in arb_value(), time in arb_time()) {
        let fields = Fields::from([("v".to_string(), value.clone())]);
        let event = MeasurementEvent::at("m", Tags::new(), fields, time);
        let line = event.to_line_protocol().unwrap();
        let sections = split_sections(&line);
        let encoded = sections[1].strip_prefix("v=").unwrap();

        match value {
            Value::Integer(n) => prop_assert_eq!(encoded, format!("{n}i")),
            Value::Text(s) | Value::Json(s) => {
                prop_assert!(encoded.starts_with('"') && encoded.ends_with('"'));
                prop_assert_eq!(unescape_string_field(encoded), s);
            }
        }
    }

    #[test]
    fn prop_json_timestamp_is_millisecond_utc(event in arb_event()) {
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        let ts = json["time"].as_str().unwrap().to_string();
        prop_assert!(ts.ends_with('Z'), "{}", ts);
        let parsed = DateTime::parse_from_rfc3339(&ts).unwrap();
        prop_assert_eq!(parsed.timestamp_millis(), event.time.timestamp_millis());
        let fraction = ts.rsplit('.').next().unwrap();
        prop_assert_eq!(fraction.len(), 4, "{}", ts);
    }
}
