//! Wire format helpers
//!
//! Every cross-service payload is line-delimited JSON: one object per line,
//! `\n` separated. Timestamps travel as `YYYY-MM-DDTHH:mm:ssZ` (UTC, second
//! precision) and URLs must be absolute `http://` or `https://` links.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::{Error, Result};

/// Content type used for line-delimited JSON bodies
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Timestamp layout used on the wire
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Render a timestamp in wire format
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a wire-format timestamp
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| Error::InvalidInput(format!("Invalid timestamp '{}': {}", raw, e)))
}

/// Check that a URL carries an http(s) scheme and a non-empty remainder
pub fn is_valid_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    matches!(rest, Some(r) if !r.trim().is_empty())
}

/// Encode items as line-delimited JSON
pub fn to_ndjson<T: Serialize>(items: &[T]) -> Result<String> {
    let mut body = String::new();
    for item in items {
        body.push_str(&serde_json::to_string(item)?);
        body.push('\n');
    }
    Ok(body)
}

/// Decode line-delimited JSON, ignoring blank lines
///
/// A single malformed line fails the whole payload; the error names the
/// 1-based line number.
pub fn from_ndjson<T: DeserializeOwned>(body: &str) -> Result<Vec<T>> {
    body.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|e| {
                Error::InvalidInput(format!("Malformed JSON on line {}: {}", idx + 1, e))
            })
        })
        .collect()
}

/// Serde adapter for wire-format timestamps
///
/// Use with `#[serde(with = "tmon_common::wire::timestamp")]`.
pub mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional wire-format timestamps
pub mod optional_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        ts: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => serializer.serialize_some(&super::format_timestamp(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|r| super::parse_timestamp(&r).map_err(serde::de::Error::custom))
            .transpose()
    }
}
