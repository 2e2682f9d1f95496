//! Timestamp encoding for SQLite columns
//!
//! Timestamps are stored as fixed-width RFC 3339 text in UTC with
//! microsecond precision, so lexicographic comparison in SQL equals
//! chronological comparison.

use chrono::{DateTime, SecondsFormat, Utc};
use eventide_core::{Error, Result};

pub(crate) fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn encode_ts_opt(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(encode_ts)
}

pub(crate) fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| Error::Database(format!("Invalid timestamp '{}': {}", raw, e)))
}

pub(crate) fn decode_ts_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| decode_ts(&s)).transpose()
}
