//! Timestamp utilities: timezone aware "now", UTC conversion and the text
//! form used in log lines and where clauses.

use crate::errors::ConfigError;
use chrono::{DateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::str::FromStr;

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Text format for timestamps, e.g. `2024-03-27 04:15:00`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parses an IANA timezone name such as `Australia/Brisbane`.
pub fn parse_timezone(name: &str) -> Result<Tz, ConfigError> {
    Tz::from_str(name.trim()).map_err(|_| ConfigError::UnknownTimezone(name.to_string()))
}

/// Returns the current time in the named timezone.
pub fn now_in_timezone(name: &str) -> Result<DateTime<Tz>, ConfigError> {
    let tz = parse_timezone(name)?;
    Ok(Utc::now().with_timezone(&tz))
}

/// Converts any timezone aware timestamp to UTC.
#[must_use]
pub fn to_utc<Z: TimeZone>(dt: &DateTime<Z>) -> Timestamp {
    dt.with_timezone(&Utc)
}

/// Drops sub-second precision.
#[must_use]
pub fn truncate_to_seconds(dt: Timestamp) -> Timestamp {
    dt.with_nanosecond(0).unwrap_or(dt)
}

/// The anchor time for one pipeline run: now in the source timezone, as UTC,
/// at whole-second precision so stores that keep seconds compare equal.
pub fn process_time(timezone: &str) -> Result<Timestamp, ConfigError> {
    let now = now_in_timezone(timezone)?;
    Ok(truncate_to_seconds(to_utc(&now)))
}

/// Formats a timestamp as `%Y-%m-%d %H:%M:%S`.
#[must_use]
pub fn timestamp_text(dt: &Timestamp) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}
