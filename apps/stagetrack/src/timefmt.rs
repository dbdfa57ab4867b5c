//! # Time Conversion
//!
//! RFC 3339 text at the edges, integer milliseconds inside.

use stagetrack_core::{Timestamp, TrackError};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, Time};

const NANOS_PER_MILLI: i128 = 1_000_000;

fn to_datetime(at: Timestamp) -> Result<OffsetDateTime, TrackError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(at.as_millis()) * NANOS_PER_MILLI)
        .map_err(|e| TrackError::InvalidScan(format!("timestamp out of range: {}", e)))
}

fn from_datetime(dt: OffsetDateTime) -> Timestamp {
    Timestamp((dt.unix_timestamp_nanos() / NANOS_PER_MILLI) as i64)
}

/// Current wall-clock time.
pub fn now() -> Timestamp {
    from_datetime(OffsetDateTime::now_utc())
}

/// Parse an RFC 3339 instant, or a bare integer of milliseconds since the epoch.
pub fn parse_timestamp(text: &str) -> Result<Timestamp, TrackError> {
    let text = text.trim();
    if let Ok(millis) = text.parse::<i64>() {
        return Ok(Timestamp(millis));
    }
    OffsetDateTime::parse(text, &Rfc3339)
        .map(from_datetime)
        .map_err(|e| TrackError::InvalidScan(format!("invalid timestamp '{}': {}", text, e)))
}

/// Parse an optional timestamp, defaulting to now.
pub fn parse_or_now(text: Option<&str>) -> Result<Timestamp, TrackError> {
    text.map_or_else(|| Ok(now()), parse_timestamp)
}

/// Render as RFC 3339 in UTC. Out-of-range values fall back to raw milliseconds.
pub fn format_timestamp(at: Timestamp) -> String {
    to_datetime(at)
        .and_then(|dt| {
            dt.format(&Rfc3339)
                .map_err(|e| TrackError::SerializationError(e.to_string()))
        })
        .unwrap_or_else(|_| at.as_millis().to_string())
}

/// `YYYY-MM-DD` (UTC) of the given instant, used for journal file names.
pub fn day_stamp(at: Timestamp) -> Result<String, TrackError> {
    to_datetime(at)?
        .format(format_description!("[year]-[month]-[day]"))
        .map_err(|e| TrackError::SerializationError(e.to_string()))
}

/// Midnight UTC at the start of the day containing `at`.
pub fn start_of_day(at: Timestamp) -> Result<Timestamp, TrackError> {
    Ok(from_datetime(to_datetime(at)?.replace_time(Time::MIDNIGHT)))
}
