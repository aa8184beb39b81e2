/// Utility functions for timestamps and device liveness
use time::format_description::{self, well_known::Rfc3339};
use time::{Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::models::DeviceStatus;

/// Devices seen within this window are online
pub const ONLINE_WINDOW: Duration = Duration::minutes(5);
/// Devices seen within this window (but not the online one) are in warning
pub const WARNING_WINDOW: Duration = Duration::minutes(15);

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    format_description::parse("[day].[month].[year] - [hour]:[minute]:[second]")
        .ok()
        .and_then(|format| dt.format(&format).ok())
        .unwrap_or_else(|| dt.to_string())
}

/// Naive ISO-8601 layouts sent by the server, with and without a fraction
const NAIVE_FORMATS: [&str; 2] = [
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]",
    "[year]-[month]-[day]T[hour]:[minute]:[second]",
];

/// Parse a wire timestamp
///
/// The server emits both RFC 3339 strings and naive ISO-8601 wall-clock
/// timestamps (`2024-05-01T10:15:00.123456`); naive ones are read at
/// `naive_offset`, the server's UTC offset.
pub fn parse_timestamp(value: &str, naive_offset: UtcOffset) -> Option<OffsetDateTime> {
    let value = value.trim();
    if let Ok(dt) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(dt);
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|layout| {
            let format = format_description::parse(layout).ok()?;
            PrimitiveDateTime::parse(value, &format).ok()
        })
        .map(|naive| naive.assume_offset(naive_offset))
}

/// Parse a UTC offset setting such as `+07:00`, `-03:30`, `Z` or `UTC`
pub fn parse_utc_offset(value: &str) -> Option<UtcOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return Some(UtcOffset::UTC);
    }

    let format =
        format_description::parse("[offset_hour sign:mandatory]:[offset_minute]").ok()?;
    UtcOffset::parse(value, &format).ok()
}

/// Derive a device status from how long ago it was last seen
///
/// Each band includes its lower bound: exactly five minutes is already
/// a warning, exactly fifteen is offline.
pub fn derive_status(last_seen: Option<OffsetDateTime>, now: OffsetDateTime) -> DeviceStatus {
    let Some(last_seen) = last_seen else {
        return DeviceStatus::Offline;
    };

    let age = now - last_seen;
    if age < ONLINE_WINDOW {
        DeviceStatus::Online
    } else if age < WARNING_WINDOW {
        DeviceStatus::Warning
    } else {
        DeviceStatus::Offline
    }
}

/// Cow number printed on the tag, derived from ids like `DEV003`
pub fn cow_id_from_device_id(device_id: &str) -> String {
    device_id.replace("DEV", "")
}
