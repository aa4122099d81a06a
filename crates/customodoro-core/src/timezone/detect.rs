use chrono::{DateTime, FixedOffset, NaiveDate, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::error::MigrationError;
use crate::models::{parse_date_key, DailyStatRecord};

/// Offset the stats store was keyed by before zone detection: +05:30.
pub const LEGACY_UTC_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// Hour of the legacy day used when a record carries no usable timestamp.
const LEGACY_ANCHOR_HOUR: u32 = 12;

pub fn legacy_offset() -> FixedOffset {
    FixedOffset::east_opt(LEGACY_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

pub fn parse_timezone(name: &str) -> Option<Tz> {
    name.trim().parse::<Tz>().ok()
}

/// The system's IANA zone, or UTC when it cannot be determined.
pub fn detect_timezone() -> Tz {
    match iana_time_zone::get_timezone() {
        Ok(name) => match parse_timezone(&name) {
            Some(tz) => {
                debug!(timezone = %name, "Detected local time zone");
                tz
            }
            None => {
                warn!(timezone = %name, "Unrecognised time zone, falling back to UTC");
                Tz::UTC
            }
        },
        Err(e) => {
            warn!(error = %e, "Time zone detection failed, falling back to UTC");
            Tz::UTC
        }
    }
}

/// An explicit zone name wins over detection; an invalid one falls back
/// to detection.
pub fn resolve_timezone(explicit: Option<&str>) -> Tz {
    if let Some(name) = explicit {
        match parse_timezone(name) {
            Some(tz) => return tz,
            None => warn!(timezone = %name, "Ignoring invalid configured time zone"),
        }
    }
    detect_timezone()
}

/// Map a legacy day key onto the user's zone.
///
/// The legacy key is a calendar date at the fixed legacy offset. The
/// record's `lastUpdate` pins the instant when it falls on that same legacy
/// date; otherwise noon of that date stands in. The new key is the date of
/// that instant in `tz`.
pub fn rekey(
    old_key: &str,
    record: &DailyStatRecord,
    legacy: FixedOffset,
    tz: Tz,
) -> Result<NaiveDate, MigrationError> {
    let date = parse_date_key(old_key).map_err(|e| MigrationError::InvalidKey {
        key: old_key.to_string(),
        reason: e.to_string(),
    })?;

    let anchor: DateTime<Utc> = match record.last_update {
        Some(ts) if ts.with_timezone(&legacy).date_naive() == date => ts,
        _ => {
            let local = date
                .and_hms_opt(LEGACY_ANCHOR_HOUR, 0, 0)
                .ok_or_else(|| MigrationError::NonexistentInstant(old_key.to_string()))?;
            legacy
                .from_local_datetime(&local)
                .single()
                .ok_or_else(|| MigrationError::NonexistentInstant(old_key.to_string()))?
                .with_timezone(&Utc)
        }
    };

    Ok(anchor.with_timezone(&tz).date_naive())
}
