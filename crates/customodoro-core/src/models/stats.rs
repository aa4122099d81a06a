use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Storage key format for day buckets.
pub const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// Completed session type counted in a day bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Classic,
    Reverse,
    Break,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Classic => "classic",
            SessionKind::Reverse => "reverse",
            SessionKind::Break => "break",
        }
    }

    /// Classic and reverse sessions are focus time; breaks are not.
    pub fn is_focus(&self) -> bool {
        !matches!(self, SessionKind::Break)
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "classic" => Ok(SessionKind::Classic),
            "reverse" => Ok(SessionKind::Reverse),
            "break" => Ok(SessionKind::Break),
            other => Err(format!("unknown session kind: {other}")),
        }
    }
}

/// Per-local-day aggregate of completed sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct DailyStatRecord {
    #[serde(default)]
    pub classic: u32,
    #[serde(default)]
    pub reverse: u32,
    #[serde(default, rename = "break")]
    pub breaks: u32,
    #[serde(default)]
    pub total_minutes: f64,
    #[serde(default, rename = "lastUpdate", skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    /// Fields written by other app versions, carried through rewrites.
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: Map<String, Value>,
}

impl DailyStatRecord {
    /// Count one finished session of `kind` and add its minutes.
    ///
    /// Counts stop at `u32::MAX`.
    pub fn record(&mut self, kind: SessionKind, minutes: f64, now: DateTime<Utc>) {
        let count = match kind {
            SessionKind::Classic => &mut self.classic,
            SessionKind::Reverse => &mut self.reverse,
            SessionKind::Break => &mut self.breaks,
        };
        *count = count.saturating_add(1);
        self.total_minutes += minutes;
        self.last_update = Some(now);
    }

    /// This record with another day's record folded in, or `None` if a
    /// count would overflow.
    ///
    /// Counts and minutes are summed; the later of the two update
    /// timestamps wins. Unknown fields of `self` take precedence.
    pub fn merged(&self, other: &DailyStatRecord) -> Option<DailyStatRecord> {
        let mut extra = self.extra.clone();
        for (key, value) in &other.extra {
            extra.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Some(DailyStatRecord {
            classic: self.classic.checked_add(other.classic)?,
            reverse: self.reverse.checked_add(other.reverse)?,
            breaks: self.breaks.checked_add(other.breaks)?,
            total_minutes: self.total_minutes + other.total_minutes,
            last_update: match (self.last_update, other.last_update) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            },
            extra,
        })
    }

    pub fn focus_sessions(&self) -> u32 {
        self.classic.saturating_add(self.reverse)
    }
}

/// The decoded stats store, keyed by local calendar date.
pub type DailyStats = BTreeMap<NaiveDate, DailyStatRecord>;

pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

pub fn parse_date_key(key: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(key, DATE_KEY_FORMAT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_increments_matching_kind() {
        let now = Utc.with_ymd_and_hms(2025, 10, 12, 8, 0, 0).unwrap();
        let mut record = DailyStatRecord::default();
        record.record(SessionKind::Classic, 25.0, now);
        record.record(SessionKind::Break, 5.0, now);
        record.record(SessionKind::Reverse, 10.0, now);

        assert_eq!(record.classic, 1);
        assert_eq!(record.breaks, 1);
        assert_eq!(record.reverse, 1);
        assert_eq!(record.total_minutes, 40.0);
        assert_eq!(record.last_update, Some(now));
        assert_eq!(record.focus_sessions(), 2);
    }

    #[test]
    fn test_merge_keeps_later_timestamp() {
        let early = Utc.with_ymd_and_hms(2025, 10, 11, 9, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2025, 10, 12, 9, 0, 0).unwrap();
        let a = DailyStatRecord {
            classic: 2,
            total_minutes: 50.0,
            last_update: Some(late),
            ..Default::default()
        };
        let b = DailyStatRecord {
            classic: 1,
            breaks: 1,
            total_minutes: 20.0,
            last_update: Some(early),
            ..Default::default()
        };
        let a = a.merged(&b).unwrap();
        assert_eq!(a.classic, 3);
        assert_eq!(a.breaks, 1);
        assert_eq!(a.total_minutes, 70.0);
        assert_eq!(a.last_update, Some(late));

        let empty = DailyStatRecord::default().merged(&b).unwrap();
        assert_eq!(empty.last_update, Some(early));
    }

    #[test]
    fn test_merge_refuses_overflowing_counts() {
        let full = DailyStatRecord {
            classic: u32::MAX,
            ..Default::default()
        };
        let one = DailyStatRecord {
            classic: 1,
            ..Default::default()
        };
        assert!(full.merged(&one).is_none());
        assert!(one.merged(&full).is_none());
        assert_eq!(full.merged(&DailyStatRecord::default()).unwrap().classic, u32::MAX);
    }

    #[test]
    fn test_record_saturates_at_max() {
        let now = Utc.with_ymd_and_hms(2025, 10, 12, 8, 0, 0).unwrap();
        let mut record = DailyStatRecord {
            breaks: u32::MAX,
            reverse: u32::MAX,
            classic: 1,
            ..Default::default()
        };
        record.record(SessionKind::Break, 5.0, now);
        assert_eq!(record.breaks, u32::MAX);
        assert_eq!(record.total_minutes, 5.0);
        assert_eq!(record.focus_sessions(), u32::MAX);
    }

    #[test]
    fn test_unknown_fields_survive_rewrite() {
        let json = r#"{"classic":1,"streakBonus":true,"device":{"id":"tab-2"}}"#;
        let mut record: DailyStatRecord = serde_json::from_str(json).unwrap();
        record.record(SessionKind::Classic, 25.0, Utc::now());

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["classic"], 2);
        assert_eq!(value["streakBonus"], true);
        assert_eq!(value["device"]["id"], "tab-2");

        let other: DailyStatRecord =
            serde_json::from_str(r#"{"classic":1,"streakBonus":false,"note":"x"}"#).unwrap();
        let merged = record.merged(&other).unwrap();
        assert_eq!(merged.extra["streakBonus"], true);
        assert_eq!(merged.extra["note"], "x");
    }

    #[test]
    fn test_json_shape() {
        let json = r#"{"classic":2,"reverse":1,"break":3,"total_minutes":62.5,"lastUpdate":"2025-10-11T17:45:00.000Z","streakBonus":true}"#;
        let record: DailyStatRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.breaks, 3);
        assert_eq!(record.total_minutes, 62.5);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["break"], 3);
        assert!(value.get("breaks").is_none());
        assert!(value.get("lastUpdate").is_some());
    }

    #[test]
    fn test_missing_counts_default_to_zero() {
        let record: DailyStatRecord = serde_json::from_str(r#"{"classic":4}"#).unwrap();
        assert_eq!(record.classic, 4);
        assert_eq!(record.reverse, 0);
        assert_eq!(record.total_minutes, 0.0);
        assert!(record.last_update.is_none());
    }

    #[test]
    fn test_session_kind_parse() {
        assert_eq!("Classic".parse::<SessionKind>(), Ok(SessionKind::Classic));
        assert_eq!("break".parse::<SessionKind>(), Ok(SessionKind::Break));
        assert!("nap".parse::<SessionKind>().is_err());
        assert!(!SessionKind::Break.is_focus());
    }

    #[test]
    fn test_date_key_round_trip() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        assert_eq!(date_key(date), "2025-01-05");
        assert_eq!(parse_date_key("2025-01-05").unwrap(), date);
        assert!(parse_date_key("not-a-date").is_err());
    }
}
