pub mod record;
pub mod session;
pub mod user;
pub mod worker;

pub use record::{
    CalendarEvent, Document, JapaneseProficiency, Milestone, MilestoneStatus, Notification,
    ProgressRecord, RecordBody, RecordKind, RecordScope, SkillTraining, StoredRecord, TrainingMenu,
};
pub use session::{
    KpiScore, KpiSnapshot, OperationLog, Position, SessionClosed, SessionFilter, SessionFinish,
    SessionStatus, TrainingSession,
};
pub use user::{NewUser, Role, User};
pub use worker::{Worker, WorkerInput};

use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Accepts `YYYY-MM-DD` or a full timestamp and keeps the calendar date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    parse_datetime(s).map(|dt| dt.date())
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM[:SS]` (with `T` or a space) or a bare date at midnight.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Serde adapters for the lenient date formats above.
pub(crate) mod lenient {
    use chrono::{NaiveDate, NaiveDateTime};
    use serde::{de::Error, Deserialize, Deserializer};

    pub mod date {
        use super::*;

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
            let s = String::deserialize(d)?;
            crate::models::parse_date(&s)
                .ok_or_else(|| D::Error::custom(format!("invalid date: {s}")))
        }
    }

    pub mod opt_date {
        use super::*;

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDate>, D::Error> {
            match Option::<String>::deserialize(d)? {
                None => Ok(None),
                Some(s) if s.trim().is_empty() => Ok(None),
                Some(s) => crate::models::parse_date(&s)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("invalid date: {s}"))),
            }
        }
    }

    pub mod datetime {
        use super::*;

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
            let s = String::deserialize(d)?;
            crate::models::parse_datetime(&s)
                .ok_or_else(|| D::Error::custom(format!("invalid datetime: {s}")))
        }
    }

    pub mod opt_datetime {
        use super::*;

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<NaiveDateTime>, D::Error> {
            match Option::<String>::deserialize(d)? {
                None => Ok(None),
                Some(s) if s.trim().is_empty() => Ok(None),
                Some(s) => crate::models::parse_datetime(&s)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("invalid datetime: {s}"))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_variants() {
        let d = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        assert_eq!(parse_date("2025-03-09"), Some(d));
        assert_eq!(parse_date("2025-03-09T17:30:00"), Some(d));
        assert_eq!(parse_date("2025-03-09T17:30:00+00:00"), Some(d));
        assert_eq!(parse_date("09/03/2025"), None);
    }

    #[test]
    fn test_parse_datetime_bare_date_is_midnight() {
        let dt = parse_datetime("2025-03-09").unwrap();
        assert_eq!(dt.format("%H:%M:%S").to_string(), "00:00:00");
        assert!(parse_datetime("2025-03-09 08:15").is_some());
    }
}
