//! Nanosecond timestamps, their text forms, and calendar field extraction.

use crate::values::ValueError;
use chrono::{DateTime, Datelike, Local, NaiveDateTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

const NANOS_PER_SEC: u64 = 1_000_000_000;
const NANOS_PER_MILLI: u64 = 1_000_000;

/// Date form accepted by the `Timestamp()` builtin, interpreted in local time.
pub const DATE_FORMAT: &str = "%Y/%m/%d:%H:%M:%S";

/// Nanoseconds since the Unix epoch.
///
/// The text form is `@` followed by sixteen upper-case hex digits, which is
/// also the form used when a timestamp is packed into a tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(u64);

/// Calendar fields that can be extracted from a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeField {
    SecondInMinute,
    MinuteInHour,
    HourInDay,
    DayInMonth,
    MonthInYear,
    Year,
    /// Sunday is 0, Saturday is 6.
    DayInWeek,
}

impl Timestamp {
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos().min(u64::MAX as u128) as u64)
            .unwrap_or(0);
        Self(nanos)
    }

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(NANOS_PER_SEC))
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    fn unit(millis: bool) -> u64 {
        if millis {
            NANOS_PER_MILLI
        } else {
            NANOS_PER_SEC
        }
    }

    /// Move the timestamp by `units` seconds (or milliseconds when `millis`
    /// is set). Negative counts move backwards. Saturates at both ends.
    pub fn shift(self, units: i64, millis: bool) -> Self {
        let delta = units.unsigned_abs().saturating_mul(Self::unit(millis));
        if units >= 0 {
            Self(self.0.saturating_add(delta))
        } else {
            Self(self.0.saturating_sub(delta))
        }
    }

    /// Signed difference `self - other` in nanoseconds, clamped to `i64`.
    pub fn diff(self, other: Timestamp) -> i64 {
        let d = self.0 as i128 - other.0 as i128;
        d.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// Parse either the `@hex` form or a `YYYY/MM/DD:hh:mm:ss` local date.
    pub fn parse_date(text: &str) -> Result<Self, ValueError> {
        let text = text.trim();
        if text.starts_with('@') {
            return text.parse();
        }
        let parse_err = || ValueError::Parse {
            what: "date",
            text: text.to_string(),
        };
        let naive = NaiveDateTime::parse_from_str(text, DATE_FORMAT).map_err(|_| parse_err())?;
        let local = Local
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(parse_err)?;
        let nanos = local.timestamp_nanos_opt().ok_or_else(parse_err)?;
        u64::try_from(nanos).map(Self).map_err(|_| parse_err())
    }

    fn local(self) -> DateTime<Local> {
        Local.timestamp_nanos(self.0.min(i64::MAX as u64) as i64)
    }

    pub fn field(self, field: TimeField) -> i64 {
        let t = self.local();
        match field {
            TimeField::SecondInMinute => t.second() as i64,
            TimeField::MinuteInHour => t.minute() as i64,
            TimeField::HourInDay => t.hour() as i64,
            TimeField::DayInMonth => t.day() as i64,
            TimeField::MonthInYear => t.month() as i64,
            TimeField::Year => t.year() as i64,
            TimeField::DayInWeek => t.weekday().num_days_from_sunday() as i64,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:016X}", self.0)
    }
}

impl FromStr for Timestamp {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().strip_prefix('@').ok_or_else(|| ValueError::Parse {
            what: "timestamp",
            text: s.to_string(),
        })?;
        u64::from_str_radix(hex, 16)
            .map(Self)
            .map_err(|_| ValueError::Parse {
                what: "timestamp",
                text: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_form_round_trips() {
        let ts = Timestamp::from_nanos(0x1234_5678_9ABC_DEF0);
        assert_eq!(ts.to_string(), "@123456789ABCDEF0");
        assert_eq!("@123456789ABCDEF0".parse::<Timestamp>().unwrap(), ts);
    }

    #[test]
    fn rejects_text_without_marker() {
        assert!("123".parse::<Timestamp>().is_err());
        assert!("@xyz".parse::<Timestamp>().is_err());
    }

    #[test]
    fn shift_moves_both_directions() {
        let ts = Timestamp::from_secs(100);
        assert_eq!(ts.shift(5, false), Timestamp::from_secs(105));
        assert_eq!(ts.shift(-5, false), Timestamp::from_secs(95));
        assert_eq!(ts.shift(250, true).as_nanos(), 100_250_000_000);
        assert_eq!(Timestamp::from_secs(1).shift(-10, false), Timestamp::from_nanos(0));
    }

    #[test]
    fn diff_is_signed() {
        let a = Timestamp::from_secs(10);
        let b = Timestamp::from_secs(4);
        assert_eq!(a.diff(b), 6_000_000_000);
        assert_eq!(b.diff(a), -6_000_000_000);
    }

    #[test]
    fn parse_date_matches_local_fields() {
        let ts = Timestamp::parse_date("2023/11/29:13:45:07").unwrap();
        assert_eq!(ts.field(TimeField::Year), 2023);
        assert_eq!(ts.field(TimeField::MonthInYear), 11);
        assert_eq!(ts.field(TimeField::DayInMonth), 29);
        assert_eq!(ts.field(TimeField::HourInDay), 13);
        assert_eq!(ts.field(TimeField::MinuteInHour), 45);
        assert_eq!(ts.field(TimeField::SecondInMinute), 7);
        // 29 November 2023 was a Wednesday.
        assert_eq!(ts.field(TimeField::DayInWeek), 3);
    }

    #[test]
    fn parse_date_accepts_hex_form() {
        let ts = Timestamp::parse_date("@0000000000000010").unwrap();
        assert_eq!(ts.as_nanos(), 16);
    }

    #[test]
    fn parse_date_rejects_garbage() {
        assert!(Timestamp::parse_date("yesterday").is_err());
    }
}
