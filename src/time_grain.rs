//! Calendar truncation of timestamps into time-grain buckets.
//!
//! Engines receive the truncation as a dialect specific expression (see
//! [`crate::engine::dialect::SqlDialect::time_truncate`]); pivot labels use
//! [`TimeGrain::label`], which truncates with [`TimeGrain::truncate`]. No timezone conversion happens here: the
//! timestamp is bucketed in whatever zone the column already stores.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGrain {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGrain {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeGrain::Second => "second",
            TimeGrain::Minute => "minute",
            TimeGrain::Hour => "hour",
            TimeGrain::Day => "day",
            TimeGrain::Week => "week",
            TimeGrain::Month => "month",
            TimeGrain::Quarter => "quarter",
            TimeGrain::Year => "year",
        }
    }

    /// Returns the start of the bucket containing `ts`.
    ///
    /// Weeks start on Monday. Month, quarter and year buckets follow the
    /// calendar, so their length varies.
    pub fn truncate(&self, ts: NaiveDateTime) -> NaiveDateTime {
        let date = ts.date();
        let sub_second = Duration::nanoseconds(i64::from(ts.nanosecond()));
        match self {
            TimeGrain::Second => ts - sub_second,
            TimeGrain::Minute => ts - sub_second - Duration::seconds(i64::from(ts.second())),
            TimeGrain::Hour => {
                ts - sub_second
                    - Duration::seconds(i64::from(ts.second()))
                    - Duration::minutes(i64::from(ts.minute()))
            }
            TimeGrain::Day => midnight(date),
            TimeGrain::Week => {
                let offset = i64::from(date.weekday().num_days_from_monday());
                midnight(date - Duration::days(offset))
            }
            TimeGrain::Month => midnight(month_start(date)),
            TimeGrain::Quarter => {
                let first_month = (date.month0() / 3) * 3 + 1;
                let start = NaiveDate::from_ymd_opt(date.year(), first_month, 1)
                    .unwrap_or_else(|| month_start(date));
                midnight(start)
            }
            TimeGrain::Year => midnight(date - Duration::days(i64::from(date.ordinal0()))),
        }
    }

    /// Canonical display string for the bucket containing `ts`.
    ///
    /// Day and coarser grains render the date only; finer grains keep the
    /// time of day so that buckets within one day stay distinct.
    pub fn label(&self, ts: &NaiveDateTime) -> String {
        let bucket = self.truncate(*ts);
        match self {
            TimeGrain::Second | TimeGrain::Minute | TimeGrain::Hour => {
                bucket.format("%Y-%m-%dT%H:%M:%S").to_string()
            }
            _ => bucket.format("%Y-%m-%d").to_string(),
        }
    }
}

impl fmt::Display for TimeGrain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}

/// Parses the timestamp spellings accepted in filters.
///
/// RFC 3339 strings are converted to UTC; everything else is taken as a
/// wall-clock value.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(midnight)
}
