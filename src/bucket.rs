//! Calendar-aligned time buckets.
//!
//! A `TimeBucket` is identified by the wall-clock instant its window starts at.
//! Capture ticks are floored to 5-minute buckets; hourly and daily buckets are
//! derived from those by truncation. Labels are what clip files are named by,
//! so they must round-trip through `Granularity::parse`.

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::fmt;

const FIVE_MIN_FORMAT: &str = "%Y-%m-%d_%H-%M";
const HOUR_FORMAT: &str = "%Y-%m-%d_%H";
const DAY_FORMAT: &str = "%Y-%m-%d";

/// Consolidation level a bucket or clip belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Granularity {
    FiveMinutes,
    Hour,
    Day,
}

impl Granularity {
    /// Formats the label of `bucket` at this granularity.
    pub fn label(self, bucket: TimeBucket) -> String {
        let format = match self {
            Granularity::FiveMinutes => FIVE_MIN_FORMAT,
            Granularity::Hour => HOUR_FORMAT,
            Granularity::Day => DAY_FORMAT,
        };
        bucket.truncate(self).start.format(format).to_string()
    }

    /// Parses a label produced by `label` back into its bucket.
    pub fn parse(self, label: &str) -> Result<TimeBucket> {
        let start = match self {
            Granularity::FiveMinutes => NaiveDateTime::parse_from_str(label, FIVE_MIN_FORMAT)
                .with_context(|| format!("invalid 5-minute label '{}'", label))?,
            Granularity::Hour => {
                // chrono refuses to build a datetime without minutes
                NaiveDateTime::parse_from_str(&format!("{}-00", label), FIVE_MIN_FORMAT)
                    .with_context(|| format!("invalid hour label '{}'", label))?
            }
            Granularity::Day => NaiveDate::parse_from_str(label, DAY_FORMAT)
                .with_context(|| format!("invalid day label '{}'", label))?
                .and_time(NaiveTime::MIN),
        };
        let bucket = TimeBucket { start }.truncate(self);
        if bucket.start != start {
            return Err(anyhow!("label '{}' is not aligned to {:?}", label, self));
        }
        Ok(bucket)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeBucket {
    start: NaiveDateTime,
}

impl TimeBucket {
    /// Floors a wall-clock timestamp to its enclosing 5-minute bucket.
    ///
    /// 10:04:59 -> 10:00, 10:05:01 -> 10:05.
    pub fn floor_5min(ts: NaiveDateTime) -> Self {
        let minute = ts.minute() - ts.minute() % 5;
        let time = NaiveTime::from_hms_opt(ts.hour(), minute, 0).unwrap_or_default();
        TimeBucket {
            start: ts.date().and_time(time),
        }
    }

    /// The 5-minute bucket of the local wall clock.
    pub fn now_5min() -> Self {
        Self::floor_5min(Local::now().naive_local())
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    /// Coarsens the bucket to the start of its hour or day.
    pub fn truncate(self, granularity: Granularity) -> Self {
        match granularity {
            Granularity::FiveMinutes => Self::floor_5min(self.start),
            Granularity::Hour => {
                let time = NaiveTime::from_hms_opt(self.start.hour(), 0, 0).unwrap_or_default();
                TimeBucket {
                    start: self.start.date().and_time(time),
                }
            }
            Granularity::Day => TimeBucket {
                start: self.start.date().and_time(NaiveTime::MIN),
            },
        }
    }

    /// First 5-minute bucket after the `granularity` bucket this one is in.
    ///
    /// 10:25 -> 10:30 for 5 minutes, 11:00 for an hour, next midnight for a day.
    pub fn following(self, granularity: Granularity) -> Self {
        let step = match granularity {
            Granularity::FiveMinutes => Duration::minutes(5),
            Granularity::Hour => Duration::hours(1),
            Granularity::Day => Duration::days(1),
        };
        let start = self.truncate(granularity).start;
        TimeBucket {
            start: start.checked_add_signed(step).unwrap_or(start),
        }
    }

    /// Which boundaries lie between this bucket (the head) and `next`.
    ///
    /// A `next` that is not later than `self` crosses nothing; the head only
    /// ever moves forward.
    pub fn crossing(self, next: TimeBucket) -> Crossing {
        if next <= self {
            return Crossing::default();
        }
        let day = self.start.date() != next.start.date();
        let hour = day || self.start.hour() != next.start.hour();
        Crossing {
            five_min: true,
            hour,
            day,
        }
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&Granularity::FiveMinutes.label(*self))
    }
}

/// Boundaries crossed by a tick. `day` implies `hour` implies `five_min`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Crossing {
    pub five_min: bool,
    pub hour: bool,
    pub day: bool,
}

impl Crossing {
    /// Crossing used for snapshots recovered at startup: encode only.
    pub fn five_min_only() -> Self {
        Crossing {
            five_min: true,
            hour: false,
            day: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{} {}", date, time), "%Y-%m-%d %H:%M:%S%.f")
            .expect("timestamp")
    }

    #[test]
    fn floors_to_five_minutes() {
        let floored = TimeBucket::floor_5min(at("2024-01-01", "10:04:59.999"));
        assert_eq!(floored.start(), at("2024-01-01", "10:00:00"));

        let floored = TimeBucket::floor_5min(at("2024-01-01", "10:05:01"));
        assert_eq!(floored.start(), at("2024-01-01", "10:05:00"));

        let floored = TimeBucket::floor_5min(at("2024-01-01", "10:00:00"));
        assert_eq!(floored.start(), at("2024-01-01", "10:00:00"));
    }

    #[test]
    fn floored_minutes_are_multiples_of_five() {
        for minute in 0..60 {
            for second in [0, 1, 30, 59] {
                let ts = at("2024-03-10", &format!("07:{:02}:{:02}.25", minute, second));
                let start = TimeBucket::floor_5min(ts).start();
                assert_eq!(start.minute() % 5, 0);
                assert_eq!(start.second(), 0);
                assert_eq!(start.nanosecond(), 0);
                assert!(start <= ts);
                assert!(ts - start < chrono::Duration::minutes(5));
            }
        }
    }

    #[test]
    fn labels_use_24_hour_clock() {
        let bucket = TimeBucket::floor_5min(at("2024-01-01", "15:37:12"));
        assert_eq!(Granularity::FiveMinutes.label(bucket), "2024-01-01_15-35");
        assert_eq!(Granularity::Hour.label(bucket), "2024-01-01_15");
        assert_eq!(Granularity::Day.label(bucket), "2024-01-01");
        assert_eq!(bucket.to_string(), "2024-01-01_15-35");
    }

    #[test]
    fn parses_labels_back() {
        let bucket = TimeBucket::floor_5min(at("2024-02-29", "23:55:00"));
        for granularity in [Granularity::FiveMinutes, Granularity::Hour, Granularity::Day] {
            let label = granularity.label(bucket);
            let parsed = granularity.parse(&label).expect("parse label");
            assert_eq!(parsed, bucket.truncate(granularity));
        }
    }

    #[test]
    fn rejects_malformed_and_unaligned_labels() {
        assert!(Granularity::FiveMinutes.parse("2024-01-01_10-03").is_err());
        assert!(Granularity::FiveMinutes.parse("not-a-label").is_err());
        assert!(Granularity::Hour.parse("2024-01-01_25").is_err());
        assert!(Granularity::Day.parse("2024-13-01").is_err());
    }

    #[test]
    fn crossing_flags_nest() {
        let head = TimeBucket::floor_5min(at("2024-01-01", "10:00:00"));

        let same = head.crossing(TimeBucket::floor_5min(at("2024-01-01", "10:04:59")));
        assert_eq!(same, Crossing::default());

        let five = head.crossing(TimeBucket::floor_5min(at("2024-01-01", "10:05:02")));
        assert_eq!(five, Crossing::five_min_only());

        let hour = head.crossing(TimeBucket::floor_5min(at("2024-01-01", "11:00:00")));
        assert!(hour.five_min && hour.hour && !hour.day);

        let late = TimeBucket::floor_5min(at("2024-01-01", "23:55:00"));
        let day = late.crossing(TimeBucket::floor_5min(at("2024-01-02", "00:00:00")));
        assert!(day.five_min && day.hour && day.day);
    }

    #[test]
    fn same_day_of_month_in_another_month_is_a_day_crossing() {
        let head = TimeBucket::floor_5min(at("2024-01-05", "10:00:00"));
        let next = TimeBucket::floor_5min(at("2024-02-05", "10:00:00"));
        assert!(head.crossing(next).day);
    }

    #[test]
    fn following_bucket_starts_after_the_window() {
        let bucket = TimeBucket::floor_5min(at("2024-12-31", "23:25:00"));
        assert_eq!(
            bucket.following(Granularity::FiveMinutes).start(),
            at("2024-12-31", "23:30:00")
        );
        assert_eq!(
            bucket.following(Granularity::Hour).start(),
            at("2025-01-01", "00:00:00")
        );
        assert_eq!(
            bucket.following(Granularity::Day).start(),
            at("2025-01-01", "00:00:00")
        );
    }

    #[test]
    fn earlier_bucket_crosses_nothing() {
        let head = TimeBucket::floor_5min(at("2024-01-01", "10:05:00"));
        let earlier = TimeBucket::floor_5min(at("2024-01-01", "09:58:00"));
        assert_eq!(head.crossing(earlier), Crossing::default());
    }
}
