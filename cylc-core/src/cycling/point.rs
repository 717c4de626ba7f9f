//! CyclePoint: an opaque totally-ordered value, either an unbounded integer
//! or an ISO-8601 datetime under one of the supported calendars.
//!
//! All cycle points within a single workflow must share one calendar; this
//! is an invariant the caller is responsible for (the workflow config picks
//! a calendar once and every point/duration operation is routed through it).

use std::cmp::Ordering;
use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::TimeSyntaxError;

/// Calendar governing datetime cycle-point arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Calendar {
    Gregorian,
    Day360,
    Day365,
    Day366,
}

impl Calendar {
    fn days_in_month(&self, year: i64, month: u32) -> u32 {
        match self {
            Calendar::Gregorian => {
                let leap = NaiveDate::from_ymd_opt(year as i32, 1, 1).is_some()
                    && (year % 4 == 0 && (year % 100 != 0 || year % 400 == 0));
                match month {
                    1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
                    4 | 6 | 9 | 11 => 30,
                    2 => {
                        if leap {
                            29
                        } else {
                            28
                        }
                    }
                    _ => 30,
                }
            }
            Calendar::Day360 => 30,
            Calendar::Day365 | Calendar::Day366 => match month {
                1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
                4 | 6 | 9 | 11 => 30,
                2 if matches!(self, Calendar::Day366) => 29,
                2 => 28,
                _ => 30,
            },
        }
    }

}

/// An ISO-8601-ish period used to step a [`CyclePoint`]: years, months,
/// days, hours, minutes, seconds, applied in that order during calendar
/// arithmetic. Interpreted as an integer step count for integer points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Duration {
    pub years: i64,
    pub months: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl Duration {
    pub const ZERO: Duration = Duration {
        years: 0,
        months: 0,
        days: 0,
        hours: 0,
        minutes: 0,
        seconds: 0,
    };

    pub fn from_days(days: i64) -> Self {
        Self {
            days,
            ..Default::default()
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn negate(&self) -> Self {
        Self {
            years: -self.years,
            months: -self.months,
            days: -self.days,
            hours: -self.hours,
            minutes: -self.minutes,
            seconds: -self.seconds,
        }
    }

    /// Total seconds, valid only for durations with no years/months
    /// component (those require calendar context to resolve).
    fn flat_seconds(&self) -> Option<i64> {
        if self.years != 0 || self.months != 0 {
            None
        } else {
            Some(self.days * 86_400 + self.hours * 3_600 + self.minutes * 60 + self.seconds)
        }
    }

    /// Parse an ISO-8601 period such as `P1D`, `PT1H30M`, `P1Y2M3DT4H5M6S`.
    pub fn parse(s: &str) -> Result<Self, TimeSyntaxError> {
        let bytes = s.as_bytes();
        if bytes.first() != Some(&b'P') {
            return Err(TimeSyntaxError::new(s, "ISO-8601 duration must start with 'P'"));
        }
        let mut dur = Duration::ZERO;
        let mut in_time = false;
        let mut num = String::new();
        for &b in &bytes[1..] {
            match b {
                b'T' => in_time = true,
                b'0'..=b'9' => num.push(b as char),
                b'Y' | b'M' | b'D' | b'H' | b'S' => {
                    let value: i64 = num
                        .parse()
                        .map_err(|_| TimeSyntaxError::new(s, "missing numeric value before unit"))?;
                    num.clear();
                    match (b, in_time) {
                        (b'Y', _) => dur.years = value,
                        (b'M', false) => dur.months = value,
                        (b'D', _) => dur.days = value,
                        (b'M', true) => dur.minutes = value,
                        (b'H', _) => dur.hours = value,
                        (b'S', _) => dur.seconds = value,
                        _ => return Err(TimeSyntaxError::new(s, "unexpected unit")),
                    }
                }
                _ => return Err(TimeSyntaxError::new(s, "unrecognised character in duration")),
            }
        }
        Ok(dur)
    }

    pub fn to_iso(&self) -> String {
        if self.is_zero() {
            return "PT0S".to_string();
        }
        let mut out = String::from("P");
        if self.years != 0 {
            out.push_str(&format!("{}Y", self.years));
        }
        if self.months != 0 {
            out.push_str(&format!("{}M", self.months));
        }
        if self.days != 0 {
            out.push_str(&format!("{}D", self.days));
        }
        if self.hours != 0 || self.minutes != 0 || self.seconds != 0 {
            out.push('T');
            if self.hours != 0 {
                out.push_str(&format!("{}H", self.hours));
            }
            if self.minutes != 0 {
                out.push_str(&format!("{}M", self.minutes));
            }
            if self.seconds != 0 {
                out.push_str(&format!("{}S", self.seconds));
            }
        }
        out
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_iso())
    }
}

/// A cycle point: an unbounded signed integer, or a datetime under a fixed
/// calendar. The two kinds never compare against each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CyclePoint {
    Integer(i64),
    Datetime { naive: NaiveDateTime, calendar: Calendar },
}

impl CyclePoint {
    pub fn integer(value: i64) -> Self {
        CyclePoint::Integer(value)
    }

    pub fn datetime(naive: NaiveDateTime, calendar: Calendar) -> Self {
        CyclePoint::Datetime { naive, calendar }
    }

    /// Parse a `CCYYMMDDThhmmZ`-style point (integer points parse as plain
    /// digits, optionally signed).
    pub fn parse(s: &str, calendar: Calendar) -> Result<Self, TimeSyntaxError> {
        if let Ok(value) = s.parse::<i64>() {
            return Ok(CyclePoint::Integer(value));
        }
        let core = s.trim_end_matches('Z');
        let (date_part, time_part) = core
            .split_once('T')
            .ok_or_else(|| TimeSyntaxError::new(s, "expected 'T' separating date and time"))?;
        if date_part.len() != 8 {
            return Err(TimeSyntaxError::new(s, "expected an 8-digit CCYYMMDD date"));
        }
        let year: i32 = date_part[0..4]
            .parse()
            .map_err(|_| TimeSyntaxError::new(s, "bad year"))?;
        let month: u32 = date_part[4..6]
            .parse()
            .map_err(|_| TimeSyntaxError::new(s, "bad month"))?;
        let day: u32 = date_part[6..8]
            .parse()
            .map_err(|_| TimeSyntaxError::new(s, "bad day"))?;
        let digits: String = time_part.chars().filter(|c| c.is_ascii_digit()).collect();
        let mut it = digits
            .as_bytes()
            .chunks(2)
            .map(|c| std::str::from_utf8(c).unwrap().parse::<u32>().unwrap_or(0));
        let hour = it.next().unwrap_or(0);
        let minute = it.next().unwrap_or(0);
        let second = it.next().unwrap_or(0);

        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| TimeSyntaxError::new(s, "date out of range for the Gregorian calendar"))?;
        let time = NaiveTime::from_hms_opt(hour, minute, second)
            .ok_or_else(|| TimeSyntaxError::new(s, "time out of range"))?;
        Ok(CyclePoint::Datetime {
            naive: NaiveDateTime::new(date, time),
            calendar,
        })
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, CyclePoint::Integer(_))
    }

    /// Add a [`Duration`], routing through the point's calendar for
    /// datetime points (so e.g. `20130301 - P1D = 20130228` under
    /// Gregorian but `20130230` under 360day).
    pub fn add(&self, duration: &Duration) -> CyclePoint {
        match self {
            // Integer points step by the duration's "days" component only;
            // Y/M/H/Min/S have no meaning for an integer sequence.
            CyclePoint::Integer(value) => CyclePoint::Integer(value + duration.days),
            CyclePoint::Datetime { naive, calendar } => {
                CyclePoint::Datetime {
                    naive: add_calendar(*naive, *calendar, *duration),
                    calendar: *calendar,
                }
            }
        }
    }

    pub fn subtract(&self, duration: &Duration) -> CyclePoint {
        self.add(&duration.negate())
    }

    /// Difference `self - other`, expressed as a flat (no Y/M component) Duration.
    pub fn diff(&self, other: &CyclePoint) -> Option<Duration> {
        match (self, other) {
            (CyclePoint::Integer(a), CyclePoint::Integer(b)) => Some(Duration::from_days(a - b)),
            (
                CyclePoint::Datetime { naive: a, .. },
                CyclePoint::Datetime { naive: b, .. },
            ) => {
                let delta = *a - *b;
                Some(Duration::from_days(0).with_seconds(delta.num_seconds()))
            }
            _ => None,
        }
    }
}

impl Duration {
    fn with_seconds(mut self, total_seconds: i64) -> Self {
        self.days = total_seconds / 86_400;
        self.seconds = total_seconds % 86_400;
        self
    }
}

fn add_calendar(naive: NaiveDateTime, calendar: Calendar, duration: Duration) -> NaiveDateTime {
    let mut year = naive.year() as i64;
    let mut month = naive.month() as i64;
    let mut day = naive.day() as i64;

    // Months (and years, folded into months) first, clamping the day to
    // the target month's length -- this is what makes 360day arithmetic
    // diverge from Gregorian at month boundaries.
    let total_months = duration.years * 12 + duration.months;
    if total_months != 0 {
        let zero_based = month - 1 + total_months;
        year += zero_based.div_euclid(12);
        month = zero_based.rem_euclid(12) + 1;
        let max_day = calendar.days_in_month(year, month as u32) as i64;
        day = day.min(max_day);
    }

    if let Some(seconds) = duration.flat_seconds() {
        match calendar {
            Calendar::Gregorian => {
                let base = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                    .unwrap_or_else(|| NaiveDate::from_ymd_opt(year as i32, month as u32, 1).unwrap());
                let base_dt = NaiveDateTime::new(base, naive.time());
                return base_dt + chrono::Duration::seconds(seconds);
            }
            Calendar::Day360 | Calendar::Day365 | Calendar::Day366 => {
                return add_fixed_calendar_seconds(year, month, day, naive.time(), calendar, seconds);
            }
        }
    }

    let clamped_day = day.min(calendar.days_in_month(year, month as u32) as i64);
    match NaiveDate::from_ymd_opt(year as i32, month as u32, clamped_day as u32) {
        Some(date) => NaiveDateTime::new(date, naive.time()),
        None => naive,
    }
}

/// Add a flat second count to a (year, month, day, time) tuple under a
/// fixed-length-year calendar (360day/365day/366day have no Gregorian leap
/// rules, so day-of-month rollover is computed directly from
/// `days_in_month`/`days_in_year` rather than via `chrono::NaiveDate`).
fn add_fixed_calendar_seconds(
    mut year: i64,
    mut month: i64,
    mut day: i64,
    time: NaiveTime,
    calendar: Calendar,
    seconds: i64,
) -> NaiveDateTime {
    let time_seconds = time.num_seconds_from_midnight() as i64 + seconds;
    day += time_seconds.div_euclid(86_400);
    let remaining_seconds = time_seconds.rem_euclid(86_400);

    loop {
        let month_len = calendar.days_in_month(year, month as u32) as i64;
        if day > month_len {
            day -= month_len;
            month += 1;
            if month > 12 {
                month = 1;
                year += 1;
            }
        } else if day < 1 {
            month -= 1;
            if month < 1 {
                month = 12;
                year -= 1;
            }
            day += calendar.days_in_month(year, month as u32) as i64;
        } else {
            break;
        }
    }
    let new_time = NaiveTime::from_num_seconds_from_midnight_opt(remaining_seconds as u32, 0).unwrap_or(time);
    let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year as i32, 1, 1).unwrap());
    NaiveDateTime::new(date, new_time)
}

impl PartialOrd for CyclePoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (CyclePoint::Integer(a), CyclePoint::Integer(b)) => a.partial_cmp(b),
            (CyclePoint::Datetime { naive: a, .. }, CyclePoint::Datetime { naive: b, .. }) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl Ord for CyclePoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other)
            .expect("comparing cycle points of different kinds (integer vs datetime)")
    }
}

impl fmt::Display for CyclePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CyclePoint::Integer(value) => write!(f, "{value}"),
            CyclePoint::Datetime { naive, .. } => {
                write!(f, "{:04}{:02}{:02}T{:02}{:02}Z", naive.year(), naive.month(), naive.day(), naive.hour(), naive.minute())
            }
        }
    }
}

use chrono::Timelike;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gregorian_month_end_subtracts_to_shorter_month() {
        let p = CyclePoint::parse("20130301T0000Z", Calendar::Gregorian).unwrap();
        let back = p.subtract(&Duration::from_days(1));
        assert_eq!(back.to_string(), "20130228T0000Z");
    }

    #[test]
    fn day360_month_end_subtracts_to_day_30() {
        let p = CyclePoint::parse("20130301T0000Z", Calendar::Day360).unwrap();
        let back = p.subtract(&Duration::from_days(1));
        assert_eq!(back.to_string(), "20130230T0000Z");
    }

    #[test]
    fn integer_points_compare_and_step() {
        let a = CyclePoint::integer(1);
        let b = a.add(&Duration::from_days(5));
        assert_eq!(b, CyclePoint::integer(6));
        assert!(a < b);
    }

    #[test]
    fn duration_parses_combined_date_and_time() {
        let d = Duration::parse("P1Y2M3DT4H5M6S").unwrap();
        assert_eq!(
            d,
            Duration {
                years: 1,
                months: 2,
                days: 3,
                hours: 4,
                minutes: 5,
                seconds: 6
            }
        );
    }

    #[test]
    fn mismatched_kinds_do_not_compare() {
        let i = CyclePoint::integer(1);
        let d = CyclePoint::parse("20130301T0000Z", Calendar::Gregorian).unwrap();
        assert_eq!(i.partial_cmp(&d), None);
    }
}
