//! Integer-encoded calendar dates and inclusive date ranges.
//!
//! A [`NumberedDate`] is a calendar date whose integer form is
//! `year * 10000 + month * 100 + day`, so numeric order equals chronological
//! order. The canonical text form is `YYYY-MM-DD`.

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{MeasureError, Result};

/// Largest year representable in the eight-digit encoding.
const MAX_YEAR: i32 = 9999;

/// Calendar fields decoded from a numbered date.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalendarFields {
    /// Calendar year.
    pub year: i32,
    /// Month of year, 1-12.
    pub month: u32,
    /// Day of month, 1-31.
    pub day: u32,
}

/// Splits an encoded `YYYYMMDD` integer into its fields.
///
/// This is a plain integer decomposition; the result is not checked against
/// the calendar. Use [`NumberedDate::from_value`] for a validated date.
#[must_use]
pub const fn decompose(value: u32) -> CalendarFields {
    CalendarFields {
        year: (value / 10000) as i32,
        month: (value % 10000) / 100,
        day: value % 100,
    }
}

/// Number of days in a month, or `None` for an invalid month.
#[must_use]
pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    u32::try_from(next.signed_duration_since(first).num_days()).ok()
}

/// Normalizes a month index that may run past December into `(year, month)`.
///
/// Month 13 of 2023 is January 2024, month 14 is February 2024, and so on.
#[must_use]
pub const fn normalize_month(year: i32, month: u32) -> (i32, u32) {
    let zero_based = month.saturating_sub(1);
    (year + (zero_based / 12) as i32, zero_based % 12 + 1)
}

/// A validated calendar date encoded as `YYYYMMDD`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct NumberedDate(NaiveDate);

impl NumberedDate {
    /// Creates a date from its fields.
    ///
    /// # Errors
    /// Returns [`MeasureError::InvalidDate`] if the month or day is out of range
    /// for the year, or the year does not fit the four-digit encoding.
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Result<Self> {
        if !(0..=MAX_YEAR).contains(&year) {
            return Err(MeasureError::InvalidDate { year, month, day });
        }
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or(MeasureError::InvalidDate { year, month, day })
    }

    /// Creates a date from its `YYYYMMDD` integer form.
    ///
    /// # Errors
    /// Returns [`MeasureError::InvalidDate`] if the decoded fields are not a date.
    pub fn from_value(value: u32) -> Result<Self> {
        let fields = decompose(value);
        Self::from_ymd(fields.year, fields.month, fields.day)
    }

    /// Creates a date from a chrono date.
    ///
    /// # Errors
    /// Returns [`MeasureError::InvalidDate`] for years outside `0..=9999`.
    pub fn from_naive(date: NaiveDate) -> Result<Self> {
        Self::from_ymd(date.year(), date.month(), date.day())
    }

    /// First day of the given month.
    ///
    /// # Errors
    /// Returns [`MeasureError::InvalidDate`] for an invalid month.
    pub fn first_day_of_month(year: i32, month: u32) -> Result<Self> {
        Self::from_ymd(year, month, 1)
    }

    /// Last day of the given month, leap-year aware.
    ///
    /// # Errors
    /// Returns [`MeasureError::InvalidDate`] for an invalid month.
    pub fn last_day_of_month(year: i32, month: u32) -> Result<Self> {
        let day = days_in_month(year, month)
            .ok_or(MeasureError::InvalidDate { year, month, day: 1 })?;
        Self::from_ymd(year, month, day)
    }

    /// The `YYYYMMDD` integer form.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.year() as u32 * 10000 + self.month() * 100 + self.day()
    }

    /// Calendar year.
    #[must_use]
    pub fn year(&self) -> i32 {
        self.0.year()
    }

    /// Month of year, 1-12.
    #[must_use]
    pub fn month(&self) -> u32 {
        self.0.month()
    }

    /// Day of month.
    #[must_use]
    pub fn day(&self) -> u32 {
        self.0.day()
    }

    /// All three calendar fields.
    #[must_use]
    pub fn fields(&self) -> CalendarFields {
        CalendarFields {
            year: self.year(),
            month: self.month(),
            day: self.day(),
        }
    }

    /// Day of week with Sunday as 0.
    #[must_use]
    pub fn day_of_week(&self) -> u32 {
        self.0.weekday().num_days_from_sunday()
    }

    /// The underlying chrono date.
    #[must_use]
    pub const fn to_naive(&self) -> NaiveDate {
        self.0
    }

    /// Shifts the date by a signed number of days, `None` when leaving the
    /// representable range.
    #[must_use]
    pub fn add_days(self, days: i64) -> Option<Self> {
        let shifted = if days >= 0 {
            self.0.checked_add_days(Days::new(days.unsigned_abs()))
        } else {
            self.0.checked_sub_days(Days::new(days.unsigned_abs()))
        }?;
        Self::from_naive(shifted).ok()
    }

    /// The following day.
    #[must_use]
    pub fn succ(self) -> Option<Self> {
        self.add_days(1)
    }

    /// The preceding day.
    #[must_use]
    pub fn pred(self) -> Option<Self> {
        self.add_days(-1)
    }
}

impl fmt::Display for NumberedDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year(), self.month(), self.day())
    }
}

impl fmt::Debug for NumberedDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NumberedDate({})", self.value())
    }
}

impl FromStr for NumberedDate {
    type Err = MeasureError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 3 {
            return Err(MeasureError::Parse(format!(
                "Expected YYYY-MM-DD, got {s:?}"
            )));
        }
        let field = |part: &str| {
            part.parse::<u32>()
                .map_err(|e| MeasureError::Parse(format!("Invalid date field {part:?} in {s:?}: {e}")))
        };
        let year = field(parts[0])?;
        let month = field(parts[1])?;
        let day = field(parts[2])?;
        let year = i32::try_from(year)
            .map_err(|_| MeasureError::Parse(format!("Year out of range in {s:?}")))?;
        Self::from_ymd(year, month, day)
    }
}

impl TryFrom<u32> for NumberedDate {
    type Error = MeasureError;

    fn try_from(value: u32) -> Result<Self> {
        Self::from_value(value)
    }
}

impl From<NumberedDate> for u32 {
    fn from(date: NumberedDate) -> Self {
        date.value()
    }
}

impl From<NumberedDate> for NaiveDate {
    fn from(date: NumberedDate) -> Self {
        date.0
    }
}

#[derive(Deserialize)]
struct RawDateRange {
    start: NumberedDate,
    end: NumberedDate,
}

/// An inclusive range of dates with `start <= end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange")]
pub struct DateRange {
    start: NumberedDate,
    end: NumberedDate,
}

impl DateRange {
    /// Creates a range.
    ///
    /// # Errors
    /// Returns [`MeasureError::InvalidParameter`] if `start` is after `end`.
    pub fn new(start: NumberedDate, end: NumberedDate) -> Result<Self> {
        if start > end {
            return Err(MeasureError::InvalidParameter(format!(
                "Start date {start} is after end date {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// A range covering a single day.
    #[must_use]
    pub const fn single(date: NumberedDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// First day of the range.
    #[must_use]
    pub const fn start(&self) -> NumberedDate {
        self.start
    }

    /// Last day of the range.
    #[must_use]
    pub const fn end(&self) -> NumberedDate {
        self.end
    }

    /// Returns true if the date lies within the range.
    #[must_use]
    pub fn contains(&self, date: NumberedDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Returns true if the two ranges share at least one day.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        !(other.end < self.start || other.start > self.end)
    }

    /// The days common to both ranges.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then_some(Self { start, end })
    }

    /// Number of days in the range, counting both ends.
    #[must_use]
    pub fn num_days(&self) -> i64 {
        self.end
            .to_naive()
            .signed_duration_since(self.start.to_naive())
            .num_days()
            + 1
    }

    /// Iterates over every day of the range in order.
    pub fn days(&self) -> impl Iterator<Item = NumberedDate> + use<> {
        let end = self.end;
        std::iter::successors(Some(self.start), move |day| {
            day.succ().filter(|next| *next <= end)
        })
    }

    /// Splits the range into consecutive pieces of at most `max_days` days.
    ///
    /// Providers use this to respect per-request span limits.
    #[must_use]
    pub fn chunks(&self, max_days: u32) -> Vec<Self> {
        let span = i64::from(max_days.max(1));
        let mut pieces = Vec::new();
        let mut cursor = Some(self.start);
        while let Some(start) = cursor {
            let end = start
                .add_days(span - 1)
                .map_or(self.end, |candidate| candidate.min(self.end));
            pieces.push(Self { start, end });
            cursor = end.succ().filter(|next| *next <= self.end);
        }
        pieces
    }
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = MeasureError;

    fn try_from(raw: RawDateRange) -> Result<Self> {
        Self::new(raw.start, raw.end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}
