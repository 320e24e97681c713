//! Cyclic time frames and cycle dimension resolution.
//!
//! This module defines [`CyclicTimeFrame`] for recurring calendar buckets
//! (month of year, season of year, day of week), [`CycleDimension`] for one
//! concrete bucket, and [`resolve`] which finds every occurrence of a
//! dimension inside a query range.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

use crate::calendar::{DateRange, NumberedDate, normalize_month};
use crate::error::{MeasureError, Result};

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const SEASON_NAMES: [&str; 4] = ["Spring", "Summer", "Fall", "Winter"];

const DAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// The calendar unit at which a frame repeats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleLevel {
    /// Repeats once per year; occurrences are keyed by year.
    Year,
    /// Repeats once per week; occurrences are keyed by their numbered date.
    Week,
}

/// A recurring calendar bucket type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CyclicTimeFrame {
    /// Twelve months, values 1-12.
    MonthOfYear,
    /// Four three-month seasons, values 0-3.
    ///
    /// Season `s` starts at month `s * 3 + 2`; season 3 runs November through
    /// January of the following year.
    SeasonOfYear,
    /// Seven weekdays, values 0-6 with Sunday as 0.
    DayOfWeek,
}

impl CyclicTimeFrame {
    /// All frames.
    pub const ALL: [Self; 3] = [Self::MonthOfYear, Self::SeasonOfYear, Self::DayOfWeek];

    /// Returns the level at which this frame cycles.
    #[must_use]
    pub const fn cycle_level(&self) -> CycleLevel {
        match self {
            Self::MonthOfYear | Self::SeasonOfYear => CycleLevel::Year,
            Self::DayOfWeek => CycleLevel::Week,
        }
    }

    /// Returns the valid dimension values of this frame.
    #[must_use]
    pub const fn dimension_values(&self) -> RangeInclusive<u32> {
        match self {
            Self::MonthOfYear => 1..=12,
            Self::SeasonOfYear => 0..=3,
            Self::DayOfWeek => 0..=6,
        }
    }

    /// Returns every dimension of this frame in value order.
    #[must_use]
    pub fn dimensions(&self) -> Vec<CycleDimension> {
        self.dimension_values()
            .map(|value| CycleDimension {
                frame: *self,
                value,
            })
            .collect()
    }

    /// Returns the dimension value a date falls into.
    #[must_use]
    pub fn dimension_of(&self, date: NumberedDate) -> u32 {
        match self {
            Self::MonthOfYear => date.month(),
            Self::SeasonOfYear => season_of_month(date.month()),
            Self::DayOfWeek => date.day_of_week(),
        }
    }
}

/// Season index (0-3) of a month (1-12).
#[must_use]
pub const fn season_of_month(month: u32) -> u32 {
    ((month + 10) % 12) / 3
}

#[derive(Deserialize)]
struct RawCycleDimension {
    frame: CyclicTimeFrame,
    value: u32,
}

/// A concrete bucket of a cyclic frame, e.g. March or fall.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawCycleDimension")]
pub struct CycleDimension {
    frame: CyclicTimeFrame,
    value: u32,
}

impl CycleDimension {
    /// Creates a dimension.
    ///
    /// # Errors
    /// Returns [`MeasureError::InvalidParameter`] if the value is outside the
    /// frame's dimension values.
    pub fn new(frame: CyclicTimeFrame, value: u32) -> Result<Self> {
        if !frame.dimension_values().contains(&value) {
            return Err(MeasureError::InvalidParameter(format!(
                "Dimension value {value} is out of range for {frame:?}"
            )));
        }
        Ok(Self { frame, value })
    }

    /// The frame this dimension belongs to.
    #[must_use]
    pub const fn frame(&self) -> CyclicTimeFrame {
        self.frame
    }

    /// The dimension value within the frame.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.value
    }

    /// Returns true if the date falls into this bucket.
    #[must_use]
    pub fn contains(&self, date: NumberedDate) -> bool {
        self.frame.dimension_of(date) == self.value
    }

    /// Human-readable name of the bucket.
    #[must_use]
    pub fn name(&self) -> &'static str {
        let index = self.value as usize;
        let name = match self.frame {
            CyclicTimeFrame::MonthOfYear => index.checked_sub(1).and_then(|i| MONTH_NAMES.get(i)),
            CyclicTimeFrame::SeasonOfYear => SEASON_NAMES.get(index),
            CyclicTimeFrame::DayOfWeek => DAY_NAMES.get(index),
        };
        name.copied().unwrap_or("Unknown")
    }

    /// The occurrence window of a year-level dimension in the given year.
    fn year_window(&self, year: i32) -> Result<DateRange> {
        let (first_month, last_month) = match self.frame {
            CyclicTimeFrame::MonthOfYear => (self.value, self.value),
            CyclicTimeFrame::SeasonOfYear => (self.value * 3 + 2, self.value * 3 + 4),
            CyclicTimeFrame::DayOfWeek => {
                return Err(MeasureError::InvalidParameter(
                    "Day of week does not cycle at the year level".to_string(),
                ));
            }
        };
        let (start_year, start_month) = normalize_month(year, first_month);
        let (end_year, end_month) = normalize_month(year, last_month);
        DateRange::new(
            NumberedDate::first_day_of_month(start_year, start_month)?,
            NumberedDate::last_day_of_month(end_year, end_month)?,
        )
    }
}

impl TryFrom<RawCycleDimension> for CycleDimension {
    type Error = MeasureError;

    fn try_from(raw: RawCycleDimension) -> Result<Self> {
        Self::new(raw.frame, raw.value)
    }
}

impl fmt::Display for CycleDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One occurrence of a cycle dimension inside a query span.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeKeyedRange {
    /// Year of the occurrence for year-level frames, numbered date for week-level.
    pub time_key: u32,
    /// Days covered by the occurrence.
    pub range: DateRange,
}

/// Finds every occurrence of `dimension` that overlaps `range`.
///
/// Year-level dimensions are enumerated for each year from the start year to
/// the end year. A season window that runs into the next year is keyed by the
/// year in which it starts. The returned ranges are whole occurrence windows,
/// not clipped to the query. Week-level dimensions yield one single-day range
/// per matching day.
///
/// # Errors
/// Returns [`MeasureError::InvalidDate`] if an occurrence window leaves the
/// representable calendar.
pub fn resolve(range: DateRange, dimension: CycleDimension) -> Result<Vec<TimeKeyedRange>> {
    match dimension.frame.cycle_level() {
        CycleLevel::Year => {
            let mut occurrences = Vec::new();
            for year in range.start().year()..=range.end().year() {
                let window = dimension.year_window(year)?;
                if window.overlaps(&range) {
                    occurrences.push(TimeKeyedRange {
                        time_key: year as u32,
                        range: window,
                    });
                }
            }
            Ok(occurrences)
        }
        CycleLevel::Week => Ok(range
            .days()
            .filter(|day| dimension.contains(*day))
            .map(|day| TimeKeyedRange {
                time_key: day.value(),
                range: DateRange::single(day),
            })
            .collect()),
    }
}
