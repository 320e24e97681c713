//! Core data types for health measures.
//!
//! This module defines the fundamental data structures:
//!
//! - [`DataSourceType`] - Daily metric kinds (steps, heart rate, weight, sleep)
//! - [`IntraDayDataSourceType`] - Metrics with an intra-day series
//! - [`DailyRow`] - One day of one metric with denormalized calendar fields
//! - [`IntraDayLog`] - One of possibly several log entries of a day
//! - [`OverviewSourceRow`], [`GroupedData`], [`RangeAggregatedComparisonData`],
//!   [`FilteredDailyValues`], [`IntraDaySeries`] - Service results

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::aggregate::{Aggregate, StatisticKind};
use crate::calendar::{DateRange, NumberedDate};
use crate::cyclic::{CycleDimension, CyclicTimeFrame};
use crate::error::MeasureError;

/// A daily health metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataSourceType {
    /// Total steps per day.
    StepCount,
    /// Resting heart rate in beats per minute.
    HeartRate,
    /// Body weight trend in kilograms.
    Weight,
    /// Hours asleep per night.
    HoursSlept,
    /// Bed time and wake time in seconds relative to midnight.
    SleepRange,
}

impl DataSourceType {
    /// All data sources.
    pub const ALL: [Self; 5] = [
        Self::StepCount,
        Self::HeartRate,
        Self::Weight,
        Self::HoursSlept,
        Self::SleepRange,
    ];

    /// Stable identifier used in storage and export file names.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            Self::StepCount => "step_count",
            Self::HeartRate => "heart_rate",
            Self::Weight => "weight",
            Self::HoursSlept => "hours_slept",
            Self::SleepRange => "sleep_range",
        }
    }

    /// Display name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StepCount => "Step Count",
            Self::HeartRate => "Resting Heart Rate",
            Self::Weight => "Weight",
            Self::HoursSlept => "Hours Slept",
            Self::SleepRange => "Sleep Range",
        }
    }

    /// How values of this metric are reduced over a bucket.
    #[must_use]
    pub const fn statistic_kind(&self) -> StatisticKind {
        match self {
            Self::StepCount => StatisticKind::Sum,
            Self::HeartRate | Self::HoursSlept => StatisticKind::Mean,
            Self::Weight => StatisticKind::Trend,
            Self::SleepRange => StatisticKind::Range,
        }
    }

    /// Returns true if a recorded zero is a real measurement rather than a gap.
    ///
    /// A day with zero steps happened; a resting heart rate of zero means the
    /// device was not worn.
    #[must_use]
    pub const fn zero_is_observation(&self) -> bool {
        matches!(self, Self::StepCount)
    }

    /// Default value range for charts when no data-driven range is known.
    #[must_use]
    pub const fn default_value_range(&self) -> (f64, f64) {
        match self {
            Self::StepCount => (0.0, 15000.0),
            Self::HeartRate => (50.0, 100.0),
            Self::Weight => (50.0, 100.0),
            Self::HoursSlept => (0.0, 12.0),
            Self::SleepRange => (-3.0 * 3600.0, 12.0 * 3600.0),
        }
    }
}

impl fmt::Display for DataSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for DataSourceType {
    type Err = MeasureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|source| source.key() == s)
            .ok_or_else(|| MeasureError::Parse(format!("Unknown data source: {s}")))
    }
}

/// A metric with a within-day series.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntraDayDataSourceType {
    /// Per-minute step counts.
    StepCount,
    /// Per-minute heart rate.
    HeartRate,
    /// Individual weight log entries.
    Weight,
}

impl IntraDayDataSourceType {
    /// Stable identifier used in storage.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            Self::StepCount => "step_count",
            Self::HeartRate => "heart_rate",
            Self::Weight => "weight",
        }
    }
}

/// The measured value of one day.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum DailyValue {
    /// A single number.
    Scalar(f64),
    /// A pair of bounds, e.g. bed time and wake time.
    Range {
        /// Lower bound.
        from: f64,
        /// Upper bound.
        to: f64,
    },
}

impl DailyValue {
    /// The scalar value, if this is a scalar.
    #[must_use]
    pub const fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Range { .. } => None,
        }
    }

    /// The `(from, to)` bounds, if this is a range.
    #[must_use]
    pub const fn as_range(&self) -> Option<(f64, f64)> {
        match self {
            Self::Scalar(_) => None,
            Self::Range { from, to } => Some((*from, *to)),
        }
    }
}

/// One day of one metric, carrying the calendar fields used for indexed queries.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyRow {
    /// The day.
    pub numbered_date: NumberedDate,
    /// Calendar year of the day.
    pub year: i32,
    /// Month of year, 1-12.
    pub month: u32,
    /// Day of week, Sunday = 0.
    pub day_of_week: u32,
    /// Measured value.
    pub value: DailyValue,
}

impl DailyRow {
    /// Creates a row, deriving the calendar fields from the date.
    #[must_use]
    pub fn new(numbered_date: NumberedDate, value: DailyValue) -> Self {
        Self {
            numbered_date,
            year: numbered_date.year(),
            month: numbered_date.month(),
            day_of_week: numbered_date.day_of_week(),
            value,
        }
    }

    /// Creates a scalar row.
    #[must_use]
    pub fn scalar(numbered_date: NumberedDate, value: f64) -> Self {
        Self::new(numbered_date, DailyValue::Scalar(value))
    }

    /// Creates a range row.
    #[must_use]
    pub fn range(numbered_date: NumberedDate, from: f64, to: f64) -> Self {
        Self::new(numbered_date, DailyValue::Range { from, to })
    }
}

/// One log entry within a day; several may exist for the same date.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntraDayLog {
    /// Synthetic unique identifier.
    pub id: String,
    /// Metric the entry belongs to.
    pub source: IntraDayDataSourceType,
    /// Day of the entry.
    pub numbered_date: NumberedDate,
    /// Seconds since local midnight.
    pub seconds_of_day: u32,
    /// Logged value.
    pub value: f64,
    /// Device or app that produced the entry.
    pub source_label: Option<String>,
}

/// One point of an intra-day series.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntraDayPoint {
    /// Seconds since local midnight.
    pub seconds_of_day: u32,
    /// Value at that time.
    pub value: f64,
}

/// An intra-day series for one date.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntraDaySeries {
    /// Metric of the series.
    pub source: IntraDayDataSourceType,
    /// Day of the series.
    pub date: NumberedDate,
    /// Points ordered by time.
    pub points: Vec<IntraDayPoint>,
}

/// Daily rows of a range, optionally with a range-wide statistic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverviewSourceRow {
    /// Metric of the rows.
    pub source: DataSourceType,
    /// Range actually queried after clamping to today.
    pub range: DateRange,
    /// Rows ordered by date.
    pub data: Vec<DailyRow>,
    /// Aggregate over `data`, when requested.
    pub statistics: Option<Aggregate>,
}

/// Aggregate of one dimension of a cyclic frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CycleGroup {
    /// The bucket.
    pub dimension: CycleDimension,
    /// Reduced value of the rows in the bucket.
    pub value: Aggregate,
}

/// Rows of a range grouped by the dimensions of a cyclic frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupedData {
    /// Metric of the groups.
    pub source: DataSourceType,
    /// Frame used for grouping.
    pub frame: CyclicTimeFrame,
    /// One group per dimension value, in value order.
    pub groups: Vec<CycleGroup>,
}

/// Aggregate of one occurrence of a cycle dimension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeKeyedAggregate {
    /// Key of the occurrence (year, or date for weekly frames).
    pub time_key: u32,
    /// Reduced value of the occurrence.
    pub value: Aggregate,
}

/// One entry of a per-occurrence comparison.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComparisonEntry {
    /// Days of the occurrence.
    pub range: DateRange,
    /// Value of the occurrence, `None` when the service has no data for it.
    pub value: Option<TimeKeyedAggregate>,
}

/// Values of every occurrence of a cycle dimension in a query range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeAggregatedComparisonData {
    /// Entries ordered by time key.
    pub data: Vec<ComparisonEntry>,
}

/// Daily values restricted to the days of a cycle dimension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilteredDailyValues {
    /// Metric of the values.
    pub source: DataSourceType,
    /// Dimension used for filtering.
    pub dimension: CycleDimension,
    /// Matching rows ordered by date.
    pub data: Vec<DailyRow>,
}

/// Direction of a highlight comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparison {
    /// Strictly below the threshold.
    Less,
    /// Strictly above the threshold.
    More,
}

/// Which part of a daily value a highlight filter inspects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterProperty {
    /// The scalar value.
    #[default]
    Value,
    /// The lower bound of a range value.
    RangeStart,
    /// The upper bound of a range value.
    RangeEnd,
}

/// Selects days whose value is below or above a threshold.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HighlightFilter {
    /// Metric to inspect.
    pub source: DataSourceType,
    /// Part of the value to inspect.
    pub property: FilterProperty,
    /// Comparison direction.
    pub comparison: Comparison,
    /// Threshold value.
    pub threshold: f64,
}

impl HighlightFilter {
    /// Creates a filter on the scalar value.
    #[must_use]
    pub const fn new(source: DataSourceType, comparison: Comparison, threshold: f64) -> Self {
        Self {
            source,
            property: FilterProperty::Value,
            comparison,
            threshold,
        }
    }

    /// Sets the inspected property.
    #[must_use]
    pub const fn with_property(mut self, property: FilterProperty) -> Self {
        self.property = property;
        self
    }

    /// Evaluates the filter on a value; `None` if the property does not apply.
    #[must_use]
    pub fn evaluate(&self, value: &DailyValue) -> Option<bool> {
        let inspected = match (self.property, value) {
            (FilterProperty::Value, DailyValue::Scalar(v)) => *v,
            (FilterProperty::RangeStart, DailyValue::Range { from, .. }) => *from,
            (FilterProperty::RangeEnd, DailyValue::Range { to, .. }) => *to,
            _ => return None,
        };
        Some(match self.comparison {
            Comparison::Less => inspected < self.threshold,
            Comparison::More => inspected > self.threshold,
        })
    }
}
