//! Reduction of daily rows into per-range and per-cycle aggregates.
//!
//! Missing days are never treated as zero. A row only counts as an
//! observation when its value is finite and, for metrics where zero means
//! "not measured", non-zero. A bucket without observations reduces to
//! [`Aggregate::NoData`].

use serde::{Deserialize, Serialize};

use crate::cyclic::{CyclicTimeFrame, TimeKeyedRange};
use crate::types::{
    CycleGroup, DailyRow, DailyValue, DataSourceType, GroupedData, TimeKeyedAggregate,
};

/// How daily values of a metric combine over a bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatisticKind {
    /// Totals add up (steps).
    Sum,
    /// Values are averaged (heart rate, sleep duration).
    Mean,
    /// Smoothed trend values; averaged, with the change across the bucket.
    Trend,
    /// Pairs of bounds, averaged per bound.
    Range,
}

/// Statistic over the scalar observations of a bucket.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregatedValue {
    /// Kind of the metric the statistic was computed for.
    pub kind: StatisticKind,
    /// Number of observed days.
    pub n: usize,
    /// Sum of observed values.
    pub sum: f64,
    /// Mean of observed values.
    pub avg: f64,
    /// Smallest observed value.
    pub min: f64,
    /// Largest observed value.
    pub max: f64,
    /// Value of the earliest observed day.
    pub first: f64,
    /// Value of the latest observed day.
    pub last: f64,
}

impl AggregatedValue {
    /// The representative value for the metric kind: the total for sums,
    /// the mean otherwise.
    #[must_use]
    pub fn headline(&self) -> f64 {
        match self.kind {
            StatisticKind::Sum => self.sum,
            StatisticKind::Mean | StatisticKind::Trend | StatisticKind::Range => self.avg,
        }
    }

    /// Change between the earliest and the latest observed day.
    #[must_use]
    pub fn change(&self) -> f64 {
        self.last - self.first
    }
}

/// Statistic over the range observations of a bucket.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRangeValue {
    /// Number of observed days.
    pub n: usize,
    /// Mean lower bound.
    pub avg_from: f64,
    /// Mean upper bound.
    pub avg_to: f64,
    /// Earliest lower bound.
    pub min_from: f64,
    /// Latest upper bound.
    pub max_to: f64,
}

/// Result of reducing a bucket of daily rows.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Aggregate {
    /// No day in the bucket was observed.
    NoData,
    /// Statistic over scalar values.
    Value(AggregatedValue),
    /// Statistic over range values.
    Range(AggregatedRangeValue),
}

impl Aggregate {
    /// Returns true if the bucket had no observed day.
    #[must_use]
    pub const fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData)
    }

    /// Number of observed days.
    #[must_use]
    pub const fn n(&self) -> usize {
        match self {
            Self::NoData => 0,
            Self::Value(v) => v.n,
            Self::Range(r) => r.n,
        }
    }
}

/// Returns true if the value counts as a measurement for the metric.
#[must_use]
pub fn is_observed(source: DataSourceType, value: &DailyValue) -> bool {
    match value {
        DailyValue::Scalar(v) => v.is_finite() && (*v != 0.0 || source.zero_is_observation()),
        DailyValue::Range { from, to } => from.is_finite() && to.is_finite() && to > from,
    }
}

/// Reduces rows into one aggregate according to the metric's statistic kind.
#[must_use]
pub fn aggregate(source: DataSourceType, rows: &[DailyRow]) -> Aggregate {
    let mut observed: Vec<&DailyRow> = rows
        .iter()
        .filter(|row| is_observed(source, &row.value))
        .collect();
    observed.sort_by_key(|row| row.numbered_date);

    match source.statistic_kind() {
        StatisticKind::Range => {
            let bounds: Vec<(f64, f64)> =
                observed.iter().filter_map(|row| row.value.as_range()).collect();
            reduce_ranges(&bounds)
        }
        kind => {
            let values: Vec<f64> = observed
                .iter()
                .filter_map(|row| row.value.as_scalar())
                .collect();
            reduce_values(kind, &values)
        }
    }
}

fn reduce_values(kind: StatisticKind, values: &[f64]) -> Aggregate {
    let (Some(&first), Some(&last)) = (values.first(), values.last()) else {
        return Aggregate::NoData;
    };
    let sum: f64 = values.iter().sum();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Aggregate::Value(AggregatedValue {
        kind,
        n: values.len(),
        sum,
        avg: sum / values.len() as f64,
        min,
        max,
        first,
        last,
    })
}

fn reduce_ranges(bounds: &[(f64, f64)]) -> Aggregate {
    if bounds.is_empty() {
        return Aggregate::NoData;
    }
    let n = bounds.len();
    let (sum_from, sum_to) = bounds
        .iter()
        .fold((0.0, 0.0), |(a, b), (from, to)| (a + from, b + to));
    Aggregate::Range(AggregatedRangeValue {
        n,
        avg_from: sum_from / n as f64,
        avg_to: sum_to / n as f64,
        min_from: bounds.iter().map(|(from, _)| *from).fold(f64::INFINITY, f64::min),
        max_to: bounds.iter().map(|(_, to)| *to).fold(f64::NEG_INFINITY, f64::max),
    })
}

/// Groups rows by every dimension of a cyclic frame and reduces each group.
///
/// Every dimension of the frame appears in the result, empty ones as
/// [`Aggregate::NoData`].
#[must_use]
pub fn group_by_cycle(
    source: DataSourceType,
    rows: &[DailyRow],
    frame: CyclicTimeFrame,
) -> GroupedData {
    let groups = frame
        .dimensions()
        .into_iter()
        .map(|dimension| {
            let members: Vec<DailyRow> = rows
                .iter()
                .filter(|row| dimension.contains(row.numbered_date))
                .copied()
                .collect();
            CycleGroup {
                dimension,
                value: aggregate(source, &members),
            }
        })
        .collect();
    GroupedData {
        source,
        frame,
        groups,
    }
}

/// Reduces the rows of each occurrence.
///
/// Occurrences without observations are left out, so a lookup by time key
/// finds nothing for them.
#[must_use]
pub fn aggregate_time_keyed(
    source: DataSourceType,
    rows: &[DailyRow],
    occurrences: &[TimeKeyedRange],
) -> Vec<TimeKeyedAggregate> {
    occurrences
        .iter()
        .filter_map(|occurrence| {
            let members: Vec<DailyRow> = rows
                .iter()
                .filter(|row| occurrence.range.contains(row.numbered_date))
                .copied()
                .collect();
            match aggregate(source, &members) {
                Aggregate::NoData => None,
                value => Some(TimeKeyedAggregate {
                    time_key: occurrence.time_key,
                    value,
                }),
            }
        })
        .collect()
}
