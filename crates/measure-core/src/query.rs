//! Store-backed implementations of the service queries.
//!
//! Services fill a [`RowStore`] (remotely fetched or manually entered) and
//! answer every read through these functions, so the semantics of gaps,
//! cycles and occurrences are the same for all of them.

use std::collections::BTreeMap;

use crate::aggregate::{Aggregate, aggregate, aggregate_time_keyed, group_by_cycle, is_observed};
use crate::calendar::{DateRange, NumberedDate};
use crate::csv::{logs_to_csv, rows_to_csv};
use crate::cyclic::{CycleDimension, CyclicTimeFrame, TimeKeyedRange, resolve};
use crate::error::Result;
use crate::export::CsvFile;
use crate::store::RowStore;
use crate::types::{
    DailyValue, DataSourceType, FilteredDailyValues, GroupedData, HighlightFilter,
    IntraDayDataSourceType, OverviewSourceRow, TimeKeyedAggregate,
};

/// Smallest range covering every occurrence.
#[must_use]
pub fn occurrence_span(occurrences: &[TimeKeyedRange]) -> Option<DateRange> {
    let start = occurrences.iter().map(|o| o.range.start()).min()?;
    let end = occurrences.iter().map(|o| o.range.end()).max()?;
    DateRange::new(start, end).ok()
}

/// Rows of a range with an optional range-wide statistic.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub async fn overview(
    store: &dyn RowStore,
    source: DataSourceType,
    range: DateRange,
    include_statistics: bool,
) -> Result<OverviewSourceRow> {
    let data = store.query_range(source, range).await?;
    let statistics = include_statistics.then(|| aggregate(source, &data));
    Ok(OverviewSourceRow {
        source,
        range,
        data,
        statistics,
    })
}

/// Rows of a range grouped by every dimension of a frame.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub async fn cyclic_aggregate(
    store: &dyn RowStore,
    source: DataSourceType,
    range: DateRange,
    frame: CyclicTimeFrame,
) -> Result<GroupedData> {
    let rows = store.query_range(source, range).await?;
    Ok(group_by_cycle(source, &rows, frame))
}

/// One aggregate over a whole range.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub async fn range_aggregate(
    store: &dyn RowStore,
    source: DataSourceType,
    range: DateRange,
) -> Result<Aggregate> {
    let rows = store.query_range(source, range).await?;
    Ok(aggregate(source, &rows))
}

/// Aggregates of each occurrence of a dimension that overlaps the range.
///
/// Occurrences are aggregated over their whole window. Occurrences without
/// observations are left out.
///
/// # Errors
/// Returns an error if the store cannot be read or a window is not representable.
pub async fn time_keyed_aggregates(
    store: &dyn RowStore,
    source: DataSourceType,
    range: DateRange,
    dimension: CycleDimension,
) -> Result<Vec<TimeKeyedAggregate>> {
    let occurrences = resolve(range, dimension)?;
    let Some(span) = occurrence_span(&occurrences) else {
        return Ok(Vec::new());
    };
    let rows = store.query_range(source, span).await?;
    Ok(aggregate_time_keyed(source, &rows, &occurrences))
}

/// Rows of a range that fall into a dimension.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub async fn daily_dimension(
    store: &dyn RowStore,
    source: DataSourceType,
    range: DateRange,
    dimension: CycleDimension,
) -> Result<FilteredDailyValues> {
    let data = store
        .query_range(source, range)
        .await?
        .into_iter()
        .filter(|row| dimension.contains(row.numbered_date))
        .collect();
    Ok(FilteredDailyValues {
        source,
        dimension,
        data,
    })
}

/// Evaluates a highlight filter on every observed day of a range.
///
/// Days without an observation, or whose value the filter does not apply
/// to, are absent from the result.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub async fn filtered_dates(
    store: &dyn RowStore,
    filter: &HighlightFilter,
    range: DateRange,
) -> Result<BTreeMap<NumberedDate, bool>> {
    let rows = store.query_range(filter.source, range).await?;
    Ok(rows
        .iter()
        .filter(|row| is_observed(filter.source, &row.value))
        .filter_map(|row| {
            filter
                .evaluate(&row.value)
                .map(|matched| (row.numbered_date, matched))
        })
        .collect())
}

/// Smallest and largest observed value of a range.
///
/// Falls back to the metric's default range when nothing was observed.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub async fn value_range(
    store: &dyn RowStore,
    source: DataSourceType,
    range: DateRange,
) -> Result<(f64, f64)> {
    let rows = store.query_range(source, range).await?;
    let bounds = rows
        .iter()
        .filter(|row| is_observed(source, &row.value))
        .map(|row| match row.value {
            DailyValue::Scalar(v) => (v, v),
            DailyValue::Range { from, to } => (from, to),
        })
        .reduce(|(lo, hi), (from, to)| (lo.min(from), hi.max(to)));
    Ok(bounds.unwrap_or_else(|| source.default_value_range()))
}

/// One CSV file per metric that has rows in the range.
///
/// # Errors
/// Returns an error if the store cannot be read or a file cannot be rendered.
pub async fn export_sources(
    store: &dyn RowStore,
    sources: &[DataSourceType],
    range: DateRange,
) -> Result<Vec<CsvFile>> {
    let mut files = Vec::with_capacity(sources.len());
    for source in sources {
        let rows = store.query_range(*source, range).await?;
        if rows.is_empty() {
            continue;
        }
        files.push(CsvFile::new(source.key(), rows_to_csv(&rows)?));
    }
    Ok(files)
}

/// One CSV file of individual log entries per metric that has entries in
/// the range, named `{metric}_log`.
///
/// # Errors
/// Returns an error if the store cannot be read or a file cannot be rendered.
pub async fn export_logs(
    store: &dyn RowStore,
    sources: &[IntraDayDataSourceType],
    range: DateRange,
) -> Result<Vec<CsvFile>> {
    let mut files = Vec::new();
    for source in sources {
        let logs = store.query_logs_in(*source, range).await?;
        if logs.is_empty() {
            continue;
        }
        files.push(CsvFile::new(
            format!("{}_log", source.key()),
            logs_to_csv(&logs)?,
        ));
    }
    Ok(files)
}
