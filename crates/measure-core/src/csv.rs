//! CSV rendering of stored rows for export.

use polars::prelude::*;

use crate::error::{MeasureError, Result};
use crate::types::{DailyRow, DailyValue, IntraDayLog};

fn calendar_columns(rows: &[DailyRow]) -> Vec<Column> {
    vec![
        Column::new(
            "date".into(),
            rows.iter()
                .map(|row| row.numbered_date.to_string())
                .collect::<Vec<_>>(),
        ),
        Column::new(
            "numbered_date".into(),
            rows.iter()
                .map(|row| row.numbered_date.value() as i32)
                .collect::<Vec<_>>(),
        ),
        Column::new(
            "year".into(),
            rows.iter().map(|row| row.year).collect::<Vec<_>>(),
        ),
        Column::new(
            "month".into(),
            rows.iter().map(|row| row.month as i32).collect::<Vec<_>>(),
        ),
        Column::new(
            "day_of_week".into(),
            rows.iter()
                .map(|row| row.day_of_week as i32)
                .collect::<Vec<_>>(),
        ),
    ]
}

fn write_csv(mut df: DataFrame) -> Result<String> {
    let mut buffer: Vec<u8> = Vec::new();
    CsvWriter::new(&mut buffer)
        .finish(&mut df)
        .map_err(|e| MeasureError::Export(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| MeasureError::Export(e.to_string()))
}

/// Renders daily rows as CSV.
///
/// Scalar rows get a `value` column; if any row holds a range, the rows are
/// written with `value_from` and `value_to` columns instead.
///
/// # Errors
/// Returns [`MeasureError::Export`] if the frame cannot be built or written.
pub fn rows_to_csv(rows: &[DailyRow]) -> Result<String> {
    let mut columns = calendar_columns(rows);
    let has_ranges = rows
        .iter()
        .any(|row| matches!(row.value, DailyValue::Range { .. }));
    if has_ranges {
        let (from, to): (Vec<Option<f64>>, Vec<Option<f64>>) = rows
            .iter()
            .map(|row| match row.value.as_range() {
                Some((from, to)) => (Some(from), Some(to)),
                None => (None, None),
            })
            .unzip();
        columns.push(Column::new("value_from".into(), from));
        columns.push(Column::new("value_to".into(), to));
    } else {
        let values: Vec<Option<f64>> = rows.iter().map(|row| row.value.as_scalar()).collect();
        columns.push(Column::new("value".into(), values));
    }
    let df = DataFrame::new(columns).map_err(|e| MeasureError::Export(e.to_string()))?;
    write_csv(df)
}

/// Renders intra-day log entries as CSV.
///
/// # Errors
/// Returns [`MeasureError::Export`] if the frame cannot be built or written.
pub fn logs_to_csv(logs: &[IntraDayLog]) -> Result<String> {
    let df = DataFrame::new(vec![
        Column::new(
            "id".into(),
            logs.iter().map(|log| log.id.clone()).collect::<Vec<_>>(),
        ),
        Column::new(
            "date".into(),
            logs.iter()
                .map(|log| log.numbered_date.to_string())
                .collect::<Vec<_>>(),
        ),
        Column::new(
            "seconds_of_day".into(),
            logs.iter()
                .map(|log| log.seconds_of_day as i32)
                .collect::<Vec<_>>(),
        ),
        Column::new(
            "value".into(),
            logs.iter().map(|log| log.value).collect::<Vec<_>>(),
        ),
        Column::new(
            "source".into(),
            logs.iter()
                .map(|log| log.source_label.clone())
                .collect::<Vec<_>>(),
        ),
    ])
    .map_err(|e| MeasureError::Export(e.to_string()))?;
    write_csv(df)
}
