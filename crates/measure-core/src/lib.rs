#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/datahand/measure/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core traits and types for health measure services.
//!
//! This crate provides the foundational abstractions for working with daily health data:
//!
//! - [`NumberedDate`](calendar::NumberedDate) - Calendar day encoded as `YYYYMMDD`
//! - [`CycleDimension`](cyclic::CycleDimension) - Month, season or weekday buckets and their occurrences
//! - [`DataService`](service::DataService) - Base trait for all data services
//! - [`RowStore`](store::RowStore) - Local storage abstraction
//! - [`CacheManager`](cache::CacheManager) - Coverage tracking of fetched ranges
//! - [`Exporter`](export::Exporter) - CSV and ZIP export

/// Aggregation of daily rows.
pub mod aggregate;
/// Cache coverage bookkeeping.
pub mod cache;
/// Numbered dates and date ranges.
pub mod calendar;
/// Source of the current date.
pub mod clock;
/// CSV rendering of rows and logs.
pub mod csv;
/// Cyclic time frames and occurrence resolution.
pub mod cyclic;
/// Error types for measure operations.
pub mod error;
/// Export to files and share sheets.
pub mod export;
/// Store-backed query implementations shared by services.
pub mod query;
/// The data service trait.
pub mod service;
/// Local row store trait.
pub mod store;
/// Core data types (metrics, rows, results).
pub mod types;

// Re-export commonly used items at crate root
pub use aggregate::{Aggregate, AggregatedRangeValue, AggregatedValue, StatisticKind};
pub use cache::{CacheManager, FetchPlan};
pub use calendar::{DateRange, NumberedDate};
pub use clock::{Clock, FixedClock, SystemClock};
pub use cyclic::{CycleDimension, CycleLevel, CyclicTimeFrame, TimeKeyedRange};
pub use error::{MeasureError, Result, UnsupportedReason};
pub use export::{CsvFile, ExportedFile, Exporter, SharePolicy, ShareSheet};
pub use service::{
    DataService, ProgressHandler, ProgressInfo, ServiceActivationResult, SupportCheck,
    SupportStatus,
};
pub use store::{CachedRangeEntry, RowStore};
pub use types::{
    Comparison, ComparisonEntry, CycleGroup, DailyRow, DailyValue, DataSourceType, FilterProperty,
    FilteredDailyValues, GroupedData, HighlightFilter, IntraDayDataSourceType, IntraDayLog,
    IntraDayPoint, IntraDaySeries, OverviewSourceRow, RangeAggregatedComparisonData,
    TimeKeyedAggregate,
};
