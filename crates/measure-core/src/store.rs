//! Row store trait for locally persisted measure data.
//!
//! This module defines the [`RowStore`] trait, the narrow interface through
//! which services persist daily rows, intra-day logs and cache bookkeeping.
//! Backends live in the `measure-cache` crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

use crate::{
    calendar::{DateRange, NumberedDate},
    error::Result,
    types::{DailyRow, DataSourceType, IntraDayDataSourceType, IntraDayLog},
};

/// Bookkeeping of how far a measure has been fetched and persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRangeEntry {
    /// Key of the fetch group.
    pub measure_key: String,
    /// Last day for which contiguous data is stored.
    pub end_date: NumberedDate,
    /// When the entry was last advanced.
    pub queried_at: DateTime<Utc>,
}

impl CachedRangeEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(measure_key: impl Into<String>, end_date: NumberedDate) -> Self {
        Self {
            measure_key: measure_key.into(),
            end_date,
            queried_at: Utc::now(),
        }
    }
}

/// Local storage of fetched rows and cache bookkeeping.
///
/// Implementations can store data in various backends (SQLite, in-memory, etc.).
/// Every handle reads and writes one service's partition of the backend:
/// rows are keyed by `(service, source, numbered_date)`, logs by
/// `(service, id)` and cache entries by `(service, measure_key)`. Inserting
/// an existing key replaces it.
#[async_trait]
pub trait RowStore: Send + Sync + Debug {
    /// Key of the service whose partition this handle works on.
    fn service_key(&self) -> &str;

    /// A handle on the same backend restricted to `service_key`'s partition.
    fn scoped(&self, service_key: &str) -> Arc<dyn RowStore>;

    /// Inserts or replaces daily rows of a metric.
    async fn insert_rows(&self, source: DataSourceType, rows: &[DailyRow]) -> Result<()>;

    /// Returns the rows of a metric within the range, ordered by date.
    async fn query_range(&self, source: DataSourceType, range: DateRange) -> Result<Vec<DailyRow>>;

    /// Inserts or replaces intra-day log entries.
    async fn insert_logs(&self, logs: &[IntraDayLog]) -> Result<()>;

    /// Returns the log entries of a metric on a date, ordered by time of day.
    async fn query_logs(
        &self,
        source: IntraDayDataSourceType,
        date: NumberedDate,
    ) -> Result<Vec<IntraDayLog>>;

    /// Returns the log entries of a metric within the range, ordered by date
    /// and time of day.
    async fn query_logs_in(
        &self,
        source: IntraDayDataSourceType,
        range: DateRange,
    ) -> Result<Vec<IntraDayLog>>;

    /// Retrieves the cache entry of a measure key.
    ///
    /// Returns `Ok(None)` if the key was never fetched.
    async fn get_cache_entry(&self, measure_key: &str) -> Result<Option<CachedRangeEntry>>;

    /// Inserts or replaces a cache entry.
    async fn upsert_cache_entry(&self, entry: &CachedRangeEntry) -> Result<()>;

    /// Removes the cache entry of a measure key.
    async fn delete_cache_entry(&self, measure_key: &str) -> Result<()>;

    /// Removes all rows, logs and cache entries of this handle's service.
    async fn delete_all(&self) -> Result<()>;
}
