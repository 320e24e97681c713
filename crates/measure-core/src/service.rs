//! The data service trait and its activation and support types.
//!
//! A [`DataService`] is one source of health measures (a wearable API, manual
//! entry). The trait provides the common request flow: clamping requests to
//! today, memoizing the support check and matching per-occurrence results to
//! the occurrences of a cycle dimension. Services implement the `*_impl`
//! hooks and the remaining queries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use tokio::sync::{OnceCell, RwLock};
use tracing::debug;

use crate::aggregate::Aggregate;
use crate::calendar::{DateRange, NumberedDate};
use crate::clock::Clock;
use crate::cyclic::{CycleDimension, CyclicTimeFrame, resolve};
use crate::error::{MeasureError, Result, UnsupportedReason};
use crate::export::{CsvFile, Exporter};
use crate::types::{
    ComparisonEntry, DataSourceType, FilteredDailyValues, GroupedData, HighlightFilter,
    IntraDayDataSourceType, IntraDaySeries, OverviewSourceRow, RangeAggregatedComparisonData,
    TimeKeyedAggregate,
};

/// Outcome of a support check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportStatus {
    /// Whether the service can be used.
    pub supported: bool,
    /// Why not, when unsupported.
    pub reason: Option<UnsupportedReason>,
}

impl SupportStatus {
    /// A supported status.
    #[must_use]
    pub const fn supported() -> Self {
        Self {
            supported: true,
            reason: None,
        }
    }

    /// An unsupported status with its reason.
    #[must_use]
    pub const fn unsupported(reason: UnsupportedReason) -> Self {
        Self {
            supported: false,
            reason: Some(reason),
        }
    }
}

/// Memoized result of a service's support probe.
///
/// The probe runs at most once until [`SupportCheck::reset`] is called;
/// concurrent callers wait for the same probe.
#[derive(Debug, Default)]
pub struct SupportCheck {
    cell: RwLock<OnceCell<SupportStatus>>,
}

impl SupportCheck {
    /// Creates an empty check.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memoized status, running `probe` if there is none.
    pub async fn get_or_probe<F, Fut>(&self, probe: F) -> SupportStatus
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SupportStatus>,
    {
        let cell = self.cell.read().await;
        *cell.get_or_init(probe).await
    }

    /// The memoized status, if a probe has completed.
    pub async fn cached(&self) -> Option<SupportStatus> {
        self.cell.read().await.get().copied()
    }

    /// Forgets the memoized status.
    pub async fn reset(&self) {
        self.cell.write().await.take();
    }
}

/// A progress report during activation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Completed fraction in `0.0..=1.0`.
    pub progress: f64,
    /// What is happening.
    pub message: String,
}

impl ProgressInfo {
    /// Creates a report.
    #[must_use]
    pub fn new(progress: f64, message: impl Into<String>) -> Self {
        Self {
            progress: progress.clamp(0.0, 1.0),
            message: message.into(),
        }
    }
}

/// Receives progress reports.
pub type ProgressHandler<'a> = &'a (dyn Fn(ProgressInfo) + Send + Sync);

/// Result of activating a service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceActivationResult {
    /// Whether the service is now active.
    pub success: bool,
    /// Earliest date the service has data for, when known.
    pub service_initial_date: Option<NumberedDate>,
    /// Failure description when unsuccessful.
    pub error: Option<String>,
}

impl ServiceActivationResult {
    /// A successful activation.
    #[must_use]
    pub const fn succeeded(service_initial_date: Option<NumberedDate>) -> Self {
        Self {
            success: true,
            service_initial_date,
            error: None,
        }
    }

    /// A failed activation.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            service_initial_date: None,
            error: Some(error.into()),
        }
    }

    /// Converts into a result carrying the initial date.
    ///
    /// # Errors
    /// Returns [`MeasureError::ActivationFailure`] for a failed activation.
    pub fn into_result(self) -> Result<Option<NumberedDate>> {
        if self.success {
            Ok(self.service_initial_date)
        } else {
            Err(MeasureError::ActivationFailure(
                self.error.unwrap_or_else(|| "Unknown error".to_string()),
            ))
        }
    }
}

/// A source of health measures.
#[async_trait]
pub trait DataService: Send + Sync + Debug {
    /// Stable identifier of the service.
    fn key(&self) -> &str;

    /// Display name.
    fn name(&self) -> &str;

    /// Short description.
    fn description(&self) -> &str;

    /// Clock used to determine today.
    fn clock(&self) -> &dyn Clock;

    /// Memo of the support probe.
    fn support_check(&self) -> &SupportCheck;

    /// Returns true if the service provides the metric.
    fn is_data_source_supported(&self, source: DataSourceType) -> bool;

    /// Whether the service can be used here; probed once and memoized.
    async fn check_supported_in_system(&self) -> SupportStatus {
        self.support_check()
            .get_or_probe(|| self.on_check_supported_in_system())
            .await
    }

    /// Probes platform and credential support.
    async fn on_check_supported_in_system(&self) -> SupportStatus;

    /// Fetches daily rows of a metric.
    ///
    /// Returns `None` when the request starts in the future. The end is
    /// clamped to today, or to yesterday when `include_today` is false; a
    /// request for today alone then yields a row without data.
    ///
    /// # Errors
    /// Returns [`MeasureError::InvalidParameter`] if `end` is before `start`,
    /// and any error of the service.
    async fn fetch_data(
        &self,
        source: DataSourceType,
        start: NumberedDate,
        end: NumberedDate,
        include_statistics: bool,
        include_today: bool,
    ) -> Result<Option<OverviewSourceRow>> {
        let requested = DateRange::new(start, end)?;
        let today = self.clock().today()?;
        if start > today {
            debug!(service = self.key(), %requested, %today, "Request starts in the future");
            return Ok(None);
        }
        let last = if include_today { Some(today) } else { today.pred() };
        let Some(last) = last.filter(|last| *last >= start) else {
            return Ok(Some(OverviewSourceRow {
                source,
                range: DateRange::single(start),
                data: Vec::new(),
                statistics: include_statistics.then_some(Aggregate::NoData),
            }));
        };
        let range = DateRange::new(start, end.min(last))?;
        self.fetch_data_impl(source, range, include_statistics)
            .await
            .map(Some)
    }

    /// Fetches daily rows of a range that ends no later than today.
    async fn fetch_data_impl(
        &self,
        source: DataSourceType,
        range: DateRange,
        include_statistics: bool,
    ) -> Result<OverviewSourceRow>;

    /// Value range to use for charts of a metric.
    async fn preferred_value_range(&self, source: DataSourceType) -> Result<(f64, f64)>;

    /// Evaluates a highlight filter for every observed day of a range.
    async fn fetch_filtered_dates(
        &self,
        filter: &HighlightFilter,
        range: DateRange,
    ) -> Result<BTreeMap<NumberedDate, bool>>;

    /// Fetches the within-day series of a date.
    async fn fetch_intra_day_data(
        &self,
        source: IntraDayDataSourceType,
        date: NumberedDate,
    ) -> Result<IntraDaySeries>;

    /// Groups a range by every dimension of a cyclic frame.
    async fn fetch_cyclic_aggregated_data(
        &self,
        source: DataSourceType,
        range: DateRange,
        frame: CyclicTimeFrame,
    ) -> Result<GroupedData>;

    /// Aggregates a whole range.
    async fn fetch_range_aggregated_data(
        &self,
        source: DataSourceType,
        range: DateRange,
    ) -> Result<Aggregate>;

    /// Aggregates every occurrence of a dimension that has data.
    async fn fetch_cycle_range_dimension_data_impl(
        &self,
        source: DataSourceType,
        range: DateRange,
        dimension: CycleDimension,
    ) -> Result<Vec<TimeKeyedAggregate>>;

    /// Compares every occurrence of a dimension within a range.
    ///
    /// Each occurrence gets the result whose time key matches exactly; an
    /// occurrence without one has no value.
    ///
    /// # Errors
    /// Returns any error of the service, or an error if an occurrence window
    /// is not representable.
    async fn fetch_cycle_range_dimension_data(
        &self,
        source: DataSourceType,
        range: DateRange,
        dimension: CycleDimension,
    ) -> Result<RangeAggregatedComparisonData> {
        let results = self
            .fetch_cycle_range_dimension_data_impl(source, range, dimension)
            .await?;
        let data = resolve(range, dimension)?
            .into_iter()
            .map(|occurrence| ComparisonEntry {
                range: occurrence.range,
                value: results
                    .iter()
                    .find(|result| result.time_key == occurrence.time_key)
                    .cloned(),
            })
            .collect();
        Ok(RangeAggregatedComparisonData { data })
    }

    /// Daily rows of a range that fall into a dimension.
    async fn fetch_cycle_daily_dimension_data(
        &self,
        source: DataSourceType,
        range: DateRange,
        dimension: CycleDimension,
    ) -> Result<FilteredDailyValues>;

    /// Activates the service. Calling it on an active service succeeds
    /// without refetching.
    async fn activate_in_system(
        &self,
        progress: ProgressHandler<'_>,
    ) -> Result<ServiceActivationResult>;

    /// Deactivates the service and drops its local data.
    async fn deactivated_in_system(&self) -> Result<bool>;

    /// Drops all locally cached data.
    async fn clear_all_cache(&self) -> Result<()>;

    /// Releases resources before the process exits.
    async fn on_system_exit(&self);

    /// Renders the service's data as CSV documents.
    async fn export_to_csv(&self) -> Result<Vec<CsvFile>>;

    /// Exports the service's data through `exporter`.
    ///
    /// Returns true also when there was nothing to export.
    ///
    /// # Errors
    /// Returns [`MeasureError::Export`] if the files cannot be written, or
    /// cannot be shared under a strict share policy.
    async fn export_data(&self, exporter: &Exporter) -> Result<bool> {
        let files = self.export_to_csv().await?;
        exporter.export(self.key(), files).await?;
        Ok(true)
    }
}
