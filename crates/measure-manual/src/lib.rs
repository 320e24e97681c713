#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/datahand/measure/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Manual entry data service.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use measure_cache::InMemoryStore;
//! use measure_core::{DailyValue, DataSourceType, NumberedDate};
//! use measure_manual::ManualEntryService;
//!
//! let service = ManualEntryService::new(Arc::new(InMemoryStore::new()));
//! service
//!     .record_value(
//!         DataSourceType::Weight,
//!         NumberedDate::from_value(20240105)?,
//!         DailyValue::Scalar(71.3),
//!     )
//!     .await?;
//! ```

use async_trait::async_trait;
use measure_core::{
    Aggregate, Clock, CsvFile, CycleDimension, CyclicTimeFrame, DailyRow, DailyValue,
    DataService, DataSourceType, DateRange, FilteredDailyValues, GroupedData, HighlightFilter,
    IntraDayDataSourceType, IntraDayLog, IntraDayPoint, IntraDaySeries, MeasureError,
    NumberedDate, OverviewSourceRow, ProgressHandler, ProgressInfo, Result, RowStore,
    ServiceActivationResult, StatisticKind, SupportCheck, SupportStatus, SystemClock,
    TimeKeyedAggregate, query,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Key of the manual entry service.
pub const MANUAL_SERVICE_KEY: &str = "manual";

/// Earliest day considered when reading the whole store.
const EARLIEST_ENTRY: (i32, u32, u32) = (1900, 1, 1);

/// Health measures entered by the user.
#[derive(Debug)]
pub struct ManualEntryService {
    store: Arc<dyn RowStore>,
    clock: Arc<dyn Clock>,
    support: SupportCheck,
}

impl ManualEntryService {
    /// Create a new service over a store.
    ///
    /// The store may be shared with other services; entries go to this
    /// service's own partition of it.
    #[must_use]
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self {
            store: store.scoped(MANUAL_SERVICE_KEY),
            clock: Arc::new(SystemClock),
            support: SupportCheck::new(),
        }
    }

    /// Use a different clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Records the value of a day, replacing an earlier entry.
    ///
    /// # Errors
    /// Returns [`MeasureError::InvalidParameter`] if the value's shape does
    /// not match the metric or the date is in the future.
    #[instrument(skip(self, value))]
    pub async fn record_value(
        &self,
        source: DataSourceType,
        date: NumberedDate,
        value: DailyValue,
    ) -> Result<()> {
        let expects_range = source.statistic_kind() == StatisticKind::Range;
        if expects_range != matches!(value, DailyValue::Range { .. }) {
            return Err(MeasureError::InvalidParameter(format!(
                "{value:?} does not fit {source}"
            )));
        }
        if date > self.clock.today()? {
            return Err(MeasureError::InvalidParameter(format!(
                "Cannot record {source} for future date {date}"
            )));
        }
        self.store
            .insert_rows(source, &[DailyRow::new(date, value)])
            .await?;
        debug!("Recorded manual value");
        Ok(())
    }

    /// Records a log entry within a day.
    ///
    /// # Errors
    /// Returns an error if the store cannot be written.
    pub async fn record_log(&self, log: IntraDayLog) -> Result<()> {
        self.store.insert_logs(std::slice::from_ref(&log)).await
    }

    fn history(&self) -> Result<Option<DateRange>> {
        let (year, month, day) = EARLIEST_ENTRY;
        let earliest = NumberedDate::from_ymd(year, month, day)?;
        let today = self.clock.today()?;
        Ok(DateRange::new(earliest, today).ok())
    }
}

#[async_trait]
impl DataService for ManualEntryService {
    fn key(&self) -> &str {
        MANUAL_SERVICE_KEY
    }

    fn name(&self) -> &str {
        "Manual Entry"
    }

    fn description(&self) -> &str {
        "Values entered by hand"
    }

    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn support_check(&self) -> &SupportCheck {
        &self.support
    }

    fn is_data_source_supported(&self, _source: DataSourceType) -> bool {
        true
    }

    async fn on_check_supported_in_system(&self) -> SupportStatus {
        SupportStatus::supported()
    }

    async fn fetch_data_impl(
        &self,
        source: DataSourceType,
        range: DateRange,
        include_statistics: bool,
    ) -> Result<OverviewSourceRow> {
        query::overview(self.store.as_ref(), source, range, include_statistics).await
    }

    async fn preferred_value_range(&self, source: DataSourceType) -> Result<(f64, f64)> {
        match self.history()? {
            Some(history) => query::value_range(self.store.as_ref(), source, history).await,
            None => Ok(source.default_value_range()),
        }
    }

    async fn fetch_filtered_dates(
        &self,
        filter: &HighlightFilter,
        range: DateRange,
    ) -> Result<BTreeMap<NumberedDate, bool>> {
        query::filtered_dates(self.store.as_ref(), filter, range).await
    }

    async fn fetch_intra_day_data(
        &self,
        source: IntraDayDataSourceType,
        date: NumberedDate,
    ) -> Result<IntraDaySeries> {
        let points = self
            .store
            .query_logs(source, date)
            .await?
            .into_iter()
            .map(|log| IntraDayPoint {
                seconds_of_day: log.seconds_of_day,
                value: log.value,
            })
            .collect();
        Ok(IntraDaySeries {
            source,
            date,
            points,
        })
    }

    async fn fetch_cyclic_aggregated_data(
        &self,
        source: DataSourceType,
        range: DateRange,
        frame: CyclicTimeFrame,
    ) -> Result<GroupedData> {
        query::cyclic_aggregate(self.store.as_ref(), source, range, frame).await
    }

    async fn fetch_range_aggregated_data(
        &self,
        source: DataSourceType,
        range: DateRange,
    ) -> Result<Aggregate> {
        query::range_aggregate(self.store.as_ref(), source, range).await
    }

    async fn fetch_cycle_range_dimension_data_impl(
        &self,
        source: DataSourceType,
        range: DateRange,
        dimension: CycleDimension,
    ) -> Result<Vec<TimeKeyedAggregate>> {
        query::time_keyed_aggregates(self.store.as_ref(), source, range, dimension).await
    }

    async fn fetch_cycle_daily_dimension_data(
        &self,
        source: DataSourceType,
        range: DateRange,
        dimension: CycleDimension,
    ) -> Result<FilteredDailyValues> {
        query::daily_dimension(self.store.as_ref(), source, range, dimension).await
    }

    async fn activate_in_system(
        &self,
        progress: ProgressHandler<'_>,
    ) -> Result<ServiceActivationResult> {
        progress(ProgressInfo::new(1.0, "Manual entry ready"));
        Ok(ServiceActivationResult::succeeded(None))
    }

    async fn deactivated_in_system(&self) -> Result<bool> {
        self.clear_all_cache().await?;
        Ok(true)
    }

    async fn clear_all_cache(&self) -> Result<()> {
        self.store.delete_all().await
    }

    async fn on_system_exit(&self) {}

    async fn export_to_csv(&self) -> Result<Vec<CsvFile>> {
        match self.history()? {
            Some(history) => {
                let store = self.store.as_ref();
                let mut files = query::export_sources(store, &DataSourceType::ALL, history).await?;
                files.extend(
                    query::export_logs(store, &[IntraDayDataSourceType::Weight], history).await?,
                );
                Ok(files)
            }
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use measure_cache::InMemoryStore;
    use measure_core::FixedClock;

    fn day(value: u32) -> NumberedDate {
        NumberedDate::from_value(value).unwrap()
    }

    fn service() -> ManualEntryService {
        ManualEntryService::new(Arc::new(InMemoryStore::new()))
            .with_clock(Arc::new(FixedClock(day(20240315))))
    }

    #[tokio::test]
    async fn test_recorded_values_are_queryable() {
        let service = service();
        for (date, weight) in [(20240105, 71.0), (20240112, 70.0), (20230110, 73.0)] {
            service
                .record_value(DataSourceType::Weight, day(date), DailyValue::Scalar(weight))
                .await
                .unwrap();
        }

        let row = service
            .fetch_data(DataSourceType::Weight, day(20240101), day(20240131), true, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.data.len(), 2);

        let january = CycleDimension::new(CyclicTimeFrame::MonthOfYear, 1).unwrap();
        let comparison = service
            .fetch_cycle_range_dimension_data(
                DataSourceType::Weight,
                DateRange::new(day(20230101), day(20241231)).unwrap(),
                january,
            )
            .await
            .unwrap();
        let keys: Vec<Option<u32>> = comparison
            .data
            .iter()
            .map(|entry| entry.value.as_ref().map(|v| v.time_key))
            .collect();
        assert_eq!(keys, vec![Some(2023), Some(2024)]);

        assert_eq!(
            service
                .preferred_value_range(DataSourceType::Weight)
                .await
                .unwrap(),
            (70.0, 73.0)
        );
    }

    #[tokio::test]
    async fn test_rejects_mismatched_or_future_values() {
        let service = service();
        assert!(matches!(
            service
                .record_value(DataSourceType::SleepRange, day(20240101), DailyValue::Scalar(1.0))
                .await,
            Err(MeasureError::InvalidParameter(_))
        ));
        assert!(matches!(
            service
                .record_value(DataSourceType::StepCount, day(20240316), DailyValue::Scalar(1.0))
                .await,
            Err(MeasureError::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_logs_and_deactivation() {
        let service = service();
        service
            .record_log(IntraDayLog {
                id: "manual-1".to_string(),
                source: IntraDayDataSourceType::Weight,
                numbered_date: day(20240105),
                seconds_of_day: 3600,
                value: 71.0,
                source_label: None,
            })
            .await
            .unwrap();
        let series = service
            .fetch_intra_day_data(IntraDayDataSourceType::Weight, day(20240105))
            .await
            .unwrap();
        assert_eq!(series.points.len(), 1);
        let files = service.export_to_csv().await.unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["weight_log"]);

        let result = service
            .activate_in_system(&|_: ProgressInfo| {})
            .await
            .unwrap();
        assert!(result.success);
        assert!(service.check_supported_in_system().await.supported);

        assert!(service.deactivated_in_system().await.unwrap());
        let series = service
            .fetch_intra_day_data(IntraDayDataSourceType::Weight, day(20240105))
            .await
            .unwrap();
        assert!(series.points.is_empty());
        assert!(service.export_to_csv().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shared_backend_keeps_services_apart() {
        let backend: Arc<dyn RowStore> = Arc::new(InMemoryStore::new());
        let fitbit = backend.scoped("fitbit");
        fitbit
            .insert_rows(DataSourceType::Weight, &[DailyRow::scalar(day(20240105), 80.0)])
            .await
            .unwrap();
        fitbit
            .upsert_cache_entry(&measure_core::CachedRangeEntry::new("weight", day(20240110)))
            .await
            .unwrap();

        let service = ManualEntryService::new(backend.clone())
            .with_clock(Arc::new(FixedClock(day(20240315))));
        service
            .record_value(DataSourceType::Weight, day(20240105), DailyValue::Scalar(71.0))
            .await
            .unwrap();

        let range = DateRange::single(day(20240105));
        let rows = fitbit.query_range(DataSourceType::Weight, range).await.unwrap();
        assert_eq!(rows[0].value, DailyValue::Scalar(80.0));
        let own = service
            .fetch_range_aggregated_data(DataSourceType::Weight, range)
            .await
            .unwrap();
        assert_eq!(own.n(), 1);

        assert!(service.deactivated_in_system().await.unwrap());
        assert_eq!(fitbit.query_range(DataSourceType::Weight, range).await.unwrap().len(), 1);
        assert!(fitbit.get_cache_entry("weight").await.unwrap().is_some());
    }
}
