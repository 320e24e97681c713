//! [`DataService`] implementation backed by the Fitbit Web API.

use async_trait::async_trait;
use measure_core::{
    Aggregate, CacheManager, Clock, CsvFile, CycleDimension, CyclicTimeFrame, DailyRow,
    DataService, DataSourceType, DateRange, FilteredDailyValues, GroupedData, HighlightFilter,
    IntraDayDataSourceType, IntraDayLog, IntraDayPoint, IntraDaySeries, MeasureError,
    NumberedDate, OverviewSourceRow, ProgressHandler, ProgressInfo, Result, RowStore,
    ServiceActivationResult, SupportCheck, SupportStatus, SystemClock, TimeKeyedAggregate,
    UnsupportedReason, cyclic::resolve, query,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::api::{FitbitApi, SleepLog, WeightLog};

/// Key of the Fitbit service.
pub const FITBIT_SERVICE_KEY: &str = "fitbit";

/// Weight of a new daily average in the weight trend.
const WEIGHT_TREND_SMOOTHING: f64 = 0.1;

/// A set of metrics fetched by the same requests and cached under one key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum MeasureGroup {
    Steps,
    RestingHeartRate,
    Sleep,
    Weight,
}

impl MeasureGroup {
    const fn of(source: DataSourceType) -> Self {
        match source {
            DataSourceType::StepCount => Self::Steps,
            DataSourceType::HeartRate => Self::RestingHeartRate,
            DataSourceType::HoursSlept | DataSourceType::SleepRange => Self::Sleep,
            DataSourceType::Weight => Self::Weight,
        }
    }

    const fn key(self) -> &'static str {
        match self {
            Self::Steps => "steps",
            Self::RestingHeartRate => "resting_heart_rate",
            Self::Sleep => "sleep",
            Self::Weight => "weight",
        }
    }
}

/// Health measures from a Fitbit account.
///
/// Rows are fetched on demand from the account's creation date onwards and
/// kept in the service's partition of a [`RowStore`]; each fetch group
/// advances its own cache entry.
#[derive(Debug)]
pub struct FitbitService {
    api: Arc<dyn FitbitApi>,
    cache: CacheManager,
    clock: Arc<dyn Clock>,
    support: SupportCheck,
    initial_date: RwLock<Option<NumberedDate>>,
}

impl FitbitService {
    /// Create a new service over an API and a store.
    ///
    /// The store may be shared with other services; this service only
    /// touches its own partition of it.
    #[must_use]
    pub fn new(api: Arc<dyn FitbitApi>, store: Arc<dyn RowStore>) -> Self {
        Self {
            api,
            cache: CacheManager::new(store.scoped(FITBIT_SERVICE_KEY)),
            clock: Arc::new(SystemClock),
            support: SupportCheck::new(),
            initial_date: RwLock::new(None),
        }
    }

    /// Use a different clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The cache bookkeeping of this service.
    #[must_use]
    pub const fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// The account's first day, once known.
    pub async fn initial_date(&self) -> Option<NumberedDate> {
        *self.initial_date.read().await
    }

    fn store(&self) -> &dyn RowStore {
        self.cache.store().as_ref()
    }

    async fn ensure_initial_date(&self) -> Result<NumberedDate> {
        if let Some(date) = *self.initial_date.read().await {
            return Ok(date);
        }
        let date = self.api.member_since().await?;
        *self.initial_date.write().await = Some(date);
        Ok(date)
    }

    /// Makes sure the rows of a group are stored up to `until`, clamped to today.
    ///
    /// Coverage always starts at the account's first day. Today's data is
    /// stored but not recorded as covered.
    async fn ensure_group(&self, group: MeasureGroup, until: NumberedDate) -> Result<()> {
        let today = self.clock.today()?;
        let initial = self.ensure_initial_date().await?;
        let until = until.min(today);
        if until < initial {
            return Ok(());
        }
        let requested = DateRange::new(initial, until)?;
        let last_final = today.pred();

        self.cache
            .ensure_cached(group.key(), requested, |missing| async move {
                self.fetch_group(group, missing, initial).await?;
                Ok(last_final
                    .filter(|last| *last >= missing.start())
                    .map(|last| last.min(missing.end())))
            })
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(group = group.key(), range = %range))]
    async fn fetch_group(
        &self,
        group: MeasureGroup,
        range: DateRange,
        initial: NumberedDate,
    ) -> Result<()> {
        match group {
            MeasureGroup::Steps => {
                let rows: Vec<DailyRow> = self
                    .api
                    .daily_steps(range)
                    .await?
                    .into_iter()
                    .map(|m| DailyRow::scalar(m.date, m.value))
                    .collect();
                self.store()
                    .insert_rows(DataSourceType::StepCount, &rows)
                    .await
            }
            MeasureGroup::RestingHeartRate => {
                let rows: Vec<DailyRow> = self
                    .api
                    .resting_heart_rate(range)
                    .await?
                    .into_iter()
                    .map(|m| DailyRow::scalar(m.date, m.value))
                    .collect();
                self.store()
                    .insert_rows(DataSourceType::HeartRate, &rows)
                    .await
            }
            MeasureGroup::Sleep => {
                let logs = self.api.sleep_logs(range).await?;
                let (hours, ranges) = sleep_rows(&logs);
                self.store()
                    .insert_rows(DataSourceType::HoursSlept, &hours)
                    .await?;
                self.store()
                    .insert_rows(DataSourceType::SleepRange, &ranges)
                    .await
            }
            MeasureGroup::Weight => {
                let logs = self.api.weight_logs(range).await?;
                let entries: Vec<IntraDayLog> = logs.iter().map(weight_log_entry).collect();
                self.store().insert_logs(&entries).await?;

                let seed = self.last_weight_trend(initial, range.start()).await?;
                let rows = weight_trend_rows(&logs, seed);
                self.store().insert_rows(DataSourceType::Weight, &rows).await
            }
        }
    }

    /// The last trend value stored before `before`.
    async fn last_weight_trend(
        &self,
        initial: NumberedDate,
        before: NumberedDate,
    ) -> Result<Option<f64>> {
        let Some(previous) = before.pred().filter(|previous| *previous >= initial) else {
            return Ok(None);
        };
        let rows = self
            .store()
            .query_range(DataSourceType::Weight, DateRange::new(initial, previous)?)
            .await?;
        Ok(rows.last().and_then(|row| row.value.as_scalar()))
    }
}

fn weight_log_entry(log: &WeightLog) -> IntraDayLog {
    IntraDayLog {
        id: format!("fitbit-weight-{}", log.log_id),
        source: IntraDayDataSourceType::Weight,
        numbered_date: log.date,
        seconds_of_day: log.seconds_of_day(),
        value: log.weight,
        source_label: log.source.clone(),
    }
}

/// Daily trend rows: an exponential moving average of daily mean weights.
fn weight_trend_rows(logs: &[WeightLog], seed: Option<f64>) -> Vec<DailyRow> {
    let mut daily: BTreeMap<NumberedDate, (f64, usize)> = BTreeMap::new();
    for log in logs {
        let (sum, n) = daily.entry(log.date).or_default();
        *sum += log.weight;
        *n += 1;
    }

    let mut trend = seed;
    daily
        .into_iter()
        .map(|(date, (sum, n))| {
            let mean = sum / n as f64;
            let value = trend.map_or(mean, |previous| {
                previous + WEIGHT_TREND_SMOOTHING * (mean - previous)
            });
            trend = Some(value);
            DailyRow::scalar(date, value)
        })
        .collect()
}

/// Hours asleep and bed/wake range per date of sleep.
///
/// Hours add up over all sessions of a date; the range comes from the main
/// sleep, or the longest session when none is marked main.
fn sleep_rows(logs: &[SleepLog]) -> (Vec<DailyRow>, Vec<DailyRow>) {
    let mut by_date: BTreeMap<NumberedDate, Vec<&SleepLog>> = BTreeMap::new();
    for log in logs {
        by_date.entry(log.date_of_sleep).or_default().push(log);
    }

    let mut hours = Vec::with_capacity(by_date.len());
    let mut ranges = Vec::with_capacity(by_date.len());
    for (date, sessions) in by_date {
        let minutes: u32 = sessions.iter().map(|s| s.minutes_asleep).sum();
        hours.push(DailyRow::scalar(date, f64::from(minutes) / 60.0));

        let main = sessions
            .iter()
            .find(|s| s.is_main_sleep)
            .or_else(|| sessions.iter().max_by_key(|s| s.minutes_asleep));
        if let Some(main) = main {
            let (bed, wake) = main.bounds_seconds();
            ranges.push(DailyRow::range(date, bed, wake));
        }
    }
    (hours, ranges)
}

#[async_trait]
impl DataService for FitbitService {
    fn key(&self) -> &str {
        FITBIT_SERVICE_KEY
    }

    fn name(&self) -> &str {
        "Fitbit"
    }

    fn description(&self) -> &str {
        "Steps, resting heart rate, sleep and weight from a Fitbit account"
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
        if self.api.has_credentials() {
            SupportStatus::supported()
        } else {
            SupportStatus::unsupported(UnsupportedReason::Credential)
        }
    }

    #[instrument(skip(self), fields(source = %source, range = %range))]
    async fn fetch_data_impl(
        &self,
        source: DataSourceType,
        range: DateRange,
        include_statistics: bool,
    ) -> Result<OverviewSourceRow> {
        self.ensure_group(MeasureGroup::of(source), range.end())
            .await?;
        query::overview(self.store(), source, range, include_statistics).await
    }

    async fn preferred_value_range(&self, source: DataSourceType) -> Result<(f64, f64)> {
        let today = self.clock.today()?;
        match self.initial_date().await {
            Some(initial) if initial <= today => {
                query::value_range(self.store(), source, DateRange::new(initial, today)?).await
            }
            _ => Ok(source.default_value_range()),
        }
    }

    async fn fetch_filtered_dates(
        &self,
        filter: &HighlightFilter,
        range: DateRange,
    ) -> Result<BTreeMap<NumberedDate, bool>> {
        self.ensure_group(MeasureGroup::of(filter.source), range.end())
            .await?;
        query::filtered_dates(self.store(), filter, range).await
    }

    #[instrument(skip(self), fields(date = %date))]
    async fn fetch_intra_day_data(
        &self,
        source: IntraDayDataSourceType,
        date: NumberedDate,
    ) -> Result<IntraDaySeries> {
        let points = match source {
            IntraDayDataSourceType::Weight => {
                self.ensure_group(MeasureGroup::Weight, date).await?;
                self.store()
                    .query_logs(source, date)
                    .await?
                    .into_iter()
                    .map(|log| IntraDayPoint {
                        seconds_of_day: log.seconds_of_day,
                        value: log.value,
                    })
                    .collect()
            }
            IntraDayDataSourceType::StepCount | IntraDayDataSourceType::HeartRate => {
                if date > self.clock.today()? {
                    Vec::new()
                } else {
                    self.api.intraday(source, date).await?
                }
            }
        };
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
        self.ensure_group(MeasureGroup::of(source), range.end())
            .await?;
        query::cyclic_aggregate(self.store(), source, range, frame).await
    }

    async fn fetch_range_aggregated_data(
        &self,
        source: DataSourceType,
        range: DateRange,
    ) -> Result<Aggregate> {
        self.ensure_group(MeasureGroup::of(source), range.end())
            .await?;
        query::range_aggregate(self.store(), source, range).await
    }

    async fn fetch_cycle_range_dimension_data_impl(
        &self,
        source: DataSourceType,
        range: DateRange,
        dimension: CycleDimension,
    ) -> Result<Vec<TimeKeyedAggregate>> {
        let occurrences = resolve(range, dimension)?;
        if let Some(span) = query::occurrence_span(&occurrences) {
            self.ensure_group(MeasureGroup::of(source), span.end())
                .await?;
        }
        query::time_keyed_aggregates(self.store(), source, range, dimension).await
    }

    async fn fetch_cycle_daily_dimension_data(
        &self,
        source: DataSourceType,
        range: DateRange,
        dimension: CycleDimension,
    ) -> Result<FilteredDailyValues> {
        self.ensure_group(MeasureGroup::of(source), range.end())
            .await?;
        query::daily_dimension(self.store(), source, range, dimension).await
    }

    async fn activate_in_system(
        &self,
        progress: ProgressHandler<'_>,
    ) -> Result<ServiceActivationResult> {
        if let Some(initial) = self.initial_date().await {
            debug!(%initial, "Fitbit already active");
            progress(ProgressInfo::new(1.0, "Connected to Fitbit"));
            return Ok(ServiceActivationResult::succeeded(Some(initial)));
        }

        progress(ProgressInfo::new(0.0, "Checking Fitbit credentials"));
        let status = self.check_supported_in_system().await;
        if !status.supported {
            let error = MeasureError::UnsupportedService(
                status.reason.unwrap_or(UnsupportedReason::Credential),
            );
            warn!(error = %error, "Fitbit activation rejected");
            return Ok(ServiceActivationResult::failed(error.to_string()));
        }

        progress(ProgressInfo::new(0.5, "Reading Fitbit profile"));
        match self.ensure_initial_date().await {
            Ok(initial) => {
                progress(ProgressInfo::new(1.0, "Connected to Fitbit"));
                Ok(ServiceActivationResult::succeeded(Some(initial)))
            }
            Err(e) => {
                warn!(error = %e, "Fitbit activation failed");
                Ok(ServiceActivationResult::failed(e.to_string()))
            }
        }
    }

    async fn deactivated_in_system(&self) -> Result<bool> {
        if let Err(e) = self.api.revoke().await {
            warn!(error = %e, "Failed to revoke Fitbit token");
        }
        self.clear_all_cache().await?;
        self.support.reset().await;
        *self.initial_date.write().await = None;
        debug!("Fitbit deactivated");
        Ok(true)
    }

    async fn clear_all_cache(&self) -> Result<()> {
        self.cache.clear_all().await
    }

    async fn on_system_exit(&self) {
        debug!("Fitbit service exiting");
    }

    async fn export_to_csv(&self) -> Result<Vec<CsvFile>> {
        let today = self.clock.today()?;
        match self.initial_date().await {
            Some(initial) if initial <= today => {
                let history = DateRange::new(initial, today)?;
                let mut files =
                    query::export_sources(self.store(), &DataSourceType::ALL, history).await?;
                files.extend(
                    query::export_logs(self.store(), &[IntraDayDataSourceType::Weight], history)
                        .await?,
                );
                Ok(files)
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DailyMeasurement;
    use chrono::NaiveTime;
    use measure_cache::InMemoryStore;
    use measure_core::{Exporter, FixedClock, ShareSheet};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn day(value: u32) -> NumberedDate {
        NumberedDate::from_value(value).unwrap()
    }

    fn range(start: u32, end: u32) -> DateRange {
        DateRange::new(day(start), day(end)).unwrap()
    }

    #[derive(Debug, Default)]
    struct FakeFitbitApi {
        credentials: bool,
        steps_calls: AtomicUsize,
        steps_ranges: std::sync::Mutex<Vec<DateRange>>,
        profile_calls: AtomicUsize,
        revoked: AtomicBool,
    }

    impl FakeFitbitApi {
        fn connected() -> Arc<Self> {
            Arc::new(Self {
                credentials: true,
                ..Self::default()
            })
        }
    }

    #[async_trait]
    impl FitbitApi for FakeFitbitApi {
        fn has_credentials(&self) -> bool {
            self.credentials
        }

        async fn daily_steps(&self, range: DateRange) -> Result<Vec<DailyMeasurement>> {
            self.steps_calls.fetch_add(1, Ordering::SeqCst);
            self.steps_ranges.lock().unwrap().push(range);
            Ok(range
                .days()
                .map(|date| DailyMeasurement {
                    date,
                    value: f64::from(date.day()) * 100.0,
                })
                .collect())
        }

        async fn resting_heart_rate(&self, range: DateRange) -> Result<Vec<DailyMeasurement>> {
            Ok(range
                .days()
                .filter(|date| date.day() % 2 == 1)
                .map(|date| DailyMeasurement { date, value: 60.0 })
                .collect())
        }

        async fn sleep_logs(&self, range: DateRange) -> Result<Vec<SleepLog>> {
            Ok(range
                .days()
                .map(|date| SleepLog {
                    date_of_sleep: date,
                    start_time: date
                        .pred()
                        .unwrap()
                        .to_naive()
                        .and_hms_opt(23, 30, 0)
                        .unwrap(),
                    end_time: date.to_naive().and_hms_opt(7, 0, 0).unwrap(),
                    minutes_asleep: 420,
                    is_main_sleep: true,
                })
                .collect())
        }

        async fn weight_logs(&self, range: DateRange) -> Result<Vec<WeightLog>> {
            let logs = [
                (1, 20230102, 70.0),
                (2, 20230104, 72.0),
                (3, 20230104, 72.0),
            ];
            Ok(logs
                .into_iter()
                .filter(|(_, date, _)| range.contains(day(*date)))
                .map(|(log_id, date, weight)| WeightLog {
                    log_id,
                    date: day(date),
                    time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
                    weight,
                    source: Some("Aria".to_string()),
                })
                .collect())
        }

        async fn member_since(&self) -> Result<NumberedDate> {
            self.profile_calls.fetch_add(1, Ordering::SeqCst);
            Ok(day(20230101))
        }

        async fn intraday(
            &self,
            _source: IntraDayDataSourceType,
            _date: NumberedDate,
        ) -> Result<Vec<IntraDayPoint>> {
            Ok(vec![IntraDayPoint {
                seconds_of_day: 60,
                value: 5.0,
            }])
        }

        async fn revoke(&self) -> Result<()> {
            self.revoked.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn service(api: Arc<FakeFitbitApi>) -> FitbitService {
        service_on(api, Arc::new(InMemoryStore::new()))
    }

    fn service_on(api: Arc<FakeFitbitApi>, store: Arc<dyn RowStore>) -> FitbitService {
        FitbitService::new(api, store).with_clock(Arc::new(FixedClock(day(20230315))))
    }

    fn ignore_progress(_: ProgressInfo) {}

    #[tokio::test]
    async fn test_future_request_returns_none_without_fetching() {
        let api = FakeFitbitApi::connected();
        let service = service(api.clone());
        let result = service
            .fetch_data(DataSourceType::StepCount, day(20230401), day(20230430), true, true)
            .await
            .unwrap();
        assert!(result.is_none());

        // Today without today's data is an empty row, not a missing one.
        let row = service
            .fetch_data(DataSourceType::StepCount, day(20230315), day(20230320), true, false)
            .await
            .unwrap()
            .unwrap();
        assert!(row.data.is_empty());
        assert_eq!(row.range, range(20230315, 20230315));
        assert_eq!(row.statistics, Some(Aggregate::NoData));
        assert_eq!(api.steps_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cached_ranges_are_not_refetched() {
        let api = FakeFitbitApi::connected();
        let service = service(api.clone());

        let row = service
            .fetch_data(DataSourceType::StepCount, day(20230101), day(20230110), true, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.data.len(), 10);
        assert_eq!(row.statistics.map(|s| s.n()), Some(10));

        service
            .fetch_data(DataSourceType::StepCount, day(20230105), day(20230108), false, false)
            .await
            .unwrap();
        assert_eq!(api.steps_calls.load(Ordering::SeqCst), 1);

        let row = service
            .fetch_data(DataSourceType::StepCount, day(20230301), day(20230331), false, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.range, range(20230301, 20230315));
        assert_eq!(row.data.len(), 15);
        assert_eq!(
            service.cache().entry("steps").await.unwrap().unwrap().end_date,
            day(20230314)
        );

        // Today is never recorded as covered.
        service
            .fetch_data(DataSourceType::StepCount, day(20230301), day(20230315), false, true)
            .await
            .unwrap();
        let ranges = api.steps_ranges.lock().unwrap().clone();
        assert_eq!(
            ranges,
            vec![
                range(20230101, 20230110),
                range(20230111, 20230315),
                range(20230315, 20230315),
            ]
        );
    }

    #[tokio::test]
    async fn test_cycle_range_comparison() {
        let service = service(FakeFitbitApi::connected());
        let march = CycleDimension::new(CyclicTimeFrame::MonthOfYear, 3).unwrap();
        let comparison = service
            .fetch_cycle_range_dimension_data(
                DataSourceType::StepCount,
                range(20220101, 20231231),
                march,
            )
            .await
            .unwrap();

        assert_eq!(comparison.data.len(), 2);
        assert_eq!(comparison.data[0].range, range(20220301, 20220331));
        assert!(comparison.data[0].value.is_none());

        let current = comparison.data[1].value.clone().unwrap();
        assert_eq!(current.time_key, 2023);
        let Aggregate::Value(v) = current.value else {
            panic!("expected value");
        };
        // Days 1 through 15 of March, 100 steps per day of month.
        assert_eq!(v.sum, 12000.0);
    }

    #[tokio::test]
    async fn test_heart_rate_gaps_and_cyclic_grouping() {
        let service = service(FakeFitbitApi::connected());
        let grouped = service
            .fetch_cyclic_aggregated_data(
                DataSourceType::HeartRate,
                range(20230101, 20230131),
                CyclicTimeFrame::MonthOfYear,
            )
            .await
            .unwrap();
        assert_eq!(grouped.groups[0].value.n(), 16);
        assert!(grouped.groups[1].value.is_no_data());

        let monday = CycleDimension::new(CyclicTimeFrame::DayOfWeek, 1).unwrap();
        let mondays = service
            .fetch_cycle_daily_dimension_data(
                DataSourceType::HeartRate,
                range(20230101, 20230131),
                monday,
            )
            .await
            .unwrap();
        assert!(mondays.data.iter().all(|row| row.day_of_week == 1));
    }

    #[tokio::test]
    async fn test_sleep_and_weight_rows() {
        let service = service(FakeFitbitApi::connected());
        let sleep = service
            .fetch_data(DataSourceType::SleepRange, day(20230102), day(20230102), false, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sleep.data[0].value.as_range(), Some((-1800.0, 25200.0)));
        let hours = service
            .fetch_range_aggregated_data(DataSourceType::HoursSlept, range(20230101, 20230107))
            .await
            .unwrap();
        let Aggregate::Value(hours) = hours else {
            panic!("expected value");
        };
        assert_eq!(hours.avg, 7.0);

        let weight = service
            .fetch_data(DataSourceType::Weight, day(20230101), day(20230110), false, false)
            .await
            .unwrap()
            .unwrap();
        let trend: Vec<f64> = weight
            .data
            .iter()
            .filter_map(|row| row.value.as_scalar())
            .collect();
        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0], 70.0);
        assert!((trend[1] - 70.2).abs() < 1e-9);

        let series = service
            .fetch_intra_day_data(IntraDayDataSourceType::Weight, day(20230104))
            .await
            .unwrap();
        assert_eq!(series.points.len(), 2);
        assert_eq!(series.points[0].seconds_of_day, 25200);
    }

    #[tokio::test]
    async fn test_activation_is_idempotent() {
        let api = FakeFitbitApi::connected();
        let service = service(api.clone());
        let messages = std::sync::Mutex::new(Vec::new());
        let record = |info: ProgressInfo| messages.lock().unwrap().push(info.message);

        let first = service.activate_in_system(&record).await.unwrap();
        assert!(first.success);
        assert_eq!(first.service_initial_date, Some(day(20230101)));
        let second = service.activate_in_system(&record).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(api.profile_calls.load(Ordering::SeqCst), 1);
        assert_eq!(messages.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_activation_without_credentials_fails() {
        let service = service(Arc::new(FakeFitbitApi::default()));
        let result = service.activate_in_system(&ignore_progress).await.unwrap();
        assert!(!result.success);
        assert!(result.error.is_some());
        assert!(matches!(
            result.into_result(),
            Err(MeasureError::ActivationFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_deactivation_clears_cache() {
        let api = FakeFitbitApi::connected();
        let service = service(api.clone());
        service.activate_in_system(&ignore_progress).await.unwrap();
        service
            .fetch_data(DataSourceType::StepCount, day(20230101), day(20230110), false, false)
            .await
            .unwrap();
        assert!(service.cache().entry("steps").await.unwrap().is_some());

        assert!(service.deactivated_in_system().await.unwrap());
        assert!(api.revoked.load(Ordering::SeqCst));
        assert!(service.cache().entry("steps").await.unwrap().is_none());
        assert!(service.initial_date().await.is_none());
        assert!(service.support_check().cached().await.is_none());
    }

    #[derive(Debug)]
    struct AcceptingShareSheet;

    #[async_trait]
    impl ShareSheet for AcceptingShareSheet {
        async fn share(&self, _path: &Path, _mime_type: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_export_zips_stored_sources() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(dir.path(), Arc::new(AcceptingShareSheet));
        let service = service(FakeFitbitApi::connected());

        // Nothing fetched yet.
        assert!(service.export_data(&exporter).await.unwrap());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        service
            .fetch_data(DataSourceType::StepCount, day(20230101), day(20230110), false, false)
            .await
            .unwrap();
        service
            .fetch_data(DataSourceType::Weight, day(20230101), day(20230110), false, false)
            .await
            .unwrap();
        let files = service.export_to_csv().await.unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["step_count", "weight", "weight_log"]);
        assert_eq!(files[2].csv.lines().count(), 4);
        assert!(files[2].csv.contains("fitbit-weight-3"));

        assert!(service.export_data(&exporter).await.unwrap());
        assert!(dir.path().join("exported_data_fitbit.zip").exists());
    }

    #[tokio::test]
    async fn test_shared_backend_keeps_services_apart() {
        let backend: Arc<dyn RowStore> = Arc::new(InMemoryStore::new());
        let service = service_on(FakeFitbitApi::connected(), backend.clone());
        service
            .fetch_data(DataSourceType::Weight, day(20230101), day(20230110), false, false)
            .await
            .unwrap();

        let other = backend.scoped("manual");
        other
            .insert_rows(DataSourceType::Weight, &[DailyRow::scalar(day(20230102), 80.0)])
            .await
            .unwrap();
        other.delete_all().await.unwrap();

        let row = service
            .fetch_data(DataSourceType::Weight, day(20230102), day(20230102), false, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.data[0].value.as_scalar(), Some(70.0));
        assert_eq!(
            service.cache().entry("weight").await.unwrap().unwrap().end_date,
            day(20230110)
        );
    }
}
