//! The Fitbit API seam and its decoded records.

use async_trait::async_trait;
use chrono::{NaiveDateTime, NaiveTime, Timelike};
use measure_core::{DateRange, IntraDayDataSourceType, IntraDayPoint, NumberedDate, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// One value of a daily time series.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyMeasurement {
    /// Day of the value.
    pub date: NumberedDate,
    /// The value.
    pub value: f64,
}

/// One sleep session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SleepLog {
    /// The day the session is attributed to (the wake-up day).
    pub date_of_sleep: NumberedDate,
    /// Local time the session started.
    pub start_time: NaiveDateTime,
    /// Local time the session ended.
    pub end_time: NaiveDateTime,
    /// Minutes actually asleep.
    pub minutes_asleep: u32,
    /// Whether this is the main sleep of the day rather than a nap.
    pub is_main_sleep: bool,
}

impl SleepLog {
    /// Bed time and wake time in seconds relative to midnight of
    /// `date_of_sleep`; a bed time before midnight is negative.
    #[must_use]
    pub fn bounds_seconds(&self) -> (f64, f64) {
        let midnight = self.date_of_sleep.to_naive().and_time(NaiveTime::MIN);
        (
            (self.start_time - midnight).num_seconds() as f64,
            (self.end_time - midnight).num_seconds() as f64,
        )
    }
}

/// One body weight log entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightLog {
    /// Fitbit's log id.
    pub log_id: u64,
    /// Day of the entry.
    pub date: NumberedDate,
    /// Local time of the entry.
    pub time: NaiveTime,
    /// Weight in kilograms.
    pub weight: f64,
    /// Device or app that logged the entry.
    pub source: Option<String>,
}

impl WeightLog {
    /// Seconds since local midnight.
    #[must_use]
    pub fn seconds_of_day(&self) -> u32 {
        self.time.num_seconds_from_midnight()
    }
}

/// Access to the Fitbit Web API.
///
/// Range methods accept spans of any length; implementations split them into
/// requests the API accepts.
#[async_trait]
pub trait FitbitApi: Send + Sync + Debug {
    /// Returns true if credentials are configured.
    fn has_credentials(&self) -> bool;

    /// Daily step totals.
    async fn daily_steps(&self, range: DateRange) -> Result<Vec<DailyMeasurement>>;

    /// Daily resting heart rate; days without one are absent.
    async fn resting_heart_rate(&self, range: DateRange) -> Result<Vec<DailyMeasurement>>;

    /// Sleep sessions whose date of sleep lies in the range.
    async fn sleep_logs(&self, range: DateRange) -> Result<Vec<SleepLog>>;

    /// Body weight log entries.
    async fn weight_logs(&self, range: DateRange) -> Result<Vec<WeightLog>>;

    /// Day the account was created.
    async fn member_since(&self) -> Result<NumberedDate>;

    /// Per-minute series of a day. Weight has no intraday endpoint.
    async fn intraday(
        &self,
        source: IntraDayDataSourceType,
        date: NumberedDate,
    ) -> Result<Vec<IntraDayPoint>>;

    /// Revokes the access token.
    async fn revoke(&self) -> Result<()>;
}
