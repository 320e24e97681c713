//! reqwest-based Fitbit Web API client.

use async_trait::async_trait;
use chrono::{NaiveDateTime, NaiveTime, Timelike};
use measure_core::{
    DateRange, IntraDayDataSourceType, IntraDayPoint, MeasureError, NumberedDate, Result,
};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, instrument};

use crate::api::{DailyMeasurement, FitbitApi, SleepLog, WeightLog};
use crate::config::FitbitConfig;

/// Longest span of one activity time series request.
const ACTIVITY_MAX_DAYS: u32 = 1095;
/// Longest span of one heart rate time series request.
const HEART_MAX_DAYS: u32 = 365;
/// Longest span of one sleep log request.
const SLEEP_MAX_DAYS: u32 = 100;
/// Longest span of one weight log request.
const WEIGHT_MAX_DAYS: u32 = 31;

const SLEEP_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const CLOCK_TIME_FORMAT: &str = "%H:%M:%S";

const SERVICE_NAME: &str = "Fitbit";

#[derive(Debug, Deserialize)]
struct StepsResponse {
    #[serde(rename = "activities-steps")]
    entries: Vec<StepsEntry>,
}

#[derive(Debug, Deserialize)]
struct StepsEntry {
    #[serde(rename = "dateTime")]
    date_time: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct HeartResponse {
    #[serde(rename = "activities-heart")]
    entries: Vec<HeartEntry>,
}

#[derive(Debug, Deserialize)]
struct HeartEntry {
    #[serde(rename = "dateTime")]
    date_time: String,
    value: HeartValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeartValue {
    resting_heart_rate: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SleepResponse {
    sleep: Vec<RawSleep>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSleep {
    date_of_sleep: String,
    start_time: String,
    end_time: String,
    minutes_asleep: u32,
    #[serde(default)]
    is_main_sleep: bool,
}

#[derive(Debug, Deserialize)]
struct WeightResponse {
    weight: Vec<RawWeight>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWeight {
    log_id: u64,
    date: String,
    time: String,
    weight: f64,
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    user: ProfileUser,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileUser {
    member_since: String,
}

#[derive(Debug, Deserialize)]
struct IntradayResponse {
    #[serde(
        rename = "activities-steps-intraday",
        alias = "activities-heart-intraday"
    )]
    intraday: IntradayDataset,
}

#[derive(Debug, Deserialize)]
struct IntradayDataset {
    dataset: Vec<RawIntradayPoint>,
}

#[derive(Debug, Deserialize)]
struct RawIntradayPoint {
    time: String,
    value: f64,
}

fn parse_clock_time(time: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(time, CLOCK_TIME_FORMAT)
        .map_err(|e| MeasureError::Parse(format!("Invalid time {time:?}: {e}")))
}

fn parse_sleep_time(time: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(time, SLEEP_TIME_FORMAT)
        .map_err(|e| MeasureError::Parse(format!("Invalid timestamp {time:?}: {e}")))
}

/// Fitbit Web API client.
///
/// Requests are spaced by the configured rate limit and authorized with the
/// configured bearer token.
#[derive(Debug)]
pub struct FitbitClient {
    client: reqwest::Client,
    config: FitbitConfig,
    last_request_time: AtomicU64,
}

impl FitbitClient {
    /// Create a new client.
    ///
    /// # Errors
    /// Returns [`MeasureError::Network`] if the HTTP client cannot be built.
    pub fn new(config: FitbitConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MeasureError::Network(e.to_string()))?;
        Ok(Self::with_client(client, config))
    }

    /// Create a new client with a custom HTTP client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: FitbitConfig) -> Self {
        Self {
            client,
            config,
            last_request_time: AtomicU64::new(0),
        }
    }

    /// The client's configuration.
    #[must_use]
    pub const fn config(&self) -> &FitbitConfig {
        &self.config
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{endpoint}", self.config.base_url)
    }

    /// Apply rate limiting before making a request.
    async fn apply_rate_limit(&self) {
        let rate_limit_ms = self.config.rate_limit.as_millis() as u64;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let last = self.last_request_time.load(Ordering::Relaxed);
        let elapsed = now.saturating_sub(last);

        if elapsed < rate_limit_ms {
            let wait_time = rate_limit_ms - elapsed;
            debug!("Rate limiting: waiting {}ms", wait_time);
            sleep(Duration::from_millis(wait_time)).await;
        }

        self.last_request_time.store(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            Ordering::Relaxed,
        );
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.apply_rate_limit().await;

        let response = request
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| MeasureError::Network(e.to_string()))?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(MeasureError::RateLimited {
                    service: SERVICE_NAME.to_string(),
                    retry_after,
                })
            }
            StatusCode::UNAUTHORIZED => {
                let text = response.text().await.unwrap_or_default();
                Err(MeasureError::AuthenticationFailed(text))
            }
            status if !status.is_success() => {
                let text = response.text().await.unwrap_or_default();
                Err(MeasureError::Network(format!("HTTP {status}: {text}")))
            }
            _ => Ok(response),
        }
    }

    /// Make a GET request and parse the JSON response.
    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        debug!("Fitbit request: {}", endpoint);
        let response = self.send(self.client.get(self.url(endpoint))).await?;
        let text = response
            .text()
            .await
            .map_err(|e| MeasureError::Network(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| MeasureError::Parse(format!("{e}: {text}")))
    }
}

#[async_trait]
impl FitbitApi for FitbitClient {
    fn has_credentials(&self) -> bool {
        !self.config.access_token.trim().is_empty()
    }

    #[instrument(skip(self), fields(range = %range))]
    async fn daily_steps(&self, range: DateRange) -> Result<Vec<DailyMeasurement>> {
        let mut measurements = Vec::new();
        for chunk in range.chunks(ACTIVITY_MAX_DAYS) {
            let endpoint = format!(
                "/1/user/-/activities/steps/date/{}/{}.json",
                chunk.start(),
                chunk.end()
            );
            let response: StepsResponse = self.get(&endpoint).await?;
            for entry in response.entries {
                let value = entry.value.parse::<f64>().map_err(|e| {
                    MeasureError::Parse(format!("Invalid step count {:?}: {e}", entry.value))
                })?;
                measurements.push(DailyMeasurement {
                    date: entry.date_time.parse()?,
                    value,
                });
            }
        }
        Ok(measurements)
    }

    #[instrument(skip(self), fields(range = %range))]
    async fn resting_heart_rate(&self, range: DateRange) -> Result<Vec<DailyMeasurement>> {
        let mut measurements = Vec::new();
        for chunk in range.chunks(HEART_MAX_DAYS) {
            let endpoint = format!(
                "/1/user/-/activities/heart/date/{}/{}.json",
                chunk.start(),
                chunk.end()
            );
            let response: HeartResponse = self.get(&endpoint).await?;
            for entry in response.entries {
                if let Some(value) = entry.value.resting_heart_rate {
                    measurements.push(DailyMeasurement {
                        date: entry.date_time.parse()?,
                        value,
                    });
                }
            }
        }
        Ok(measurements)
    }

    #[instrument(skip(self), fields(range = %range))]
    async fn sleep_logs(&self, range: DateRange) -> Result<Vec<SleepLog>> {
        let mut logs = Vec::new();
        for chunk in range.chunks(SLEEP_MAX_DAYS) {
            let endpoint = format!(
                "/1.2/user/-/sleep/date/{}/{}.json",
                chunk.start(),
                chunk.end()
            );
            let response: SleepResponse = self.get(&endpoint).await?;
            for raw in response.sleep {
                logs.push(SleepLog {
                    date_of_sleep: raw.date_of_sleep.parse()?,
                    start_time: parse_sleep_time(&raw.start_time)?,
                    end_time: parse_sleep_time(&raw.end_time)?,
                    minutes_asleep: raw.minutes_asleep,
                    is_main_sleep: raw.is_main_sleep,
                });
            }
        }
        Ok(logs)
    }

    #[instrument(skip(self), fields(range = %range))]
    async fn weight_logs(&self, range: DateRange) -> Result<Vec<WeightLog>> {
        let mut logs = Vec::new();
        for chunk in range.chunks(WEIGHT_MAX_DAYS) {
            let endpoint = format!(
                "/1/user/-/body/log/weight/date/{}/{}.json",
                chunk.start(),
                chunk.end()
            );
            let response: WeightResponse = self.get(&endpoint).await?;
            for raw in response.weight {
                logs.push(WeightLog {
                    log_id: raw.log_id,
                    date: raw.date.parse()?,
                    time: parse_clock_time(&raw.time)?,
                    weight: raw.weight,
                    source: raw.source,
                });
            }
        }
        Ok(logs)
    }

    #[instrument(skip(self))]
    async fn member_since(&self) -> Result<NumberedDate> {
        let response: ProfileResponse = self.get("/1/user/-/profile.json").await?;
        response.user.member_since.parse()
    }

    #[instrument(skip(self), fields(date = %date))]
    async fn intraday(
        &self,
        source: IntraDayDataSourceType,
        date: NumberedDate,
    ) -> Result<Vec<IntraDayPoint>> {
        let resource = match source {
            IntraDayDataSourceType::StepCount => "steps",
            IntraDayDataSourceType::HeartRate => "heart",
            IntraDayDataSourceType::Weight => {
                return Err(MeasureError::NotSupported(
                    "Weight has no intraday series".to_string(),
                ));
            }
        };
        let endpoint = format!("/1/user/-/activities/{resource}/date/{date}/1d/1min.json");
        let response: IntradayResponse = self.get(&endpoint).await?;
        response
            .intraday
            .dataset
            .into_iter()
            .map(|point| {
                Ok(IntraDayPoint {
                    seconds_of_day: parse_clock_time(&point.time)?.num_seconds_from_midnight(),
                    value: point.value,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn revoke(&self) -> Result<()> {
        let request = self
            .client
            .post(self.url("/oauth2/revoke"))
            .form(&[("token", self.config.access_token.as_str())]);
        self.send(request).await?;
        debug!("Revoked Fitbit token");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn day(value: u32) -> NumberedDate {
        NumberedDate::from_value(value).unwrap()
    }

    fn client(server: &MockServer) -> FitbitClient {
        let config = FitbitConfig::new("tok")
            .with_base_url(server.uri())
            .with_rate_limit(Duration::ZERO);
        FitbitClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn daily_steps_are_parsed_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1/user/-/activities/steps/date/2023-01-01/2023-01-02.json"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "activities-steps": [
                    {"dateTime": "2023-01-01", "value": "1234"},
                    {"dateTime": "2023-01-02", "value": "0"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let steps = client(&server)
            .daily_steps(DateRange::new(day(20230101), day(20230102)).unwrap())
            .await
            .unwrap();
        assert_eq!(
            steps,
            vec![
                DailyMeasurement {
                    date: day(20230101),
                    value: 1234.0
                },
                DailyMeasurement {
                    date: day(20230102),
                    value: 0.0
                },
            ]
        );
    }

    #[tokio::test]
    async fn resting_heart_rate_skips_days_without_value() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1/user/-/activities/heart/date/2023-01-01/2023-01-02.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "activities-heart": [
                    {"dateTime": "2023-01-01", "value": {"restingHeartRate": 61}},
                    {"dateTime": "2023-01-02", "value": {"heartRateZones": []}}
                ]
            })))
            .mount(&server)
            .await;

        let rates = client(&server)
            .resting_heart_rate(DateRange::new(day(20230101), day(20230102)).unwrap())
            .await
            .unwrap();
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].value, 61.0);
    }

    #[tokio::test]
    async fn weight_logs_are_requested_in_chunks() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1/user/-/body/log/weight/date/2023-01-01/2023-01-31.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "weight": [
                    {"logId": 7, "date": "2023-01-05", "time": "07:15:00", "weight": 70.2, "source": "Aria"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/1/user/-/body/log/weight/date/2023-02-01/2023-02-09.json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"weight": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let logs = client(&server)
            .weight_logs(DateRange::new(day(20230101), day(20230209)).unwrap())
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].log_id, 7);
        assert_eq!(logs[0].seconds_of_day(), 26100);
        assert_eq!(logs[0].source.as_deref(), Some("Aria"));
    }

    #[tokio::test]
    async fn sleep_logs_and_profile() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1.2/user/-/sleep/date/2023-01-02/2023-01-02.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sleep": [{
                    "dateOfSleep": "2023-01-02",
                    "startTime": "2023-01-01T23:30:00.000",
                    "endTime": "2023-01-02T07:00:00.000",
                    "minutesAsleep": 420,
                    "isMainSleep": true
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/1/user/-/profile.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "user": {"memberSince": "2019-06-01", "displayName": "A"}
            })))
            .mount(&server)
            .await;

        let api = client(&server);
        let logs = api
            .sleep_logs(DateRange::single(day(20230102)))
            .await
            .unwrap();
        assert_eq!(logs[0].bounds_seconds(), (-1800.0, 25200.0));
        assert_eq!(api.member_since().await.unwrap(), day(20190601));
    }

    #[tokio::test]
    async fn intraday_heart_rate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1/user/-/activities/heart/date/2023-01-02/1d/1min.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "activities-heart": [],
                "activities-heart-intraday": {
                    "dataset": [{"time": "00:01:00", "value": 64}],
                    "datasetInterval": 1
                }
            })))
            .mount(&server)
            .await;

        let api = client(&server);
        let points = api
            .intraday(IntraDayDataSourceType::HeartRate, day(20230102))
            .await
            .unwrap();
        assert_eq!(points[0].seconds_of_day, 60);
        assert_eq!(points[0].value, 64.0);
        assert!(matches!(
            api.intraday(IntraDayDataSourceType::Weight, day(20230102)).await,
            Err(MeasureError::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn status_codes_map_to_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1/user/-/activities/steps/date/2023-01-01/2023-01-01.json"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/1/user/-/profile.json"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired_token"))
            .mount(&server)
            .await;

        let api = client(&server);
        match api.daily_steps(DateRange::single(day(20230101))).await {
            Err(MeasureError::RateLimited { retry_after, .. }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(120)));
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
        assert!(matches!(
            api.member_since().await,
            Err(MeasureError::AuthenticationFailed(_))
        ));
    }

    #[tokio::test]
    async fn revoke_posts_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/revoke"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).revoke().await.unwrap();
    }
}
