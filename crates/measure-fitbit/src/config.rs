//! Client configuration.

use measure_core::{MeasureError, Result};
use std::fmt;
use std::time::Duration;

/// Default Fitbit Web API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.fitbit.com";

/// Default spacing between requests in milliseconds.
pub const DEFAULT_RATE_LIMIT_MS: u64 = 250;

/// Settings of a [`FitbitClient`](crate::FitbitClient).
#[derive(Clone)]
pub struct FitbitConfig {
    /// OAuth2 bearer token.
    pub access_token: String,
    /// API base URL without trailing slash.
    pub base_url: String,
    /// Minimum spacing between requests.
    pub rate_limit: Duration,
}

impl fmt::Debug for FitbitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FitbitConfig")
            .field("access_token", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

impl FitbitConfig {
    /// Creates a config for the public API with default spacing.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            rate_limit: Duration::from_millis(DEFAULT_RATE_LIMIT_MS),
        }
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the spacing between requests.
    #[must_use]
    pub const fn with_rate_limit(mut self, rate_limit: Duration) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Reads the config from the process environment.
    ///
    /// # Errors
    /// Returns [`MeasureError::AuthenticationFailed`] if no token is set and
    /// [`MeasureError::InvalidParameter`] for a malformed rate limit.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|k| std::env::var(k).ok())
    }

    /// Reads the config through `get`, so tests need not touch the environment.
    ///
    /// # Errors
    /// Returns [`MeasureError::AuthenticationFailed`] if no token is set and
    /// [`MeasureError::InvalidParameter`] for a malformed rate limit.
    pub fn from_env_with<F>(mut get: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let token = get("FITBIT_ACCESS_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| {
                MeasureError::AuthenticationFailed("FITBIT_ACCESS_TOKEN missing".into())
            })?;
        let mut config = Self::new(token);
        if let Some(base_url) = get("FITBIT_BASE_URL") {
            config = config.with_base_url(base_url);
        }
        if let Some(ms) = get("FITBIT_RATE_LIMIT_MS") {
            let ms = ms.trim().parse::<u64>().map_err(|e| {
                MeasureError::InvalidParameter(format!("FITBIT_RATE_LIMIT_MS: {e}"))
            })?;
            config = config.with_rate_limit(Duration::from_millis(ms));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_missing_token() {
        let get = |k: &str| match k {
            "FITBIT_BASE_URL" => Some("http://localhost".into()),
            _ => None,
        };
        assert!(matches!(
            FitbitConfig::from_env_with(get),
            Err(MeasureError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn from_env_reads_values() {
        let get = |k: &str| match k {
            "FITBIT_ACCESS_TOKEN" => Some("sekrit".into()),
            "FITBIT_BASE_URL" => Some("http://localhost:8080/".into()),
            "FITBIT_RATE_LIMIT_MS" => Some("0".into()),
            _ => None,
        };
        let cfg = FitbitConfig::from_env_with(get).expect("cfg");
        assert_eq!(cfg.access_token, "sekrit");
        assert_eq!(cfg.base_url, "http://localhost:8080");
        assert_eq!(cfg.rate_limit, Duration::ZERO);
    }

    #[test]
    fn from_env_defaults_and_bad_rate_limit() {
        let cfg = FitbitConfig::from_env_with(|k| {
            (k == "FITBIT_ACCESS_TOKEN").then(|| "sekrit".to_string())
        })
        .expect("cfg");
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.rate_limit, Duration::from_millis(DEFAULT_RATE_LIMIT_MS));

        let res = FitbitConfig::from_env_with(|k| match k {
            "FITBIT_ACCESS_TOKEN" => Some("sekrit".into()),
            "FITBIT_RATE_LIMIT_MS" => Some("soon".into()),
            _ => None,
        });
        assert!(matches!(res, Err(MeasureError::InvalidParameter(_))));
    }

    #[test]
    fn debug_redacts_token() {
        let debug_str = format!("{:?}", FitbitConfig::new("secret_token_12345"));
        assert!(!debug_str.contains("secret_token_12345"));
        assert!(debug_str.contains("[REDACTED]"));
    }
}
