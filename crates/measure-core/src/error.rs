//! Error types for measure operations.
//!
//! This module defines [`MeasureError`] which covers all error cases that can occur
//! when decoding dates, fetching, caching, aggregating or exporting health data.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a data service cannot be used on this system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnsupportedReason {
    /// The operating system or platform lacks the required capability.
    Os,
    /// Credentials for the service are missing or invalid.
    Credential,
}

impl fmt::Display for UnsupportedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Os => write!(f, "not supported by the operating system"),
            Self::Credential => write!(f, "missing credentials"),
        }
    }
}

/// Errors that can occur during measure operations.
#[derive(Error, Debug)]
pub enum MeasureError {
    /// The year/month/day triple does not name a calendar date.
    #[error("Invalid date: {year:04}-{month:02}-{day:02}")]
    InvalidDate {
        /// Requested year.
        year: i32,
        /// Requested month (1-12).
        month: u32,
        /// Requested day of month.
        day: u32,
    },

    /// Malformed date text or provider payload.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The service cannot run on this system.
    #[error("Service unsupported: {0}")]
    UnsupportedService(UnsupportedReason),

    /// Activating the service failed.
    #[error("Activation failed: {0}")]
    ActivationFailure(String),

    /// Writing, archiving or sharing exported files failed.
    #[error("Export failed: {0}")]
    Export(String),

    /// Network-related errors (connection failures, timeouts, etc.).
    #[error("Network error: {0}")]
    Network(String),

    /// Rate limit exceeded by a remote service.
    #[error("Rate limited by {service}: retry after {retry_after:?}")]
    RateLimited {
        /// The service that rate limited the request.
        service: String,
        /// Suggested time to wait before retrying.
        retry_after: Option<std::time::Duration>,
    },

    /// Authentication failed for a service.
    #[error("Authentication failed for service {0}")]
    AuthenticationFailed(String),

    /// Error interacting with the local row store.
    #[error("Store error: {0}")]
    Store(String),

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The requested feature is not supported by this service.
    #[error("Feature not supported: {0}")]
    NotSupported(String),

    /// Any other error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias using [`MeasureError`].
pub type Result<T> = std::result::Result<T, MeasureError>;
