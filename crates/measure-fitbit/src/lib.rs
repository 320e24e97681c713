#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/datahand/measure/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Fitbit data service.
//!
//! This crate implements the measure-core [`DataService`](measure_core::DataService)
//! trait for the [Fitbit Web API](https://dev.fitbit.com/build/reference/web-api/).
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use measure_cache::SqliteStore;
//! use measure_core::{DataService, DataSourceType, NumberedDate};
//! use measure_fitbit::{FitbitClient, FitbitConfig, FitbitService};
//!
//! #[tokio::main]
//! async fn main() -> measure_core::Result<()> {
//!     let client = FitbitClient::new(FitbitConfig::from_env()?)?;
//!     let store = SqliteStore::new("measures.db")?;
//!     let service = FitbitService::new(Arc::new(client), Arc::new(store));
//!
//!     let steps = service
//!         .fetch_data(
//!             DataSourceType::StepCount,
//!             NumberedDate::from_value(20240101)?,
//!             NumberedDate::from_value(20240131)?,
//!             true,
//!             false,
//!         )
//!         .await?;
//!     println!("{steps:?}");
//!     Ok(())
//! }
//! ```

/// The API trait and decoded records.
pub mod api;
/// reqwest-based API client.
pub mod client;
/// Client configuration.
pub mod config;
/// The data service.
pub mod service;

pub use api::{DailyMeasurement, FitbitApi, SleepLog, WeightLog};
pub use client::FitbitClient;
pub use config::FitbitConfig;
pub use service::{FITBIT_SERVICE_KEY, FitbitService};
