#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/datahand/measure/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Unified data service interface for personal health measures.
//!
//! This crate re-exports the core types, the row store backends and the
//! service implementations, and provides a [`DataServiceRegistry`] that
//! holds the services of an application by key.
//!
//! # Features
//!
//! - `fitbit` - Fitbit Web API service
//! - `manual` - Manual entry service
//! - `cache-sqlite` - SQLite-based row store
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use measure::{DataServiceRegistry, DataSourceType, InMemoryStore, NumberedDate};
//!
//! #[tokio::main]
//! async fn main() -> measure::Result<()> {
//!     let registry = DataServiceRegistry::new().with_manual(Arc::new(InMemoryStore::new()));
//!
//!     let service = registry.get("manual")?;
//!     let weight = service
//!         .fetch_range_aggregated_data(
//!             DataSourceType::Weight,
//!             measure::DateRange::new(
//!                 NumberedDate::from_value(20240101)?,
//!                 NumberedDate::from_value(20240331)?,
//!             )?,
//!         )
//!         .await?;
//!     println!("{weight:?}");
//!     Ok(())
//! }
//! ```

// Core types and traits
pub use measure_core::*;

// Row store backends
pub use measure_cache::InMemoryStore;
#[cfg(feature = "cache-sqlite")]
pub use measure_cache::SqliteStore;

// Services
#[cfg(feature = "fitbit")]
pub use measure_fitbit::{FitbitClient, FitbitConfig, FitbitService};
#[cfg(feature = "manual")]
pub use measure_manual::ManualEntryService;

mod registry;
pub use registry::DataServiceRegistry;
