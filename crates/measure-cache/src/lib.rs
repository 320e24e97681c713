#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/datahand/measure/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Local storage for health measure services.
//!
//! This crate provides implementations of the [`RowStore`] trait from `measure-core`:
//!
//! - [`SqliteStore`] - Persistent SQLite-based store (default, requires `sqlite` feature)
//! - [`InMemoryStore`] - Simple in-memory store

/// In-memory store implementation.
pub mod memory;

/// SQLite-based store implementation.
#[cfg(feature = "sqlite")]
pub mod sqlite;

// Re-export the trait for convenience
pub use measure_core::RowStore;

pub use memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
