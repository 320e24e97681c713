//! Cache bookkeeping for fetched date ranges.
//!
//! [`CacheManager`] decides which part of a requested range is already stored
//! locally and which part must be fetched from the remote service. Coverage
//! per measure key is a single contiguous prefix ending at
//! [`CachedRangeEntry::end_date`], which only moves forward.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument};

use crate::{
    calendar::{DateRange, NumberedDate},
    error::Result,
    store::{CachedRangeEntry, RowStore},
};

/// Split of a requested range into a locally covered and a missing part.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchPlan {
    /// Part of the request already stored, if any.
    pub cached: Option<DateRange>,
    /// Part that must be fetched remotely, if any.
    pub missing: Option<DateRange>,
}

impl FetchPlan {
    /// Computes the plan for a request given the current coverage end.
    ///
    /// When the coverage ends before the requested start, the missing part
    /// starts right after the coverage so no hole is left behind.
    #[must_use]
    pub fn compute(covered_until: Option<NumberedDate>, requested: DateRange) -> Self {
        let Some(end) = covered_until else {
            return Self {
                cached: None,
                missing: Some(requested),
            };
        };
        let cached = DateRange::new(requested.start(), end.min(requested.end())).ok();
        let missing = if end >= requested.end() {
            None
        } else {
            end.succ()
                .and_then(|next| DateRange::new(next, requested.end()).ok())
        };
        Self { cached, missing }
    }

    /// Returns true if nothing needs to be fetched.
    #[must_use]
    pub const fn is_fully_cached(&self) -> bool {
        self.missing.is_none()
    }
}

/// Tracks per-measure coverage in a [`RowStore`] and serializes updates per key.
///
/// Per-key operations hold the shared side of a gate that
/// [`CacheManager::clear_all`] takes exclusively, so a wipe waits for
/// in-flight fetches and no fetch outlives it.
#[derive(Debug)]
pub struct CacheManager {
    store: Arc<dyn RowStore>,
    gate: RwLock<()>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CacheManager {
    /// Creates a manager over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self {
            store,
            gate: RwLock::new(()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }

    async fn key_lock(&self, measure_key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(measure_key.to_string()).or_default().clone()
    }

    /// The current cache entry of a key.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn entry(&self, measure_key: &str) -> Result<Option<CachedRangeEntry>> {
        self.store.get_cache_entry(measure_key).await
    }

    /// Splits a requested range into cached and missing parts.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    #[instrument(skip(self), fields(requested = %requested))]
    pub async fn plan_fetch(&self, measure_key: &str, requested: DateRange) -> Result<FetchPlan> {
        let entry = self.store.get_cache_entry(measure_key).await?;
        let plan = FetchPlan::compute(entry.map(|e| e.end_date), requested);
        debug!(?plan, "Planned fetch");
        Ok(plan)
    }

    /// Advances the coverage of a key to `new_end`.
    ///
    /// Returns `false` and leaves the entry untouched when it already reaches
    /// `new_end` or later.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or written.
    pub async fn record_fetch(&self, measure_key: &str, new_end: NumberedDate) -> Result<bool> {
        let _gate = self.gate.read().await;
        let lock = self.key_lock(measure_key).await;
        let _guard = lock.lock().await;
        self.record_locked(measure_key, new_end).await
    }

    async fn record_locked(&self, measure_key: &str, new_end: NumberedDate) -> Result<bool> {
        if let Some(entry) = self.store.get_cache_entry(measure_key).await? {
            if entry.end_date >= new_end {
                debug!(
                    measure_key,
                    current = %entry.end_date,
                    requested = %new_end,
                    "Cache entry already covers date"
                );
                return Ok(false);
            }
        }
        self.store
            .upsert_cache_entry(&CachedRangeEntry::new(measure_key, new_end))
            .await?;
        debug!(measure_key, end_date = %new_end, "Advanced cache entry");
        Ok(true)
    }

    /// Ensures the requested range is stored locally.
    ///
    /// Holds the key's lock across planning, fetching and recording, so at
    /// most one fetch per key is in flight. `fetch` receives the missing range,
    /// stores its rows and returns the last date whose data is final, which
    /// then becomes the new coverage end.
    ///
    /// # Errors
    /// Returns the error of the store or of `fetch`; the entry is left
    /// unchanged on failure.
    pub async fn ensure_cached<F, Fut>(
        &self,
        measure_key: &str,
        requested: DateRange,
        fetch: F,
    ) -> Result<FetchPlan>
    where
        F: FnOnce(DateRange) -> Fut + Send,
        Fut: Future<Output = Result<Option<NumberedDate>>> + Send,
    {
        let _gate = self.gate.read().await;
        let lock = self.key_lock(measure_key).await;
        let _guard = lock.lock().await;

        let plan = self.plan_fetch(measure_key, requested).await?;
        match plan.missing {
            Some(missing) => {
                debug!(measure_key, missing = %missing, "Cache miss, fetching");
                if let Some(final_end) = fetch(missing).await? {
                    self.record_locked(measure_key, final_end).await?;
                }
            }
            None => debug!(measure_key, "Cache hit"),
        }
        Ok(plan)
    }

    /// Removes the entry of a key so the next request fetches again.
    ///
    /// # Errors
    /// Returns an error if the store cannot be written.
    pub async fn clear(&self, measure_key: &str) -> Result<()> {
        let _gate = self.gate.read().await;
        let lock = self.key_lock(measure_key).await;
        let _guard = lock.lock().await;
        self.store.delete_cache_entry(measure_key).await?;
        debug!(measure_key, "Cleared cache entry");
        Ok(())
    }

    /// Removes every entry together with all stored rows.
    ///
    /// Waits for fetches in flight to finish first.
    ///
    /// # Errors
    /// Returns an error if the store cannot be written.
    pub async fn clear_all(&self) -> Result<()> {
        let _gate = self.gate.write().await;
        self.store.delete_all().await?;
        debug!("Cleared all cache entries");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DailyRow, DataSourceType, IntraDayDataSourceType, IntraDayLog};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, Default)]
    struct EntryOnlyStore {
        entries: Arc<Mutex<HashMap<String, CachedRangeEntry>>>,
    }

    #[async_trait]
    impl RowStore for EntryOnlyStore {
        fn service_key(&self) -> &str {
            ""
        }

        fn scoped(&self, _service_key: &str) -> Arc<dyn RowStore> {
            Arc::new(self.clone())
        }

        async fn insert_rows(&self, _source: DataSourceType, _rows: &[DailyRow]) -> Result<()> {
            Ok(())
        }

        async fn query_range(
            &self,
            _source: DataSourceType,
            _range: DateRange,
        ) -> Result<Vec<DailyRow>> {
            Ok(Vec::new())
        }

        async fn insert_logs(&self, _logs: &[IntraDayLog]) -> Result<()> {
            Ok(())
        }

        async fn query_logs(
            &self,
            _source: IntraDayDataSourceType,
            _date: NumberedDate,
        ) -> Result<Vec<IntraDayLog>> {
            Ok(Vec::new())
        }

        async fn query_logs_in(
            &self,
            _source: IntraDayDataSourceType,
            _range: DateRange,
        ) -> Result<Vec<IntraDayLog>> {
            Ok(Vec::new())
        }

        async fn get_cache_entry(&self, measure_key: &str) -> Result<Option<CachedRangeEntry>> {
            Ok(self.entries.lock().await.get(measure_key).cloned())
        }

        async fn upsert_cache_entry(&self, entry: &CachedRangeEntry) -> Result<()> {
            self.entries
                .lock()
                .await
                .insert(entry.measure_key.clone(), entry.clone());
            Ok(())
        }

        async fn delete_cache_entry(&self, measure_key: &str) -> Result<()> {
            self.entries.lock().await.remove(measure_key);
            Ok(())
        }

        async fn delete_all(&self) -> Result<()> {
            self.entries.lock().await.clear();
            Ok(())
        }
    }

    fn day(value: u32) -> NumberedDate {
        NumberedDate::from_value(value).unwrap()
    }

    fn range(start: u32, end: u32) -> DateRange {
        DateRange::new(day(start), day(end)).unwrap()
    }

    fn manager() -> CacheManager {
        CacheManager::new(Arc::new(EntryOnlyStore::default()))
    }

    #[tokio::test]
    async fn test_plan_without_entry_fetches_everything() {
        let cache = manager();
        let requested = range(20230101, 20230131);
        let plan = cache.plan_fetch("steps", requested).await.unwrap();
        assert_eq!(plan.cached, None);
        assert_eq!(plan.missing, Some(requested));
    }

    #[tokio::test]
    async fn test_plan_with_partial_coverage() {
        let cache = manager();
        cache.record_fetch("steps", day(20230115)).await.unwrap();
        let plan = cache
            .plan_fetch("steps", range(20230101, 20230131))
            .await
            .unwrap();
        assert_eq!(plan.cached, Some(range(20230101, 20230115)));
        assert_eq!(plan.missing, Some(range(20230116, 20230131)));

        let plan = cache
            .plan_fetch("steps", range(20230101, 20230110))
            .await
            .unwrap();
        assert!(plan.is_fully_cached());
        assert_eq!(plan.cached, Some(range(20230101, 20230110)));
    }

    #[test]
    fn test_plan_after_gap_keeps_coverage_contiguous() {
        let plan = FetchPlan::compute(Some(day(20221231)), range(20230201, 20230228));
        assert_eq!(plan.cached, None);
        assert_eq!(plan.missing, Some(range(20230101, 20230228)));
    }

    #[tokio::test]
    async fn test_record_fetch_never_regresses() {
        let cache = manager();
        assert!(cache.record_fetch("weight", day(20230301)).await.unwrap());
        assert!(!cache.record_fetch("weight", day(20230201)).await.unwrap());
        assert!(!cache.record_fetch("weight", day(20230301)).await.unwrap());
        let entry = cache.entry("weight").await.unwrap().unwrap();
        assert_eq!(entry.end_date, day(20230301));
    }

    #[tokio::test]
    async fn test_clear_removes_entry() {
        let cache = manager();
        cache.record_fetch("sleep", day(20230301)).await.unwrap();
        cache.clear("sleep").await.unwrap();
        assert!(cache.entry("sleep").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ensure_cached_fetches_once_per_key() {
        let cache = manager();
        let calls = AtomicUsize::new(0);
        let requested = range(20230101, 20230131);

        let fetch = |missing: DateRange| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, crate::error::MeasureError>(Some(missing.end())) }
        };
        let (first, second) = tokio::join!(
            cache.ensure_cached("steps", requested, fetch),
            cache.ensure_cached("steps", requested, fetch),
        );
        assert_eq!(first.unwrap().missing, Some(requested));
        assert!(second.unwrap().is_fully_cached());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_entry_untouched() {
        let cache = manager();
        let result = cache
            .ensure_cached("steps", range(20230101, 20230131), |_| async {
                Err::<Option<NumberedDate>, _>(crate::error::MeasureError::Network(
                    "offline".to_string(),
                ))
            })
            .await;
        assert!(result.is_err());
        assert!(cache.entry("steps").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_all_waits_for_fetch_in_flight() {
        let cache = manager();
        let started = tokio::sync::Notify::new();
        let (release, released) = tokio::sync::oneshot::channel::<()>();

        let fetch = cache.ensure_cached("steps", range(20230101, 20230131), |missing| {
            let started = &started;
            async move {
                started.notify_one();
                let _ = released.await;
                Ok(Some(missing.end()))
            }
        });
        let wipe = async {
            started.notified().await;
            let (cleared, ()) = tokio::join!(cache.clear_all(), async {
                tokio::task::yield_now().await;
                let _ = release.send(());
            });
            cleared
        };
        let (fetched, cleared) = tokio::join!(fetch, wipe);
        fetched.unwrap();
        cleared.unwrap();
        assert!(cache.entry("steps").await.unwrap().is_none());
    }
}
