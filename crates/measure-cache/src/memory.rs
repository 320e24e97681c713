//! In-memory store implementation.

use async_trait::async_trait;
use measure_core::{
    CachedRangeEntry, DailyRow, DataSourceType, DateRange, IntraDayDataSourceType, IntraDayLog,
    NumberedDate, Result, RowStore,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Data of one service.
#[derive(Debug, Default)]
struct Partition {
    rows: HashMap<DataSourceType, BTreeMap<NumberedDate, DailyRow>>,
    logs: HashMap<String, IntraDayLog>,
    entries: HashMap<String, CachedRangeEntry>,
}

/// Simple in-memory store.
///
/// Data is stored in a `RwLock`-protected map of per-service partitions and
/// is lost when the last handle is dropped. Rows are kept ordered by date
/// per metric. [`InMemoryStore::new`] returns a handle on the partition of
/// the empty service key; [`RowStore::scoped`] hands out the others.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    partitions: Arc<RwLock<HashMap<String, Partition>>>,
    service: String,
}

impl InMemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted_logs<'a>(logs: impl Iterator<Item = &'a IntraDayLog>) -> Vec<IntraDayLog> {
        let mut logs: Vec<IntraDayLog> = logs.cloned().collect();
        logs.sort_by(|a, b| {
            a.numbered_date
                .cmp(&b.numbered_date)
                .then_with(|| a.seconds_of_day.cmp(&b.seconds_of_day))
                .then_with(|| a.id.cmp(&b.id))
        });
        logs
    }
}

#[async_trait]
impl RowStore for InMemoryStore {
    fn service_key(&self) -> &str {
        &self.service
    }

    fn scoped(&self, service_key: &str) -> Arc<dyn RowStore> {
        Arc::new(Self {
            partitions: Arc::clone(&self.partitions),
            service: service_key.to_string(),
        })
    }

    #[instrument(skip(self, rows), fields(service = %self.service, source = %source, count = rows.len()))]
    async fn insert_rows(&self, source: DataSourceType, rows: &[DailyRow]) -> Result<()> {
        let mut partitions = self.partitions.write().await;
        let by_date = partitions
            .entry(self.service.clone())
            .or_default()
            .rows
            .entry(source)
            .or_default();
        for row in rows {
            by_date.insert(row.numbered_date, *row);
        }
        debug!("Stored {} rows", rows.len());
        Ok(())
    }

    #[instrument(skip(self), fields(service = %self.service, source = %source, range = %range))]
    async fn query_range(&self, source: DataSourceType, range: DateRange) -> Result<Vec<DailyRow>> {
        let partitions = self.partitions.read().await;
        Ok(partitions
            .get(&self.service)
            .and_then(|partition| partition.rows.get(&source))
            .map(|by_date| {
                by_date
                    .range(range.start()..=range.end())
                    .map(|(_, row)| *row)
                    .collect()
            })
            .unwrap_or_default())
    }

    #[instrument(skip(self, logs), fields(service = %self.service, count = logs.len()))]
    async fn insert_logs(&self, logs: &[IntraDayLog]) -> Result<()> {
        let mut partitions = self.partitions.write().await;
        let stored = &mut partitions.entry(self.service.clone()).or_default().logs;
        for log in logs {
            stored.insert(log.id.clone(), log.clone());
        }
        Ok(())
    }

    async fn query_logs(
        &self,
        source: IntraDayDataSourceType,
        date: NumberedDate,
    ) -> Result<Vec<IntraDayLog>> {
        self.query_logs_in(source, DateRange::single(date)).await
    }

    async fn query_logs_in(
        &self,
        source: IntraDayDataSourceType,
        range: DateRange,
    ) -> Result<Vec<IntraDayLog>> {
        let partitions = self.partitions.read().await;
        Ok(partitions
            .get(&self.service)
            .map(|partition| {
                Self::sorted_logs(
                    partition
                        .logs
                        .values()
                        .filter(|log| log.source == source && range.contains(log.numbered_date)),
                )
            })
            .unwrap_or_default())
    }

    async fn get_cache_entry(&self, measure_key: &str) -> Result<Option<CachedRangeEntry>> {
        let partitions = self.partitions.read().await;
        Ok(partitions
            .get(&self.service)
            .and_then(|partition| partition.entries.get(measure_key))
            .cloned())
    }

    async fn upsert_cache_entry(&self, entry: &CachedRangeEntry) -> Result<()> {
        self.partitions
            .write()
            .await
            .entry(self.service.clone())
            .or_default()
            .entries
            .insert(entry.measure_key.clone(), entry.clone());
        Ok(())
    }

    async fn delete_cache_entry(&self, measure_key: &str) -> Result<()> {
        if let Some(partition) = self.partitions.write().await.get_mut(&self.service) {
            partition.entries.remove(measure_key);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(service = %self.service))]
    async fn delete_all(&self) -> Result<()> {
        self.partitions.write().await.remove(&self.service);
        debug!("Cleared all stored data");
        Ok(())
    }
}
