//! SQLite-based store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use measure_core::{
    CachedRangeEntry, DailyRow, DailyValue, DataSourceType, DateRange, IntraDayDataSourceType,
    IntraDayLog, MeasureError, NumberedDate, Result, RowStore,
};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument};

fn store_err(e: impl std::fmt::Display) -> MeasureError {
    MeasureError::Store(e.to_string())
}

/// SQLite-based store for measure data.
///
/// This store keeps data in a SQLite database file, providing persistence
/// across application restarts. Daily rows carry year, month and weekday
/// columns so cyclic queries use indexes. Every table carries a `service`
/// column; handles from [`RowStore::scoped`] share the connection and only
/// see their own service's rows.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    service: String,
}

impl SqliteStore {
    /// Create a new SQLite store at the given path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or schema creation fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(store_err)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory SQLite store.
    ///
    /// # Errors
    /// Returns an error if schema creation fails.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            service: String::new(),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(store_err)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS daily_summary (
                service TEXT NOT NULL,
                source TEXT NOT NULL,
                numbered_date INTEGER NOT NULL,
                year INTEGER NOT NULL,
                month INTEGER NOT NULL,
                day_of_week INTEGER NOT NULL,
                value REAL NOT NULL,
                value2 REAL,
                PRIMARY KEY (service, source, numbered_date)
            );
            CREATE INDEX IF NOT EXISTS idx_daily_summary_year_month
                ON daily_summary(service, source, year, month);
            CREATE INDEX IF NOT EXISTS idx_daily_summary_day_of_week
                ON daily_summary(service, source, day_of_week);

            CREATE TABLE IF NOT EXISTS intraday_log (
                service TEXT NOT NULL,
                id TEXT NOT NULL,
                source TEXT NOT NULL,
                numbered_date INTEGER NOT NULL,
                seconds_of_day INTEGER NOT NULL,
                value REAL NOT NULL,
                log_source TEXT,
                PRIMARY KEY (service, id)
            );
            CREATE INDEX IF NOT EXISTS idx_intraday_log_source_date
                ON intraday_log(service, source, numbered_date);

            CREATE TABLE IF NOT EXISTS cached_range (
                service TEXT NOT NULL,
                measure_key TEXT NOT NULL,
                end_date INTEGER NOT NULL,
                queried_at TEXT NOT NULL,
                PRIMARY KEY (service, measure_key)
            );",
        )
        .map_err(store_err)?;

        debug!("SQLite store schema initialized");
        Ok(())
    }
}

#[async_trait]
impl RowStore for SqliteStore {
    fn service_key(&self) -> &str {
        &self.service
    }

    fn scoped(&self, service_key: &str) -> Arc<dyn RowStore> {
        Arc::new(Self {
            conn: Arc::clone(&self.conn),
            service: service_key.to_string(),
        })
    }

    #[instrument(skip(self, rows), fields(service = %self.service, source = %source, count = rows.len()))]
    async fn insert_rows(&self, source: DataSourceType, rows: &[DailyRow]) -> Result<()> {
        let conn = self.conn.lock().map_err(store_err)?;
        let tx = conn.unchecked_transaction().map_err(store_err)?;

        for row in rows {
            let (value, value_to) = match row.value {
                DailyValue::Scalar(v) => (v, None),
                DailyValue::Range { from, to } => (from, Some(to)),
            };
            tx.execute(
                "INSERT OR REPLACE INTO daily_summary
                 (service, source, numbered_date, year, month, day_of_week, value, value2)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    self.service,
                    source.key(),
                    row.numbered_date.value(),
                    row.year,
                    row.month,
                    row.day_of_week,
                    value,
                    value_to
                ],
            )
            .map_err(store_err)?;
        }

        tx.commit().map_err(store_err)?;
        debug!("Stored {} rows", rows.len());
        Ok(())
    }

    #[instrument(skip(self), fields(service = %self.service, source = %source, range = %range))]
    async fn query_range(&self, source: DataSourceType, range: DateRange) -> Result<Vec<DailyRow>> {
        let conn = self.conn.lock().map_err(store_err)?;
        let mut stmt = conn
            .prepare(
                "SELECT numbered_date, value, value2 FROM daily_summary
                 WHERE service = ?1 AND source = ?2
                   AND numbered_date >= ?3 AND numbered_date <= ?4
                 ORDER BY numbered_date ASC",
            )
            .map_err(store_err)?;

        let raw = stmt
            .query_map(
                params![
                    self.service,
                    source.key(),
                    range.start().value(),
                    range.end().value()
                ],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                    ))
                },
            )
            .map_err(store_err)?;

        let mut rows = Vec::new();
        for entry in raw {
            let (date, value, value_to) = entry.map_err(store_err)?;
            let date = NumberedDate::from_value(date)?;
            rows.push(match value_to {
                Some(to) => DailyRow::range(date, value, to),
                None => DailyRow::scalar(date, value),
            });
        }
        debug!("Found {} stored rows", rows.len());
        Ok(rows)
    }

    #[instrument(skip(self, logs), fields(service = %self.service, count = logs.len()))]
    async fn insert_logs(&self, logs: &[IntraDayLog]) -> Result<()> {
        let conn = self.conn.lock().map_err(store_err)?;
        let tx = conn.unchecked_transaction().map_err(store_err)?;

        for log in logs {
            tx.execute(
                "INSERT OR REPLACE INTO intraday_log
                 (service, id, source, numbered_date, seconds_of_day, value, log_source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    self.service,
                    log.id,
                    log.source.key(),
                    log.numbered_date.value(),
                    log.seconds_of_day,
                    log.value,
                    log.source_label
                ],
            )
            .map_err(store_err)?;
        }

        tx.commit().map_err(store_err)?;
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
        let conn = self.conn.lock().map_err(store_err)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, numbered_date, seconds_of_day, value, log_source FROM intraday_log
                 WHERE service = ?1 AND source = ?2
                   AND numbered_date >= ?3 AND numbered_date <= ?4
                 ORDER BY numbered_date ASC, seconds_of_day ASC, id ASC",
            )
            .map_err(store_err)?;

        let raw = stmt
            .query_map(
                params![
                    self.service,
                    source.key(),
                    range.start().value(),
                    range.end().value()
                ],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .map_err(store_err)?;

        let mut logs = Vec::new();
        for entry in raw {
            let (id, date, seconds_of_day, value, source_label) = entry.map_err(store_err)?;
            logs.push(IntraDayLog {
                id,
                source,
                numbered_date: NumberedDate::from_value(date)?,
                seconds_of_day,
                value,
                source_label,
            });
        }
        Ok(logs)
    }

    async fn get_cache_entry(&self, measure_key: &str) -> Result<Option<CachedRangeEntry>> {
        let conn = self.conn.lock().map_err(store_err)?;
        let raw = conn
            .query_row(
                "SELECT end_date, queried_at FROM cached_range
                 WHERE service = ?1 AND measure_key = ?2",
                params![self.service, measure_key],
                |row| Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(store_err)?;

        let Some((end_date, queried_at)) = raw else {
            return Ok(None);
        };
        let queried_at = DateTime::parse_from_rfc3339(&queried_at)
            .map_err(|e| MeasureError::Parse(e.to_string()))?
            .with_timezone(&Utc);
        Ok(Some(CachedRangeEntry {
            measure_key: measure_key.to_string(),
            end_date: NumberedDate::from_value(end_date)?,
            queried_at,
        }))
    }

    #[instrument(skip(self, entry), fields(measure_key = %entry.measure_key, end_date = %entry.end_date))]
    async fn upsert_cache_entry(&self, entry: &CachedRangeEntry) -> Result<()> {
        let conn = self.conn.lock().map_err(store_err)?;
        conn.execute(
            "INSERT OR REPLACE INTO cached_range (service, measure_key, end_date, queried_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                self.service,
                entry.measure_key,
                entry.end_date.value(),
                entry.queried_at.to_rfc3339()
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn delete_cache_entry(&self, measure_key: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(store_err)?;
        conn.execute(
            "DELETE FROM cached_range WHERE service = ?1 AND measure_key = ?2",
            params![self.service, measure_key],
        )
        .map_err(store_err)?;
        Ok(())
    }

    #[instrument(skip(self), fields(service = %self.service))]
    async fn delete_all(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(store_err)?;
        let tx = conn.unchecked_transaction().map_err(store_err)?;
        for table in ["daily_summary", "intraday_log", "cached_range"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE service = ?1"),
                params![self.service],
            )
            .map_err(store_err)?;
        }
        tx.commit().map_err(store_err)?;
        debug!("Cleared all stored data");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(value: u32) -> NumberedDate {
        NumberedDate::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_sqlite_store_initialization() {
        let store = SqliteStore::in_memory();
        assert!(store.is_ok());
    }

    #[tokio::test]
    async fn test_scalar_and_range_rows() {
        let store = SqliteStore::in_memory().unwrap();
        let range = DateRange::new(day(20230101), day(20230107)).unwrap();

        // Initially no data
        assert!(
            store
                .query_range(DataSourceType::SleepRange, range)
                .await
                .unwrap()
                .is_empty()
        );

        store
            .insert_rows(
                DataSourceType::SleepRange,
                &[
                    DailyRow::range(day(20230102), -1800.0, 25200.0),
                    DailyRow::range(day(20230101), 600.0, 27000.0),
                ],
            )
            .await
            .unwrap();
        store
            .insert_rows(
                DataSourceType::HoursSlept,
                &[DailyRow::scalar(day(20230101), 7.5)],
            )
            .await
            .unwrap();

        let rows = store
            .query_range(DataSourceType::SleepRange, range)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].numbered_date, day(20230101));
        assert_eq!(rows[1].value.as_range(), Some((-1800.0, 25200.0)));
        assert_eq!(rows[1].day_of_week, 1);

        let hours = store
            .query_range(DataSourceType::HoursSlept, range)
            .await
            .unwrap();
        assert_eq!(hours[0].value.as_scalar(), Some(7.5));
    }

    #[tokio::test]
    async fn test_logs() {
        let store = SqliteStore::in_memory().unwrap();
        let logs = [
            IntraDayLog {
                id: "2".to_string(),
                source: IntraDayDataSourceType::Weight,
                numbered_date: day(20230101),
                seconds_of_day: 72000,
                value: 71.0,
                source_label: None,
            },
            IntraDayLog {
                id: "1".to_string(),
                source: IntraDayDataSourceType::Weight,
                numbered_date: day(20230101),
                seconds_of_day: 25200,
                value: 70.5,
                source_label: Some("Aria".to_string()),
            },
        ];
        store.insert_logs(&logs).await.unwrap();

        let stored = store
            .query_logs(IntraDayDataSourceType::Weight, day(20230101))
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0], logs[1]);
    }

    #[tokio::test]
    async fn test_cache_entries_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("measures.db");

        {
            let store = SqliteStore::new(&path).unwrap();
            store
                .upsert_cache_entry(&CachedRangeEntry::new("steps", day(20230131)))
                .await
                .unwrap();
        }

        let store = SqliteStore::new(&path).unwrap();
        let entry = store.get_cache_entry("steps").await.unwrap().unwrap();
        assert_eq!(entry.end_date, day(20230131));
        assert!(store.get_cache_entry("weight").await.unwrap().is_none());

        store.delete_cache_entry("steps").await.unwrap();
        assert!(store.get_cache_entry("steps").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scoped_handles_share_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteStore::new(dir.path().join("measures.db")).unwrap();
        let fitbit = backend.scoped("fitbit");
        let manual = backend.scoped("manual");

        fitbit
            .insert_rows(DataSourceType::Weight, &[DailyRow::scalar(day(20240105), 80.0)])
            .await
            .unwrap();
        fitbit
            .upsert_cache_entry(&CachedRangeEntry::new("weight", day(20240110)))
            .await
            .unwrap();
        manual
            .insert_rows(DataSourceType::Weight, &[DailyRow::scalar(day(20240105), 71.0)])
            .await
            .unwrap();
        let log = IntraDayLog {
            id: "1".to_string(),
            source: IntraDayDataSourceType::Weight,
            numbered_date: day(20240105),
            seconds_of_day: 0,
            value: 71.0,
            source_label: None,
        };
        manual.insert_logs(std::slice::from_ref(&log)).await.unwrap();
        fitbit.insert_logs(std::slice::from_ref(&log)).await.unwrap();

        let range = DateRange::single(day(20240105));
        let rows = fitbit.query_range(DataSourceType::Weight, range).await.unwrap();
        assert_eq!(rows[0].value.as_scalar(), Some(80.0));

        manual.delete_all().await.unwrap();
        assert!(manual.query_range(DataSourceType::Weight, range).await.unwrap().is_empty());
        assert_eq!(fitbit.query_range(DataSourceType::Weight, range).await.unwrap().len(), 1);
        assert_eq!(
            fitbit
                .query_logs_in(IntraDayDataSourceType::Weight, range)
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(fitbit.get_cache_entry("weight").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_all() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert_rows(
                DataSourceType::StepCount,
                &[DailyRow::scalar(day(20230101), 10.0)],
            )
            .await
            .unwrap();
        store
            .upsert_cache_entry(&CachedRangeEntry::new("steps", day(20230101)))
            .await
            .unwrap();

        store.delete_all().await.unwrap();

        let rows = store
            .query_range(DataSourceType::StepCount, DateRange::single(day(20230101)))
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert!(store.get_cache_entry("steps").await.unwrap().is_none());
    }
}
