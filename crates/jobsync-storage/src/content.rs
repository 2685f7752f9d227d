//! Persisted content store (`content_items` rows keyed by `link_url`).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jobsync_core::{PersistedRecord, RecordMetadata, StoredRecord};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Rows per statement; a batch larger than this is split but still committed as one transaction.
const ROWS_PER_STATEMENT: usize = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store rejected write: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn list_section(&self, section: &str) -> Result<Vec<StoredRecord>, StoreError>;

    async fn insert_batch(&self, records: &[PersistedRecord]) -> Result<u64, StoreError>;

    /// Inserts or updates rows by id. Stored translations survive a payload without any.
    async fn upsert_batch(&self, records: &[StoredRecord]) -> Result<u64, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgContentStore {
    pool: PgPool,
}

impl PgContentStore {
    /// Validates the URL now and defers connecting until the first query.
    pub fn connect_lazy(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(15))
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl ContentStore for PgContentStore {
    async fn list_section(&self, section: &str) -> Result<Vec<StoredRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, section, title, subtitle, description, link_url, badge_text, metadata \
             FROM content_items WHERE section = $1 ORDER BY created_at",
        )
        .bind(section)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get("id")?;
            let link_url: Option<String> = row.try_get("link_url")?;
            let Some(link_url) = link_url else {
                continue;
            };
            let metadata: Option<serde_json::Value> = row.try_get("metadata")?;
            let metadata = match metadata {
                Some(value) => serde_json::from_value::<RecordMetadata>(value).unwrap_or_else(|err| {
                    warn!(%id, error = %err, "unreadable metadata on stored record; treating as empty");
                    RecordMetadata::default()
                }),
                None => RecordMetadata::default(),
            };
            records.push(StoredRecord {
                id,
                record: PersistedRecord {
                    section: row.try_get("section")?,
                    title: row.try_get::<Option<String>, _>("title")?.unwrap_or_default(),
                    subtitle: row.try_get::<Option<String>, _>("subtitle")?.unwrap_or_default(),
                    description: row
                        .try_get::<Option<String>, _>("description")?
                        .unwrap_or_default(),
                    link_url,
                    badge_text: row
                        .try_get::<Option<String>, _>("badge_text")?
                        .unwrap_or_default(),
                    metadata,
                },
            });
        }
        Ok(records)
    }

    async fn insert_batch(&self, records: &[PersistedRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let created_at = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;
        for chunk in records.chunks(ROWS_PER_STATEMENT) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO content_items \
                 (section, title, subtitle, description, link_url, badge_text, metadata, created_at) ",
            );
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(&record.section)
                    .push_bind(&record.title)
                    .push_bind(&record.subtitle)
                    .push_bind(&record.description)
                    .push_bind(&record.link_url)
                    .push_bind(&record.badge_text)
                    .push_bind(Json(&record.metadata))
                    .push_bind(created_at);
            });
            written += builder.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        info!(rows = written, "inserted content rows");
        Ok(written)
    }

    async fn upsert_batch(&self, records: &[StoredRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;
        for chunk in records.chunks(ROWS_PER_STATEMENT) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO content_items \
                 (id, section, title, subtitle, description, link_url, badge_text, metadata) ",
            );
            builder.push_values(chunk, |mut row, stored| {
                let record = &stored.record;
                row.push_bind(stored.id)
                    .push_bind(&record.section)
                    .push_bind(&record.title)
                    .push_bind(&record.subtitle)
                    .push_bind(&record.description)
                    .push_bind(&record.link_url)
                    .push_bind(&record.badge_text)
                    .push_bind(Json(&record.metadata));
            });
            builder.push(
                " ON CONFLICT (id) DO UPDATE SET \
                 section = EXCLUDED.section, \
                 title = EXCLUDED.title, \
                 subtitle = EXCLUDED.subtitle, \
                 description = EXCLUDED.description, \
                 link_url = EXCLUDED.link_url, \
                 badge_text = EXCLUDED.badge_text, \
                 metadata = jsonb_strip_nulls(CASE \
                   WHEN EXCLUDED.metadata ? 'translations' THEN EXCLUDED.metadata \
                   ELSE EXCLUDED.metadata || jsonb_build_object('translations', content_items.metadata -> 'translations') \
                 END)",
            );
            written += builder.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        info!(rows = written, "upserted content rows");
        Ok(written)
    }
}

/// Process-local store with the same write semantics as [`PgContentStore`].
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    records: Mutex<Vec<StoredRecord>>,
    fail_reads: AtomicBool,
    fail_inserts: AtomicBool,
    fail_upserts: AtomicBool,
    write_calls: AtomicUsize,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<StoredRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<StoredRecord> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<StoredRecord>> {
        // A poisoned lock only means another test thread panicked mid-write.
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn list_section(&self, section: &str) -> Result<Vec<StoredRecord>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("section listing refused".into()));
        }
        Ok(self
            .lock()
            .iter()
            .filter(|stored| stored.record.section == section)
            .cloned()
            .collect())
    }

    async fn insert_batch(&self, records: &[PersistedRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("insert batch refused".into()));
        }
        let mut stored = self.lock();
        stored.extend(records.iter().map(|record| StoredRecord {
            id: Uuid::new_v4(),
            record: record.clone(),
        }));
        Ok(records.len() as u64)
    }

    async fn upsert_batch(&self, records: &[StoredRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("upsert batch refused".into()));
        }
        let mut stored = self.lock();
        for incoming in records {
            match stored.iter_mut().find(|existing| existing.id == incoming.id) {
                Some(existing) => {
                    let kept = std::mem::take(&mut existing.record.metadata.translations);
                    existing.record = incoming.record.clone();
                    if existing.record.metadata.translations.is_empty() {
                        existing.record.metadata.translations = kept;
                    }
                }
                None => stored.push(incoming.clone()),
            }
        }
        Ok(records.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobsync_core::{LocalizedText, Locale, Translations, JOBS_SECTION};

    fn record(url: &str) -> PersistedRecord {
        PersistedRecord {
            section: JOBS_SECTION.to_string(),
            title: "Comptable".into(),
            subtitle: "POST Luxembourg".into(),
            description: "Luxembourg".into(),
            link_url: url.into(),
            badge_text: "Finance & Accounting".into(),
            metadata: RecordMetadata {
                source: "ADEM".into(),
                contact_info: "Ref: 1".into(),
                date: "2024-01-01".into(),
                translations: Translations::new(),
                requires_driver: false,
            },
        }
    }

    #[tokio::test]
    async fn memory_store_lists_only_requested_section() {
        let mut other = record("https://example.lu/deal");
        other.section = "deals".into();
        let store = MemoryContentStore::new();
        store
            .insert_batch(&[record("https://example.lu/1"), other])
            .await
            .unwrap();

        let jobs = store.list_section(JOBS_SECTION).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].record.link_url, "https://example.lu/1");
    }

    #[tokio::test]
    async fn upsert_without_translations_keeps_stored_ones() {
        let mut translated = record("https://example.lu/1");
        translated.metadata.translations.insert(
            Locale::Fr,
            LocalizedText {
                title: "Comptable".into(),
                location: "Luxembourg".into(),
            },
        );
        let id = Uuid::new_v4();
        let store = MemoryContentStore::with_records(vec![StoredRecord {
            id,
            record: translated,
        }]);

        let mut update = record("https://example.lu/1");
        update.title = "Comptable senior".into();
        store
            .upsert_batch(&[StoredRecord { id, record: update }])
            .await
            .unwrap();

        let rows = store.records();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record.title, "Comptable senior");
        assert!(rows[0].record.metadata.translations.contains_key(&Locale::Fr));
    }

    #[tokio::test]
    async fn failing_batches_report_errors_and_write_nothing() {
        let store = MemoryContentStore::new();
        store.fail_inserts(true);
        let err = store
            .insert_batch(&[record("https://example.lu/1")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert!(store.records().is_empty());
        assert_eq!(store.write_calls(), 1);
    }

    #[tokio::test]
    async fn empty_batches_are_not_counted_as_writes() {
        let store = MemoryContentStore::new();
        assert_eq!(store.insert_batch(&[]).await.unwrap(), 0);
        assert_eq!(store.upsert_batch(&[]).await.unwrap(), 0);
        assert_eq!(store.write_calls(), 0);
    }

    #[tokio::test]
    async fn lazy_pg_store_rejects_malformed_urls() {
        assert!(PgContentStore::connect_lazy("not a url").is_err());
    }
}
