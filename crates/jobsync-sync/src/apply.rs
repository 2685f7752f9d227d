//! Writes a translated plan to the content store.

use jobsync_storage::ContentStore;
use serde::Serialize;
use tracing::{error, info};

use crate::translate::ReadyPlan;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Skipped,
    Applied { rows: u64 },
    Failed { error: String },
}

impl BatchOutcome {
    pub fn wrote_rows(&self) -> bool {
        matches!(self, BatchOutcome::Applied { rows } if *rows > 0)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BatchOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub inserts: BatchOutcome,
    pub updates: BatchOutcome,
}

impl ApplyReport {
    /// The public page is stale only if something was written, and a half-failed apply
    /// is left for the next run to finish.
    pub fn warrants_cache_purge(&self) -> bool {
        (self.inserts.wrote_rows() || self.updates.wrote_rows())
            && !self.inserts.is_failed()
            && !self.updates.is_failed()
    }
}

/// Runs the insert batch and the upsert batch side by side; neither waits on nor rolls back
/// the other.
pub async fn apply_plan(store: &dyn ContentStore, plan: &ReadyPlan) -> ApplyReport {
    let inserts = plan.insert_records();
    let updates = plan.update_records();

    let insert_fut = async {
        if inserts.is_empty() {
            return BatchOutcome::Skipped;
        }
        match store.insert_batch(&inserts).await {
            Ok(rows) => {
                info!(rows, "insert batch applied");
                BatchOutcome::Applied { rows }
            }
            Err(err) => {
                error!(error = %err, records = inserts.len(), "insert batch failed");
                BatchOutcome::Failed {
                    error: err.to_string(),
                }
            }
        }
    };
    let update_fut = async {
        if updates.is_empty() {
            return BatchOutcome::Skipped;
        }
        match store.upsert_batch(&updates).await {
            Ok(rows) => {
                info!(rows, "update batch applied");
                BatchOutcome::Applied { rows }
            }
            Err(err) => {
                error!(error = %err, records = updates.len(), "update batch failed");
                BatchOutcome::Failed {
                    error: err.to_string(),
                }
            }
        }
    };

    let (inserts, updates) = tokio::join!(insert_fut, update_fut);
    ApplyReport { inserts, updates }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::plan_sync;
    use crate::translate::Translator;
    use jobsync_core::{CanonicalPosting, PersistedRecord, StoredRecord, Translations};
    use jobsync_storage::MemoryContentStore;
    use uuid::Uuid;

    fn posting(url: &str) -> CanonicalPosting {
        CanonicalPosting {
            title: "Magasinier".to_string(),
            company: "Cargolux".to_string(),
            location: "Sandweiler".to_string(),
            category: "Other".to_string(),
            source_name: "Randstad".to_string(),
            source_url: url.to_string(),
            posted_at: Some("2024-04-02".to_string()),
            contact_info: "See details on the source site".to_string(),
            requires_driver: false,
            translations: Translations::new(),
        }
    }

    async fn ready_plan(store: &MemoryContentStore, urls: &[&str]) -> ReadyPlan {
        let existing = store.records();
        let plan = plan_sync(existing, urls.iter().map(|u| posting(u)).collect(), "2024-06-01");
        Translator::disabled().translate(plan).await.0
    }

    fn seeded_store() -> MemoryContentStore {
        MemoryContentStore::with_records(vec![StoredRecord {
            id: Uuid::new_v4(),
            record: PersistedRecord::from_posting(&posting("https://a/old"), "2024-01-01"),
        }])
    }

    #[tokio::test]
    async fn both_batches_apply() {
        let store = seeded_store();
        let plan = ready_plan(&store, &["https://a/old", "https://a/new"]).await;
        let report = apply_plan(&store, &plan).await;

        assert_eq!(report.inserts, BatchOutcome::Applied { rows: 1 });
        assert_eq!(report.updates, BatchOutcome::Applied { rows: 1 });
        assert!(report.warrants_cache_purge());
        assert_eq!(store.records().len(), 2);
    }

    #[tokio::test]
    async fn a_failed_insert_does_not_block_updates() {
        let store = seeded_store();
        store.fail_inserts(true);
        let plan = ready_plan(&store, &["https://a/old", "https://a/new"]).await;
        let report = apply_plan(&store, &plan).await;

        assert!(report.inserts.is_failed());
        assert_eq!(report.updates, BatchOutcome::Applied { rows: 1 });
        assert!(!report.warrants_cache_purge());
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn empty_partitions_are_skipped() {
        let store = MemoryContentStore::new();
        let plan = ready_plan(&store, &[]).await;
        let report = apply_plan(&store, &plan).await;
        assert_eq!(report.inserts, BatchOutcome::Skipped);
        assert_eq!(report.updates, BatchOutcome::Skipped);
        assert!(!report.warrants_cache_purge());
        assert_eq!(store.write_calls(), 0);
    }

    #[test]
    fn outcomes_serialize_with_a_status_tag() {
        let value = serde_json::to_value(BatchOutcome::Applied { rows: 3 }).expect("json");
        assert_eq!(value, serde_json::json!({ "status": "applied", "rows": 3 }));
    }
}
