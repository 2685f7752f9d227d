//! Insert/update partition of the canonical set against what the store already holds.

use std::collections::HashMap;

use jobsync_core::{CanonicalPosting, PersistedRecord, StoredRecord, JOBS_SECTION};
use jobsync_storage::{ContentStore, StoreError};
use tracing::{debug, warn};

/// An existing row about to be refreshed from a posting with the same URL.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedUpdate {
    pub posting: CanonicalPosting,
    pub payload: StoredRecord,
}

/// Output of the planner. Only [`plan_sync`] builds one, and translation takes it by value.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub(crate) to_insert: Vec<CanonicalPosting>,
    pub(crate) to_update: Vec<PlannedUpdate>,
    pub(crate) run_date: String,
}

impl SyncPlan {
    pub fn to_insert(&self) -> &[CanonicalPosting] {
        &self.to_insert
    }

    pub fn to_update(&self) -> &[PlannedUpdate] {
        &self.to_update
    }

    pub fn run_date(&self) -> &str {
        &self.run_date
    }
}

/// Partitions `postings` by whether their URL is already stored.
///
/// Update payloads reuse the stored translations, and the stored date when the posting has
/// none, so re-planning an unchanged set yields payloads equal to the stored rows.
pub fn plan_sync(
    existing: Vec<StoredRecord>,
    postings: Vec<CanonicalPosting>,
    run_date: &str,
) -> SyncPlan {
    let mut by_url: HashMap<String, StoredRecord> = HashMap::with_capacity(existing.len());
    for record in existing {
        if record.record.section != JOBS_SECTION {
            continue;
        }
        if let Some(kept) = by_url.get(&record.record.link_url) {
            warn!(
                link_url = %record.record.link_url,
                kept = %kept.id,
                ignored = %record.id,
                "store holds more than one row for this URL"
            );
            continue;
        }
        by_url.insert(record.record.link_url.clone(), record);
    }

    let mut to_insert = Vec::new();
    let mut to_update = Vec::new();
    for mut posting in postings {
        match by_url.get(&posting.source_url) {
            None => to_insert.push(posting),
            Some(stored) => {
                posting.translations = stored.record.metadata.translations.clone();
                let payload = StoredRecord {
                    id: stored.id,
                    record: PersistedRecord::from_posting(&posting, &stored.record.metadata.date),
                };
                to_update.push(PlannedUpdate { posting, payload });
            }
        }
    }
    debug!(
        inserts = to_insert.len(),
        updates = to_update.len(),
        "sync plan computed"
    );

    SyncPlan {
        to_insert,
        to_update,
        run_date: run_date.to_string(),
    }
}

pub async fn load_and_plan(
    store: &dyn ContentStore,
    postings: Vec<CanonicalPosting>,
    run_date: &str,
) -> Result<SyncPlan, StoreError> {
    let existing = store.list_section(JOBS_SECTION).await?;
    Ok(plan_sync(existing, postings, run_date))
}
