//! Orchestrator: fetch every source, then normalize, dedup, plan, translate and apply.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use jobsync_adapters::{
    AdemBoardConnector, BoardCrawlAdapter, BulkDatasetAdapter, RestSearchAdapter, SourceAdapter,
    SourceFetch, SourceKind, ADEM_LABELS,
};
use jobsync_core::RawPosting;
use jobsync_storage::{ArtifactStore, ContentStore, PgContentStore};
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::apply::{apply_plan, BatchOutcome};
use crate::config::{ConfigError, SyncConfig};
use crate::dedup::{dedup, DedupStats};
use crate::normalize::{CategoryTable, Normalizer};
use crate::plan::load_and_plan;
use crate::purge::{CachePurger, CloudflarePurger, PurgeOutcome};
use crate::snapshot::write_snapshot;
use crate::translate::{CompletionBackend, OpenAiCompletions, TranslationStats, Translator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    FetchingSources,
    Normalizing,
    Deduplicating,
    Planning,
    Translating,
    Applying,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Fetched { postings: usize, skipped: usize },
    Disabled { reason: String },
    Failed { error: String },
    TimedOut { after_secs: u64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub kind: SourceKind,
    pub status: SourceStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub state: RunState,
    pub sources: Vec<SourceReport>,
    pub raw_postings: usize,
    pub canonical_postings: usize,
    pub dedup: DedupStats,
    pub planned_inserts: usize,
    pub planned_updates: usize,
    /// Set when the store could not be read; nothing is applied in that case.
    pub planning_error: Option<String>,
    pub translation: TranslationStats,
    pub insert_batch: BatchOutcome,
    pub update_batch: BatchOutcome,
    pub snapshot_dir: Option<String>,
    pub purge: PurgeOutcome,
}

impl RunSummary {
    fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            state: RunState::Idle,
            sources: Vec::new(),
            raw_postings: 0,
            canonical_postings: 0,
            dedup: DedupStats::default(),
            planned_inserts: 0,
            planned_updates: 0,
            planning_error: None,
            translation: TranslationStats::default(),
            insert_batch: BatchOutcome::Skipped,
            update_batch: BatchOutcome::Skipped,
            snapshot_dir: None,
            purge: PurgeOutcome::NotConfigured,
        }
    }

    fn enter(&mut self, next: RunState) {
        info!(run_id = %self.run_id, from = %self.state, to = %next, "pipeline state");
        self.state = next;
    }
}

pub struct SyncPipeline {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    normalizer: Normalizer,
    store: Arc<dyn ContentStore>,
    translator: Translator,
    snapshots: Option<ArtifactStore>,
    purger: Option<Arc<dyn CachePurger>>,
    source_deadline: Duration,
}

impl SyncPipeline {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            adapters: Vec::new(),
            normalizer: Normalizer::default(),
            store,
            translator: Translator::disabled(),
            snapshots: None,
            purger: None,
            source_deadline: Duration::from_secs(120),
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_translator(mut self, translator: Translator) -> Self {
        self.translator = translator;
        self
    }

    pub fn with_snapshots(mut self, snapshots: ArtifactStore) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn with_purger(mut self, purger: Arc<dyn CachePurger>) -> Self {
        self.purger = Some(purger);
        self
    }

    pub fn with_source_deadline(mut self, deadline: Duration) -> Self {
        self.source_deadline = deadline;
        self
    }

    /// Wires the production adapters, Postgres store, translator and purger.
    pub fn from_config(config: &SyncConfig) -> Result<Self, ConfigError> {
        let store = PgContentStore::connect_lazy(&config.database_url)
            .map_err(|err| startup("content store", err))?;

        let categories = match &config.category_rules {
            Some(path) => CategoryTable::from_yaml_file(path).map_err(|err| ConfigError::Invalid {
                name: "JOBSYNC_CATEGORY_RULES",
                value: path.display().to_string(),
                reason: format!("{err:#}"),
            })?,
            None => CategoryTable::builtin(),
        };

        let dataset = BulkDatasetAdapter::new(config.dataset.clone())
            .map_err(|err| startup("dataset adapter", err))?;
        let board = BoardCrawlAdapter::new(AdemBoardConnector::new(config.board.clone()), ADEM_LABELS)
            .map_err(|err| startup("board adapter", err))?;
        let eures = RestSearchAdapter::new(config.eures.clone())
            .map_err(|err| startup("EURES adapter", err))?;
        let randstad = RestSearchAdapter::new(config.randstad.clone())
            .map_err(|err| startup("Randstad adapter", err))?;

        let backend = OpenAiCompletions::from_config(&config.translation)
            .map_err(|err| startup("completion client", err))?
            .map(|client| Arc::new(client) as Arc<dyn CompletionBackend>);
        if backend.is_none() {
            info!("no completion API key configured; new postings will be stored untranslated");
        }

        let mut pipeline = Self::new(Arc::new(store))
            .with_adapter(Arc::new(dataset))
            .with_adapter(Arc::new(board))
            .with_adapter(Arc::new(eures))
            .with_adapter(Arc::new(randstad))
            .with_normalizer(Normalizer::new(categories))
            .with_translator(Translator::new(backend, config.translation.spacing))
            .with_snapshots(ArtifactStore::new(config.snapshot_dir.clone()))
            .with_source_deadline(config.source_deadline);

        if let Some(purge) = &config.purge {
            let purger = CloudflarePurger::new(purge, &config.user_agent)
                .map_err(|err| startup("cache purger", err))?;
            pipeline = pipeline.with_purger(Arc::new(purger));
        }
        Ok(pipeline)
    }

    /// One full pass. Never fails: every per-stage problem ends up in the summary.
    pub async fn run_once(&self) -> RunSummary {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let mut summary = RunSummary::new(run_id, started_at);

        summary.enter(RunState::FetchingSources);
        let (raw, reports) = self.fetch_all().await;
        summary.sources = reports;
        summary.raw_postings = raw.len();

        summary.enter(RunState::Normalizing);
        let canonical = self.normalizer.normalize_all(raw);

        summary.enter(RunState::Deduplicating);
        let (deduped, stats) = dedup(canonical);
        summary.dedup = stats;
        summary.canonical_postings = deduped.len();

        summary.enter(RunState::Planning);
        let run_date = started_at.format("%Y-%m-%d").to_string();
        let plan = match load_and_plan(self.store.as_ref(), deduped.clone(), &run_date).await {
            Ok(plan) => plan,
            Err(err) => {
                error!(run_id = %run_id, error = %err, "could not read the store; nothing will be applied");
                summary.planning_error = Some(err.to_string());
                summary.snapshot_dir = self.snapshot(run_id, started_at, &deduped).await;
                return self.finish(summary);
            }
        };
        summary.planned_inserts = plan.to_insert().len();
        summary.planned_updates = plan.to_update().len();

        summary.enter(RunState::Translating);
        let (ready, translation) = self.translator.translate(plan).await;
        summary.translation = translation;

        summary.enter(RunState::Applying);
        let snapshot_set: Vec<_> = ready.postings().cloned().collect();
        summary.snapshot_dir = self.snapshot(run_id, started_at, &snapshot_set).await;

        let report = apply_plan(self.store.as_ref(), &ready).await;
        summary.purge = match &self.purger {
            None => PurgeOutcome::NotConfigured,
            Some(_) if !report.warrants_cache_purge() => PurgeOutcome::Skipped,
            Some(purger) => match purger.purge().await {
                Ok(urls) => PurgeOutcome::Purged { urls },
                Err(err) => {
                    warn!(run_id = %run_id, error = %err, "cache purge failed");
                    PurgeOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            },
        };
        summary.insert_batch = report.inserts;
        summary.update_batch = report.updates;

        self.finish(summary)
    }

    fn finish(&self, mut summary: RunSummary) -> RunSummary {
        summary.enter(RunState::Done);
        summary.finished_at = Utc::now();
        info!(
            run_id = %summary.run_id,
            raw = summary.raw_postings,
            canonical = summary.canonical_postings,
            inserts = summary.planned_inserts,
            updates = summary.planned_updates,
            "run finished"
        );
        summary
    }

    async fn fetch_all(&self) -> (Vec<RawPosting>, Vec<SourceReport>) {
        let deadline = self.source_deadline;
        let fetches = self.adapters.iter().map(|adapter| {
            let span = info_span!("source_fetch", source = adapter.source_name());
            async move {
                let outcome = tokio::time::timeout(deadline, adapter.fetch()).await;
                (adapter, outcome)
            }
            .instrument(span)
        });

        let mut postings = Vec::new();
        let mut reports = Vec::with_capacity(self.adapters.len());
        for (adapter, outcome) in join_all(fetches).await {
            let source = adapter.source_name().to_string();
            let status = match outcome {
                Ok(Ok(SourceFetch::Fetched(batch))) => {
                    info!(%source, postings = batch.postings.len(), skipped = batch.skipped_records, "source fetched");
                    let status = SourceStatus::Fetched {
                        postings: batch.postings.len(),
                        skipped: batch.skipped_records,
                    };
                    postings.extend(batch.postings);
                    status
                }
                Ok(Ok(SourceFetch::Disabled { reason })) => {
                    info!(%source, %reason, "source disabled");
                    SourceStatus::Disabled { reason }
                }
                Ok(Err(err)) => {
                    warn!(%source, error = %err, "source failed; continuing without it");
                    SourceStatus::Failed {
                        error: err.to_string(),
                    }
                }
                Err(_) => {
                    warn!(%source, deadline_secs = deadline.as_secs(), "source timed out; continuing without it");
                    SourceStatus::TimedOut {
                        after_secs: deadline.as_secs(),
                    }
                }
            };
            reports.push(SourceReport {
                source,
                kind: adapter.kind(),
                status,
            });
        }
        (postings, reports)
    }

    async fn snapshot(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        postings: &[jobsync_core::CanonicalPosting],
    ) -> Option<String> {
        let store = self.snapshots.as_ref()?;
        match write_snapshot(store, run_id, started_at, postings).await {
            Ok(dir) => Some(dir.display().to_string()),
            Err(err) => {
                warn!(run_id = %run_id, error = %format!("{err:#}"), "snapshot not written");
                None
            }
        }
    }
}

fn startup(what: &str, err: impl fmt::Display) -> ConfigError {
    ConfigError::Startup(format!("{what}: {err}"))
}

pub async fn run_sync_once_from_env() -> Result<RunSummary, ConfigError> {
    let config = SyncConfig::from_env()?;
    let pipeline = SyncPipeline::from_config(&config)?;
    Ok(pipeline.run_once().await)
}
