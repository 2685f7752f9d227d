//! Sync pipeline: normalization, dedup, planning, translation, apply and the run orchestrator.

pub mod apply;
pub mod config;
pub mod dedup;
pub mod normalize;
pub mod pipeline;
pub mod plan;
pub mod purge;
pub mod snapshot;
pub mod translate;

pub use apply::{apply_plan, ApplyReport, BatchOutcome};
pub use config::{ConfigError, PurgeConfig, SyncConfig, TranslationConfig};
pub use dedup::{dedup, fingerprint_groups, DedupStats};
pub use normalize::{requires_driver, CategoryRule, CategoryTable, Normalizer, TRANSPORT_CATEGORY};
pub use pipeline::{
    run_sync_once_from_env, RunState, RunSummary, SourceReport, SourceStatus, SyncPipeline,
};
pub use plan::{load_and_plan, plan_sync, PlannedUpdate, SyncPlan};
pub use purge::{CachePurger, CloudflarePurger, PurgeError, PurgeOutcome};
pub use snapshot::{write_snapshot, SnapshotFile, SnapshotManifest};
pub use translate::{
    parse_translations, CompletionBackend, OpenAiCompletions, ReadyPlan, TranslationError,
    TranslationStats, Translator,
};

pub const CRATE_NAME: &str = "jobsync-sync";
