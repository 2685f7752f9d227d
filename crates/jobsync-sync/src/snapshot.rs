//! Best-effort audit snapshot of the set about to be applied.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{BooleanArray, RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use jobsync_core::CanonicalPosting;
use jobsync_storage::{ArtifactStore, StoredArtifact};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotManifest {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub postings: usize,
    pub files: Vec<SnapshotFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

impl SnapshotFile {
    fn from_artifact(name: &str, artifact: &StoredArtifact) -> Self {
        Self {
            name: name.to_string(),
            path: artifact
                .relative_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| artifact.relative_path.display().to_string()),
            sha256: artifact.content_hash.clone(),
            bytes: artifact.byte_size as u64,
        }
    }
}

/// Writes `jobs.json`, `jobs.parquet` and `manifest.json` into a fresh run directory and
/// returns that directory.
pub async fn write_snapshot(
    store: &ArtifactStore,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    postings: &[CanonicalPosting],
) -> Result<PathBuf> {
    let run_dir = store.run_dir(started_at, run_id);
    let relative = run_dir
        .strip_prefix(store.root())
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| run_dir.clone());

    let json = serde_json::to_vec_pretty(postings).context("serializing postings snapshot")?;
    let json_artifact = store
        .write_atomic(relative.join("jobs.json"), &json)
        .await?;

    let parquet = encode_postings_parquet(postings)?;
    let parquet_artifact = store
        .write_atomic(relative.join("jobs.parquet"), &parquet)
        .await?;

    let manifest = SnapshotManifest {
        schema_version: 1,
        run_id,
        created_at: Utc::now(),
        postings: postings.len(),
        files: vec![
            SnapshotFile::from_artifact("jobs", &json_artifact),
            SnapshotFile::from_artifact("jobs_table", &parquet_artifact),
        ],
    };
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing snapshot manifest")?;
    store
        .write_atomic(relative.join("manifest.json"), &bytes)
        .await?;

    debug!(dir = %run_dir.display(), postings = postings.len(), "snapshot written");
    Ok(run_dir)
}

fn encode_postings_parquet(postings: &[CanonicalPosting]) -> Result<Vec<u8>> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("source_url", DataType::Utf8, false),
        ArrowField::new("source_name", DataType::Utf8, false),
        ArrowField::new("title", DataType::Utf8, false),
        ArrowField::new("company", DataType::Utf8, false),
        ArrowField::new("location", DataType::Utf8, false),
        ArrowField::new("category", DataType::Utf8, false),
        ArrowField::new("posted_at", DataType::Utf8, true),
        ArrowField::new("requires_driver", DataType::Boolean, false),
        ArrowField::new("translated_locales", DataType::UInt32, false),
    ]));

    let text = |f: fn(&CanonicalPosting) -> &str| {
        StringArray::from(postings.iter().map(|p| Some(f(p))).collect::<Vec<_>>())
    };
    let posted_at = StringArray::from(
        postings
            .iter()
            .map(|p| p.posted_at.as_deref())
            .collect::<Vec<_>>(),
    );
    let drivers = BooleanArray::from(postings.iter().map(|p| p.requires_driver).collect::<Vec<_>>());
    let locales = UInt32Array::from(
        postings
            .iter()
            .map(|p| p.translations.len() as u32)
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(text(|p| p.source_url.as_str())),
            Arc::new(text(|p| p.source_name.as_str())),
            Arc::new(text(|p| p.title.as_str())),
            Arc::new(text(|p| p.company.as_str())),
            Arc::new(text(|p| p.location.as_str())),
            Arc::new(text(|p| p.category.as_str())),
            Arc::new(posted_at),
            Arc::new(drivers),
            Arc::new(locales),
        ],
    )
    .context("building postings record batch")?;

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), None)
        .context("opening parquet writer")?;
    writer.write(&batch).context("writing postings record batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(buffer)
}
