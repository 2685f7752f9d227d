//! Bulk dataset adapter: a public open-data manifest pointing at a delimited file.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use csv_async::{AsyncReaderBuilder, StringRecord, Trim};
use futures::io::AsyncRead;
use futures::{StreamExt, TryStreamExt};
use jobsync_core::RawPosting;
use jobsync_storage::{HttpClientConfig, HttpFetcher};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{text_or_none, AdapterError, FetchedBatch, SourceAdapter, SourceFetch, SourceKind};

pub const ADEM_DATASET_SOURCE: &str = "ADEM";
pub const DEFAULT_DATASET_URL: &str =
    "https://data.public.lu/api/1/datasets/chiffres-cles-de-ladem/";
pub const DEFAULT_DATASET_TITLE: &str = "ADEM vacancy";
const DATASET_DETAIL_BASE: &str = "https://adem.public.lu/fr/jobboard.html?ref=";

#[derive(Debug, Clone)]
pub struct BulkDatasetConfig {
    pub manifest_url: String,
    pub record_cap: usize,
    pub delimiter: u8,
    /// Resource titles containing this (case-insensitive) win over other tabular files.
    pub preferred_resource: Option<String>,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for BulkDatasetConfig {
    fn default() -> Self {
        Self {
            manifest_url: DEFAULT_DATASET_URL.to_string(),
            record_cap: 50,
            delimiter: b',',
            preferred_resource: Some("skills".to_string()),
            timeout: Duration::from_secs(30),
            user_agent: "jobsync/0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetManifest {
    #[serde(default)]
    pub resources: Vec<DatasetResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetResource {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    pub url: String,
}

impl DatasetResource {
    fn is_tabular(&self) -> bool {
        self.format
            .as_deref()
            .is_some_and(|format| format.eq_ignore_ascii_case("csv"))
    }
}

pub fn select_tabular_resource<'a>(
    manifest: &'a DatasetManifest,
    preferred: Option<&str>,
) -> Option<&'a DatasetResource> {
    if let Some(needle) = preferred.map(str::to_lowercase) {
        let hit = manifest.resources.iter().find(|r| {
            r.is_tabular()
                && r.title
                    .as_deref()
                    .is_some_and(|title| title.to_lowercase().contains(&needle))
        });
        if hit.is_some() {
            return hit;
        }
    }
    manifest.resources.iter().find(|r| r.is_tabular())
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnChains {
    pub external_id: &'static [&'static str],
    pub title: &'static [&'static str],
    pub company: &'static [&'static str],
    pub location: &'static [&'static str],
    pub posted_at: &'static [&'static str],
}

pub const ADEM_COLUMNS: ColumnChains = ColumnChains {
    external_id: &["vacancy_id"],
    title: &[
        "occupation_label",
        "romes_label",
        "Label",
        "Metier",
        "Job Title",
        "title",
    ],
    company: &["employer_name", "employer", "company"],
    location: &["commune", "municipality", "location"],
    posted_at: &["publication_date", "posted_at", "date"],
};

struct HeaderIndex {
    external_id: Vec<usize>,
    title: Vec<usize>,
    company: Vec<usize>,
    location: Vec<usize>,
    posted_at: Vec<usize>,
}

impl HeaderIndex {
    fn resolve(headers: &StringRecord, chains: &ColumnChains) -> Self {
        let lookup = |names: &[&str]| -> Vec<usize> {
            names
                .iter()
                .filter_map(|name| headers.iter().position(|h| h.trim() == *name))
                .collect()
        };
        Self {
            external_id: lookup(chains.external_id),
            title: lookup(chains.title),
            company: lookup(chains.company),
            location: lookup(chains.location),
            posted_at: lookup(chains.posted_at),
        }
    }

    fn first_value(record: &StringRecord, candidates: &[usize]) -> Option<String> {
        candidates
            .iter()
            .find_map(|idx| record.get(*idx).and_then(text_or_none))
    }

    fn map_row(&self, record: &StringRecord, row_index: usize, source_name: &str) -> RawPosting {
        let external_id = Self::first_value(record, &self.external_id)
            .unwrap_or_else(|| format!("adem-{row_index}"));
        RawPosting {
            title: Self::first_value(record, &self.title)
                .unwrap_or_else(|| DEFAULT_DATASET_TITLE.to_string()),
            company: Self::first_value(record, &self.company),
            location: Self::first_value(record, &self.location),
            posted_at: Self::first_value(record, &self.posted_at),
            source_url: format!("{DATASET_DETAIL_BASE}{external_id}"),
            contact_info: Some(format!("Ref: {external_id} | Apply on the ADEM job board")),
            source_name: source_name.to_string(),
            external_id,
        }
    }
}

/// Streams rows from `reader`, stopping after `record_cap` rows.
///
/// Malformed rows are skipped and counted. An I/O failure part-way through ends the
/// stream and keeps whatever was mapped before it.
pub async fn parse_dataset_stream<R>(
    reader: R,
    record_cap: usize,
    delimiter: u8,
    source_name: &str,
) -> Result<FetchedBatch, AdapterError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut csv = AsyncReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(Trim::All)
        .create_reader(reader);

    let headers = csv
        .headers()
        .await
        .map_err(|err| AdapterError::parse(source_name, format!("reading header row: {err}")))?
        .clone();
    let index = HeaderIndex::resolve(&headers, &ADEM_COLUMNS);
    if index.title.is_empty() {
        debug!(source = source_name, "no title column found; using default title");
    }

    let mut batch = FetchedBatch::default();
    let mut records = std::pin::pin!(csv.records().take(record_cap).enumerate());
    while let Some((row_index, row)) = records.next().await {
        match row {
            Ok(record) => batch
                .postings
                .push(index.map_row(&record, row_index, source_name)),
            Err(err) if matches!(err.kind(), csv_async::ErrorKind::Io(_)) => {
                warn!(
                    source = source_name,
                    rows = batch.postings.len(),
                    error = %err,
                    "dataset stream ended early; keeping rows read so far"
                );
                break;
            }
            Err(err) => {
                debug!(source = source_name, row_index, error = %err, "skipping malformed row");
                batch.skipped_records += 1;
            }
        }
    }
    Ok(batch)
}

pub struct BulkDatasetAdapter {
    config: BulkDatasetConfig,
    http: HttpFetcher,
}

impl BulkDatasetAdapter {
    pub fn new(config: BulkDatasetConfig) -> Result<Self, AdapterError> {
        let http = HttpFetcher::new(
            ADEM_DATASET_SOURCE,
            HttpClientConfig::with_timeout(config.timeout, config.user_agent.clone()),
        )
        .map_err(|err| AdapterError::http(ADEM_DATASET_SOURCE, err))?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl SourceAdapter for BulkDatasetAdapter {
    fn source_name(&self) -> &str {
        ADEM_DATASET_SOURCE
    }

    fn kind(&self) -> SourceKind {
        SourceKind::BulkDataset
    }

    async fn fetch(&self) -> Result<SourceFetch, AdapterError> {
        let source = self.source_name();
        let manifest: DatasetManifest = self
            .http
            .get_json(&self.config.manifest_url)
            .await
            .map_err(|err| AdapterError::http(source, err))?;

        let resource =
            select_tabular_resource(&manifest, self.config.preferred_resource.as_deref())
                .ok_or_else(|| AdapterError::parse(source, "manifest lists no CSV resource"))?;
        info!(
            source,
            resource = resource.title.as_deref().unwrap_or("untitled"),
            url = %resource.url,
            "streaming dataset resource"
        );

        let response = self
            .http
            .get(&resource.url)
            .await
            .map_err(|err| AdapterError::http(source, err))?;
        let body = Box::pin(response.bytes_stream().map_err(io::Error::other)).into_async_read();

        let batch =
            parse_dataset_stream(body, self.config.record_cap, self.config.delimiter, source)
                .await?;
        info!(
            source,
            postings = batch.postings.len(),
            skipped = batch.skipped_records,
            "dataset parsed"
        );
        Ok(SourceFetch::Fetched(batch))
    }
}
