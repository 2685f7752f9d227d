//! Source adapter contract plus the bulk-dataset, authenticated-crawl and REST adapters.

pub mod bulk;
pub mod crawl;
pub mod rest;

use async_trait::async_trait;
use jobsync_core::RawPosting;
use jobsync_storage::FetchError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use bulk::{BulkDatasetAdapter, BulkDatasetConfig};
pub use crawl::{
    AdemBoardConfig, AdemBoardConnector, BoardCrawlAdapter, BoardCredentials, CrawlConnector,
    CrawlSession, LabelExtractor, LabeledField, ListingField, ADEM_LABELS,
};
pub use rest::{RestDialect, RestSearchAdapter, RestSourceConfig};

pub const CRATE_NAME: &str = "jobsync-adapters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    BulkDataset,
    AuthenticatedCrawl,
    Rest,
}

/// Postings an adapter produced, plus how many source records it had to drop.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchedBatch {
    pub postings: Vec<RawPosting>,
    pub skipped_records: usize,
}

impl FetchedBatch {
    pub fn extend(&mut self, other: FetchedBatch) {
        self.postings.extend(other.postings);
        self.skipped_records += other.skipped_records;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceFetch {
    Fetched(FetchedBatch),
    /// The source is switched off (e.g. missing credential); no data was fabricated.
    Disabled { reason: String },
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{source_name}: authentication failed: {reason}")]
    Authentication { source_name: String, reason: String },
    #[error("{source_name}: unparsable response: {message}")]
    Parse { source_name: String, message: String },
    #[error("{source_name}: {source}")]
    Http {
        source_name: String,
        #[source]
        source: FetchError,
    },
}

impl AdapterError {
    pub fn http(source_name: &str, source: FetchError) -> Self {
        AdapterError::Http {
            source_name: source_name.to_string(),
            source,
        }
    }

    pub fn parse(source_name: &str, message: impl Into<String>) -> Self {
        AdapterError::Parse {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_name(&self) -> &str;
    fn kind(&self) -> SourceKind;

    async fn fetch(&self) -> Result<SourceFetch, AdapterError>;
}

pub(crate) fn text_or_none(value: &str) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}
