//! Snapshot storage, HTTP fetch utilities and the persisted content store.

pub mod artifact;
pub mod content;
pub mod http;
pub mod throttle;

pub use artifact::{ArtifactStore, StoredArtifact};
pub use content::{ContentStore, MemoryContentStore, PgContentStore, StoreError};
pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, HttpClientConfig,
    HttpFetcher, RetryDisposition,
};
pub use throttle::RequestThrottle;

pub const CRATE_NAME: &str = "jobsync-storage";
