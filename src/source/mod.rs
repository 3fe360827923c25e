//! Upstream content access.
//!
//! The module is split into:
//! - **Transport**: raw HTTP behind [`HttpFetch`], wrapped by
//!   [`RateLimitedTransport`] for authentication, backoff and retries
//! - **Client**: the [`ContentSource`] trait (the six operations the engine
//!   needs) and [`GithubSource`], its implementation over the GitHub REST API
//!
//! Everything above this module talks to [`ContentSource`] only, so the
//! merger and the orchestrator run unchanged against an in-memory fake.

pub mod github;
pub mod transport;

pub use github::GithubSource;
pub use transport::{HttpFetch, HttpResponse, RateLimitedTransport, ReqwestFetch};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },
    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error(
        "rate limited: need to wait ~{}s, exceeds cap {}s",
        .wait.as_secs().max(1),
        .ceiling.as_secs()
    )]
    RateLimitExceeded { wait: Duration, ceiling: Duration },
    #[error("rate limited (HTTP {status}) in strict mode; set GITHUB_TOKEN or raise GENERATE_MAX_WAIT_MS")]
    RateLimitedStrict { status: u16 },
    #[error("still rate limited after {attempts} retries")]
    RateLimitRetriesExhausted { attempts: u32 },
    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("comparison {base}...{head} cannot be used for an incremental update: {reason}")]
    DiffUnsafe {
        base: String,
        head: String,
        reason: String,
    },
    #[error("unexpected response: {0}")]
    Unexpected(String),
}

impl SourceError {
    /// Rate-limit failures are never tolerated, whatever the caller's policy.
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            SourceError::RateLimitExceeded { .. }
                | SourceError::RateLimitedStrict { .. }
                | SourceError::RateLimitRetriesExhausted { .. }
        )
    }
}

/// A document file found in the documents subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub name: String,
    pub filename: String,
}

/// One file record of a commit comparison, with repository-relative paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: String,
    pub status: FileStatus,
    /// Only set for renames.
    pub previous_path: Option<String>,
}

/// Status of a file in a comparison, as reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Added,
    Modified,
    Removed,
    Renamed,
    /// `copied`, `changed`, `unchanged`: no document-level meaning beyond
    /// "something about this path moved".
    Other,
}

impl FileStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "added" => FileStatus::Added,
            "modified" => FileStatus::Modified,
            "removed" => FileStatus::Removed,
            "renamed" => FileStatus::Renamed,
            _ => FileStatus::Other,
        }
    }
}

/// Read-only operations over the hosted content repository.
///
/// None of the operations cache; every call goes upstream.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Every document file under the documents subtree.
    async fn list_documents(&self) -> Result<Vec<DocumentRef>, SourceError>;

    /// Sorted image names under the document's image directory. A missing
    /// directory yields an empty list.
    async fn list_images_for(&self, name: &str) -> Result<Vec<String>, SourceError>;

    /// Raw text of a document.
    async fn fetch_body(&self, filename: &str) -> Result<String, SourceError>;

    /// Most recent version that touched `path`, or `None` if it has no history.
    async fn latest_version_for_path(&self, path: &str) -> Result<Option<String>, SourceError>;

    /// Version at the tip of the tracked branch.
    async fn branch_head(&self) -> Result<Option<String>, SourceError>;

    /// Files changed between two versions.
    async fn compare_versions(
        &self,
        base: &str,
        head: &str,
    ) -> Result<Vec<ChangedFile>, SourceError>;
}
