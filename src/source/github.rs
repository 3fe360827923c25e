//! [`ContentSource`] over the GitHub REST API.
//!
//! | Operation | Endpoint |
//! |---|---|
//! | list documents / images | `GET /repos/{owner}/{repo}/contents/{dir}?ref={branch}` |
//! | latest version of a subtree | `GET /repos/{owner}/{repo}/commits?sha={branch}&path={dir}&per_page=1` |
//! | branch head | `GET /repos/{owner}/{repo}/commits/{branch}` |
//! | compare | `GET /repos/{owner}/{repo}/compare/{base}...{head}` |
//! | document body | `GET {raw}/{owner}/{repo}/{branch}/{documents_dir}/{filename}` |

use super::transport::{HttpFetch, RateLimitedTransport};
use super::{ChangedFile, ContentSource, DocumentRef, FileStatus, SourceError};
use crate::config::{RepoLayout, SourceConfig};
use crate::types::strip_extension;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use urlencoding::encode;

/// GitHub returns at most this many files per comparison; a full page means
/// the list may be truncated.
const COMPARE_FILE_LIMIT: usize = 300;

#[derive(Debug, Deserialize)]
struct ContentItem {
    name: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

impl ContentItem {
    fn is_dir(&self) -> bool {
        self.kind.as_deref() == Some("dir")
    }
}

#[derive(Debug, Deserialize)]
struct Commit {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct Comparison {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    files: Vec<ComparisonFile>,
}

#[derive(Debug, Deserialize)]
struct ComparisonFile {
    filename: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    previous_filename: Option<String>,
}

pub struct GithubSource<F> {
    transport: RateLimitedTransport<F>,
    repo_url: String,
    raw_url: String,
    branch: String,
    layout: RepoLayout,
}

impl<F: HttpFetch> GithubSource<F> {
    pub fn new(transport: RateLimitedTransport<F>, source: &SourceConfig, layout: RepoLayout) -> Self {
        let api = source.api_base.trim_end_matches('/');
        let raw = source.raw_base.trim_end_matches('/');
        Self {
            transport,
            repo_url: format!("{}/repos/{}/{}", api, source.owner, source.repo),
            raw_url: format!("{}/{}/{}/{}", raw, source.owner, source.repo, encode(&source.branch)),
            branch: source.branch.clone(),
            layout,
        }
    }

    fn contents_url(&self, path: &str) -> String {
        format!("{}/contents/{}?ref={}", self.repo_url, path, encode(&self.branch))
    }

    /// GET and decode JSON. 404 is `None`; any other failure is an error.
    async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, SourceError> {
        let response = self.transport.request(url).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status.is_success() {
            return Err(SourceError::Status {
                url: url.to_string(),
                status: response.status.as_u16(),
                body: response.body,
            });
        }
        serde_json::from_str(&response.body)
            .map(Some)
            .map_err(|source| SourceError::Decode {
                url: url.to_string(),
                source,
            })
    }

    async fn fetch_text(&self, url: &str) -> Result<String, SourceError> {
        let response = self.transport.request(url).await?;
        if !response.status.is_success() {
            return Err(SourceError::Status {
                url: url.to_string(),
                status: response.status.as_u16(),
                body: response.body,
            });
        }
        Ok(response.body)
    }

    /// Directory listing; a missing directory is empty, a file where a
    /// directory was expected is an error.
    async fn list_dir(&self, path: &str) -> Result<Vec<ContentItem>, SourceError> {
        let url = self.contents_url(path);
        let Some(value) = self.fetch_json::<serde_json::Value>(&url).await? else {
            return Ok(Vec::new());
        };
        if !value.is_array() {
            return Err(SourceError::Unexpected(format!(
                "expected a directory listing at {path}, got {value}"
            )));
        }
        serde_json::from_value(value).map_err(|source| SourceError::Decode { url, source })
    }
}

#[async_trait]
impl<F: HttpFetch> ContentSource for GithubSource<F> {
    async fn list_documents(&self) -> Result<Vec<DocumentRef>, SourceError> {
        let items = self.list_dir(&encode(&self.layout.documents_dir)).await?;
        Ok(items
            .into_iter()
            .filter(|item| !item.is_dir() && self.layout.is_document(&item.name))
            .map(|item| DocumentRef {
                name: strip_extension(&item.name).to_string(),
                filename: item.name,
            })
            .collect())
    }

    async fn list_images_for(&self, name: &str) -> Result<Vec<String>, SourceError> {
        let path = format!("{}/{}", encode(&self.layout.images_dir), encode(name));
        let mut images: Vec<String> = self
            .list_dir(&path)
            .await?
            .into_iter()
            .filter(|item| !item.is_dir())
            .map(|item| item.name)
            .collect();
        images.sort();
        Ok(images)
    }

    async fn fetch_body(&self, filename: &str) -> Result<String, SourceError> {
        let url = format!(
            "{}/{}/{}",
            self.raw_url,
            encode(&self.layout.documents_dir),
            encode(filename)
        );
        self.fetch_text(&url).await
    }

    async fn latest_version_for_path(&self, path: &str) -> Result<Option<String>, SourceError> {
        let url = format!(
            "{}/commits?sha={}&path={}&per_page=1",
            self.repo_url,
            encode(&self.branch),
            encode(path)
        );
        let commits: Option<Vec<Commit>> = self.fetch_json(&url).await?;
        Ok(commits
            .and_then(|c| c.into_iter().next())
            .map(|c| c.sha)
            .filter(|sha| !sha.is_empty()))
    }

    async fn branch_head(&self) -> Result<Option<String>, SourceError> {
        let url = format!("{}/commits/{}", self.repo_url, encode(&self.branch));
        let commit: Option<Commit> = self.fetch_json(&url).await?;
        Ok(commit.map(|c| c.sha).filter(|sha| !sha.is_empty()))
    }

    async fn compare_versions(
        &self,
        base: &str,
        head: &str,
    ) -> Result<Vec<ChangedFile>, SourceError> {
        let unsafe_diff = |reason: &str| SourceError::DiffUnsafe {
            base: base.to_string(),
            head: head.to_string(),
            reason: reason.to_string(),
        };

        let url = format!("{}/compare/{}...{}", self.repo_url, encode(base), encode(head));
        let comparison: Comparison = self
            .fetch_json(&url)
            .await?
            .ok_or_else(|| unsafe_diff("a version is no longer known upstream"))?;

        // A three-dot comparison diffs from the merge base, which is only
        // the stored version when history moved forward.
        if let Some(status @ ("diverged" | "behind")) = comparison.status.as_deref() {
            return Err(unsafe_diff(&format!("history is {status}")));
        }
        if comparison.files.len() >= COMPARE_FILE_LIMIT {
            return Err(unsafe_diff("file list may be truncated"));
        }

        Ok(comparison
            .files
            .into_iter()
            .map(|f| ChangedFile {
                path: f.filename,
                status: FileStatus::parse(&f.status),
                previous_path: f.previous_filename,
            })
            .collect())
    }
}
