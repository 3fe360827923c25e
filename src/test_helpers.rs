//! Shared test fakes.
//!
//! - [`ScriptedFetch`]: replays a queue of canned HTTP responses in order
//! - [`RouteFetch`]: answers by exact URL, 404 for everything else
//! - [`FakeSource`]: an in-memory [`ContentSource`] that records every call
//! - [`RecordingPages`]: a [`PageWriter`] that records what it was asked to write
//!
//! All of them use `Mutex` rather than `RefCell` so they are `Sync`, as the
//! async traits require.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::pages::{PageError, PageReport, PageWriter};
use crate::source::{
    ChangedFile, ContentSource, DocumentRef, FileStatus, HttpFetch, HttpResponse, SourceError,
};
use crate::types::{Document, strip_extension};

/// Build a response with the given status code and body.
pub fn response(status: u16, body: &str) -> HttpResponse {
    HttpResponse::new(StatusCode::from_u16(status).unwrap(), body)
}

// =========================================================================
// HTTP fakes
// =========================================================================

#[derive(Default)]
pub struct ScriptedFetch {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedFetch {
    pub fn new(responses: Vec<HttpResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpFetch for ScriptedFetch {
    async fn get(&self, url: &str) -> Result<HttpResponse, SourceError> {
        self.requests.lock().unwrap().push(url.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| SourceError::Network {
                url: url.to_string(),
                message: "connection refused".to_string(),
            })
    }
}

#[derive(Default)]
pub struct RouteFetch {
    routes: HashMap<String, HttpResponse>,
}

impl RouteFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, url: &str, response: HttpResponse) -> Self {
        self.routes.insert(url.to_string(), response);
        self
    }
}

#[async_trait]
impl HttpFetch for RouteFetch {
    async fn get(&self, url: &str) -> Result<HttpResponse, SourceError> {
        Ok(self
            .routes
            .get(url)
            .cloned()
            .unwrap_or_else(|| response(404, r#"{"message":"Not Found"}"#)))
    }
}

// =========================================================================
// Content source fake
// =========================================================================

/// A recorded [`ContentSource`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListDocuments,
    ListImages(String),
    FetchBody(String),
    LatestVersion(String),
    BranchHead,
    Compare(String, String),
}

/// In-memory upstream. Comparisons that were not registered fail as
/// diff-unsafe, so a test never silently diffs against nothing.
#[derive(Default)]
pub struct FakeSource {
    bodies: Mutex<BTreeMap<String, String>>,
    images: Mutex<BTreeMap<String, Vec<String>>>,
    failing_images: Mutex<BTreeSet<String>>,
    versions: Mutex<HashMap<String, String>>,
    head: Mutex<Option<String>>,
    comparisons: Mutex<HashMap<(String, String), Vec<ChangedFile>>>,
    offline: Mutex<bool>,
    rate_limited_compare: Mutex<bool>,
    rate_limited_listing: Mutex<bool>,
    calls: Mutex<Vec<Call>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, filename: &str, body: &str) -> Self {
        self.set_document(filename, body);
        self
    }

    pub fn with_images(self, name: &str, images: &[&str]) -> Self {
        self.set_images(name, images);
        self
    }

    pub fn with_versions(self, documents: &str, images: &str) -> Self {
        self.set_versions(documents, images);
        self
    }

    pub fn with_head(self, head: &str) -> Self {
        *self.head.lock().unwrap() = Some(head.to_string());
        self
    }

    pub fn with_comparison(self, base: &str, head: &str, files: Vec<ChangedFile>) -> Self {
        self.set_comparison(base, head, files);
        self
    }

    pub fn with_failing_images(self, name: &str) -> Self {
        self.failing_images.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn set_document(&self, filename: &str, body: &str) {
        self.bodies
            .lock()
            .unwrap()
            .insert(filename.to_string(), body.to_string());
    }

    pub fn remove_document(&self, filename: &str) {
        self.bodies.lock().unwrap().remove(filename);
    }

    pub fn set_images(&self, name: &str, images: &[&str]) {
        self.images.lock().unwrap().insert(
            name.to_string(),
            images.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn set_versions(&self, documents: &str, images: &str) {
        let mut versions = self.versions.lock().unwrap();
        versions.insert("recipes".to_string(), documents.to_string());
        versions.insert("images".to_string(), images.to_string());
    }

    pub fn set_comparison(&self, base: &str, head: &str, files: Vec<ChangedFile>) {
        self.comparisons
            .lock()
            .unwrap()
            .insert((base.to_string(), head.to_string()), files);
    }

    /// Make comparisons fail with a rate-limit error.
    pub fn set_rate_limited_compare(&self, limited: bool) {
        *self.rate_limited_compare.lock().unwrap() = limited;
    }

    /// Make document enumeration fail with a rate-limit error.
    pub fn set_rate_limited_listing(&self, limited: bool) {
        *self.rate_limited_listing.lock().unwrap() = limited;
    }

    /// Make every call fail as if the network were down.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
    }

    fn record(&self, call: Call) -> Result<(), SourceError> {
        self.calls.lock().unwrap().push(call);
        if *self.offline.lock().unwrap() {
            return Err(SourceError::Network {
                url: "fake://".to_string(),
                message: "offline".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    async fn list_documents(&self) -> Result<Vec<DocumentRef>, SourceError> {
        self.record(Call::ListDocuments)?;
        if *self.rate_limited_listing.lock().unwrap() {
            return Err(rate_limited());
        }
        Ok(self
            .bodies
            .lock()
            .unwrap()
            .keys()
            .map(|filename| DocumentRef {
                name: strip_extension(filename).to_string(),
                filename: filename.clone(),
            })
            .collect())
    }

    async fn list_images_for(&self, name: &str) -> Result<Vec<String>, SourceError> {
        self.record(Call::ListImages(name.to_string()))?;
        if self.failing_images.lock().unwrap().contains(name) {
            return Err(SourceError::Status {
                url: format!("fake://images/{name}"),
                status: 500,
                body: "boom".to_string(),
            });
        }
        let mut images = self
            .images
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default();
        images.sort();
        Ok(images)
    }

    async fn fetch_body(&self, filename: &str) -> Result<String, SourceError> {
        self.record(Call::FetchBody(filename.to_string()))?;
        self.bodies
            .lock()
            .unwrap()
            .get(filename)
            .cloned()
            .ok_or_else(|| SourceError::Status {
                url: format!("fake://recipes/{filename}"),
                status: 404,
                body: String::new(),
            })
    }

    async fn latest_version_for_path(&self, path: &str) -> Result<Option<String>, SourceError> {
        self.record(Call::LatestVersion(path.to_string()))?;
        Ok(self.versions.lock().unwrap().get(path).cloned())
    }

    async fn branch_head(&self) -> Result<Option<String>, SourceError> {
        self.record(Call::BranchHead)?;
        Ok(self.head.lock().unwrap().clone())
    }

    async fn compare_versions(
        &self,
        base: &str,
        head: &str,
    ) -> Result<Vec<ChangedFile>, SourceError> {
        self.record(Call::Compare(base.to_string(), head.to_string()))?;
        if *self.rate_limited_compare.lock().unwrap() {
            return Err(rate_limited());
        }
        self.comparisons
            .lock()
            .unwrap()
            .get(&(base.to_string(), head.to_string()))
            .cloned()
            .ok_or_else(|| SourceError::DiffUnsafe {
                base: base.to_string(),
                head: head.to_string(),
                reason: "no comparison registered".to_string(),
            })
    }
}

fn rate_limited() -> SourceError {
    SourceError::RateLimitExceeded {
        wait: Duration::from_secs(300),
        ceiling: Duration::from_secs(120),
    }
}

/// A comparison file record.
pub fn changed(path: &str, status: FileStatus) -> ChangedFile {
    ChangedFile {
        path: path.to_string(),
        status,
        previous_path: None,
    }
}

/// A rename comparison record.
pub fn renamed(path: &str, previous: &str) -> ChangedFile {
    ChangedFile {
        path: path.to_string(),
        status: FileStatus::Renamed,
        previous_path: Some(previous.to_string()),
    }
}

// =========================================================================
// Page writer fake
// =========================================================================

#[derive(Default)]
pub struct RecordingPages {
    /// Document names of every `write_site` call, in order.
    runs: Mutex<Vec<Vec<String>>>,
    /// HTML seen per document in the latest run.
    last_html: Mutex<Vec<Option<String>>>,
    fail: Mutex<bool>,
}

impl RecordingPages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let pages = Self::default();
        *pages.fail.lock().unwrap() = true;
        pages
    }

    pub fn runs(&self) -> Vec<Vec<String>> {
        self.runs.lock().unwrap().clone()
    }

    pub fn last_html(&self) -> Vec<Option<String>> {
        self.last_html.lock().unwrap().clone()
    }
}

impl PageWriter for RecordingPages {
    fn write_site(&self, documents: &[Document]) -> Result<PageReport, PageError> {
        self.runs
            .lock()
            .unwrap()
            .push(documents.iter().map(|d| d.name.clone()).collect());
        *self.last_html.lock().unwrap() = documents.iter().map(|d| d.rendered_html.clone()).collect();
        if *self.fail.lock().unwrap() {
            return Err(PageError::Io {
                path: "static".into(),
                source: std::io::Error::other("disk full"),
            });
        }
        Ok(PageReport {
            written: documents.len() + 1,
            pruned: 0,
        })
    }
}
