//! Shared types: the persisted dataset entries, the generation record, and the
//! transient changeset produced by the diff engine.
//!
//! The persisted field names (`imageName`, `imageNames`, `markdown`, `html`,
//! `recipesSha`, `imagesSha`) are what the site consumes, so the JSON keeps
//! them even where the Rust names differ.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Current shape of [`Document`] and [`GenerationMeta`]. Bump whenever either
/// changes; a stored dataset with a different version is never merged
/// incrementally.
pub const SCHEMA_VERSION: u32 = 3;

/// One content entry (a recipe) in the dataset.
///
/// `filename` is the unique key. `name` is the filename without its extension,
/// `images` is sorted ascending and `image_primary` is always `images[0]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub name: String,
    pub filename: String,
    #[serde(rename = "imageName")]
    pub image_primary: Option<String>,
    #[serde(rename = "imageNames")]
    pub images: Vec<String>,
    #[serde(rename = "markdown", default, skip_serializing_if = "Option::is_none")]
    pub body_text: Option<String>,
    #[serde(rename = "html", default, skip_serializing_if = "Option::is_none")]
    pub rendered_html: Option<String>,
}

impl Document {
    /// Build a document whose derived fields satisfy the invariants.
    pub fn new(filename: &str, mut images: Vec<String>, body_text: Option<String>) -> Self {
        images.sort();
        Self {
            name: strip_extension(filename).to_string(),
            filename: filename.to_string(),
            image_primary: images.first().cloned(),
            images,
            body_text,
            rendered_html: None,
        }
    }

    /// Replace the image listing, keeping it sorted and the primary in step.
    pub fn set_images(&mut self, mut images: Vec<String>) {
        images.sort();
        self.image_primary = images.first().cloned();
        self.images = images;
    }

    /// Check the invariants of a document read from disk.
    pub fn validate(&self) -> Result<(), String> {
        if self.filename.is_empty() {
            return Err("empty filename".into());
        }
        if self.name != strip_extension(&self.filename) {
            return Err(format!(
                "name '{}' does not match filename '{}'",
                self.name, self.filename
            ));
        }
        if !self.images.is_sorted() {
            return Err(format!("images of '{}' are not sorted", self.filename));
        }
        if self.image_primary.as_ref() != self.images.first() {
            return Err(format!(
                "primary image of '{}' is not the first image",
                self.filename
            ));
        }
        Ok(())
    }
}

/// Strip the final extension from a filename (`pasta.md` → `pasta`).
pub fn strip_extension(filename: &str) -> &str {
    match filename.rfind('.') {
        Some(0) | None => filename,
        Some(dot) => &filename[..dot],
    }
}

/// Where a generation came from: repository, branch, and the two independently
/// tracked subtree versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    #[serde(rename = "recipesSha")]
    pub documents_version: Option<String>,
    #[serde(rename = "imagesSha")]
    pub images_version: Option<String>,
}

/// Versioning record written next to the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMeta {
    pub schema_version: u32,
    pub source: SourceInfo,
    pub generated_at: DateTime<Utc>,
    pub count: usize,
}

/// Version identifiers of both tracked subtrees at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Versions {
    pub documents: Option<String>,
    pub images: Option<String>,
}

impl Versions {
    pub fn new(documents: impl Into<String>, images: impl Into<String>) -> Self {
        Self {
            documents: Some(documents.into()),
            images: Some(images.into()),
        }
    }

    /// Both identifiers, if both are known.
    pub fn both(&self) -> Option<(&str, &str)> {
        Some((self.documents.as_deref()?, self.images.as_deref()?))
    }
}

impl From<&SourceInfo> for Versions {
    fn from(source: &SourceInfo) -> Self {
        Self {
            documents: source.documents_version.clone(),
            images: source.images_version.clone(),
        }
    }
}

/// How a file changed between two versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Modified,
    Removed,
    Renamed,
}

/// A changed document, paths relative to the documents subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEntry {
    pub filename: String,
    pub status: ChangeStatus,
    /// Only set for renames.
    pub previous_filename: Option<String>,
}

impl ChangeEntry {
    pub fn name(&self) -> &str {
        strip_extension(&self.filename)
    }
}

/// Normalized result of comparing both subtrees between two version pairs.
///
/// Document entries are keyed by filename: if the same file shows up twice in
/// a comparison the later record wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub documents: BTreeMap<String, ChangeEntry>,
    /// Documents whose image directory changed in any way.
    pub image_owners: BTreeSet<String>,
}

impl ChangeSet {
    pub fn insert(&mut self, entry: ChangeEntry) {
        self.documents.insert(entry.filename.clone(), entry);
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.image_owners.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.documents.values()
    }
}
