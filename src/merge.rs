//! Incremental merger.
//!
//! Applies a [`ChangeSet`] to the stored dataset, fetching only what the
//! changeset implicates:
//!
//! 1. Copy the existing documents into a working map keyed by filename.
//! 2. Removed entries are dropped; renamed entries drop their previous key.
//!    Added, modified and renamed entries get a fresh body and image listing.
//! 3. Every image owner, plus every changed document, gets its image listing
//!    refreshed if it still exists.
//! 4. The map is emitted sorted by name, with HTML rendered where missing.
//!
//! A failed body fetch aborts the merge (the caller falls back to a full
//! generation). A failed image listing only affects its own document.

use crate::config::RepoLayout;
use crate::diff::diff_changes;
use crate::render::{Renderer, fill_missing_html};
use crate::source::{ContentSource, SourceError};
use crate::types::{ChangeSet, ChangeStatus, Document, Versions};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Per-run memo of upstream reads.
///
/// Created by the orchestrator for one sync invocation and dropped with it, so
/// an incremental attempt and the full generation that may follow it never
/// fetch the same listing or body twice. Failures are not cached.
#[derive(Debug, Default)]
pub struct FetchCache {
    images: Mutex<HashMap<String, Vec<String>>>,
    bodies: Mutex<HashMap<String, String>>,
}

impl FetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn images_for(
        &self,
        source: &dyn ContentSource,
        name: &str,
    ) -> Result<Vec<String>, SourceError> {
        if let Some(hit) = cached(&self.images, name) {
            return Ok(hit);
        }
        let images = source.list_images_for(name).await?;
        store(&self.images, name, images.clone());
        Ok(images)
    }

    pub async fn body(
        &self,
        source: &dyn ContentSource,
        filename: &str,
    ) -> Result<String, SourceError> {
        if let Some(hit) = cached(&self.bodies, filename) {
            return Ok(hit);
        }
        let body = source.fetch_body(filename).await?;
        store(&self.bodies, filename, body.clone());
        Ok(body)
    }
}

fn cached<T: Clone>(map: &Mutex<HashMap<String, T>>, key: &str) -> Option<T> {
    map.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(key)
        .cloned()
}

fn store<T>(map: &Mutex<HashMap<String, T>>, key: &str, value: T) {
    map.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key.to_string(), value);
}

/// Collaborators shared by the merger and the full generator.
pub struct FetchContext<'a> {
    pub source: &'a dyn ContentSource,
    pub renderer: &'a dyn Renderer,
    pub cache: &'a FetchCache,
    /// Image-listing failures abort instead of degrading.
    pub strict: bool,
}

impl FetchContext<'_> {
    /// List a document's images, tolerating failure outside strict mode.
    ///
    /// `Ok(None)` means the listing failed and was absorbed; the caller picks
    /// the fallback. Rate-limit failures are never absorbed.
    pub async fn images_tolerant(&self, name: &str) -> Result<Option<Vec<String>>, SourceError> {
        match self.cache.images_for(self.source, name).await {
            Ok(images) => Ok(Some(images)),
            Err(e) if self.strict || e.is_rate_limit() => Err(e),
            Err(e) => {
                warn!(target: "recipe_sync", document = name, error = %e, "failed to list images");
                Ok(None)
            }
        }
    }
}

/// Result of a successful incremental merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged {
    pub documents: Vec<Document>,
    /// Change entries applied.
    pub changed: usize,
    /// Documents whose image directory changed.
    pub image_owners: usize,
}

/// Diff `base` against `head` and merge the result into `existing`.
///
/// `Ok(None)` means nothing the dataset tracks changed. That is different from
/// a merge that legitimately removed everything.
pub async fn incremental_update(
    existing: Vec<Document>,
    layout: &RepoLayout,
    base: &Versions,
    head: &Versions,
    ctx: &FetchContext<'_>,
) -> Result<Option<Merged>, SourceError> {
    let Some(changes) = diff_changes(ctx.source, layout, base, head).await? else {
        return Ok(None);
    };
    info!(
        target: "recipe_sync",
        documents = changes.documents.len(),
        image_owners = changes.image_owners.len(),
        "applying changeset"
    );
    let documents = apply_changeset(existing, layout, &changes, ctx).await?;
    Ok(Some(Merged {
        documents,
        changed: changes.documents.len(),
        image_owners: changes.image_owners.len(),
    }))
}

/// Apply a changeset to the existing documents.
pub async fn apply_changeset(
    existing: Vec<Document>,
    layout: &RepoLayout,
    changes: &ChangeSet,
    ctx: &FetchContext<'_>,
) -> Result<Vec<Document>, SourceError> {
    let mut map: BTreeMap<String, Document> = existing
        .into_iter()
        .map(|doc| (doc.filename.clone(), doc))
        .collect();

    for entry in changes.entries() {
        match entry.status {
            ChangeStatus::Removed => {
                debug!(target: "recipe_sync", filename = %entry.filename, "removing");
                map.remove(&entry.filename);
                continue;
            }
            ChangeStatus::Renamed => {
                if let Some(previous) = &entry.previous_filename {
                    debug!(target: "recipe_sync", from = %previous, to = %entry.filename, "renaming");
                    map.remove(previous);
                }
            }
            ChangeStatus::Added | ChangeStatus::Modified => {}
        }

        let body = ctx.cache.body(ctx.source, &entry.filename).await?;
        let images = ctx
            .images_tolerant(entry.name())
            .await?
            .unwrap_or_default();
        map.insert(
            entry.filename.clone(),
            Document::new(&entry.filename, images, Some(body)),
        );
    }

    let to_refresh: BTreeSet<&str> = changes
        .image_owners
        .iter()
        .map(String::as_str)
        .chain(changes.entries().map(|e| e.name()))
        .collect();
    for name in to_refresh {
        let Some(doc) = map.get_mut(&layout.filename_for(name)) else {
            continue;
        };
        if let Some(images) = ctx.images_tolerant(name).await? {
            doc.set_images(images);
        }
    }

    let mut documents: Vec<Document> = map.into_values().collect();
    sort_by_name(&mut documents);
    fill_missing_html(ctx.renderer, &mut documents);
    Ok(documents)
}

/// Ordinal sort by name, filename as tie-break.
pub fn sort_by_name(documents: &mut [Document]) {
    documents.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.filename.cmp(&b.filename)));
}
