//! Sync orchestrator.
//!
//! One call to [`SyncEngine::run`] decides between the available strategies
//! and leaves the local store consistent:
//!
//! ```text
//! resolve upstream versions ──(failed)──► offline render from local data
//!          │
//!          ▼
//! local meta matches? ──(yes)──► skip: re-render pages only
//!          │
//!          ▼
//! usable local dataset? ──(yes)──► incremental ──(no relevant change)──► rewrite meta
//!          │                           │
//!          │                      (failed, not strict)
//!          ▼                           ▼
//!        full generation ◄─────────────┘
//!          │
//!          ▼
//! persist dataset + meta, render pages
//! ```
//!
//! Strict mode (unattended runs) turns every tolerated failure into an error:
//! the offline fallback, a failed incremental attempt, per-document image
//! failures, and page-rendering failures on the paths that do not persist.

use crate::config::{ConfigError, RepoLayout, SyncConfig};
use crate::full::full_generation;
use crate::merge::{FetchCache, FetchContext, incremental_update};
use crate::pages::{PageError, PageReport, PageWriter};
use crate::render::{MarkdownRenderer, Renderer, fill_missing_html};
use crate::source::{ContentSource, SourceError};
use crate::store::{LocalStore, StoreError};
use crate::types::{Document, GenerationMeta, SCHEMA_VERSION, SourceInfo, Versions};
use chrono::Utc;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Upstream error: {0}")]
    Source(#[from] SourceError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Page error: {0}")]
    Pages(#[from] PageError),
    #[error("cannot resolve upstream versions and no local dataset to fall back on: {0}")]
    Unavailable(#[source] SourceError),
    #[error("no usable local dataset at {}", .0.display())]
    NoLocalData(PathBuf),
    #[error("strict mode: {0}")]
    Strict(String),
}

/// How a sync run ended. Every variant carries the dataset size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Upstream unreachable; pages rendered from local data, nothing written.
    Offline { documents: usize },
    /// Local data already current; pages re-rendered, nothing written.
    Skipped { documents: usize },
    /// Upstream moved without touching anything tracked; meta rewritten.
    Unchanged { documents: usize },
    /// Changes merged into the existing dataset.
    Incremental {
        documents: usize,
        changed: usize,
        image_owners: usize,
    },
    /// Dataset rebuilt from scratch.
    Full { documents: usize },
}

impl SyncOutcome {
    pub fn documents(&self) -> usize {
        match *self {
            SyncOutcome::Offline { documents }
            | SyncOutcome::Skipped { documents }
            | SyncOutcome::Unchanged { documents }
            | SyncOutcome::Incremental { documents, .. }
            | SyncOutcome::Full { documents } => documents,
        }
    }

    /// Whether the dataset and meta files were (re)written.
    pub fn persisted(&self) -> bool {
        !matches!(self, SyncOutcome::Offline { .. } | SyncOutcome::Skipped { .. })
    }
}

pub struct SyncEngine<'a> {
    config: &'a SyncConfig,
    layout: RepoLayout,
    source: &'a dyn ContentSource,
    store: &'a LocalStore,
    pages: &'a dyn PageWriter,
    renderer: &'a dyn Renderer,
    strict: bool,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        config: &'a SyncConfig,
        source: &'a dyn ContentSource,
        store: &'a LocalStore,
        pages: &'a dyn PageWriter,
    ) -> Self {
        Self {
            config,
            layout: config.layout(),
            source,
            store,
            pages,
            renderer: &MarkdownRenderer,
            strict: false,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn renderer(mut self, renderer: &'a dyn Renderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Run one sync cycle.
    pub async fn run(&self) -> Result<SyncOutcome, SyncError> {
        let head = match self.resolve_versions().await {
            Ok(head) => head,
            Err(e) => return self.offline_fallback(e),
        };
        info!(
            target: "recipe_sync",
            documents = head.documents.as_deref().unwrap_or("-"),
            images = head.images.as_deref().unwrap_or("-"),
            "resolved upstream versions"
        );

        let meta = self.store.read_meta();
        let local = if self.store.dataset_exists() {
            self.store.read_documents()
        } else {
            None
        };

        if let (Some(meta), Some(documents)) = (&meta, &local)
            && self.is_up_to_date(meta, &head)
        {
            info!(target: "recipe_sync", "up to date, skipping generation");
            let count = documents.len();
            self.render_tolerant(documents.clone())?;
            return Ok(SyncOutcome::Skipped { documents: count });
        }

        let cache = FetchCache::new();
        let ctx = FetchContext {
            source: self.source,
            renderer: self.renderer,
            cache: &cache,
            strict: self.strict,
        };

        if let (Some(meta), Some(documents)) = (meta, local)
            && let Some(outcome) = self.try_incremental(&meta, documents, &head, &ctx).await?
        {
            return Ok(outcome);
        }

        info!(target: "recipe_sync", "running full generation");
        let documents = full_generation(&ctx).await?;
        let count = documents.len();
        self.persist(&documents, &head)?;
        info!(
            target: "recipe_sync",
            count,
            dataset = %self.store.dataset_path().display(),
            "full generation complete"
        );
        Ok(SyncOutcome::Full { documents: count })
    }

    /// Current version of both subtrees. A subtree without history of its
    /// own takes the branch head.
    async fn resolve_versions(&self) -> Result<Versions, SourceError> {
        let (documents, images) = tokio::try_join!(
            self.source
                .latest_version_for_path(&self.layout.documents_dir),
            self.source.latest_version_for_path(&self.layout.images_dir),
        )?;
        let versions = if documents.is_none() || images.is_none() {
            debug!(target: "recipe_sync", "subtree without history, using branch head");
            let head = self.source.branch_head().await?;
            Versions {
                documents: documents.or_else(|| head.clone()),
                images: images.or(head),
            }
        } else {
            Versions { documents, images }
        };
        if versions.both().is_none() {
            return Err(SourceError::Unexpected(format!(
                "branch '{}' has no commits",
                self.config.source.branch
            )));
        }
        Ok(versions)
    }

    fn offline_fallback(&self, error: SourceError) -> Result<SyncOutcome, SyncError> {
        if self.strict {
            return Err(SyncError::Strict(format!(
                "unable to resolve upstream versions: {error}"
            )));
        }
        let local = self
            .store
            .dataset_exists()
            .then(|| self.store.read_documents())
            .flatten()
            .filter(|docs| !docs.is_empty());
        let Some(documents) = local else {
            return Err(SyncError::Unavailable(error));
        };
        warn!(
            target: "recipe_sync",
            error = %error,
            "unable to resolve upstream versions, rendering from local data"
        );
        let count = documents.len();
        self.render_tolerant(documents)?;
        Ok(SyncOutcome::Offline { documents: count })
    }

    fn is_up_to_date(&self, meta: &GenerationMeta, head: &Versions) -> bool {
        meta.schema_version == SCHEMA_VERSION
            && self.same_repository(meta)
            && Versions::from(&meta.source) == *head
    }

    fn same_repository(&self, meta: &GenerationMeta) -> bool {
        let source = &self.config.source;
        meta.source.owner == source.owner
            && meta.source.repo == source.repo
            && meta.source.branch == source.branch
    }

    /// `Ok(None)` means "fall through to full generation".
    async fn try_incremental(
        &self,
        meta: &GenerationMeta,
        documents: Vec<Document>,
        head: &Versions,
        ctx: &FetchContext<'_>,
    ) -> Result<Option<SyncOutcome>, SyncError> {
        if meta.schema_version != SCHEMA_VERSION {
            info!(
                target: "recipe_sync",
                stored = meta.schema_version,
                current = SCHEMA_VERSION,
                "schema changed, incremental update not possible"
            );
            return Ok(None);
        }
        if !self.same_repository(meta) {
            info!(target: "recipe_sync", "tracked repository or branch changed");
            return Ok(None);
        }
        if documents.is_empty() {
            debug!(target: "recipe_sync", "local dataset is empty");
            return Ok(None);
        }
        let base = Versions::from(&meta.source);
        if base.both().is_none() {
            info!(target: "recipe_sync", "no stored version identifiers to diff against");
            return Ok(None);
        }

        info!(target: "recipe_sync", "attempting incremental update");
        match incremental_update(documents.clone(), &self.layout, &base, head, ctx).await {
            Ok(Some(merged)) => {
                self.persist(&merged.documents, head)?;
                info!(
                    target: "recipe_sync",
                    count = merged.documents.len(),
                    changed = merged.changed,
                    image_owners = merged.image_owners,
                    "incremental update complete"
                );
                Ok(Some(SyncOutcome::Incremental {
                    documents: merged.documents.len(),
                    changed: merged.changed,
                    image_owners: merged.image_owners,
                }))
            }
            Ok(None) => {
                info!(target: "recipe_sync", "no relevant changes, updating meta only");
                let mut documents = documents;
                fill_missing_html(self.renderer, &mut documents);
                self.persist(&documents, head)?;
                Ok(Some(SyncOutcome::Unchanged {
                    documents: documents.len(),
                }))
            }
            Err(e) if self.strict => Err(SyncError::Strict(format!(
                "incremental update failed: {e}"
            ))),
            Err(e) => {
                warn!(
                    target: "recipe_sync",
                    error = %e,
                    "incremental update failed, falling back to full generation"
                );
                Ok(None)
            }
        }
    }

    /// Write the dataset and meta pair, then the pages. Both are fatal.
    fn persist(&self, documents: &[Document], head: &Versions) -> Result<(), SyncError> {
        let source = &self.config.source;
        let meta = GenerationMeta {
            schema_version: SCHEMA_VERSION,
            source: SourceInfo {
                owner: source.owner.clone(),
                repo: source.repo.clone(),
                branch: source.branch.clone(),
                documents_version: head.documents.clone(),
                images_version: head.images.clone(),
            },
            generated_at: Utc::now(),
            count: documents.len(),
        };
        self.store.write_pair(documents, &meta)?;
        self.pages.write_site(documents)?;
        Ok(())
    }

    /// Render pages from local data. Failure is a warning unless strict.
    fn render_tolerant(&self, mut documents: Vec<Document>) -> Result<(), SyncError> {
        fill_missing_html(self.renderer, &mut documents);
        match self.pages.write_site(&documents) {
            Ok(report) => {
                debug!(target: "recipe_sync", written = report.written, "pages rendered from local data");
                Ok(())
            }
            Err(e) if self.strict => Err(SyncError::Strict(format!(
                "writing static pages from local data failed: {e}"
            ))),
            Err(e) => {
                warn!(target: "recipe_sync", error = %e, "writing static pages from local data failed");
                Ok(())
            }
        }
    }
}

/// Render pages from the local dataset without contacting upstream.
pub fn render_local(
    store: &LocalStore,
    renderer: &dyn Renderer,
    pages: &dyn PageWriter,
) -> Result<(usize, PageReport), SyncError> {
    let mut documents = store
        .read_documents()
        .ok_or_else(|| SyncError::NoLocalData(store.dataset_path().to_path_buf()))?;
    fill_missing_html(renderer, &mut documents);
    let report = pages.write_site(&documents)?;
    Ok((documents.len(), report))
}
