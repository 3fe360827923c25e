//! Local state: the dataset file and its generation record.
//!
//! The two files are one unit. [`LocalStore::write_pair`] is the only writer
//! and always writes both; reads treat anything unreadable, malformed or
//! violating the document invariants as "no usable local state", which the
//! orchestrator answers with a full generation.
//!
//! ## Storage
//!
//! ```text
//! <output.dir>/
//! ├── recipes.json    # [Document], sorted by name, 2-space indented
//! ├── meta.json       # GenerationMeta
//! └── static/         # rendered pages (see pages.rs)
//! ```
//!
//! Writes go to a temporary sibling and are renamed into place, so a crash
//! never leaves a truncated file behind. There is no locking: at most one
//! sync may run against a given directory at a time.

use crate::config::OutputConfig;
use crate::types::{Document, GenerationMeta};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
    dataset_path: PathBuf,
    meta_path: PathBuf,
    static_dir: PathBuf,
}

impl LocalStore {
    pub fn new(config: &OutputConfig) -> Self {
        let dir = config.dir.clone();
        Self {
            dataset_path: dir.join(&config.dataset_file),
            meta_path: dir.join(&config.meta_file),
            static_dir: dir.join(&config.static_dir),
            dir,
        }
    }

    pub fn dataset_path(&self) -> &Path {
        &self.dataset_path
    }

    pub fn meta_path(&self) -> &Path {
        &self.meta_path
    }

    /// Where the page writer puts the rendered site.
    pub fn static_dir(&self) -> &Path {
        &self.static_dir
    }

    pub fn dataset_exists(&self) -> bool {
        self.dataset_path.is_file()
    }

    /// The stored generation record, or `None` if absent or unreadable.
    pub fn read_meta(&self) -> Option<GenerationMeta> {
        read_json(&self.meta_path)
    }

    /// The stored dataset, or `None` if absent, unreadable, or if any entry
    /// breaks the document invariants.
    pub fn read_documents(&self) -> Option<Vec<Document>> {
        let documents: Vec<Document> = read_json(&self.dataset_path)?;
        let mut seen = HashSet::new();
        for doc in &documents {
            let problem = match doc.validate() {
                Err(problem) => Some(problem),
                Ok(()) if !seen.insert(doc.filename.as_str()) => {
                    Some(format!("duplicate filename '{}'", doc.filename))
                }
                Ok(()) => None,
            };
            if let Some(problem) = problem {
                warn!(
                    target: "recipe_sync",
                    path = %self.dataset_path.display(),
                    problem = %problem,
                    "ignoring invalid local dataset"
                );
                return None;
            }
        }
        Some(documents)
    }

    /// Write the dataset and its generation record together.
    pub fn write_pair(
        &self,
        documents: &[Document],
        meta: &GenerationMeta,
    ) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let dataset_tmp = stage(&self.dataset_path, documents)?;
        let meta_tmp = stage(&self.meta_path, meta)?;
        commit(&dataset_tmp, &self.dataset_path)?;
        commit(&meta_tmp, &self.meta_path)?;
        Ok(())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(target: "recipe_sync", path = %path.display(), error = %e, "cannot read local state");
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(target: "recipe_sync", path = %path.display(), error = %e, "ignoring malformed local state");
            None
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize to the temporary sibling of `path`.
fn stage<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<PathBuf, StoreError> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = temp_path(path);
    fs::write(&tmp, json).map_err(|source| StoreError::Io {
        path: tmp.clone(),
        source,
    })?;
    Ok(tmp)
}

fn commit(tmp: &Path, path: &Path) -> Result<(), StoreError> {
    fs::rename(tmp, path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}
