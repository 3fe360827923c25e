//! CLI output formatting.
//!
//! Diagnostics go through `tracing`; this module prints the human summary a
//! user reads at the end of a command. Each command has a `format_*` function
//! (returns `Vec<String>`) for testability and a `print_*` wrapper that writes
//! to stdout. Format functions are pure: no I/O, no side effects.
//!
//! # Output Format
//!
//! ## Sync
//!
//! ```text
//! Incremental update (2 changed, 1 image set)
//!     Documents: 14
//!     Dataset: src/generated/recipes.json
//! ```
//!
//! ## Status
//!
//! ```text
//! Local state
//!     Source: akofink/recipes-md@main
//!     Schema: 3 (current)
//!     Recipes: 1a2b3c4
//!     Images: 5d6e7f8
//!     Generated: 2026-10-19T08:00:00Z
//!     Documents: 14
//! ```

use crate::pages::PageReport;
use crate::sync::SyncOutcome;
use crate::types::{GenerationMeta, SCHEMA_VERSION};
use chrono::SecondsFormat;
use std::path::Path;

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `1 page`, `2 pages`
fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

/// Abbreviate a commit hash the way git does; other identifiers pass through.
fn short_version(version: Option<&str>) -> &str {
    match version {
        Some(v) if v.len() > 7 && v.chars().all(|c| c.is_ascii_hexdigit()) => &v[..7],
        Some(v) => v,
        None => "(none)",
    }
}

// ============================================================================
// Sync
// ============================================================================

pub fn format_sync_outcome(outcome: &SyncOutcome, dataset: &Path) -> Vec<String> {
    let header = match outcome {
        SyncOutcome::Offline { .. } => "Offline: rendered pages from local data".to_string(),
        SyncOutcome::Skipped { .. } => "Up to date: rendered pages only".to_string(),
        SyncOutcome::Unchanged { .. } => {
            "No relevant changes: updated version record".to_string()
        }
        SyncOutcome::Incremental {
            changed,
            image_owners,
            ..
        } => format!(
            "Incremental update ({} changed, {})",
            changed,
            plural(*image_owners, "image set")
        ),
        SyncOutcome::Full { .. } => "Full generation".to_string(),
    };

    let mut lines = vec![header];
    lines.push(format!("{}Documents: {}", indent(1), outcome.documents()));
    if outcome.persisted() {
        lines.push(format!("{}Dataset: {}", indent(1), dataset.display()));
    }
    lines
}

pub fn print_sync_outcome(outcome: &SyncOutcome, dataset: &Path) {
    for line in format_sync_outcome(outcome, dataset) {
        println!("{line}");
    }
}

// ============================================================================
// Status
// ============================================================================

/// `documents` is the size of the readable dataset, `None` if it is missing
/// or invalid.
pub fn format_status(
    meta: Option<&GenerationMeta>,
    documents: Option<usize>,
    dataset: &Path,
) -> Vec<String> {
    let Some(meta) = meta else {
        return vec![
            "No local state".to_string(),
            format!("{}Dataset: {}", indent(1), dataset.display()),
        ];
    };

    let schema_note = if meta.schema_version == SCHEMA_VERSION {
        "current".to_string()
    } else {
        format!("stale, current is {SCHEMA_VERSION}")
    };
    let source = &meta.source;
    let documents = match documents {
        Some(n) => n.to_string(),
        None => "unreadable".to_string(),
    };

    vec![
        "Local state".to_string(),
        format!(
            "{}Source: {}/{}@{}",
            indent(1),
            source.owner,
            source.repo,
            source.branch
        ),
        format!("{}Schema: {} ({})", indent(1), meta.schema_version, schema_note),
        format!(
            "{}Recipes: {}",
            indent(1),
            short_version(source.documents_version.as_deref())
        ),
        format!(
            "{}Images: {}",
            indent(1),
            short_version(source.images_version.as_deref())
        ),
        format!(
            "{}Generated: {}",
            indent(1),
            meta.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ),
        format!("{}Documents: {}", indent(1), documents),
    ]
}

pub fn print_status(meta: Option<&GenerationMeta>, documents: Option<usize>, dataset: &Path) {
    for line in format_status(meta, documents, dataset) {
        println!("{line}");
    }
}

// ============================================================================
// Render
// ============================================================================

pub fn format_render_output(documents: usize, report: &PageReport, root: &Path) -> Vec<String> {
    let mut header = format!(
        "Rendered {} for {}",
        plural(report.written, "page"),
        plural(documents, "document")
    );
    if report.pruned > 0 {
        header.push_str(&format!(", removed {}", plural(report.pruned, "stale page")));
    }
    vec![header, format!("{}Output: {}", indent(1), root.display())]
}

pub fn print_render_output(documents: usize, report: &PageReport, root: &Path) {
    for line in format_render_output(documents, report, root) {
        println!("{line}");
    }
}
