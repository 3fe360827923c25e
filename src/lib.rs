//! # Recipe Sync
//!
//! Keeps a local snapshot of a recipe corpus in step with the GitHub
//! repository it lives in. The snapshot is two JSON files (the dataset and
//! its generation record) plus a static HTML rendering of every recipe.
//!
//! # Architecture: Skip, Incremental, Full
//!
//! The upstream repository has two independently versioned subtrees:
//! `recipes/` (one markdown file per recipe) and `images/<recipe>/`. A sync
//! run resolves the current version of both and picks the cheapest strategy
//! that is still correct:
//!
//! ```text
//! Skip         stored versions == upstream versions  →  re-render pages only
//! Incremental  stored versions are an ancestor       →  compare, fetch what changed
//! Full         no usable local state                 →  fetch everything
//! ```
//!
//! Every path that writes replaces the dataset and the generation record
//! together, so the two always describe the same generation.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`sync`] | Orchestrator: the skip / incremental / full decision and persistence |
//! | [`diff`] | Turns two commit comparisons into a normalized [`types::ChangeSet`] |
//! | [`merge`] | Applies a changeset to the stored dataset; the per-run fetch cache |
//! | [`full`] | Rebuilds the dataset from scratch |
//! | [`source`] | Upstream client: the [`source::ContentSource`] trait, GitHub implementation, rate-limited transport |
//! | [`store`] | Reads and writes the dataset / meta pair |
//! | [`render`] | Markdown to HTML |
//! | [`pages`] | Static HTML output using Maud |
//! | [`config`] | `sync.toml` loading and environment overrides |
//! | [`types`] | Persisted and transient data model |
//! | [`output`] | CLI summaries |
//!
//! # Design Decisions
//!
//! ## Subtree Versions Instead of Content Hashes
//!
//! Staleness is decided by comparing commit identifiers, not by hashing
//! content. One cheap request per subtree answers "did anything change", and
//! the compare endpoint answers "what". Unchanged recipes are never fetched.
//!
//! ## Failing Loudly When Unattended
//!
//! Interactive runs degrade gracefully: a recipe whose images cannot be listed
//! gets none, a failed incremental update falls back to a full one, and an
//! unreachable upstream still renders pages from local data. With `CI` set
//! every one of those becomes an error, because a silently degraded dataset in
//! a deploy pipeline is worse than a red build. Rate limiting is never
//! silently absorbed in either mode: waits above `GENERATE_MAX_WAIT_MS` fail.

pub mod config;
pub mod diff;
pub mod full;
pub mod merge;
pub mod output;
pub mod pages;
pub mod render;
pub mod source;
pub mod store;
pub mod sync;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
