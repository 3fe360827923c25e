//! Diff engine: turns two commit-range comparisons into a [`ChangeSet`].
//!
//! The documents subtree and the images subtree are versioned independently,
//! so each gets its own comparison. The two are issued concurrently and
//! joined before anything is interpreted.
//!
//! ## Path handling
//!
//! | Comparison path | Result |
//! |---|---|
//! | `recipes/pasta.md` | change entry for `pasta.md`, status mapped 1:1 |
//! | `recipes/notes.txt`, `recipes/sub/x.md` | ignored (wrong extension, nested) |
//! | `images/pasta/2.jpg` | `pasta` added to the image owners |
//! | `images/cover.jpg` | ignored (no owning document) |
//!
//! A rename across the subtree boundary degrades to an add or a remove of the
//! side that is inside it.

use crate::config::RepoLayout;
use crate::source::{ChangedFile, ContentSource, FileStatus, SourceError};
use crate::types::{ChangeEntry, ChangeSet, ChangeStatus, Versions};
use tracing::debug;

/// Compare `base` against `head` for both subtrees.
///
/// Returns `Ok(None)` when nothing the dataset tracks changed. Missing
/// version identifiers on either side make the diff unsafe.
pub async fn diff_changes(
    source: &dyn ContentSource,
    layout: &RepoLayout,
    base: &Versions,
    head: &Versions,
) -> Result<Option<ChangeSet>, SourceError> {
    let unsafe_diff = |reason: &str| SourceError::DiffUnsafe {
        base: format!("{base:?}"),
        head: format!("{head:?}"),
        reason: reason.to_string(),
    };
    let (base_docs, base_images) = base
        .both()
        .ok_or_else(|| unsafe_diff("no stored version identifiers"))?;
    let (head_docs, head_images) = head
        .both()
        .ok_or_else(|| unsafe_diff("upstream version identifiers unavailable"))?;

    let (docs_files, image_files) = tokio::try_join!(
        compare_if_moved(source, base_docs, head_docs),
        compare_if_moved(source, base_images, head_images),
    )?;
    debug!(
        target: "recipe_sync",
        documents = docs_files.len(),
        images = image_files.len(),
        "comparisons joined"
    );

    let changes = changeset_from_files(layout, &docs_files, &image_files);
    Ok((!changes.is_empty()).then_some(changes))
}

async fn compare_if_moved(
    source: &dyn ContentSource,
    base: &str,
    head: &str,
) -> Result<Vec<ChangedFile>, SourceError> {
    if base == head {
        return Ok(Vec::new());
    }
    source.compare_versions(base, head).await
}

/// Pure translation of comparison records into a changeset.
pub fn changeset_from_files(
    layout: &RepoLayout,
    docs_files: &[ChangedFile],
    image_files: &[ChangedFile],
) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for file in docs_files {
        let current = document_filename(layout, &file.path);
        let previous = file
            .previous_path
            .as_deref()
            .and_then(|p| document_filename(layout, p));

        let entry = match (file.status, current, previous) {
            (FileStatus::Renamed, Some(filename), Some(previous)) if filename != previous => {
                ChangeEntry {
                    filename,
                    status: ChangeStatus::Renamed,
                    previous_filename: Some(previous),
                }
            }
            (FileStatus::Renamed, Some(filename), _) => ChangeEntry {
                filename,
                status: ChangeStatus::Added,
                previous_filename: None,
            },
            (FileStatus::Renamed, None, Some(previous)) => ChangeEntry {
                filename: previous,
                status: ChangeStatus::Removed,
                previous_filename: None,
            },
            (status, Some(filename), _) => ChangeEntry {
                filename,
                status: match status {
                    FileStatus::Added => ChangeStatus::Added,
                    FileStatus::Removed => ChangeStatus::Removed,
                    _ => ChangeStatus::Modified,
                },
                previous_filename: None,
            },
            (_, None, _) => continue,
        };
        changes.insert(entry);
    }

    for file in image_files {
        let paths = std::iter::once(file.path.as_str()).chain(file.previous_path.as_deref());
        for path in paths {
            if let Some(owner) = image_owner(layout, path) {
                changes.image_owners.insert(owner.to_string());
            }
        }
    }

    changes
}

/// `recipes/pasta.md` → `pasta.md`, for top-level document files only.
fn document_filename(layout: &RepoLayout, path: &str) -> Option<String> {
    let rest = path
        .strip_prefix(layout.documents_dir.as_str())?
        .strip_prefix('/')?;
    (!rest.contains('/') && layout.is_document(rest)).then(|| rest.to_string())
}

/// `images/pasta/2.jpg` → `pasta`: the second path segment, provided a file
/// sits below it.
fn image_owner<'a>(layout: &RepoLayout, path: &'a str) -> Option<&'a str> {
    let mut segments = path.split('/');
    if segments.next()? != layout.images_dir {
        return None;
    }
    let owner = segments.next().filter(|s| !s.is_empty())?;
    segments.next()?;
    Some(owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{Call, FakeSource, changed, renamed};

    fn layout() -> RepoLayout {
        RepoLayout::default()
    }

    // =========================================================================
    // Document records
    // =========================================================================

    #[test]
    fn added_document_maps_to_added_entry() {
        let set = changeset_from_files(
            &layout(),
            &[changed("recipes/pasta.md", FileStatus::Added)],
            &[],
        );
        let entry = &set.documents["pasta.md"];
        assert_eq!(entry.status, ChangeStatus::Added);
        assert_eq!(entry.name(), "pasta");
        assert!(set.image_owners.is_empty());
    }

    #[test]
    fn statuses_map_one_to_one() {
        let set = changeset_from_files(
            &layout(),
            &[
                changed("recipes/a.md", FileStatus::Added),
                changed("recipes/b.md", FileStatus::Modified),
                changed("recipes/c.md", FileStatus::Removed),
                renamed("recipes/d.md", "recipes/old-d.md"),
            ],
            &[],
        );
        assert_eq!(set.documents["a.md"].status, ChangeStatus::Added);
        assert_eq!(set.documents["b.md"].status, ChangeStatus::Modified);
        assert_eq!(set.documents["c.md"].status, ChangeStatus::Removed);
        let d = &set.documents["d.md"];
        assert_eq!(d.status, ChangeStatus::Renamed);
        assert_eq!(d.previous_filename.as_deref(), Some("old-d.md"));
    }

    #[test]
    fn non_documents_and_nested_paths_are_ignored() {
        let set = changeset_from_files(
            &layout(),
            &[
                changed("recipes/README.txt", FileStatus::Modified),
                changed("recipes/drafts/x.md", FileStatus::Added),
                changed("recipesextra/y.md", FileStatus::Added),
                changed("other/z.md", FileStatus::Added),
            ],
            &[],
        );
        assert!(set.is_empty());
    }

    #[test]
    fn copied_or_changed_status_counts_as_modified() {
        let set = changeset_from_files(
            &layout(),
            &[changed("recipes/a.md", FileStatus::Other)],
            &[],
        );
        assert_eq!(set.documents["a.md"].status, ChangeStatus::Modified);
    }

    #[test]
    fn rename_into_subtree_is_an_add() {
        let set = changeset_from_files(&layout(), &[renamed("recipes/a.md", "drafts/a.md")], &[]);
        assert_eq!(set.documents["a.md"].status, ChangeStatus::Added);
        assert_eq!(set.documents["a.md"].previous_filename, None);
    }

    #[test]
    fn rename_out_of_subtree_is_a_remove() {
        let set = changeset_from_files(&layout(), &[renamed("drafts/a.md", "recipes/a.md")], &[]);
        assert_eq!(set.documents["a.md"].status, ChangeStatus::Removed);
    }

    #[test]
    fn duplicate_records_keep_the_later_one() {
        let set = changeset_from_files(
            &layout(),
            &[
                changed("recipes/a.md", FileStatus::Added),
                changed("recipes/a.md", FileStatus::Modified),
            ],
            &[],
        );
        assert_eq!(set.documents.len(), 1);
        assert_eq!(set.documents["a.md"].status, ChangeStatus::Modified);
    }

    // =========================================================================
    // Image records
    // =========================================================================

    #[test]
    fn image_paths_collapse_to_distinct_owners() {
        let set = changeset_from_files(
            &layout(),
            &[],
            &[
                changed("images/pasta/1.jpg", FileStatus::Modified),
                changed("images/pasta/2.jpg", FileStatus::Added),
                changed("images/soup/1.jpg", FileStatus::Removed),
            ],
        );
        assert!(set.documents.is_empty());
        assert_eq!(
            set.image_owners.iter().collect::<Vec<_>>(),
            vec!["pasta", "soup"]
        );
    }

    #[test]
    fn image_rename_marks_both_owners() {
        let set = changeset_from_files(
            &layout(),
            &[],
            &[renamed("images/soup/1.jpg", "images/pasta/1.jpg")],
        );
        assert!(set.image_owners.contains("soup"));
        assert!(set.image_owners.contains("pasta"));
    }

    #[test]
    fn loose_files_in_images_root_have_no_owner() {
        let set = changeset_from_files(
            &layout(),
            &[],
            &[
                changed("images/cover.jpg", FileStatus::Added),
                changed("photos/pasta/1.jpg", FileStatus::Added),
            ],
        );
        assert!(set.is_empty());
    }

    // =========================================================================
    // diff_changes
    // =========================================================================

    #[tokio::test]
    async fn both_comparisons_are_joined() {
        let source = FakeSource::new()
            .with_comparison("D1", "D2", vec![changed("recipes/pasta.md", FileStatus::Modified)])
            .with_comparison("I1", "I2", vec![changed("images/soup/1.jpg", FileStatus::Added)]);
        let set = diff_changes(
            &source,
            &layout(),
            &Versions::new("D1", "I1"),
            &Versions::new("D2", "I2"),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(set.documents.contains_key("pasta.md"));
        assert!(set.image_owners.contains("soup"));
        assert_eq!(source.count(|c| matches!(c, Call::Compare(..))), 2);
    }

    #[tokio::test]
    async fn unmoved_subtree_is_not_compared() {
        let source = FakeSource::new().with_comparison(
            "D1",
            "D2",
            vec![changed("recipes/pasta.md", FileStatus::Modified)],
        );
        diff_changes(
            &source,
            &layout(),
            &Versions::new("D1", "I1"),
            &Versions::new("D2", "I1"),
        )
        .await
        .unwrap();
        assert_eq!(
            source.calls(),
            vec![Call::Compare("D1".into(), "D2".into())]
        );
    }

    #[tokio::test]
    async fn irrelevant_changes_yield_none() {
        let source = FakeSource::new()
            .with_comparison("D1", "D2", vec![changed("recipes/README.txt", FileStatus::Modified)])
            .with_comparison("I1", "I2", vec![]);
        let result = diff_changes(
            &source,
            &layout(),
            &Versions::new("D1", "I1"),
            &Versions::new("D2", "I2"),
        )
        .await
        .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn missing_base_versions_are_diff_unsafe() {
        let source = FakeSource::new();
        let err = diff_changes(&source, &layout(), &Versions::default(), &Versions::new("D", "I"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::DiffUnsafe { .. }));
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn comparison_failure_propagates() {
        // No comparison registered: the fake reports it as diff-unsafe.
        let source = FakeSource::new();
        let err = diff_changes(
            &source,
            &layout(),
            &Versions::new("D1", "I1"),
            &Versions::new("D2", "I1"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SourceError::DiffUnsafe { .. }));
    }
}
