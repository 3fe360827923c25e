//! Static page output.
//!
//! Consumes the finished dataset and writes a plain HTML site next to it, so
//! the recipes are readable without the client-side app.
//!
//! ## Output Structure
//!
//! ```text
//! static/
//! ├── index.html          # Card grid of every recipe
//! ├── pasta/
//! │   └── index.html      # Rendered recipe plus its images
//! └── soup/
//!     └── index.html
//! ```
//!
//! Page directories of recipes that no longer exist are removed. Directories
//! without an `index.html` were not written here and are left alone.
//!
//! Uses [maud](https://maud.lambda.xyz/) for compile-time HTML templating.

use crate::types::Document;
use maud::{DOCTYPE, Markup, PreEscaped, html};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum PageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What a page run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageReport {
    /// Pages written, the index included.
    pub written: usize,
    /// Stale page directories removed.
    pub pruned: usize,
}

pub trait PageWriter: Send + Sync {
    fn write_site(&self, documents: &[Document]) -> Result<PageReport, PageError>;
}

const CSS: &str = "\
body { margin: 0; font-family: system-ui, sans-serif; line-height: 1.5; }
.site-header { display: flex; align-items: center; padding: .5rem 1rem; }
.logo-link { text-decoration: none; color: inherit; font-weight: 600; }
.app-container { border-style: double; border-color: cornsilk; border-top-width: .5rem; padding: 1rem 10% 5rem; }
.recipe-grid { display: grid; grid-template-columns: repeat(auto-fill, minmax(12rem, 1fr)); gap: 1rem; }
.recipe-card { display: block; overflow: hidden; border: 1px solid #ddd; border-radius: .375rem; text-decoration: none; color: inherit; }
.recipe-card img, .recipe-card .no-image { display: block; width: 100%; height: 150px; object-fit: cover; background: #f4f4f4; }
.recipe-card-title { display: block; margin: 0; padding: .75rem; white-space: nowrap; overflow: hidden; text-overflow: ellipsis; }
.recipe-images img { max-width: 100%; margin: 1rem 0; }
";

/// Writes the site under `root`.
pub struct StaticPageWriter {
    root: PathBuf,
    /// URL prefix of the site, e.g. `/static/`.
    site_base: String,
    /// URL prefix of the images subtree; image URLs are `<base>/<name>/<image>`.
    image_base: String,
}

impl StaticPageWriter {
    pub fn new(root: impl Into<PathBuf>, site_base: &str, image_base: &str) -> Self {
        let mut site_base = site_base.trim_end_matches('/').to_string();
        site_base.push('/');
        Self {
            root: root.into(),
            site_base,
            image_base: image_base.trim_end_matches('/').to_string(),
        }
    }

    fn page_url(&self, doc: &Document) -> String {
        format!("{}{}/", self.site_base, doc.name)
    }

    fn image_url(&self, doc: &Document, image: &str) -> String {
        format!("{}/{}/{}", self.image_base, doc.name, image)
    }
}

impl PageWriter for StaticPageWriter {
    fn write_site(&self, documents: &[Document]) -> Result<PageReport, PageError> {
        let mut report = PageReport::default();
        write_page(&self.root, &render_index(self, documents))?;
        report.written += 1;

        let mut live = HashSet::new();
        for doc in documents {
            if !is_safe_dir_name(&doc.name) {
                warn!(target: "recipe_sync", name = %doc.name, "skipping page with unusable name");
                continue;
            }
            write_page(&self.root.join(&doc.name), &render_document_page(self, doc))?;
            live.insert(doc.name.as_str());
            report.written += 1;
        }

        report.pruned = prune_stale(&self.root, &live)?;
        debug!(
            target: "recipe_sync",
            written = report.written,
            pruned = report.pruned,
            "static pages written"
        );
        Ok(report)
    }
}

fn is_safe_dir_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> PageError + '_ {
    move |source| PageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write_page(dir: &Path, page: &Markup) -> Result<(), PageError> {
    fs::create_dir_all(dir).map_err(io_err(dir))?;
    let path = dir.join("index.html");
    fs::write(&path, &page.0).map_err(io_err(&path))
}

/// Remove page directories under `root` that belong to no live document.
fn prune_stale(root: &Path, live: &HashSet<&str>) -> Result<usize, PageError> {
    let mut pruned = 0;
    for entry in fs::read_dir(root).map_err(io_err(root))? {
        let entry = entry.map_err(io_err(root))?;
        let path = entry.path();
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !path.is_dir() || live.contains(name) || !path.join("index.html").is_file() {
            continue;
        }
        debug!(target: "recipe_sync", page = name, "removing stale page");
        fs::remove_dir_all(&path).map_err(io_err(&path))?;
        pruned += 1;
    }
    Ok(pruned)
}

/// Point app-relative links (`href="/pasta"`) at their static page
/// (`href="/static/pasta/"`). Links already under the site base, the bare root,
/// and links carrying a query or fragment are left alone.
pub fn rewrite_local_links(html: &str, site_base: &str) -> String {
    const NEEDLE: &str = "href=\"/";
    let base = site_base.trim_matches('/');
    if base.is_empty() {
        return html.to_string();
    }
    let base_prefix = format!("{base}/");

    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(pos) = rest.find(NEEDLE) {
        let (head, tail) = rest.split_at(pos + NEEDLE.len());
        out.push_str(head);
        rest = tail;
        let Some(end) = rest.find('"') else { break };
        let target = &rest[..end];
        let rewrite = !target.is_empty()
            && !target.starts_with('/')
            && !target.starts_with(&base_prefix)
            && !target.contains(['#', '?']);
        if rewrite {
            out.push_str(&base_prefix);
            out.push_str(target.trim_end_matches('/'));
            out.push('/');
            rest = &rest[end..];
        }
    }
    out.push_str(rest);
    out
}

// ============================================================================
// HTML Components
// ============================================================================

/// Renders the base HTML document structure
fn base_document(title: &str, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (title) }
                style { (PreEscaped(CSS)) }
            }
            body {
                (content)
            }
        }
    }
}

fn site_header(writer: &StaticPageWriter) -> Markup {
    html! {
        header.site-header {
            a.logo-link href=(writer.site_base) { "Recipes" }
        }
    }
}

fn render_index(writer: &StaticPageWriter, documents: &[Document]) -> Markup {
    let content = html! {
        (site_header(writer))
        main.app-container {
            div.recipe-grid {
                @for doc in documents.iter().filter(|d| is_safe_dir_name(&d.name)) {
                    a.recipe-card href=(writer.page_url(doc)) {
                        @if let Some(image) = &doc.image_primary {
                            img src=(writer.image_url(doc, image)) alt=(doc.name) loading="lazy";
                        } @else {
                            div.no-image {}
                        }
                        h6.recipe-card-title { (doc.name) }
                    }
                }
            }
        }
    };
    base_document("Recipes", content)
}

fn render_document_page(writer: &StaticPageWriter, doc: &Document) -> Markup {
    let body = doc
        .rendered_html
        .as_deref()
        .map(|html| rewrite_local_links(html, &writer.site_base))
        .unwrap_or_default();

    let content = html! {
        (site_header(writer))
        main.app-container {
            article.recipe {
                (PreEscaped(body))
            }
            @if !doc.images.is_empty() {
                section.recipe-images {
                    @for image in &doc.images {
                        img src=(writer.image_url(doc, image)) alt=(image) loading="lazy";
                    }
                }
            }
        }
    };
    base_document(&format!("{} – Recipes", doc.name), content)
}

// ============================================================================
// Tests
// ============================================================================
