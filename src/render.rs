//! Markdown to HTML.
//!
//! The merger and the full generator only see the [`Renderer`] trait; the
//! default [`MarkdownRenderer`] is a thin wrapper over `pulldown-cmark`.

use crate::types::Document;
use pulldown_cmark::{Options, Parser, html as md_html};

/// Pure `text -> html` conversion.
pub trait Renderer: Send + Sync {
    fn render(&self, text: &str) -> String;
}

/// CommonMark plus the GitHub extensions recipes actually use: tables,
/// strikethrough and task lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

impl Renderer for MarkdownRenderer {
    fn render(&self, text: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);

        let parser = Parser::new_ext(text, options);
        let mut html = String::new();
        md_html::push_html(&mut html, parser);
        html
    }
}

/// Render HTML for every document that has a body but no HTML yet.
/// Returns how many were rendered.
pub fn fill_missing_html(renderer: &dyn Renderer, documents: &mut [Document]) -> usize {
    let mut rendered = 0;
    for doc in documents.iter_mut().filter(|d| d.rendered_html.is_none()) {
        if let Some(body) = &doc.body_text {
            doc.rendered_html = Some(renderer.render(body));
            rendered += 1;
        }
    }
    rendered
}
