//! Full generation: rebuild the dataset from nothing.
//!
//! Used when there is no usable local state, the stored schema is stale, or an
//! incremental attempt failed. Enumeration and body fetches are fatal; image
//! listings degrade to an empty list per document unless running strict.

use crate::merge::{FetchContext, sort_by_name};
use crate::render::fill_missing_html;
use crate::source::SourceError;
use crate::types::Document;
use tracing::{debug, info};

pub async fn full_generation(ctx: &FetchContext<'_>) -> Result<Vec<Document>, SourceError> {
    info!(target: "recipe_sync", "fetching document list (full)");
    let refs = ctx.source.list_documents().await?;
    info!(target: "recipe_sync", count = refs.len(), "found documents");

    let mut documents = Vec::with_capacity(refs.len());
    for doc_ref in refs {
        debug!(target: "recipe_sync", filename = %doc_ref.filename, "fetching");
        let images = ctx
            .images_tolerant(&doc_ref.name)
            .await?
            .unwrap_or_default();
        let body = ctx.cache.body(ctx.source, &doc_ref.filename).await?;
        documents.push(Document::new(&doc_ref.filename, images, Some(body)));
    }

    sort_by_name(&mut documents);
    fill_missing_html(ctx.renderer, &mut documents);
    Ok(documents)
}
