//! Cosine-ranked semantic search over the knowledge store.

use super::types::{EmbeddingModel, KnowledgeStore, SearchFilters, SearchResult};
use super::RagError;

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Rank store candidates against the query embedding, floor by minimum
/// similarity, and return the top `limit`. Each returned entry's `use_count`
/// is incremented; a counter failure is logged, never propagated.
pub fn search(
    embedder: &dyn EmbeddingModel,
    store: &dyn KnowledgeStore,
    query: &str,
    filters: &SearchFilters,
) -> Result<Vec<SearchResult>, RagError> {
    let query_embedding = embedder.embed(query)?;

    let candidates = store.candidates(
        filters.company_id.as_ref(),
        &filters.content_types,
        filters.test_type,
        filters.verdict,
    )?;

    let mut scored: Vec<SearchResult> = candidates
        .into_iter()
        .map(|entry| {
            let similarity = cosine_similarity(&query_embedding, &entry.embedding);
            SearchResult { entry, similarity }
        })
        .filter(|r| r.similarity >= filters.min_similarity)
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(filters.limit);

    for result in &scored {
        if let Err(e) = store.increment_use_count(&result.entry.id) {
            tracing::warn!(id = %result.entry.id, error = %e, "use_count increment failed");
        }
    }

    Ok(scored)
}
