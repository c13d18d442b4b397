//! Budgeted context assembly from the three retrieval categories.
//!
//! Three searches run against independent similarity floors, then results
//! are appended greedily while a running token estimate stays inside
//! cumulative caps: past analyses may fill half the budget, corrections up
//! to three quarters, standards the remainder.

use uuid::Uuid;

use super::retrieval::search;
use super::types::{
    EmbeddingModel, KnowledgeStore, RagContext, SearchFilters, SearchResult,
    MAX_CORRECTIONS, MAX_SIMILAR_ANALYSES, MAX_STANDARDS, MIN_SIMILARITY_ANALYSES,
    MIN_SIMILARITY_CORRECTIONS, MIN_SIMILARITY_STANDARDS,
};
use super::RagError;
use crate::models::{ContentType, TestType};

/// Token budget for one assembled context.
#[derive(Debug, Clone, Copy)]
pub struct ContextBudget {
    pub total_tokens: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self { total_tokens: 3000 }
    }
}

/// Subword tokenizers average ~4 chars/token; round up.
fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

fn take_within(
    results: Vec<SearchResult>,
    total_tokens: &mut usize,
    cap: usize,
) -> Vec<SearchResult> {
    let mut kept = Vec::new();
    for result in results {
        let tokens = estimate_tokens(&result.entry.content);
        if *total_tokens + tokens > cap {
            break;
        }
        *total_tokens += tokens;
        kept.push(result);
    }
    kept
}

/// Build prompt context for one upcoming analysis.
pub fn build_context(
    embedder: &dyn EmbeddingModel,
    store: &dyn KnowledgeStore,
    query: &str,
    test_type: TestType,
    company_id: Option<Uuid>,
    budget: ContextBudget,
) -> Result<RagContext, RagError> {
    let analyses = search(
        embedder,
        store,
        query,
        &SearchFilters {
            content_types: vec![ContentType::AnalysisResult],
            company_id,
            test_type: Some(test_type),
            verdict: None,
            min_similarity: MIN_SIMILARITY_ANALYSES,
            limit: MAX_SIMILAR_ANALYSES,
        },
    )?;

    let corrections = search(
        embedder,
        store,
        query,
        &SearchFilters {
            content_types: vec![ContentType::ManualCorrection],
            company_id,
            test_type: Some(test_type),
            verdict: None,
            min_similarity: MIN_SIMILARITY_CORRECTIONS,
            limit: MAX_CORRECTIONS,
        },
    )?;

    let standards = search(
        embedder,
        store,
        query,
        &SearchFilters {
            content_types: vec![ContentType::TechnicalStandard, ContentType::BestPractice],
            company_id,
            test_type: None,
            verdict: None,
            min_similarity: MIN_SIMILARITY_STANDARDS,
            limit: MAX_STANDARDS,
        },
    )?;

    let mut total_tokens = 0;
    let similar_analyses = take_within(analyses, &mut total_tokens, budget.total_tokens / 2);
    let corrections = take_within(corrections, &mut total_tokens, budget.total_tokens * 3 / 4);
    let standards = take_within(standards, &mut total_tokens, budget.total_tokens);

    tracing::debug!(
        analyses = similar_analyses.len(),
        corrections = corrections.len(),
        standards = standards.len(),
        total_tokens,
        "Retrieval context assembled"
    );

    Ok(RagContext {
        similar_analyses,
        corrections,
        standards,
        total_tokens,
    })
}
