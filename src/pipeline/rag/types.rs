//! Seam traits and value types for retrieval.

use uuid::Uuid;

use super::RagError;
use crate::models::{ContentType, KnowledgeEmbedding, TestType, Verdict};

/// Minimum cosine similarity for past-analysis results (evidentiary value).
pub const MIN_SIMILARITY_ANALYSES: f32 = 0.65;
/// Corrections are instructive rather than evidentiary, so accepted lower.
pub const MIN_SIMILARITY_CORRECTIONS: f32 = 0.60;
/// Standards/best practices are accepted at the lowest floor.
pub const MIN_SIMILARITY_STANDARDS: f32 = 0.55;

pub const MAX_SIMILAR_ANALYSES: usize = 3;
pub const MAX_CORRECTIONS: usize = 2;
pub const MAX_STANDARDS: usize = 2;

/// External embedding capability.
pub trait EmbeddingModel: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;
    fn dimension(&self) -> usize;
}

/// Persisted vector store over `KnowledgeEmbedding` rows. Append-only aside
/// from the retrieval counters and correctness feedback.
pub trait KnowledgeStore: Send + Sync {
    fn insert(&self, entry: &KnowledgeEmbedding) -> Result<(), RagError>;

    /// Rows visible to `company_id` (own + global), pre-filtered relationally;
    /// similarity ranking happens in the retrieval layer.
    fn candidates(
        &self,
        company_id: Option<&Uuid>,
        content_types: &[ContentType],
        test_type: Option<TestType>,
        verdict: Option<Verdict>,
    ) -> Result<Vec<KnowledgeEmbedding>, RagError>;

    fn increment_use_count(&self, id: &Uuid) -> Result<(), RagError>;
    fn set_was_correct(&self, id: &Uuid, was_correct: bool) -> Result<(), RagError>;
}

/// Relational + similarity filters for one search.
#[derive(Debug, Clone)]
pub struct SearchFilters {
    pub content_types: Vec<ContentType>,
    pub company_id: Option<Uuid>,
    pub test_type: Option<TestType>,
    pub verdict: Option<Verdict>,
    pub min_similarity: f32,
    pub limit: usize,
}

/// One ranked hit.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub entry: KnowledgeEmbedding,
    pub similarity: f32,
}

/// Prompt context assembled from the three retrieval categories.
#[derive(Debug, Clone, Default)]
pub struct RagContext {
    pub similar_analyses: Vec<SearchResult>,
    pub corrections: Vec<SearchResult>,
    pub standards: Vec<SearchResult>,
    pub total_tokens: usize,
}

impl RagContext {
    pub fn is_empty(&self) -> bool {
        self.similar_analyses.is_empty() && self.corrections.is_empty() && self.standards.is_empty()
    }

    /// Render as a prompt section for the extractors.
    pub fn as_prompt_section(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut sections = Vec::new();
        if !self.similar_analyses.is_empty() {
            sections.push(format_group("SIMILAR PAST ANALYSES", &self.similar_analyses));
        }
        if !self.corrections.is_empty() {
            sections.push(format_group("PAST CORRECTIONS", &self.corrections));
        }
        if !self.standards.is_empty() {
            sections.push(format_group("APPLICABLE STANDARDS", &self.standards));
        }
        Some(sections.join("\n\n"))
    }
}

fn format_group(label: &str, results: &[SearchResult]) -> String {
    let body = results
        .iter()
        .map(|r| format!("- {}", r.entry.content))
        .collect::<Vec<_>>()
        .join("\n");
    format!("<{label}>\n{body}\n</{label}>")
}
