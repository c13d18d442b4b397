//! Single-analysis pipeline: retrieval context → batch extraction →
//! consistency validation → rules → verdict/score/confidence.
//!
//! Stateless over the analysis snapshot; the service owns status
//! transitions and persistence.

use std::sync::Arc;

use super::extraction::batch::BatchExtractor;
use super::extraction::types::{ExtractionHints, NormalizedExtraction, TokenUsage};
use super::extraction::ExtractionError;
use super::rag::context::{build_context, ContextBudget};
use super::rag::types::{EmbeddingModel, KnowledgeStore};
use super::rules::{evaluate, Evaluation};
use super::validation::validate;
use crate::models::{Analysis, NonConformity, Verdict};

/// Everything the service persists on COMPLETED.
#[derive(Debug)]
pub struct PipelineOutput {
    pub extraction: NormalizedExtraction,
    pub non_conformities: Vec<NonConformity>,
    pub verdict: Verdict,
    pub score: f64,
    pub confidence: f32,
    pub usage: TokenUsage,
    pub estimated_cost_usd: f64,
}

pub struct AnalysisPipeline {
    batch: BatchExtractor,
    embedder: Arc<dyn EmbeddingModel>,
    knowledge: Arc<dyn KnowledgeStore>,
    budget: ContextBudget,
}

impl AnalysisPipeline {
    pub fn new(
        batch: BatchExtractor,
        embedder: Arc<dyn EmbeddingModel>,
        knowledge: Arc<dyn KnowledgeStore>,
        budget: ContextBudget,
    ) -> Self {
        Self {
            batch,
            embedder,
            knowledge,
            budget,
        }
    }

    /// Run the full pipeline over one analysis snapshot.
    pub fn run(&self, analysis: &Analysis) -> Result<PipelineOutput, ExtractionError> {
        let _span =
            tracing::info_span!("analysis_pipeline", analysis_id = %analysis.id).entered();

        // Retrieval context biases the extraction prompts; a retrieval
        // failure degrades to an uncontextualized run.
        let query = retrieval_query(analysis);
        let context = match build_context(
            self.embedder.as_ref(),
            self.knowledge.as_ref(),
            &query,
            analysis.test_type,
            analysis.company_id,
            self.budget,
        ) {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(error = %e, "Retrieval context failed, extracting without it");
                Default::default()
            }
        };

        let hints = ExtractionHints {
            expected_tag: analysis.expected_tag.clone(),
            expected_serial: analysis.expected_serial.clone(),
            retrieval_context: context.as_prompt_section(),
        };

        let batch_result = self
            .batch
            .run(analysis.test_type, &analysis.documents, &hints)?;

        if batch_result.documents_processed == 0 {
            return Err(ExtractionError::EmptyResponse);
        }

        let inconsistencies = validate(&batch_result.consolidated);

        let Evaluation {
            non_conformities,
            verdict,
            score,
        } = evaluate(
            analysis.test_type,
            &batch_result.consolidated.merged,
            &inconsistencies,
        );

        let confidences = batch_result.consolidated.merged.present_confidences();
        let confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f32>() / confidences.len() as f32
        };

        tracing::info!(
            verdict = %verdict,
            score,
            findings = non_conformities.len(),
            confidence,
            "Analysis pipeline complete"
        );

        Ok(PipelineOutput {
            extraction: batch_result.consolidated.merged,
            non_conformities,
            verdict,
            score,
            confidence: confidence.clamp(0.0, 1.0),
            usage: batch_result.usage,
            estimated_cost_usd: batch_result.estimated_cost_usd,
        })
    }
}

fn retrieval_query(analysis: &Analysis) -> String {
    let mut query = format!("{} test report", analysis.test_type);
    if let Some(ref tag) = analysis.expected_tag {
        query.push_str(&format!(" for equipment {tag}"));
    }
    if let Some(ref serial) = analysis.expected_serial {
        query.push_str(&format!(" instrument {serial}"));
    }
    query
}
