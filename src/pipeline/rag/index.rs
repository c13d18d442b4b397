//! Loop-learning index: summarize completed analyses and user corrections,
//! embed them, and append to the knowledge store.
//!
//! Indexing failures are logged and swallowed — they must never fail or roll
//! back the analysis they describe.

use super::types::{EmbeddingModel, KnowledgeStore};
use crate::models::{Analysis, ContentType, Feedback, KnowledgeEmbedding, TestType};
use crate::pipeline::extraction::types::NormalizedExtraction;

/// Text summary of one completed analysis for embedding.
pub fn summarize_analysis(analysis: &Analysis) -> String {
    let mut lines = Vec::new();

    let verdict = analysis
        .verdict
        .map(|v| v.as_str().to_string())
        .unwrap_or_else(|| "unknown".into());
    lines.push(format!(
        "{} test analysis — verdict: {verdict} (score {})",
        analysis.test_type,
        analysis.score.map(|s| s.to_string()).unwrap_or_else(|| "n/a".into()),
    ));

    let extraction = analysis
        .extraction
        .as_ref()
        .and_then(|v| serde_json::from_value::<NormalizedExtraction>(v.clone()).ok());
    if let Some(extraction) = extraction {
        let mut highlights = Vec::new();
        if let Some(ref tag) = extraction.equipment_tag.value {
            highlights.push(format!("equipment tag {tag}"));
        }
        if let Some(ref serial) = extraction.serial_number.value {
            highlights.push(format!("instrument serial {serial}"));
        }
        if let Some(date) = extraction.measurement_date.value {
            highlights.push(format!("measured {}", date.date_naive()));
        }
        if let Some(resistance) = extraction.ground_resistance.value {
            highlights.push(format!("ground resistance {resistance} Ω"));
        }
        if !highlights.is_empty() {
            lines.push(highlights.join(", "));
        }
    }

    if analysis.non_conformities.is_empty() {
        lines.push("Non-conformities: none found".into());
    } else {
        lines.push("Non-conformities:".into());
        for nc in &analysis.non_conformities {
            lines.push(format!("- [{}] {}: {}", nc.severity, nc.code, nc.description));
        }
    }

    lines.join("\n")
}

/// Index a completed analysis as ANALYSIS_RESULT. Never fails.
pub fn index_analysis(
    embedder: &dyn EmbeddingModel,
    store: &dyn KnowledgeStore,
    analysis: &Analysis,
) {
    let content = summarize_analysis(analysis);
    let embedding = match embedder.embed(&content) {
        Ok(embedding) => embedding,
        Err(e) => {
            tracing::warn!(analysis_id = %analysis.id, error = %e, "Analysis embedding failed, skipping index");
            return;
        }
    };

    let mut entry = KnowledgeEmbedding::new(ContentType::AnalysisResult, &content, embedding);
    entry.company_id = analysis.company_id;
    entry.analysis_id = Some(analysis.id);
    entry.test_type = Some(analysis.test_type);
    entry.verdict = analysis.verdict;
    entry.metadata = serde_json::json!({
        "score": analysis.score,
        "confidence": analysis.confidence,
    });

    if let Err(e) = store.insert(&entry) {
        tracing::warn!(analysis_id = %analysis.id, error = %e, "Analysis indexing failed");
    } else {
        tracing::debug!(analysis_id = %analysis.id, "Analysis indexed for retrieval");
    }
}

/// Before/after/explanation text for one user correction.
pub fn summarize_correction(feedback: &Feedback) -> String {
    let mut text = format!(
        "Manual correction for field {}: \"{}\" → \"{}\"",
        feedback.field, feedback.original_value, feedback.corrected_value
    );
    if let Some(ref explanation) = feedback.explanation {
        text.push_str(&format!("\nExplanation: {explanation}"));
    }
    text
}

/// Index a user correction as MANUAL_CORRECTION. Returns whether the entry
/// was persisted (the caller marks the feedback incorporated on success);
/// failures are logged, never propagated.
pub fn index_correction(
    embedder: &dyn EmbeddingModel,
    store: &dyn KnowledgeStore,
    feedback: &Feedback,
    test_type: Option<TestType>,
) -> bool {
    let content = summarize_correction(feedback);
    let embedding = match embedder.embed(&content) {
        Ok(embedding) => embedding,
        Err(e) => {
            tracing::warn!(feedback_id = %feedback.id, error = %e, "Correction embedding failed, skipping index");
            return false;
        }
    };

    let mut entry = KnowledgeEmbedding::new(ContentType::ManualCorrection, &content, embedding);
    entry.company_id = feedback.company_id;
    entry.analysis_id = Some(feedback.analysis_id);
    entry.test_type = test_type;
    entry.metadata = serde_json::json!({ "field": feedback.field });

    match store.insert(&entry) {
        Ok(()) => {
            tracing::debug!(feedback_id = %feedback.id, "Correction indexed for retrieval");
            true
        }
        Err(e) => {
            tracing::warn!(feedback_id = %feedback.id, error = %e, "Correction indexing failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    use crate::models::{
        AnalysisRequest, EvidenceSource, NonConformity, Severity, Verdict,
    };
    use crate::pipeline::extraction::types::ExtractedField;
    use crate::pipeline::rag::embedder::HashingEmbedder;
    use crate::pipeline::rag::store::InMemoryKnowledgeStore;
    use crate::pipeline::rag::RagError;

    fn completed_analysis() -> Analysis {
        let mut analysis = Analysis::from_request(AnalysisRequest {
            company_id: Some(Uuid::new_v4()),
            test_type: TestType::Grounding,
            documents: vec![],
            expected_tag: None,
            expected_serial: None,
        });
        let mut extraction = NormalizedExtraction::default();
        extraction.equipment_tag =
            ExtractedField::found("EQ-01".into(), 0.9, EvidenceSource::ReportHeader);
        extraction.ground_resistance =
            ExtractedField::found(6.2, 0.9, EvidenceSource::DataTable);
        analysis.extraction = Some(serde_json::to_value(&extraction).unwrap());
        analysis.verdict = Some(Verdict::Rejected);
        analysis.score = Some(30.0);
        analysis.non_conformities.push(NonConformity {
            code: "GND-001".into(),
            severity: Severity::Critical,
            description: "Ground resistance exceeds limit".into(),
            evidence: "6.2 Ω".into(),
            corrective_action: "Re-test".into(),
        });
        analysis
    }

    #[test]
    fn summary_mentions_verdict_fields_and_findings() {
        let summary = summarize_analysis(&completed_analysis());
        assert!(summary.contains("grounding"));
        assert!(summary.contains("rejected"));
        assert!(summary.contains("EQ-01"));
        assert!(summary.contains("GND-001"));
    }

    #[test]
    fn clean_analysis_summary_says_none_found() {
        let mut analysis = completed_analysis();
        analysis.non_conformities.clear();
        analysis.verdict = Some(Verdict::Approved);
        let summary = summarize_analysis(&analysis);
        assert!(summary.contains("none found"));
    }

    #[test]
    fn index_analysis_persists_scoped_entry() {
        let store = InMemoryKnowledgeStore::new();
        let embedder = HashingEmbedder::new();
        let analysis = completed_analysis();

        index_analysis(&embedder, &store, &analysis);

        assert_eq!(store.count(), 1);
        let entries = store
            .candidates(
                analysis.company_id.as_ref(),
                &[ContentType::AnalysisResult],
                Some(TestType::Grounding),
                None,
            )
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].analysis_id, Some(analysis.id));
        assert_eq!(entries[0].verdict, Some(Verdict::Rejected));
    }

    #[test]
    fn index_analysis_swallows_store_failure() {
        struct FailingStore;
        impl KnowledgeStore for FailingStore {
            fn insert(&self, _: &KnowledgeEmbedding) -> Result<(), RagError> {
                Err(RagError::Store("disk full".into()))
            }
            fn candidates(
                &self,
                _: Option<&Uuid>,
                _: &[ContentType],
                _: Option<TestType>,
                _: Option<Verdict>,
            ) -> Result<Vec<KnowledgeEmbedding>, RagError> {
                Ok(vec![])
            }
            fn increment_use_count(&self, _: &Uuid) -> Result<(), RagError> {
                Ok(())
            }
            fn set_was_correct(&self, _: &Uuid, _: bool) -> Result<(), RagError> {
                Ok(())
            }
        }

        // Must not panic or propagate.
        index_analysis(&HashingEmbedder::new(), &FailingStore, &completed_analysis());
    }

    #[test]
    fn correction_summary_has_before_after_explanation() {
        let feedback = Feedback::new(
            Uuid::new_v4(),
            None,
            "serial_number",
            "FLK-1587-0099",
            "FLK-1587-0042",
            Some("last digits misread from glare".into()),
        );
        let summary = summarize_correction(&feedback);
        assert!(summary.contains("FLK-1587-0099"));
        assert!(summary.contains("FLK-1587-0042"));
        assert!(summary.contains("glare"));
    }

    #[test]
    fn index_correction_reports_success() {
        let store = InMemoryKnowledgeStore::new();
        let feedback = Feedback::new(Uuid::new_v4(), None, "field", "a", "b", None);

        let indexed = index_correction(
            &HashingEmbedder::new(),
            &store,
            &feedback,
            Some(TestType::Megger),
        );
        assert!(indexed);
        let entries = store
            .candidates(None, &[ContentType::ManualCorrection], None, None)
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].test_type, Some(TestType::Megger));
    }
}
