//! Batch extraction: run each (image, kind) pair through its extractor,
//! accumulate token/cost totals, and merge the evidence.
//!
//! Documents are processed sequentially in submission order; the merge picks,
//! independently per field, the candidate with the highest confidence among
//! non-null values, breaking ties toward the earliest-processed source. A
//! failed single-document extraction is logged and skipped, never aborting
//! the batch.

use super::client::ResilientExtractionClient;
use super::extractors::extractor_for;
use super::types::{ConsolidatedEvidence, ExtractionHints, TokenUsage};
use super::ExtractionError;
use crate::models::{DocumentImage, TestType};

#[derive(Debug)]
pub struct BatchExtractionResult {
    pub consolidated: ConsolidatedEvidence,
    pub documents_processed: u32,
    pub documents_failed: u32,
    pub usage: TokenUsage,
    pub estimated_cost_usd: f64,
    pub errors: Vec<String>,
}

pub struct BatchExtractor {
    client: ResilientExtractionClient,
}

impl BatchExtractor {
    pub fn new(client: ResilientExtractionClient) -> Self {
        Self { client }
    }

    pub fn run(
        &self,
        test_type: TestType,
        documents: &[DocumentImage],
        hints: &ExtractionHints,
    ) -> Result<BatchExtractionResult, ExtractionError> {
        if documents.is_empty() {
            return Err(ExtractionError::EmptyBatch);
        }

        let _span = tracing::info_span!(
            "batch_extraction",
            test_type = %test_type,
            documents = documents.len(),
        )
        .entered();

        let mut consolidated = ConsolidatedEvidence::new(test_type);
        let mut usage = TokenUsage::default();
        let mut estimated_cost_usd = 0.0;
        let mut documents_processed = 0u32;
        let mut documents_failed = 0u32;
        let mut errors = Vec::new();

        for (index, document) in documents.iter().enumerate() {
            let extractor = extractor_for(document.kind);
            let prompt = extractor.build_user_prompt(hints);
            let images = [document.image_base64.clone()];

            let outcome = self.client.extract(
                extractor.system_prompt(),
                &prompt,
                &images,
                document.detail,
            );

            usage.add(outcome.metrics.usage);
            estimated_cost_usd += outcome.metrics.estimated_cost_usd;

            match outcome.data {
                Some(content) => {
                    let parsed = extractor.parse_response(&content);
                    consolidated.merged = consolidated.merged.merged_with(&parsed.extraction);
                    consolidated.tag_candidates.extend(parsed.tag_candidates);
                    consolidated
                        .serial_candidates
                        .extend(parsed.serial_candidates);
                    documents_processed += 1;
                }
                None => {
                    let error = outcome
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unknown extraction failure".into());
                    tracing::warn!(
                        index,
                        kind = %document.kind,
                        error = %error,
                        "Document extraction failed, skipping"
                    );
                    errors.push(format!("document {index} ({}): {error}", document.kind));
                    documents_failed += 1;
                }
            }
        }

        tracing::info!(
            processed = documents_processed,
            failed = documents_failed,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Batch extraction finished"
        );

        Ok(BatchExtractionResult {
            consolidated,
            documents_processed,
            documents_failed,
            usage,
            estimated_cost_usd,
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DetailLevel, DocumentKind, EvidenceSource};
    use crate::pipeline::extraction::client::RetryConfig;
    use crate::pipeline::extraction::types::{VisionCall, VisionModelClient, VisionResponse};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Returns scripted responses in call order.
    struct SequenceClient {
        responses: Mutex<VecDeque<Result<String, ()>>>,
    }

    impl SequenceClient {
        fn new(responses: Vec<Result<&str, ()>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|r| r.map(String::from))
                        .collect(),
                ),
            })
        }
    }

    impl VisionModelClient for SequenceClient {
        fn call(&self, _request: &VisionCall) -> Result<VisionResponse, ExtractionError> {
            match self.responses.lock().unwrap().pop_front() {
                Some(Ok(content)) => Ok(VisionResponse {
                    content,
                    usage: TokenUsage {
                        input_tokens: 100,
                        output_tokens: 10,
                    },
                }),
                Some(Err(())) => Err(ExtractionError::Api {
                    status: 400,
                    message: "rejected".into(),
                }),
                None => Err(ExtractionError::EmptyResponse),
            }
        }
    }

    fn make_batch(client: Arc<SequenceClient>) -> BatchExtractor {
        let resilient = ResilientExtractionClient::new(client, "gpt-4o", "gpt-4o-mini")
            .with_retry_config(RetryConfig {
                max_retries: 1,
                initial_delay: Duration::from_millis(1),
                multiplier: 2.0,
                max_delay: Duration::from_millis(1),
            });
        BatchExtractor::new(resilient)
    }

    fn doc(kind: DocumentKind) -> DocumentImage {
        DocumentImage {
            kind,
            image_base64: "aGVsbG8=".into(),
            detail: DetailLevel::Auto,
        }
    }

    #[test]
    fn empty_batch_is_rejected() {
        let batch = make_batch(SequenceClient::new(vec![]));
        let result = batch.run(TestType::Grounding, &[], &ExtractionHints::default());
        assert!(matches!(result, Err(ExtractionError::EmptyBatch)));
    }

    #[test]
    fn merges_identification_by_highest_confidence() {
        let photo_response = r#"{
            "header_tag": {"value": "EQ-01", "confidence": 0.7},
            "serial_number": {"value": "SN-1", "confidence": 0.6}
        }"#;
        let thermal_response = r#"{
            "equipment_tag": {"value": "EQ-1", "confidence": 0.95}
        }"#;
        let client = SequenceClient::new(vec![Ok(photo_response), Ok(thermal_response)]);
        let batch = make_batch(client);

        let result = batch
            .run(
                TestType::Thermography,
                &[doc(DocumentKind::VisiblePhoto), doc(DocumentKind::ThermalImage)],
                &ExtractionHints::default(),
            )
            .unwrap();

        let merged = &result.consolidated.merged;
        assert_eq!(merged.equipment_tag.value.as_deref(), Some("EQ-1"));
        assert_eq!(merged.equipment_tag.source, EvidenceSource::Photo);
        assert_eq!(merged.serial_number.value.as_deref(), Some("SN-1"));
        assert_eq!(result.consolidated.tag_candidates.len(), 2);
        assert_eq!(result.documents_processed, 2);
    }

    #[test]
    fn tie_breaks_toward_earliest_processed_source() {
        let first = r#"{"header_tag": {"value": "FIRST", "confidence": 0.8}}"#;
        let second = r#"{"equipment_tag": {"value": "SECOND", "confidence": 0.8}}"#;
        let client = SequenceClient::new(vec![Ok(first), Ok(second)]);
        let batch = make_batch(client);

        let result = batch
            .run(
                TestType::Grounding,
                &[doc(DocumentKind::VisiblePhoto), doc(DocumentKind::ThermalImage)],
                &ExtractionHints::default(),
            )
            .unwrap();

        assert_eq!(
            result.consolidated.merged.equipment_tag.value.as_deref(),
            Some("FIRST")
        );
    }

    #[test]
    fn failed_document_is_skipped_not_fatal() {
        let ok_response = r#"{"serial_number": {"value": "SN-OK", "confidence": 0.9}}"#;
        let client = SequenceClient::new(vec![Err(()), Ok(ok_response)]);
        let batch = make_batch(client);

        let result = batch
            .run(
                TestType::Megger,
                &[
                    doc(DocumentKind::VisiblePhoto),
                    doc(DocumentKind::CalibrationCertificate),
                ],
                &ExtractionHints::default(),
            )
            .unwrap();

        assert_eq!(result.documents_processed, 1);
        assert_eq!(result.documents_failed, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("document 0"));
        assert_eq!(
            result.consolidated.merged.serial_number.value.as_deref(),
            Some("SN-OK")
        );
    }

    #[test]
    fn totals_accumulate_across_documents() {
        let response = r#"{"header_tag": {"value": "EQ-01", "confidence": 0.9}}"#;
        let client = SequenceClient::new(vec![Ok(response), Ok(response)]);
        let batch = make_batch(client);

        let result = batch
            .run(
                TestType::Grounding,
                &[doc(DocumentKind::VisiblePhoto), doc(DocumentKind::VisiblePhoto)],
                &ExtractionHints::default(),
            )
            .unwrap();

        assert_eq!(result.usage.input_tokens, 200);
        assert_eq!(result.usage.output_tokens, 20);
        assert!(result.estimated_cost_usd > 0.0);
    }
}
