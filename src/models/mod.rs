//! Domain records shared across the pipeline.
//!
//! All records here are pure data: the validator and rules engine operate on
//! snapshots, and only the orchestrator mutates an `Analysis`.

pub mod enums;

pub use enums::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ═══════════════════════════════════════════
// Findings
// ═══════════════════════════════════════════

/// A cross-source disagreement detected by the consistency validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inconsistency {
    pub severity: Severity,
    pub code: String,
    pub field: String,
    pub expected: String,
    pub found: String,
    pub message: String,
}

/// A single documented rule violation with severity and corrective guidance.
/// Superset of rule findings and converted inconsistencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonConformity {
    pub code: String,
    pub severity: Severity,
    pub description: String,
    pub evidence: String,
    pub corrective_action: String,
}

impl NonConformity {
    /// Fold a validator finding into the non-conformity list.
    /// Severity maps directly; it is never re-derived.
    pub fn from_inconsistency(inc: &Inconsistency) -> Self {
        Self {
            code: inc.code.clone(),
            severity: inc.severity,
            description: inc.message.clone(),
            evidence: format!("expected: {}; found: {}", inc.expected, inc.found),
            corrective_action: format!(
                "Reconcile the conflicting evidence for '{}' and resubmit the report",
                inc.field
            ),
        }
    }
}

// ═══════════════════════════════════════════
// Analysis input
// ═══════════════════════════════════════════

/// One scanned page/photo submitted for analysis, already rendered to an
/// image by the (excluded) upload layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentImage {
    pub kind: DocumentKind,
    /// Base64-encoded image payload.
    pub image_base64: String,
    #[serde(default = "DetailLevel::default_detail")]
    pub detail: DetailLevel,
}

impl DetailLevel {
    fn default_detail() -> DetailLevel {
        DetailLevel::Auto
    }
}

/// Input to `create_and_process`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub company_id: Option<Uuid>,
    pub test_type: TestType,
    pub documents: Vec<DocumentImage>,
    /// Expected equipment tag, for targeted cross-checking in prompts.
    pub expected_tag: Option<String>,
    pub expected_serial: Option<String>,
}

// ═══════════════════════════════════════════
// Analysis record
// ═══════════════════════════════════════════

/// One compliance analysis, from submission to verdict.
/// Mutated exclusively by the orchestrator; persisted via `AnalysisStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub id: Uuid,
    pub company_id: Option<Uuid>,
    pub test_type: TestType,
    pub status: AnalysisStatus,
    pub documents: Vec<DocumentImage>,
    pub expected_tag: Option<String>,
    pub expected_serial: Option<String>,
    /// Merged extraction snapshot, populated on completion.
    pub extraction: Option<serde_json::Value>,
    pub non_conformities: Vec<NonConformity>,
    pub verdict: Option<Verdict>,
    pub score: Option<f64>,
    /// Mean confidence across present extracted fields, in [0, 1].
    pub confidence: Option<f32>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Analysis {
    /// New PENDING analysis from a validated request.
    pub fn from_request(request: AnalysisRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            company_id: request.company_id,
            test_type: request.test_type,
            status: AnalysisStatus::Pending,
            documents: request.documents,
            expected_tag: request.expected_tag,
            expected_serial: request.expected_serial,
            extraction: None,
            non_conformities: Vec::new(),
            verdict: None,
            score: None,
            confidence: None,
            input_tokens: 0,
            output_tokens: 0,
            estimated_cost_usd: 0.0,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

// ═══════════════════════════════════════════
// Feedback
// ═══════════════════════════════════════════

/// A user correction against a completed analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: Uuid,
    pub analysis_id: Uuid,
    pub company_id: Option<Uuid>,
    /// Semantic field name the correction applies to.
    pub field: String,
    pub original_value: String,
    pub corrected_value: String,
    pub explanation: Option<String>,
    /// Set once the correction has been indexed for retrieval.
    pub incorporated: bool,
    pub created_at: DateTime<Utc>,
}

impl Feedback {
    pub fn new(
        analysis_id: Uuid,
        company_id: Option<Uuid>,
        field: &str,
        original_value: &str,
        corrected_value: &str,
        explanation: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            analysis_id,
            company_id,
            field: field.to_string(),
            original_value: original_value.to_string(),
            corrected_value: corrected_value.to_string(),
            explanation,
            incorporated: false,
            created_at: Utc::now(),
        }
    }
}

// ═══════════════════════════════════════════
// Knowledge store entry
// ═══════════════════════════════════════════

/// One entry in the append-only knowledge store.
/// Global entries (`company_id == None`) are visible to every tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEmbedding {
    pub id: Uuid,
    pub company_id: Option<Uuid>,
    pub analysis_id: Option<Uuid>,
    pub content_type: ContentType,
    pub test_type: Option<TestType>,
    pub verdict: Option<Verdict>,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
    pub was_correct: bool,
    pub use_count: u32,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeEmbedding {
    pub fn new(content_type: ContentType, content: &str, embedding: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            company_id: None,
            analysis_id: None,
            content_type,
            test_type: None,
            verdict: None,
            content: content.to_string(),
            embedding,
            metadata: serde_json::json!({}),
            was_correct: true,
            use_count: 0,
            created_at: Utc::now(),
        }
    }
}
