//! Orchestrator surface: `create_and_process`, `cancel`, `reanalyze`,
//! `submit_feedback`.
//!
//! One background worker thread per analysis. Every status change is a
//! guarded compare-and-set through `AnalysisStore`, so a cancelled analysis
//! is never overwritten by a finishing worker, and re-analysis of an
//! in-flight id is rejected as a conflict rather than silently duplicated.
//! Isolation is per-id; no global lock spans different analyses.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::db::{AnalysisStore, DatabaseError};
use crate::models::{Analysis, AnalysisRequest, AnalysisStatus, Feedback};
use crate::pipeline::extraction::breaker::CircuitBreakerConfig;
use crate::pipeline::extraction::batch::BatchExtractor;
use crate::pipeline::extraction::client::{ResilientExtractionClient, RetryConfig};
use crate::pipeline::extraction::types::VisionModelClient;
use crate::pipeline::processor::AnalysisPipeline;
use crate::pipeline::rag::context::ContextBudget;
use crate::pipeline::rag::index::{index_analysis, index_correction};
use crate::pipeline::rag::types::{EmbeddingModel, KnowledgeStore};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Analysis not found: {0}")]
    NotFound(Uuid),

    #[error("Cannot {action} analysis {id}: status is {status}")]
    Conflict {
        id: Uuid,
        status: AnalysisStatus,
        action: &'static str,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Tunables for one service instance.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub primary_model: String,
    pub fallback_model: String,
    pub retry: RetryConfig,
    pub breaker: CircuitBreakerConfig,
    pub context_budget: ContextBudget,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            primary_model: "gpt-4o".into(),
            fallback_model: "gpt-4o-mini".into(),
            retry: RetryConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            context_budget: ContextBudget::default(),
        }
    }
}

struct ServiceInner {
    analyses: Arc<dyn AnalysisStore>,
    knowledge: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn EmbeddingModel>,
    pipeline: AnalysisPipeline,
}

pub struct AnalysisService {
    inner: Arc<ServiceInner>,
    workers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl AnalysisService {
    pub fn new(
        analyses: Arc<dyn AnalysisStore>,
        knowledge: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn EmbeddingModel>,
        vision: Arc<dyn VisionModelClient>,
        config: ServiceConfig,
    ) -> Self {
        let client = ResilientExtractionClient::new(
            vision,
            &config.primary_model,
            &config.fallback_model,
        )
        .with_retry_config(config.retry)
        .with_breaker_config(config.breaker);

        let pipeline = AnalysisPipeline::new(
            BatchExtractor::new(client),
            embedder.clone(),
            knowledge.clone(),
            config.context_budget,
        );

        Self {
            inner: Arc::new(ServiceInner {
                analyses,
                knowledge,
                embedder,
                pipeline,
            }),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Validate the request, persist a PENDING analysis, and schedule the
    /// background unit of work. Returns as soon as the record exists.
    pub fn create_and_process(&self, request: AnalysisRequest) -> Result<Uuid, ServiceError> {
        if request.documents.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "at least one document is required".into(),
            ));
        }
        let analysis = Analysis::from_request(request);
        self.inner.analyses.create(&analysis)?;
        tracing::info!(analysis_id = %analysis.id, test_type = %analysis.test_type, "Analysis created");
        self.spawn_worker(analysis.id);
        Ok(analysis.id)
    }

    /// Cooperative cancel: only valid from PENDING/PROCESSING.
    pub fn cancel(&self, id: Uuid) -> Result<(), ServiceError> {
        let moved = self.inner.analyses.transition(
            &id,
            &[AnalysisStatus::Pending, AnalysisStatus::Processing],
            AnalysisStatus::Cancelled,
            None,
        )?;
        if moved {
            tracing::info!(analysis_id = %id, "Analysis cancelled");
            return Ok(());
        }
        match self.inner.analyses.status(&id)? {
            None => Err(ServiceError::NotFound(id)),
            Some(status) => Err(ServiceError::Conflict {
                id,
                status,
                action: "cancel",
            }),
        }
    }

    /// Reset a terminal analysis to PENDING and schedule a fresh run.
    /// An in-flight or still-pending analysis is a conflict, not a
    /// duplicate trigger.
    pub fn reanalyze(&self, id: Uuid) -> Result<(), ServiceError> {
        let status = self
            .inner
            .analyses
            .status(&id)?
            .ok_or(ServiceError::NotFound(id))?;

        if self.is_in_flight(id) || !status.is_terminal() {
            return Err(ServiceError::Conflict {
                id,
                status,
                action: "reanalyze",
            });
        }

        let reset = self.inner.analyses.reset_for_reanalysis(&id)?;
        if !reset {
            // Lost a race with another state change since the check above.
            let status = self
                .inner
                .analyses
                .status(&id)?
                .ok_or(ServiceError::NotFound(id))?;
            return Err(ServiceError::Conflict {
                id,
                status,
                action: "reanalyze",
            });
        }

        tracing::info!(analysis_id = %id, "Re-analysis scheduled");
        self.spawn_worker(id);
        Ok(())
    }

    /// Persist a correction, index it for retrieval, and mark it
    /// incorporated. Indexing failures never fail the submission.
    pub fn submit_feedback(
        &self,
        analysis_id: Uuid,
        field: &str,
        original_value: &str,
        corrected_value: &str,
        explanation: Option<String>,
    ) -> Result<Uuid, ServiceError> {
        let analysis = self
            .inner
            .analyses
            .get(&analysis_id)?
            .ok_or(ServiceError::NotFound(analysis_id))?;

        let feedback = Feedback::new(
            analysis_id,
            analysis.company_id,
            field,
            original_value,
            corrected_value,
            explanation,
        );
        self.inner.analyses.insert_feedback(&feedback)?;

        let indexed = index_correction(
            self.inner.embedder.as_ref(),
            self.inner.knowledge.as_ref(),
            &feedback,
            Some(analysis.test_type),
        );
        if indexed {
            if let Err(e) = self.inner.analyses.mark_feedback_incorporated(&feedback.id) {
                tracing::warn!(feedback_id = %feedback.id, error = %e, "Could not mark feedback incorporated");
            }
        }

        Ok(feedback.id)
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Analysis>, ServiceError> {
        Ok(self.inner.analyses.get(&id)?)
    }

    /// True while a worker thread for `id` is running.
    pub fn is_in_flight(&self, id: Uuid) -> bool {
        self.workers
            .lock()
            .expect("workers mutex poisoned")
            .get(&id)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Join the worker for `id`, if any. Test and shutdown support.
    pub fn wait_for(&self, id: Uuid) {
        let handle = self
            .workers
            .lock()
            .expect("workers mutex poisoned")
            .remove(&id);
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Join every outstanding worker.
    pub fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().expect("workers mutex poisoned");
            workers.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn spawn_worker(&self, id: Uuid) {
        let inner = self.inner.clone();
        let handle = std::thread::spawn(move || inner.process(id));
        self.workers
            .lock()
            .expect("workers mutex poisoned")
            .insert(id, handle);
    }
}

impl Drop for AnalysisService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ServiceInner {
    /// The background unit of work for one analysis.
    fn process(&self, id: Uuid) {
        // PENDING → PROCESSING gate: a cancel that won the race stops the
        // unit before any model call.
        match self.analyses.transition(
            &id,
            &[AnalysisStatus::Pending],
            AnalysisStatus::Processing,
            None,
        ) {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(analysis_id = %id, "Analysis no longer pending, worker exiting");
                return;
            }
            Err(e) => {
                tracing::error!(analysis_id = %id, error = %e, "Could not start processing");
                return;
            }
        }

        let analysis = match self.analyses.get(&id) {
            Ok(Some(analysis)) => analysis,
            Ok(None) => {
                tracing::error!(analysis_id = %id, "Analysis disappeared mid-start");
                return;
            }
            Err(e) => {
                tracing::error!(analysis_id = %id, error = %e, "Analysis load failed");
                self.mark_failed(id, &e.to_string());
                return;
            }
        };

        match self.pipeline.run(&analysis) {
            Ok(output) => {
                let mut done = analysis;
                done.status = AnalysisStatus::Completed;
                done.extraction = serde_json::to_value(&output.extraction).ok();
                done.non_conformities = output.non_conformities;
                done.verdict = Some(output.verdict);
                done.score = Some(output.score);
                done.confidence = Some(output.confidence);
                done.input_tokens = output.usage.input_tokens;
                done.output_tokens = output.usage.output_tokens;
                done.estimated_cost_usd = output.estimated_cost_usd;
                done.completed_at = Some(Utc::now());

                match self
                    .analyses
                    .write_outcome(&done, &[AnalysisStatus::Processing])
                {
                    Ok(true) => {
                        // Non-critical: the completed analysis feeds future
                        // retrieval; a failure here never affects it.
                        index_analysis(self.embedder.as_ref(), self.knowledge.as_ref(), &done);
                        tracing::info!(
                            analysis_id = %id,
                            verdict = %output.verdict,
                            score = output.score,
                            "Analysis completed"
                        );
                    }
                    Ok(false) => {
                        tracing::info!(
                            analysis_id = %id,
                            "Analysis cancelled mid-pipeline, outcome discarded"
                        );
                    }
                    Err(e) => {
                        tracing::error!(analysis_id = %id, error = %e, "Outcome write failed");
                        self.mark_failed(id, &e.to_string());
                    }
                }
            }
            Err(e) => {
                tracing::warn!(analysis_id = %id, error = %e, "Analysis pipeline failed");
                self.mark_failed(id, &e.to_string());
            }
        }
    }

    /// Guarded PROCESSING → FAILED; a concurrent cancel wins.
    fn mark_failed(&self, id: Uuid, error: &str) {
        match self.analyses.transition(
            &id,
            &[AnalysisStatus::Processing],
            AnalysisStatus::Failed,
            Some(error),
        ) {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(analysis_id = %id, "Failure not recorded: analysis already terminal");
            }
            Err(e) => {
                tracing::error!(analysis_id = %id, error = %e, "Could not mark analysis failed");
            }
        }
    }
}
