//! Resilient wrapper around the external vision-model call.
//!
//! Retry with exponential backoff, fallback-model switch on rate limits, a
//! per-instance circuit breaker, and cost/latency metrics. Backoff sleeps
//! suspend only the calling thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::cost::RateTable;
use super::types::{TokenUsage, VisionCall, VisionModelClient, VisionResponse};
use super::ExtractionError;
use crate::models::DetailLevel;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total call attempts (not additional retries).
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl RetryConfig {
    /// Backoff before retry `n` (0-indexed): `min(initial * multiplier^n, max)`.
    pub fn backoff_delay(&self, n: u32) -> Duration {
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(n as i32);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Per-call accounting, returned regardless of success.
#[derive(Debug, Clone)]
pub struct CallMetrics {
    pub attempts: u32,
    pub model_used: String,
    pub fallback_used: bool,
    pub usage: TokenUsage,
    pub estimated_cost_usd: f64,
    pub elapsed_ms: u64,
    pub image_count: usize,
}

/// Result of one resilient extraction call: raw model content on success,
/// the terminal error otherwise, metrics always.
#[derive(Debug)]
pub struct ExtractionOutcome {
    pub data: Option<String>,
    pub error: Option<ExtractionError>,
    pub metrics: CallMetrics,
}

impl ExtractionOutcome {
    pub fn is_success(&self) -> bool {
        self.data.is_some()
    }
}

pub struct ResilientExtractionClient {
    inner: Arc<dyn VisionModelClient>,
    primary_model: String,
    fallback_model: String,
    retry: RetryConfig,
    breaker: CircuitBreaker,
    rates: RateTable,
}

impl ResilientExtractionClient {
    pub fn new(
        inner: Arc<dyn VisionModelClient>,
        primary_model: &str,
        fallback_model: &str,
    ) -> Self {
        Self {
            inner,
            primary_model: primary_model.to_string(),
            fallback_model: fallback_model.to_string(),
            retry: RetryConfig::default(),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            rates: RateTable::default(),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = CircuitBreaker::new(config);
        self
    }

    pub fn with_rate_table(mut self, rates: RateTable) -> Self {
        self.rates = rates;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run one extraction with retry, fallback, and breaker protection.
    pub fn extract(
        &self,
        system: &str,
        prompt: &str,
        images: &[String],
        detail: DetailLevel,
    ) -> ExtractionOutcome {
        let start = Instant::now();
        let mut model = self.primary_model.clone();
        let mut fallback_used = false;
        let mut attempts = 0u32;
        let mut usage = TokenUsage::default();
        let mut last_error: Option<ExtractionError> = None;
        let mut response: Option<VisionResponse> = None;

        for attempt in 0..self.retry.max_retries {
            if let Err(e) = self.breaker.check() {
                tracing::warn!(model = %model, "Extraction rejected by circuit breaker");
                last_error = Some(e);
                break;
            }

            attempts += 1;
            tracing::debug!(model = %model, attempt = attempt + 1, "Vision extraction attempt");

            let call = VisionCall {
                model: model.clone(),
                system: system.to_string(),
                prompt: prompt.to_string(),
                images: images.to_vec(),
                detail,
            };

            match self.inner.call(&call) {
                Ok(resp) => {
                    self.breaker.record_success();
                    usage.add(resp.usage);
                    response = Some(resp);
                    break;
                }
                Err(e) => {
                    self.breaker.record_failure();
                    let transient = e.is_transient();
                    let rate_limited = e.is_rate_limit();
                    tracing::warn!(
                        model = %model,
                        attempt = attempt + 1,
                        error = %e,
                        transient,
                        "Vision extraction attempt failed"
                    );
                    last_error = Some(e);

                    if !transient {
                        break;
                    }
                    if rate_limited && model != self.fallback_model {
                        tracing::info!(
                            from = %model,
                            to = %self.fallback_model,
                            "Rate limited, switching to fallback model"
                        );
                        model = self.fallback_model.clone();
                        fallback_used = true;
                    }
                    if attempt + 1 < self.retry.max_retries {
                        std::thread::sleep(self.retry.backoff_delay(attempt));
                    }
                }
            }
        }

        let estimated_cost_usd = self.rates.estimate(&model, usage, images.len(), detail);
        let metrics = CallMetrics {
            attempts,
            model_used: model,
            fallback_used,
            usage,
            estimated_cost_usd,
            elapsed_ms: start.elapsed().as_millis() as u64,
            image_count: images.len(),
        };

        match response {
            Some(resp) => ExtractionOutcome {
                data: Some(resp.content),
                error: None,
                metrics,
            },
            None => {
                let error =
                    last_error.unwrap_or_else(|| ExtractionError::EmptyResponse);
                tracing::error!(
                    model = %metrics.model_used,
                    attempts = metrics.attempts,
                    error = %error,
                    "Vision extraction failed terminally"
                );
                ExtractionOutcome {
                    data: None,
                    error: Some(error),
                    metrics,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(4),
        }
    }

    /// Mock client scripted with a sequence of results.
    struct ScriptedClient {
        calls: AtomicUsize,
        models_seen: Mutex<Vec<String>>,
        script: Vec<Result<String, ExtractionError>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<String, ExtractionError>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                models_seen: Mutex::new(Vec::new()),
                script,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl VisionModelClient for ScriptedClient {
        fn call(&self, request: &VisionCall) -> Result<VisionResponse, ExtractionError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            self.models_seen
                .lock()
                .unwrap()
                .push(request.model.clone());
            match self.script.get(idx) {
                Some(Ok(content)) => Ok(VisionResponse {
                    content: content.clone(),
                    usage: TokenUsage {
                        input_tokens: 100,
                        output_tokens: 10,
                    },
                }),
                Some(Err(ExtractionError::RateLimited(m))) => {
                    Err(ExtractionError::RateLimited(m.clone()))
                }
                Some(Err(ExtractionError::Http(m))) => Err(ExtractionError::Http(m.clone())),
                Some(Err(ExtractionError::Api { status, message })) => Err(ExtractionError::Api {
                    status: *status,
                    message: message.clone(),
                }),
                Some(Err(_)) | None => Err(ExtractionError::EmptyResponse),
            }
        }
    }

    fn make_client(inner: Arc<ScriptedClient>) -> ResilientExtractionClient {
        ResilientExtractionClient::new(inner, "gpt-4o", "gpt-4o-mini")
            .with_retry_config(fast_retry())
    }

    #[test]
    fn backoff_delays_follow_formula() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff_delay(0), Duration::from_millis(1000));
        assert_eq!(retry.backoff_delay(1), Duration::from_millis(2000));
        assert_eq!(retry.backoff_delay(2), Duration::from_millis(4000));
        assert_eq!(retry.backoff_delay(3), Duration::from_millis(8000));
        // Capped at max_delay.
        assert_eq!(retry.backoff_delay(4), Duration::from_millis(10_000));
        assert_eq!(retry.backoff_delay(10), Duration::from_millis(10_000));
    }

    #[test]
    fn succeeds_first_try() {
        let inner = Arc::new(ScriptedClient::new(vec![Ok("result".into())]));
        let client = make_client(inner.clone());

        let outcome = client.extract("sys", "prompt", &[], DetailLevel::Auto);
        assert!(outcome.is_success());
        assert_eq!(outcome.data.as_deref(), Some("result"));
        assert_eq!(outcome.metrics.attempts, 1);
        assert!(!outcome.metrics.fallback_used);
        assert_eq!(inner.call_count(), 1);
    }

    #[test]
    fn always_failing_client_attempts_max_retries() {
        let inner = Arc::new(ScriptedClient::new(vec![
            Err(ExtractionError::Http("down".into())),
            Err(ExtractionError::Http("down".into())),
            Err(ExtractionError::Http("down".into())),
        ]));
        let client = make_client(inner.clone());

        let outcome = client.extract("sys", "prompt", &[], DetailLevel::Auto);
        assert!(!outcome.is_success());
        assert_eq!(outcome.metrics.attempts, 3);
        assert_eq!(inner.call_count(), 3);
        assert!(matches!(outcome.error, Some(ExtractionError::Http(_))));
    }

    #[test]
    fn recovers_after_transient_failure() {
        let inner = Arc::new(ScriptedClient::new(vec![
            Err(ExtractionError::Http("blip".into())),
            Ok("ok".into()),
        ]));
        let client = make_client(inner);

        let outcome = client.extract("sys", "prompt", &[], DetailLevel::Auto);
        assert!(outcome.is_success());
        assert_eq!(outcome.metrics.attempts, 2);
    }

    #[test]
    fn rate_limit_switches_to_fallback_model() {
        let inner = Arc::new(ScriptedClient::new(vec![
            Err(ExtractionError::RateLimited("429".into())),
            Ok("ok".into()),
        ]));
        let client = make_client(inner.clone());

        let outcome = client.extract("sys", "prompt", &[], DetailLevel::Auto);
        assert!(outcome.is_success());
        assert!(outcome.metrics.fallback_used);
        assert_eq!(outcome.metrics.model_used, "gpt-4o-mini");

        let models = inner.models_seen.lock().unwrap();
        assert_eq!(models.as_slice(), ["gpt-4o", "gpt-4o-mini"]);
    }

    #[test]
    fn non_transient_error_stops_immediately() {
        let inner = Arc::new(ScriptedClient::new(vec![Err(ExtractionError::Api {
            status: 400,
            message: "bad".into(),
        })]));
        let client = make_client(inner.clone());

        let outcome = client.extract("sys", "prompt", &[], DetailLevel::Auto);
        assert!(!outcome.is_success());
        assert_eq!(inner.call_count(), 1);
    }

    #[test]
    fn open_breaker_rejects_without_calling_model() {
        let inner = Arc::new(ScriptedClient::new(vec![]));
        let client = ResilientExtractionClient::new(inner.clone(), "gpt-4o", "gpt-4o-mini")
            .with_retry_config(fast_retry())
            .with_breaker_config(CircuitBreakerConfig {
                failure_threshold: 1,
                reset_window: Duration::from_secs(60),
            });

        client.breaker().record_failure();

        let outcome = client.extract("sys", "prompt", &[], DetailLevel::Auto);
        assert!(!outcome.is_success());
        assert_eq!(outcome.metrics.attempts, 0);
        assert_eq!(inner.call_count(), 0);
        assert!(matches!(outcome.error, Some(ExtractionError::CircuitOpen)));
    }

    #[test]
    fn breaker_half_opens_after_window() {
        let inner = Arc::new(ScriptedClient::new(vec![Ok("ok".into())]));
        let client = ResilientExtractionClient::new(inner.clone(), "gpt-4o", "gpt-4o-mini")
            .with_retry_config(fast_retry())
            .with_breaker_config(CircuitBreakerConfig {
                failure_threshold: 1,
                reset_window: Duration::from_millis(20),
            });

        client.breaker().record_failure();
        std::thread::sleep(Duration::from_millis(30));

        let outcome = client.extract("sys", "prompt", &[], DetailLevel::Auto);
        assert!(outcome.is_success(), "half-open trial should be admitted");
        assert_eq!(inner.call_count(), 1);
        assert!(!client.breaker().is_open());
    }

    #[test]
    fn metrics_include_cost_estimate() {
        let inner = Arc::new(ScriptedClient::new(vec![Ok("ok".into())]));
        let client = make_client(inner);

        let images = vec!["aGk=".to_string()];
        let outcome = client.extract("sys", "prompt", &images, DetailLevel::High);
        assert!(outcome.metrics.estimated_cost_usd > 0.0);
        assert_eq!(outcome.metrics.image_count, 1);
        assert_eq!(outcome.metrics.usage.input_tokens, 100);
    }
}
