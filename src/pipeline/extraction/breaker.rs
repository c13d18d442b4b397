//! Circuit breaker for the vision-model client.
//!
//! State is owned by the breaker instance and shared by handle, so tests and
//! independent extractors get independent breakers. Counting is guarded by a
//! mutex: batches sharing one extractor see a consistent failure count.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::ExtractionError;

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long after the last failure the circuit half-opens.
    pub reset_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    /// A half-open trial call is in flight.
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Gate a call. Rejects immediately while open; after the reset window
    /// elapses, admits exactly one half-open trial.
    pub fn check(&self) -> Result<(), ExtractionError> {
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        if state.consecutive_failures < self.config.failure_threshold {
            return Ok(());
        }
        match state.last_failure {
            Some(at) if at.elapsed() >= self.config.reset_window => {
                if state.trial_in_flight {
                    return Err(ExtractionError::CircuitOpen);
                }
                state.trial_in_flight = true;
                tracing::info!("Circuit breaker half-open, admitting trial call");
                Ok(())
            }
            _ => Err(ExtractionError::CircuitOpen),
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        if state.consecutive_failures >= self.config.failure_threshold {
            tracing::info!("Circuit breaker closed after successful trial");
        }
        state.consecutive_failures = 0;
        state.last_failure = None;
        state.trial_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        state.consecutive_failures += 1;
        state.last_failure = Some(Instant::now());
        state.trial_in_flight = false;
        if state.consecutive_failures == self.config.failure_threshold {
            tracing::warn!(
                failures = state.consecutive_failures,
                "Circuit breaker opened"
            );
        }
    }

    /// Non-mutating probe: does not consume the half-open trial slot.
    pub fn is_open(&self) -> bool {
        let state = self.state.lock().expect("breaker mutex poisoned");
        if state.consecutive_failures < self.config.failure_threshold {
            return false;
        }
        match state.last_failure {
            Some(at) if at.elapsed() >= self.config.reset_window => state.trial_in_flight,
            _ => true,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
