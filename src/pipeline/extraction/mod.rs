//! Evidence extraction: resilient vision-model client plus the typed
//! per-document extractors and the batch merge.

pub mod batch;
pub mod breaker;
pub mod client;
pub mod cost;
pub mod extractors;
pub mod openai;
pub mod types;

pub use batch::{BatchExtractionResult, BatchExtractor};
pub use breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use client::{CallMetrics, ExtractionOutcome, ResilientExtractionClient, RetryConfig};
pub use extractors::{
    CalibrationCertificateExtractor, DocumentExtractor, ThermalImageExtractor,
    VisiblePhotoExtractor,
};
pub use types::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Rate limited by vision model: {0}")]
    RateLimited(String),

    #[error("HTTP transport error: {0}")]
    Http(String),

    #[error("Vision model API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Vision service unavailable: circuit breaker open")]
    CircuitOpen,

    #[error("Empty response from vision model")]
    EmptyResponse,

    #[error("No documents to extract")]
    EmptyBatch,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ExtractionError {
    /// Transient errors are worth another attempt with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited(_) | Self::Http(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Rate-limit errors additionally trigger the fallback-model switch.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_transient_and_rate_limit() {
        let e = ExtractionError::RateLimited("429".into());
        assert!(e.is_transient());
        assert!(e.is_rate_limit());
    }

    #[test]
    fn server_errors_are_transient() {
        let e = ExtractionError::Api {
            status: 503,
            message: "overloaded".into(),
        };
        assert!(e.is_transient());
        assert!(!e.is_rate_limit());
    }

    #[test]
    fn client_errors_are_not_transient() {
        let e = ExtractionError::Api {
            status: 400,
            message: "bad request".into(),
        };
        assert!(!e.is_transient());
        assert!(!ExtractionError::CircuitOpen.is_transient());
    }
}
