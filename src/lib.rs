pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod service; // Orchestrator surface: create/cancel/reanalyze/feedback

pub use service::{AnalysisService, ServiceConfig, ServiceError};

use tracing_subscriber::EnvFilter;

/// Initialize tracing for binaries and test harnesses embedding the engine.
/// Respects `RUST_LOG`, falling back to the crate default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();
}
