//! Deterministic rules engine: universal checks plus test-type-specific
//! checks, verdict derivation, and the banded score.

pub mod dates;
pub mod engine;
pub mod grounding;
pub mod megger;
pub mod thermography;

pub use dates::{is_expired, is_expiring_today};
pub use engine::{derive_verdict, evaluate, Evaluation};
