//! Retrieval-augmented context and the loop-learning index.
//!
//! Completed analyses and user corrections are summarized, embedded, and
//! appended to the knowledge store; future extractions retrieve the closest
//! entries to bias their prompts.

pub mod context;
pub mod embedder;
pub mod index;
pub mod retrieval;
pub mod store;
pub mod types;

pub use context::{build_context, ContextBudget};
pub use embedder::{HashingEmbedder, EMBEDDING_DIM};
pub use index::{index_analysis, index_correction};
pub use retrieval::{cosine_similarity, search};
pub use store::InMemoryKnowledgeStore;
pub use types::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Knowledge store error: {0}")]
    Store(String),
}
