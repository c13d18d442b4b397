pub mod extraction;
pub mod processor;
pub mod rag;
pub mod rules;
pub mod validation;
