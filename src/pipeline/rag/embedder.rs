//! Deterministic fallback embedder.
//!
//! Feature-hashes lowercase word unigrams and bigrams into a fixed-size
//! vector (sha2 digest → bucket + sign), L2-normalized. Texts sharing
//! vocabulary land close under cosine similarity, which keeps retrieval
//! functional and testable without an external embedding service. The
//! `EmbeddingModel` trait remains the seam for a real one.

use sha2::{Digest, Sha256};

use super::types::EmbeddingModel;
use super::RagError;

/// Standard embedding dimension for the bundled embedder.
pub const EMBEDDING_DIM: usize = 384;

pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: EMBEDDING_DIM,
        }
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.as_bytes());
        let index = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
            % self.dimension;
        let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

impl EmbeddingModel for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let tokens = tokenize(text);
        let mut vector = vec![0.0_f32; self.dimension];

        for token in &tokens {
            let (index, sign) = self.bucket(token);
            vector[index] += sign;
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            let (index, sign) = self.bucket(&bigram);
            vector[index] += sign * 0.5;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::rag::retrieval::cosine_similarity;

    #[test]
    fn embedding_is_deterministic() {
        let embedder = HashingEmbedder::new();
        let a = embedder.embed("grounding test EQ-01").unwrap();
        let b = embedder.embed("grounding test EQ-01").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn embedding_is_normalized() {
        let embedder = HashingEmbedder::new();
        let v = embedder.embed("thermography inspection of transformer TR-07").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let embedder = HashingEmbedder::new();
        let v = embedder.embed("").unwrap();
        assert_eq!(v.len(), EMBEDDING_DIM);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn similar_texts_score_higher_than_unrelated() {
        let embedder = HashingEmbedder::new();
        let query = embedder.embed("grounding resistance measurement report").unwrap();
        let close = embedder
            .embed("grounding resistance report for substation feeder")
            .unwrap();
        let far = embedder
            .embed("quarterly cafeteria menu planning committee")
            .unwrap();

        assert!(
            cosine_similarity(&query, &close) > cosine_similarity(&query, &far),
            "related text should rank above unrelated text"
        );
    }

    #[test]
    fn custom_dimension_respected() {
        let embedder = HashingEmbedder::with_dimension(16);
        assert_eq!(embedder.dimension(), 16);
        assert_eq!(embedder.embed("abc").unwrap().len(), 16);
    }
}
