use async_trait::async_trait;
use fxhash::hash64;

use super::{l2_normalize_in_place, EmbeddingProvider};
use crate::SemanticError;

/// Deterministic provider for tests and local runs.
///
/// Vectors are sinusoids seeded by an fxhash of the text, so equal text
/// always maps to the same unit vector and no network is involved.
#[derive(Debug, Clone)]
pub struct StubEmbeddingProvider {
    model: String,
    dimension: usize,
}

impl StubEmbeddingProvider {
    pub fn new(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            model: model.into(),
            dimension,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let h = hash64(text.as_bytes());
        let mut v: Vec<f32> = (0..self.dimension)
            .map(|idx| {
                let mixed = h.rotate_left((idx % 64) as u32) ^ (idx as u64).wrapping_mul(0x9E37_79B9);
                ((mixed >> 40) as f32 * 0.0001).sin()
            })
            .collect();
        l2_normalize_in_place(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbeddingProvider {
    fn model(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "stub"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SemanticError> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_text_same_vector() {
        let stub = StubEmbeddingProvider::new("stub-v1", 64);
        assert_eq!(stub.vector_for("clutch"), stub.vector_for("clutch"));
        assert_ne!(stub.vector_for("clutch"), stub.vector_for("ace"));
    }

    #[test]
    fn vectors_have_unit_length() {
        let stub = StubEmbeddingProvider::new("stub-v1", 384);
        let v = stub.vector_for("title: amazing clutch");
        assert_eq!(v.len(), 384);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let stub = StubEmbeddingProvider::new("stub-v1", 8);
        let texts = vec!["a".to_string(), "b".to_string()];
        let out = stub.embed_batch(&texts).await.unwrap();
        assert_eq!(out[0], stub.vector_for("a"));
        assert_eq!(out[1], stub.vector_for("b"));
        assert_eq!(stub.embed("b").await.unwrap(), out[1]);
    }
}
