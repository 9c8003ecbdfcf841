//! Sources of embedding vectors.

mod http;
mod stub;

pub use http::{HttpEmbeddingProvider, HttpProviderConfig};
pub use stub::StubEmbeddingProvider;

use crate::SemanticError;
use async_trait::async_trait;

/// Something that turns canonical text into vectors.
///
/// Implementations return one vector per input text, in order. Width and
/// count are validated by the generator, not here.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model tag stored next to every vector this provider produces.
    fn model(&self) -> &str;

    /// Short label for logs and the circuit breaker.
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SemanticError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SemanticError::InvalidResponse("provider returned no vectors".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SemanticError>;
}

/// L2-normalize in place. Zero vectors are left untouched.
pub fn l2_normalize_in_place(v: &mut [f32]) {
    let norm_sq: f32 = v.iter().map(|x| x * x).sum();
    if norm_sq > 0.0 {
        let inv_norm = norm_sq.sqrt().recip();
        for x in v.iter_mut() {
            *x *= inv_norm;
        }
    }
}
