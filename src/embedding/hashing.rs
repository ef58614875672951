use super::{EmbeddingError, EmbeddingProvider};
use async_trait::async_trait;

/// Deterministic offline embedder that hashes bytes into vector slots.
///
/// Identical texts always map to identical unit vectors, which keeps local runs and
/// threshold comparisons reproducible without a network provider.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Construct a hashing embedder producing vectors of `dimension` width.
    pub fn new(dimension: usize) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::Configuration(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];

        if text.is_empty() {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            let position = idx % self.dimension;
            embedding[position] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::GenerationFailed(
                "cannot embed empty text".to_string(),
            ));
        }
        Ok(self.encode(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &'static str {
        "hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_text_yields_identical_unit_vectors() {
        let embedder = HashingEmbedder::new(8).expect("embedder");
        let first = embedder.embed("fire damage").await.expect("vector");
        let second = embedder.embed("fire damage").await.expect("vector");
        assert_eq!(first, second);
        assert_eq!(first.len(), 8);
        let norm: f32 = first.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let embedder = HashingEmbedder::new(4).expect("embedder");
        assert!(embedder.embed("   ").await.is_err());
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(HashingEmbedder::new(0).is_err());
    }
}
