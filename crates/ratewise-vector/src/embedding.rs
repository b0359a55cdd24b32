//! Embedding service trait and the token-hashing embedder.
//!
//! `HashingEmbedder` maps every alphanumeric token onto one of `dimensions`
//! buckets with a stable FNV-1a hash and L2-normalizes the counts. Lexical
//! overlap between a hint and a sheet's raw text therefore yields cosine
//! similarity in `[0, 1]`. Model-backed services plug in behind the same
//! trait.

use std::future::Future;
use std::pin::Pin;

use ratewise_core::error::RatewiseError;

/// Default dimensionality, matching common sentence-transformer models.
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Service for generating text embeddings.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, RatewiseError>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// `EmbeddingService::embed` returns `impl Future` and so cannot be used
/// behind `dyn`. Every `EmbeddingService` gets this trait through the
/// blanket impl below.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>, RatewiseError>> + Send + 'a>>;

    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>, RatewiseError>> + Send + 'a>> {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

/// Deterministic bag-of-tokens embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn embed_sync(&self, text: &str) -> Result<Vec<f32>, RatewiseError> {
        let mut vector = vec![0.0f32; self.dimensions];
        let mut tokens = 0usize;
        for token in tokenize(text) {
            let bucket = (fnv1a(token.as_bytes()) % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
            tokens += 1;
        }
        if tokens == 0 {
            return Err(RatewiseError::Embedding(
                "Cannot embed text without tokens".to_string(),
            ));
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        for v in &mut vector {
            *v /= norm;
        }
        Ok(vector)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl EmbeddingService for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RatewiseError> {
        self.embed_sync(text)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Lower-cased alphanumeric runs.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_embedding_dimension_and_norm() {
        let embedder = HashingEmbedder::default();
        let v = embedder.embed("Maersk Mumbai Chennai").await.unwrap();
        assert_eq!(v.len(), 384);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_embedding_deterministic_and_case_insensitive() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("Maersk  Q1 rates").await.unwrap();
        let b = embedder.embed("maersk q1 RATES").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_overlap_scores_higher_than_disjoint() {
        let embedder = HashingEmbedder::default();
        let sheet = embedder
            .embed("Maersk ocean rates Mumbai to Chennai FCL-40ft")
            .await
            .unwrap();
        let close = embedder.embed("maersk chennai").await.unwrap();
        let far = embedder.embed("air freight Frankfurt").await.unwrap();
        assert!(cosine(&sheet, &close) > cosine(&sheet, &far));
        assert!(cosine(&sheet, &far) >= 0.0);
    }

    #[tokio::test]
    async fn test_empty_text_is_an_error() {
        let embedder = HashingEmbedder::default();
        for text in ["", "   ", "--/--"] {
            assert!(matches!(
                embedder.embed(text).await,
                Err(RatewiseError::Embedding(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_dyn_embedding_service() {
        let embedder: Box<dyn DynEmbeddingService> = Box::new(HashingEmbedder::new(16));
        assert_eq!(embedder.dimensions(), 16);
        assert_eq!(embedder.embed_boxed("hello").await.unwrap().len(), 16);
    }
}
