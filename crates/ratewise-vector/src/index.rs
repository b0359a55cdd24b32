//! Semantic index: one embedding per rate sheet upload.
//!
//! `VectorIndex` is an in-memory brute-force cosine index. Search is O(n),
//! which is fine for the number of rate sheets a single deployment holds.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ratewise_core::error::RatewiseError;

/// The searchable artifact of one upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticRecord {
    pub document_id: Uuid,
    pub organization_id: String,
    pub embedding: Vec<f32>,
    pub raw_text: String,
}

/// A single hit returned from a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub document_id: Uuid,
    /// Cosine similarity.
    pub score: f64,
}

/// Nearest-neighbour search over semantic records.
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// Store a record, replacing any previous record of the same document.
    async fn put(&self, record: SemanticRecord) -> Result<(), RatewiseError>;

    /// Top `top_k` documents by cosine similarity, best first.
    ///
    /// With `organization_id`, only that organization's records compete for
    /// the top-K slots.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        organization_id: Option<&str>,
    ) -> Result<Vec<SearchHit>, RatewiseError>;

    async fn len(&self) -> Result<u64, RatewiseError>;
}

#[derive(Debug, Clone)]
struct VectorEntry {
    organization_id: String,
    embedding: Vec<f32>,
}

/// In-memory vector index. Thread-safe via interior RwLock.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    entries: Arc<RwLock<HashMap<Uuid, VectorEntry>>>,
    dimensions: Option<usize>,
}

impl VectorIndex {
    /// Index accepting vectors of any length.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            dimensions: None,
        }
    }

    /// Index rejecting vectors whose length is not `dimensions`.
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: Some(dimensions),
            ..Self::new()
        }
    }

    /// Insert or overwrite the entry of `document_id`.
    pub fn insert(
        &self,
        document_id: Uuid,
        organization_id: &str,
        embedding: Vec<f32>,
    ) -> Result<(), RatewiseError> {
        self.check_dimensions(&embedding)?;
        let mut entries = self
            .entries
            .write()
            .map_err(|e| RatewiseError::Search(format!("Lock poisoned: {}", e)))?;
        entries.insert(
            document_id,
            VectorEntry {
                organization_id: organization_id.to_string(),
                embedding,
            },
        );
        Ok(())
    }

    /// The k nearest entries, best first. Equal scores order by document ID.
    pub fn nearest(
        &self,
        query: &[f32],
        k: usize,
        organization_id: Option<&str>,
    ) -> Result<Vec<SearchHit>, RatewiseError> {
        self.check_dimensions(query)?;
        let entries = self
            .entries
            .read()
            .map_err(|e| RatewiseError::Search(format!("Lock poisoned: {}", e)))?;

        let mut scored: Vec<SearchHit> = entries
            .iter()
            .filter(|(_, entry)| organization_id.map_or(true, |org| entry.organization_id == org))
            .map(|(id, entry)| SearchHit {
                document_id: *id,
                score: cosine_similarity(query, &entry.embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    pub fn count(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub(crate) fn check_dimensions(&self, vector: &[f32]) -> Result<(), RatewiseError> {
        match self.dimensions {
            Some(expected) if vector.len() != expected => Err(RatewiseError::Search(format!(
                "Vector has {} dimensions, index expects {}",
                vector.len(),
                expected
            ))),
            _ => Ok(()),
        }
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SemanticIndex for VectorIndex {
    async fn put(&self, record: SemanticRecord) -> Result<(), RatewiseError> {
        self.insert(record.document_id, &record.organization_id, record.embedding)
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        organization_id: Option<&str>,
    ) -> Result<Vec<SearchHit>, RatewiseError> {
        self.nearest(query, top_k, organization_id)
    }

    async fn len(&self) -> Result<u64, RatewiseError> {
        Ok(self.count() as u64)
    }
}

/// Cosine similarity; 0.0 for zero-magnitude or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();
    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(i: usize, dims: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dims];
        v[i] = 1.0;
        v
    }

    #[test]
    fn test_nearest_orders_by_similarity() {
        let index = VectorIndex::new();
        let close = Uuid::new_v4();
        let far = Uuid::new_v4();
        index.insert(close, "org-1", vec![1.0, 0.1, 0.0]).unwrap();
        index.insert(far, "org-1", vec![0.0, 0.0, 1.0]).unwrap();

        let hits = index.nearest(&[1.0, 0.0, 0.0], 10, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document_id, close);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_organization_scope() {
        let index = VectorIndex::new();
        let mine = Uuid::new_v4();
        index.insert(mine, "org-1", unit(0, 4)).unwrap();
        for _ in 0..5 {
            index.insert(Uuid::new_v4(), "org-2", unit(0, 4)).unwrap();
        }

        let hits = index.nearest(&unit(0, 4), 1, Some("org-1")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, mine);
        assert_eq!(index.nearest(&unit(0, 4), 10, None).unwrap().len(), 6);
    }

    #[test]
    fn test_top_k_limit_and_overwrite() {
        let index = VectorIndex::new();
        let id = Uuid::new_v4();
        index.insert(id, "org-1", unit(0, 4)).unwrap();
        index.insert(id, "org-1", unit(1, 4)).unwrap();
        assert_eq!(index.count(), 1);

        for _ in 0..10 {
            index.insert(Uuid::new_v4(), "org-1", unit(2, 4)).unwrap();
        }
        assert_eq!(index.nearest(&unit(2, 4), 3, None).unwrap().len(), 3);
    }

    #[test]
    fn test_dimension_check() {
        let index = VectorIndex::with_dimensions(4);
        assert!(index.insert(Uuid::new_v4(), "org-1", vec![1.0; 3]).is_err());
        assert!(index.nearest(&[1.0; 5], 1, None).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn test_cosine_similarity_edge_cases() {
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_semantic_index_trait() {
        let index = VectorIndex::new();
        let record = SemanticRecord {
            document_id: Uuid::new_v4(),
            organization_id: "org-1".to_string(),
            embedding: unit(0, 4),
            raw_text: "text".to_string(),
        };
        index.put(record.clone()).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 1);
        let hits = index.search(&unit(0, 4), 5, Some("org-1")).await.unwrap();
        assert_eq!(hits[0].document_id, record.document_id);
    }
}
