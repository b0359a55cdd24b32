//! SQLite-persisted semantic index.
//!
//! Records are written through to the `semantic_records` table and served
//! from an in-memory [`VectorIndex`] warmed at open.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use ratewise_core::error::RatewiseError;
use ratewise_storage::{SemanticRecordRepository, SemanticRow};

use crate::index::{SearchHit, SemanticIndex, SemanticRecord, VectorIndex};

pub struct SqliteSemanticIndex {
    repo: Arc<SemanticRecordRepository>,
    cache: VectorIndex,
}

impl SqliteSemanticIndex {
    /// Load every stored record into memory.
    pub fn open(repo: Arc<SemanticRecordRepository>, dimensions: usize) -> Result<Self, RatewiseError> {
        let cache = VectorIndex::with_dimensions(dimensions);
        let rows = repo.load_all()?;
        let count = rows.len();
        for row in rows {
            cache.insert(row.document_id, &row.organization_id, row.embedding)?;
        }
        info!(records = count, dimensions, "Semantic index loaded");
        Ok(Self { repo, cache })
    }
}

#[async_trait]
impl SemanticIndex for SqliteSemanticIndex {
    async fn put(&self, record: SemanticRecord) -> Result<(), RatewiseError> {
        self.cache.check_dimensions(&record.embedding)?;
        let row = SemanticRow {
            document_id: record.document_id,
            organization_id: record.organization_id,
            embedding: record.embedding,
            raw_text: record.raw_text,
        };
        let repo = Arc::clone(&self.repo);
        let row = tokio::task::spawn_blocking(move || repo.upsert(&row).map(|_| row))
            .await
            .map_err(|e| RatewiseError::Storage(format!("Semantic write task failed: {}", e)))??;

        self.cache
            .insert(row.document_id, &row.organization_id, row.embedding)
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        organization_id: Option<&str>,
    ) -> Result<Vec<SearchHit>, RatewiseError> {
        self.cache.nearest(query, top_k, organization_id)
    }

    async fn len(&self) -> Result<u64, RatewiseError> {
        Ok(self.cache.count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratewise_storage::Database;
    use uuid::Uuid;

    fn record(org: &str, embedding: Vec<f32>) -> SemanticRecord {
        SemanticRecord {
            document_id: Uuid::new_v4(),
            organization_id: org.to_string(),
            embedding,
            raw_text: "Maersk MUMBAI CHENNAI".to_string(),
        }
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let db = Arc::new(Database::in_memory().unwrap());
        let repo = Arc::new(SemanticRecordRepository::new(Arc::clone(&db)));

        let index = SqliteSemanticIndex::open(Arc::clone(&repo), 3).unwrap();
        let r = record("org-1", vec![0.0, 1.0, 0.0]);
        index.put(r.clone()).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 1);

        let reopened = SqliteSemanticIndex::open(repo, 3).unwrap();
        let hits = reopened
            .search(&[0.0, 1.0, 0.0], 5, Some("org-1"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, r.document_id);
    }

    #[tokio::test]
    async fn test_wrong_dimension_not_cached() {
        let db = Arc::new(Database::in_memory().unwrap());
        let repo = Arc::new(SemanticRecordRepository::new(db));
        let index = SqliteSemanticIndex::open(repo, 3).unwrap();
        assert!(index.put(record("org-1", vec![1.0; 4])).await.is_err());
        assert_eq!(index.len().await.unwrap(), 0);
    }
}
