//! Persisted semantic records (embedding + raw text per document).

use std::sync::Arc;

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ratewise_core::error::RatewiseError;

use crate::db::Database;
use crate::repository::{parse_uuid, storage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticRow {
    pub document_id: Uuid,
    pub organization_id: String,
    pub embedding: Vec<f32>,
    pub raw_text: String,
}

pub struct SemanticRecordRepository {
    db: Arc<Database>,
}

impl SemanticRecordRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace the record of a document.
    pub fn upsert(&self, row: &SemanticRow) -> Result<(), RatewiseError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO semantic_records (document_id, organization_id, embedding, raw_text)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(document_id) DO UPDATE SET
                    organization_id = excluded.organization_id,
                    embedding = excluded.embedding,
                    raw_text = excluded.raw_text",
                params![
                    row.document_id.to_string(),
                    row.organization_id,
                    encode_embedding(&row.embedding),
                    row.raw_text,
                ],
            )
            .map_err(|e| RatewiseError::Storage(format!("Failed to save semantic record: {}", e)))?;
            Ok(())
        })
    }

    pub fn get(&self, document_id: Uuid) -> Result<Option<SemanticRow>, RatewiseError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT document_id, organization_id, embedding, raw_text
                     FROM semantic_records WHERE document_id = ?1",
                    params![document_id.to_string()],
                    |row| Ok(row_to_semantic(row)),
                )
                .optional()
                .map_err(storage)?;
            row.transpose()
        })
    }

    /// Every stored record, for warming an in-memory index.
    pub fn load_all(&self) -> Result<Vec<SemanticRow>, RatewiseError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT document_id, organization_id, embedding, raw_text
                     FROM semantic_records ORDER BY created_at ASC, document_id ASC",
                )
                .map_err(storage)?;
            let rows = stmt
                .query_map([], |row| Ok(row_to_semantic(row)))
                .map_err(storage)?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row.map_err(storage)??);
            }
            Ok(records)
        })
    }

    pub fn count(&self) -> Result<u64, RatewiseError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM semantic_records", [], |row| row.get(0))
                .map_err(storage)?;
            Ok(count as u64)
        })
    }
}

/// Little-endian f32 sequence.
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>, RatewiseError> {
    if blob.len() % 4 != 0 {
        return Err(RatewiseError::Storage(format!(
            "Embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn row_to_semantic(row: &Row<'_>) -> Result<SemanticRow, RatewiseError> {
    let id: String = row.get(0).map_err(storage)?;
    let blob: Vec<u8> = row.get(2).map_err(storage)?;
    Ok(SemanticRow {
        document_id: parse_uuid(&id)?,
        organization_id: row.get(1).map_err(storage)?,
        embedding: decode_embedding(&blob)?,
        raw_text: row.get(3).map_err(storage)?,
    })
}
