//! Ratewise vector crate: embeddings and the semantic index.
//!
//! Provides the embedding service trait with a deterministic token-hashing
//! implementation, the `SemanticIndex` trait with in-memory and
//! SQLite-persisted implementations, and the raw-text builder for the
//! searchable record of a rate sheet.

pub mod embedding;
pub mod index;
pub mod persistent;
pub mod raw_text;

pub use embedding::{DynEmbeddingService, EmbeddingService, HashingEmbedder, DEFAULT_DIMENSIONS};
pub use index::{cosine_similarity, SearchHit, SemanticIndex, SemanticRecord, VectorIndex};
pub use persistent::SqliteSemanticIndex;
pub use raw_text::build_raw_text;
