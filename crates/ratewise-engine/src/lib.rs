//! Ratewise engine: ingestion, retry, resolution and dispatch.
//!
//! Ties the rate store, the semantic index and the embedding service
//! together. Everything here is request-scoped except the retry worker,
//! which runs for the lifetime of the process.

pub mod dispatch;
pub mod ingest;
pub mod resolver;
pub mod retry;
pub mod scoring;

pub use dispatch::{Decision, DispatchPolicy, ReviewReason};
pub use ingest::{IngestReceipt, IngestionCoordinator, StructuredWrite};
pub use resolver::{HybridResolver, Resolution, ResolutionDiagnostics};
pub use retry::{BackoffPolicy, RetryPassReport, RetryWorker};
pub use scoring::MatchScorer;
