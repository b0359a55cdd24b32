//! Ratewise storage crate: SQLite persistence for rate sheets.
//!
//! A WAL-mode SQLite database with migrations, the rate sheet repository
//! (atomic write with supersession, route lookup), tier selection, the
//! durable retry queue, and persisted semantic records.

pub mod db;
pub mod migrations;
pub mod rates;
pub mod repository;
pub mod retry_queue;
pub mod semantic;
pub mod store;

pub use db::Database;
pub use rates::{extract_precise_rate, TierMatch};
pub use repository::{RateSheetRepository, RouteQuery, WriteOutcome};
pub use retry_queue::{PendingWrite, RetryCounts, RetryQueue, RetryStatus, RetryTask};
pub use semantic::{SemanticRecordRepository, SemanticRow};
pub use store::{RateStore, SqliteRateStore};
