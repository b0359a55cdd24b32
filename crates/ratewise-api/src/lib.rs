//! Ratewise API crate - axum HTTP surface for ingestion and resolution.
//!
//! Exposes rate-sheet ingestion, hybrid resolution with the dispatch
//! decision, read access to stored sheets, dead-letter reconciliation and a
//! health probe.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, serve};
pub use state::AppState;
