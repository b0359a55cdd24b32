//! Router setup with all API routes and middleware.

use std::future::Future;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use ratewise_core::error::RatewiseError;

use crate::handlers;
use crate::state::AppState;

/// Rate sheets can carry thousands of routes.
const RATE_SHEET_BODY_LIMIT: usize = 8 * 1024 * 1024;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // Local tooling on the service port and the one above it.
    let port = state.config.general.port;
    let origins: Vec<HeaderValue> = [port, port.saturating_add(1)]
        .iter()
        .flat_map(|p| [format!("http://127.0.0.1:{}", p), format!("http://localhost:{}", p)])
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    let ingestion_routes = Router::new()
        .route(
            "/rate-sheets",
            post(handlers::ingest_rate_sheet).get(handlers::list_rate_sheets),
        )
        .layer(DefaultBodyLimit::max(RATE_SHEET_BODY_LIMIT));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/resolve", post(handlers::resolve))
        .route("/rate-sheets/{id}", get(handlers::get_rate_sheet))
        .route("/ingestion/dead-letters", get(handlers::dead_letters))
        .route(
            "/ingestion/dead-letters/{id}/requeue",
            post(handlers::requeue_dead_letter),
        )
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .merge(ingestion_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve on `127.0.0.1:port` until `shutdown` resolves.
pub async fn serve<F>(state: AppState, port: u16, shutdown: F) -> Result<(), RatewiseError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("127.0.0.1:{}", port);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RatewiseError::Api(format!("Failed to bind {}: {}", addr, e)))?;
    tracing::info!(addr = %addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| RatewiseError::Api(format!("Server error: {}", e)))?;

    tracing::info!("API server stopped");
    Ok(())
}
