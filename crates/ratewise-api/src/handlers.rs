//! Route handler functions for all API endpoints.
//!
//! Each handler extracts query/path parameters via axum extractors, calls
//! into the engine or the stores held by [`AppState`] and returns JSON.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use ratewise_core::error::RatewiseError;
use ratewise_core::types::{
    IntegrityIssue, ParsedRateSheet, QueryCriteria, RateSheetDocument, ResolvedMatch,
    StoredRateSheet,
};
use ratewise_core::ContainerType;
use ratewise_engine::{Decision, IngestReceipt, ResolutionDiagnostics};
use ratewise_storage::{RetryStatus, RetryTask};

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: u64 = 50;
const MAX_LIST_LIMIT: u64 = 500;

fn clamp_limit(limit: Option<u64>) -> u64 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid ID: {}", raw)))
}

fn require_organization(organization_id: Option<String>) -> Result<String, ApiError> {
    match organization_id {
        Some(org) if !org.trim().is_empty() => Ok(org),
        _ => Err(ApiError::BadRequest(
            "'organization_id' query parameter is required".to_string(),
        )),
    }
}

/// Run blocking queue work off the async executor.
async fn blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, RatewiseError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("Task failed: {}", e)))?
        .map_err(ApiError::from)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub semantic_records: u64,
    pub pending_retries: u64,
    pub dead_letters: u64,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let semantic_records = state.index.len().await?;
    let queue = state.retry_queue.clone();
    let counts = blocking(move || queue.counts()).await?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        semantic_records,
        pending_retries: counts.pending,
        dead_letters: counts.dead,
    }))
}

// =============================================================================
// Resolution
// =============================================================================

/// Body of POST /resolve. Accepts snake_case or camelCase keys.
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    #[serde(alias = "organizationId")]
    pub organization_id: String,
    pub origin: String,
    pub destination: String,
    #[serde(default, alias = "containerType")]
    pub container_type: Option<String>,
    /// Kilograms.
    #[serde(default)]
    pub weight: Option<f64>,
    /// Defaults to today (UTC).
    #[serde(default, alias = "asOf")]
    pub as_of: Option<NaiveDate>,
    #[serde(default, alias = "freeTextHint")]
    pub free_text_hint: Option<String>,
    #[serde(default, alias = "includeSuperseded")]
    pub include_superseded: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub matches: Vec<ResolvedMatch>,
    pub decision: Decision,
    pub integrity_issues: Vec<IntegrityIssue>,
    pub diagnostics: ResolutionDiagnostics,
}

/// POST /resolve - ranked matches plus the auto-send / review decision.
pub async fn resolve(
    State(state): State<AppState>,
    Json(body): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let container_type = body
        .container_type
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(ContainerType::parse);
    let criteria = QueryCriteria {
        organization_id: body.organization_id,
        origin: body.origin,
        destination: body.destination,
        container_type,
        weight: body.weight,
        as_of: body.as_of.unwrap_or_else(|| Utc::now().date_naive()),
        include_superseded: body.include_superseded,
    };

    let resolution = state
        .resolver
        .resolve(&criteria, body.free_text_hint.as_deref())
        .await?;
    let decision = state.policy.decide_resolution(&resolution);
    info!(
        organization_id = %criteria.organization_id,
        matches = resolution.matches.len(),
        auto_send = decision.is_auto_send(),
        "Resolve request served"
    );

    Ok(Json(ResolveResponse {
        matches: resolution.matches,
        decision,
        integrity_issues: resolution.integrity_issues,
        diagnostics: resolution.diagnostics,
    }))
}

// =============================================================================
// Rate sheets
// =============================================================================

/// POST /rate-sheets - ingest one extraction result.
pub async fn ingest_rate_sheet(
    State(state): State<AppState>,
    Json(sheet): Json<ParsedRateSheet>,
) -> Result<(StatusCode, Json<IngestReceipt>), ApiError> {
    let receipt = state.coordinator.ingest(sheet).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

#[derive(Debug, Deserialize)]
pub struct ListRateSheetsParams {
    pub organization_id: Option<String>,
    pub include_superseded: Option<bool>,
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RateSheetListResponse {
    pub documents: Vec<RateSheetDocument>,
}

/// GET /rate-sheets - document headers, newest first.
pub async fn list_rate_sheets(
    State(state): State<AppState>,
    Query(params): Query<ListRateSheetsParams>,
) -> Result<Json<RateSheetListResponse>, ApiError> {
    let organization_id = require_organization(params.organization_id)?;
    let documents = state
        .store
        .list_documents(
            &organization_id,
            params.include_superseded.unwrap_or(false),
            clamp_limit(params.limit),
        )
        .await?;
    Ok(Json(RateSheetListResponse { documents }))
}

#[derive(Debug, Deserialize)]
pub struct OrganizationParams {
    pub organization_id: Option<String>,
}

/// GET /rate-sheets/{id} - one document with its routes.
///
/// A document owned by another organization is reported as not found.
pub async fn get_rate_sheet(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<OrganizationParams>,
) -> Result<Json<StoredRateSheet>, ApiError> {
    let document_id = parse_id(&id)?;
    let organization_id = require_organization(params.organization_id)?;
    state
        .store
        .find_sheet(document_id, &organization_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Rate sheet {} not found", document_id)))
}

// =============================================================================
// Dead letters
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct DeadLetterParams {
    pub limit: Option<u64>,
}

/// A dead-lettered structured write, without its payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub task_id: Uuid,
    pub document_id: Uuid,
    pub organization_id: String,
    pub file_name: String,
    pub status: RetryStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<RetryTask> for DeadLetterEntry {
    fn from(task: RetryTask) -> Self {
        Self {
            task_id: task.task_id,
            document_id: task.document_id,
            organization_id: task.write.document.organization_id,
            file_name: task.write.document.file_name,
            status: task.status,
            attempts: task.attempts,
            last_error: task.last_error,
            next_attempt_at: task.next_attempt_at,
            updated_at: task.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeadLetterResponse {
    pub entries: Vec<DeadLetterEntry>,
}

/// GET /ingestion/dead-letters
pub async fn dead_letters(
    State(state): State<AppState>,
    Query(params): Query<DeadLetterParams>,
) -> Result<Json<DeadLetterResponse>, ApiError> {
    let queue = state.retry_queue.clone();
    let limit = clamp_limit(params.limit) as usize;
    let tasks = blocking(move || queue.list(Some(RetryStatus::Dead), limit)).await?;
    Ok(Json(DeadLetterResponse {
        entries: tasks.into_iter().map(DeadLetterEntry::from).collect(),
    }))
}

/// POST /ingestion/dead-letters/{id}/requeue - fresh attempt budget, due now.
pub async fn requeue_dead_letter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeadLetterEntry>, ApiError> {
    let task_id = parse_id(&id)?;
    let queue = state.retry_queue.clone();
    let task = blocking(move || queue.get(task_id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Retry task {} not found", task_id)))?;
    if task.status != RetryStatus::Dead {
        return Err(ApiError::Conflict(format!(
            "Retry task {} is still pending",
            task_id
        )));
    }

    let queue = state.retry_queue.clone();
    let requeued = blocking(move || queue.requeue(task_id, Utc::now())).await?;
    Ok(Json(DeadLetterEntry::from(requeued)))
}
