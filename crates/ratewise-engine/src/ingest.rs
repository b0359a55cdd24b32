//! Two-phase ingestion of an extracted rate sheet.
//!
//! The semantic record is written first and must succeed: it is what makes
//! the upload discoverable at all. The structured write follows; when it
//! fails the full write is queued for the retry worker and ingestion still
//! succeeds. A write that outlives its budget is queued the same way. Only a
//! failure to queue is reported as a partial ingestion.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use ratewise_core::error::RatewiseError;
use ratewise_core::types::{ParsedRateSheet, RateSheetDocument, Route};
use ratewise_core::validation::validate_sheet;
use ratewise_core::LocationNormalizer;
use ratewise_storage::{PendingWrite, RateStore, RetryQueue, WriteOutcome};
use ratewise_vector::{build_raw_text, DynEmbeddingService, SemanticIndex, SemanticRecord};

use crate::retry::{run_blocking, BackoffPolicy};

/// State of the structured half of an ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StructuredWrite {
    Persisted {
        /// Older documents this upload superseded.
        superseded: Vec<Uuid>,
        /// Set when a newer overlapping document already existed.
        superseded_by: Option<Uuid>,
    },
    PendingRetry {
        task_id: Uuid,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub document_id: Uuid,
    pub route_count: usize,
    pub structured: StructuredWrite,
}

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct IngestionCoordinator {
    index: Arc<dyn SemanticIndex>,
    embedder: Arc<dyn DynEmbeddingService>,
    store: Arc<dyn RateStore>,
    queue: Arc<RetryQueue>,
    normalizer: Arc<LocationNormalizer>,
    backoff: BackoffPolicy,
    write_timeout: Duration,
}

impl IngestionCoordinator {
    pub fn new(
        index: Arc<dyn SemanticIndex>,
        embedder: Arc<dyn DynEmbeddingService>,
        store: Arc<dyn RateStore>,
        queue: Arc<RetryQueue>,
        normalizer: Arc<LocationNormalizer>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            index,
            embedder,
            store,
            queue,
            normalizer,
            backoff,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Budget for the inline structured write.
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Ingest one extraction result under a fresh document ID.
    ///
    /// Validation, embedding and semantic-index failures write nothing and
    /// are returned as errors.
    pub async fn ingest(&self, sheet: ParsedRateSheet) -> Result<IngestReceipt, RatewiseError> {
        validate_sheet(&sheet, &self.normalizer)?;
        let (document, routes) = self.materialize(sheet);
        let document_id = document.document_id;

        let raw_text = build_raw_text(&document, &routes);
        let embedding = self.embedder.embed_boxed(&raw_text).await?;
        self.index
            .put(SemanticRecord {
                document_id,
                organization_id: document.organization_id.clone(),
                embedding,
                raw_text,
            })
            .await?;

        let route_count = routes.len();
        // Writes are idempotent per document, so a write that commits after
        // its budget elapsed leaves the queued retry nothing to do.
        let write = tokio::time::timeout(
            self.write_timeout,
            self.store.write_sheet(document.clone(), routes.clone()),
        )
        .await
        .unwrap_or_else(|_| {
            Err(RatewiseError::Timeout(format!(
                "structured write exceeded {} ms",
                self.write_timeout.as_millis()
            )))
        });
        let structured = match write {
            Ok(WriteOutcome::Written {
                superseded,
                superseded_by,
            }) => StructuredWrite::Persisted {
                superseded,
                superseded_by,
            },
            Ok(WriteOutcome::AlreadyPresent) => StructuredWrite::Persisted {
                superseded: Vec::new(),
                superseded_by: None,
            },
            Err(e) => self.defer(PendingWrite { document, routes }, e).await?,
        };

        info!(
            %document_id,
            routes = route_count,
            pending_retry = matches!(structured, StructuredWrite::PendingRetry { .. }),
            "Rate sheet ingested"
        );
        Ok(IngestReceipt {
            document_id,
            route_count,
            structured,
        })
    }

    async fn defer(&self, write: PendingWrite, cause: RatewiseError) -> Result<StructuredWrite, RatewiseError> {
        let document_id = write.document.document_id;
        let cause_message = cause.to_string();
        warn!(%document_id, error = %cause, "Structured write failed, queueing retry");

        let queue = Arc::clone(&self.queue);
        let next_attempt_at = self.backoff.next_attempt_at(1);
        let message = cause_message.clone();
        match run_blocking(move || queue.enqueue(&write, &message, next_attempt_at)).await {
            Ok(task) => Ok(StructuredWrite::PendingRetry {
                task_id: task.task_id,
                error: cause_message,
            }),
            Err(queue_error) => {
                error!(
                    %document_id,
                    error = %cause,
                    queue_error = %queue_error,
                    "Structured write could not be queued for retry"
                );
                Err(RatewiseError::PartialIngestion {
                    document_id,
                    reason: format!(
                        "structured write failed ({}) and the retry could not be queued ({})",
                        cause_message, queue_error
                    ),
                })
            }
        }
    }

    fn materialize(&self, sheet: ParsedRateSheet) -> (RateSheetDocument, Vec<Route>) {
        let document_id = Uuid::new_v4();
        let routes = sheet
            .routes
            .into_iter()
            .map(|parsed| Route {
                route_id: Uuid::new_v4(),
                document_id,
                origin: self.normalizer.normalize(&parsed.origin),
                destination: self.normalizer.normalize(&parsed.destination),
                origin_code: parsed.origin_code,
                destination_code: parsed.destination_code,
                container_type: parsed.container_type,
                transit_time_days: parsed.transit_time_days,
                valid_from: parsed.valid_from,
                valid_to: parsed.valid_to,
                routing: parsed.routing,
                free_detention_days: parsed.free_detention_days,
                remarks: parsed.remarks,
                tiers: parsed.tiers,
                surcharges: parsed.surcharges,
            })
            .collect();

        let document = RateSheetDocument {
            document_id,
            organization_id: sheet.organization_id,
            uploader_id: sheet.uploader_id,
            file_name: sheet.file_name,
            carrier_name: sheet.carrier_name,
            title: sheet.title,
            sheet_type: sheet.sheet_type,
            uploaded_at: Utc::now(),
            superseded_by: None,
            surcharges: sheet.surcharges,
        };
        (document, routes)
    }
}
