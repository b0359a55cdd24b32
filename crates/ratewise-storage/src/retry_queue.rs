//! Durable queue of structured writes awaiting retry.
//!
//! One task per document. A task is `pending` until it either succeeds
//! (and is deleted) or exhausts its attempts and becomes `dead`, where it
//! waits for manual reconciliation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use ratewise_core::error::RatewiseError;
use ratewise_core::types::{RateSheetDocument, Route};

use crate::db::Database;
use crate::repository::{parse_uuid, storage};

/// The full structured write of one document, as carried by a retry task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub document: RateSheetDocument,
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStatus {
    Pending,
    Dead,
}

impl RetryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryStatus::Pending => "pending",
            RetryStatus::Dead => "dead",
        }
    }

    fn parse(raw: &str) -> Result<Self, RatewiseError> {
        match raw {
            "pending" => Ok(RetryStatus::Pending),
            "dead" => Ok(RetryStatus::Dead),
            other => Err(RatewiseError::Storage(format!(
                "Unknown retry status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryTask {
    pub task_id: Uuid,
    pub document_id: Uuid,
    pub write: PendingWrite,
    /// Failed attempts so far, including the original write.
    pub attempts: u32,
    pub status: RetryStatus,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryCounts {
    pub pending: u64,
    pub dead: u64,
}

const TASK_COLUMNS: &str = "id, document_id, payload, attempts, status, next_attempt_at, \
     last_error, created_at, updated_at";

/// SQLite-backed retry queue.
pub struct RetryQueue {
    db: Arc<Database>,
}

impl RetryQueue {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Queue a failed structured write.
    ///
    /// The first attempt already failed, so the task starts at one attempt.
    /// Enqueueing a document that is already queued returns the existing task.
    pub fn enqueue(
        &self,
        write: &PendingWrite,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<RetryTask, RatewiseError> {
        let payload = serde_json::to_string(write)?;
        let document_id = write.document.document_id.to_string();
        let now = Utc::now().timestamp_millis();

        let inserted = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO retry_tasks
                    (id, document_id, payload, attempts, status, next_attempt_at, last_error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, 'pending', ?4, ?5, ?6, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    document_id,
                    payload,
                    next_attempt_at.timestamp_millis(),
                    error,
                    now,
                ],
            )
            .map_err(|e| RatewiseError::Storage(format!("Failed to enqueue retry: {}", e)))
        })?;

        let task = self.find_by_document(write.document.document_id)?.ok_or_else(|| {
            RatewiseError::Storage(format!("Retry task for {} vanished", document_id))
        })?;
        if inserted > 0 {
            warn!(
                document_id = %task.document_id,
                task_id = %task.task_id,
                next_attempt_at = %task.next_attempt_at,
                "Structured write queued for retry"
            );
        }
        Ok(task)
    }

    /// Pending tasks due at `now`, earliest first.
    pub fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<RetryTask>, RatewiseError> {
        self.select(
            &format!(
                "SELECT {} FROM retry_tasks
                 WHERE status = 'pending' AND next_attempt_at <= ?1
                 ORDER BY next_attempt_at ASC, created_at ASC
                 LIMIT ?2",
                TASK_COLUMNS
            ),
            params![now.timestamp_millis(), limit as i64],
        )
    }

    /// Tasks with the given status (all when `None`), oldest first.
    pub fn list(
        &self,
        status: Option<RetryStatus>,
        limit: usize,
    ) -> Result<Vec<RetryTask>, RatewiseError> {
        self.select(
            &format!(
                "SELECT {} FROM retry_tasks
                 WHERE (?1 IS NULL OR status = ?1)
                 ORDER BY created_at ASC, id ASC
                 LIMIT ?2",
                TASK_COLUMNS
            ),
            params![status.map(|s| s.as_str()), limit as i64],
        )
    }

    pub fn get(&self, task_id: Uuid) -> Result<Option<RetryTask>, RatewiseError> {
        self.select_one(
            &format!("SELECT {} FROM retry_tasks WHERE id = ?1", TASK_COLUMNS),
            &task_id.to_string(),
        )
    }

    pub fn find_by_document(&self, document_id: Uuid) -> Result<Option<RetryTask>, RatewiseError> {
        self.select_one(
            &format!(
                "SELECT {} FROM retry_tasks WHERE document_id = ?1",
                TASK_COLUMNS
            ),
            &document_id.to_string(),
        )
    }

    /// Count one more failed attempt and reschedule. Returns the new attempt count.
    pub fn record_failure(
        &self,
        task_id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<u32, RatewiseError> {
        self.fail(task_id, error, RetryStatus::Pending, next_attempt_at)
    }

    /// Count the final failed attempt and move the task to the dead-letter state.
    pub fn mark_dead(&self, task_id: Uuid, error: &str) -> Result<u32, RatewiseError> {
        self.fail(task_id, error, RetryStatus::Dead, Utc::now())
    }

    /// Remove a task after its write succeeded.
    pub fn complete(&self, task_id: Uuid) -> Result<(), RatewiseError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM retry_tasks WHERE id = ?1",
                params![task_id.to_string()],
            )
            .map_err(|e| RatewiseError::Storage(format!("Failed to complete retry task: {}", e)))?;
            Ok(())
        })
    }

    /// Move a dead task back to pending with a fresh attempt budget.
    pub fn requeue(&self, task_id: Uuid, now: DateTime<Utc>) -> Result<RetryTask, RatewiseError> {
        let task = self
            .get(task_id)?
            .ok_or_else(|| RatewiseError::NotFound(format!("Retry task {}", task_id)))?;
        if task.status != RetryStatus::Dead {
            return Err(RatewiseError::Validation(format!(
                "Retry task {} is not dead-lettered",
                task_id
            )));
        }

        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE retry_tasks
                 SET status = 'pending', attempts = 0, next_attempt_at = ?1, updated_at = ?1
                 WHERE id = ?2",
                params![now.timestamp_millis(), task_id.to_string()],
            )
            .map_err(|e| RatewiseError::Storage(format!("Failed to requeue retry task: {}", e)))
        })?;
        info!(task_id = %task_id, document_id = %task.document_id, "Dead-lettered write requeued");

        self.get(task_id)?
            .ok_or_else(|| RatewiseError::NotFound(format!("Retry task {}", task_id)))
    }

    pub fn counts(&self) -> Result<RetryCounts, RatewiseError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT status, COUNT(*) FROM retry_tasks GROUP BY status")
                .map_err(storage)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(storage)?;

            let mut counts = RetryCounts::default();
            for row in rows {
                let (status, count) = row.map_err(storage)?;
                match RetryStatus::parse(&status)? {
                    RetryStatus::Pending => counts.pending = count as u64,
                    RetryStatus::Dead => counts.dead = count as u64,
                }
            }
            Ok(counts)
        })
    }

    fn fail(
        &self,
        task_id: Uuid,
        error: &str,
        status: RetryStatus,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<u32, RatewiseError> {
        self.db.with_conn(|conn| {
            let attempts: Option<u32> = conn
                .query_row(
                    "UPDATE retry_tasks
                     SET attempts = attempts + 1, status = ?1, next_attempt_at = ?2,
                         last_error = ?3, updated_at = ?4
                     WHERE id = ?5
                     RETURNING attempts",
                    params![
                        status.as_str(),
                        next_attempt_at.timestamp_millis(),
                        error,
                        Utc::now().timestamp_millis(),
                        task_id.to_string(),
                    ],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| RatewiseError::Storage(format!("Failed to update retry task: {}", e)))?;
            attempts.ok_or_else(|| RatewiseError::NotFound(format!("Retry task {}", task_id)))
        })
    }

    fn select_one(&self, sql: &str, key: &str) -> Result<Option<RetryTask>, RatewiseError> {
        self.db.with_conn(|conn| {
            let task = conn
                .query_row(sql, params![key], |row| Ok(row_to_task(row)))
                .optional()
                .map_err(storage)?;
            task.transpose()
        })
    }

    fn select<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<RetryTask>, RatewiseError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql).map_err(storage)?;
            let rows = stmt
                .query_map(params, |row| Ok(row_to_task(row)))
                .map_err(storage)?;

            let mut tasks = Vec::new();
            for row in rows {
                tasks.push(row.map_err(storage)??);
            }
            Ok(tasks)
        })
    }
}

fn row_to_task(row: &Row<'_>) -> Result<RetryTask, RatewiseError> {
    let id: String = row.get(0).map_err(storage)?;
    let document_id: String = row.get(1).map_err(storage)?;
    let payload: String = row.get(2).map_err(storage)?;
    let status: String = row.get(4).map_err(storage)?;

    Ok(RetryTask {
        task_id: parse_uuid(&id)?,
        document_id: parse_uuid(&document_id)?,
        write: serde_json::from_str(&payload)?,
        attempts: row.get(3).map_err(storage)?,
        status: RetryStatus::parse(&status)?,
        next_attempt_at: millis(row.get(5).map_err(storage)?)?,
        last_error: row.get(6).map_err(storage)?,
        created_at: millis(row.get(7).map_err(storage)?)?,
        updated_at: millis(row.get(8).map_err(storage)?)?,
    })
}

fn millis(ms: i64) -> Result<DateTime<Utc>, RatewiseError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| RatewiseError::Storage(format!("Invalid timestamp: {}", ms)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ratewise_core::types::RateSheetType;

    fn make_queue() -> RetryQueue {
        RetryQueue::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn pending_write() -> PendingWrite {
        PendingWrite {
            document: RateSheetDocument {
                document_id: Uuid::new_v4(),
                organization_id: "org-1".to_string(),
                uploader_id: "user-1".to_string(),
                file_name: "rates.xlsx".to_string(),
                carrier_name: "Maersk".to_string(),
                title: None,
                sheet_type: RateSheetType::Ocean,
                uploaded_at: Utc::now(),
                superseded_by: None,
                surcharges: vec![],
            },
            routes: vec![],
        }
    }

    #[test]
    fn test_enqueue_and_due() {
        let queue = make_queue();
        let now = Utc::now();
        let write = pending_write();
        let task = queue
            .enqueue(&write, "disk full", now + Duration::seconds(5))
            .unwrap();

        assert_eq!(task.attempts, 1);
        assert_eq!(task.status, RetryStatus::Pending);
        assert_eq!(task.write, write);
        assert_eq!(task.last_error.as_deref(), Some("disk full"));

        assert!(queue.due(now, 10).unwrap().is_empty());
        let due = queue.due(now + Duration::seconds(6), 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].task_id, task.task_id);
    }

    #[test]
    fn test_enqueue_same_document_twice_keeps_one_task() {
        let queue = make_queue();
        let write = pending_write();
        let first = queue.enqueue(&write, "a", Utc::now()).unwrap();
        let second = queue.enqueue(&write, "b", Utc::now()).unwrap();
        assert_eq!(first.task_id, second.task_id);
        assert_eq!(queue.counts().unwrap().pending, 1);
    }

    #[test]
    fn test_record_failure_increments_attempts() {
        let queue = make_queue();
        let task = queue.enqueue(&pending_write(), "a", Utc::now()).unwrap();
        let later = Utc::now() + Duration::minutes(1);
        assert_eq!(queue.record_failure(task.task_id, "b", later).unwrap(), 2);

        let reloaded = queue.get(task.task_id).unwrap().unwrap();
        assert_eq!(reloaded.attempts, 2);
        assert_eq!(reloaded.last_error.as_deref(), Some("b"));
        assert!(queue.due(Utc::now(), 10).unwrap().is_empty());
    }

    #[test]
    fn test_dead_letter_and_requeue() {
        let queue = make_queue();
        let task = queue.enqueue(&pending_write(), "a", Utc::now()).unwrap();
        queue.mark_dead(task.task_id, "gave up").unwrap();

        let counts = queue.counts().unwrap();
        assert_eq!(counts, RetryCounts { pending: 0, dead: 1 });
        assert!(queue.due(Utc::now() + Duration::days(1), 10).unwrap().is_empty());
        assert_eq!(queue.list(Some(RetryStatus::Dead), 10).unwrap().len(), 1);

        let requeued = queue.requeue(task.task_id, Utc::now()).unwrap();
        assert_eq!(requeued.status, RetryStatus::Pending);
        assert_eq!(requeued.attempts, 0);
        assert_eq!(queue.due(Utc::now(), 10).unwrap().len(), 1);
    }

    #[test]
    fn test_requeue_rejects_pending_and_missing_tasks() {
        let queue = make_queue();
        let task = queue.enqueue(&pending_write(), "a", Utc::now()).unwrap();
        assert!(matches!(
            queue.requeue(task.task_id, Utc::now()),
            Err(RatewiseError::Validation(_))
        ));
        assert!(queue.requeue(Uuid::new_v4(), Utc::now()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_complete_removes_task() {
        let queue = make_queue();
        let task = queue.enqueue(&pending_write(), "a", Utc::now()).unwrap();
        queue.complete(task.task_id).unwrap();
        assert!(queue.get(task.task_id).unwrap().is_none());
        assert!(queue.record_failure(task.task_id, "x", Utc::now()).unwrap_err().is_not_found());
    }
}
