//! PostgreSQL store.
//!
//! Row-level locks plus `FOR UPDATE SKIP LOCKED` make the database itself
//! the coordination layer between worker processes; there is no broker and
//! no in-process lock shared across claimers.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tracing::{debug, error, instrument};

use crate::backoff::compute_backoff;
use crate::error::{QueueError, Result};
use crate::models::{
    CreateTaskRequest, EventType, NewTaskHistory, Task, TaskHistory, TaskStats, TaskStatus,
};
use crate::storage::{
    Store, DEFAULT_BACKOFF_SECONDS, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECONDS,
};

const TASK_COLUMNS: &str = "id, name, type, payload, status, priority, \
     retry_count, max_retries, last_error, \
     next_run_at, backoff_seconds, timeout_seconds, \
     locked_at, lock_expires_at, created_at, updated_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Best-effort append: a history failure must never abort the state
    /// transition it describes.
    async fn log_history(&self, event: NewTaskHistory) {
        let task_id = event.task_id;
        if let Err(e) = self.append_history(event).await {
            error!(task_id, error = %e, "failed to insert history event");
        }
    }

    async fn append_history(&self, event: NewTaskHistory) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_history (
                task_id, status, event_type,
                retry_count, max_retries, backoff_seconds, next_run_at,
                error_message, worker_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            "#,
        )
        .bind(event.task_id)
        .bind(event.status())
        .bind(event.event_type())
        .bind(event.retry_count)
        .bind(event.max_retries)
        .bind(event.backoff_seconds)
        .bind(event.next_run_at)
        .bind(event.error_message)
        .bind(event.worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::DatabaseError(format!("history insert failed: {e}")))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    #[instrument(skip(self, req), fields(task_type = %req.task_type))]
    async fn create_task(&self, req: CreateTaskRequest) -> Result<Task> {
        let task_type = req.task_type.to_lowercase();
        let payload = req
            .payload
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
        let max_retries = req.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        let timeout_seconds = req.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
        let backoff_seconds = req.backoff_seconds.unwrap_or(DEFAULT_BACKOFF_SECONDS);

        let query = format!(
            r#"
            INSERT INTO tasks (
                name, type, payload, priority, status,
                retry_count, max_retries, backoff_seconds,
                timeout_seconds, next_run_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, 0, $6, $7, $8, $9, NOW(), NOW())
            RETURNING {TASK_COLUMNS}
            "#
        );

        let task = sqlx::query_as::<_, Task>(&query)
            .bind(&req.name)
            .bind(&task_type)
            .bind(&payload)
            .bind(req.priority)
            .bind(TaskStatus::Queued)
            .bind(max_retries)
            .bind(backoff_seconds)
            .bind(timeout_seconds)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!(task_type = %task_type, error = %e, "task insert failed");
                QueueError::DatabaseError(format!("task insert failed: {e}"))
            })?;

        self.log_history(
            NewTaskHistory::new(task.id, TaskStatus::Queued, EventType::TaskQueued)
                .with_retry_snapshot(
                    task.retry_count,
                    task.max_retries,
                    task.backoff_seconds,
                    task.next_run_at,
                ),
        )
        .await;

        Ok(task)
    }

    async fn get_task(&self, id: i64) -> Result<Task> {
        let query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1");

        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| QueueError::DatabaseError(format!("task lookup failed: {e}")))?
            .ok_or(QueueError::TaskNotFound(id))
    }

    async fn get_task_history(&self, task_id: i64) -> Result<Vec<TaskHistory>> {
        sqlx::query_as::<_, TaskHistory>(
            r#"
            SELECT id, task_id, status, event_type,
                   retry_count, max_retries, backoff_seconds, next_run_at,
                   error_message, worker_id, created_at
            FROM task_history
            WHERE task_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| QueueError::DatabaseError(format!("history lookup failed: {e}")))
    }

    async fn insert_history(&self, event: NewTaskHistory) -> Result<()> {
        self.append_history(event).await
    }

    async fn update_task_status(
        &self,
        id: i64,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tasks SET status = $1, last_error = $2, updated_at = NOW() WHERE id = $3",
        )
        .bind(status)
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::DatabaseError(format!("status update failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::TaskNotFound(id));
        }

        Ok(())
    }

    #[instrument(skip(self), fields(worker_id = %worker_id))]
    async fn claim_next_task(&self, worker_id: &str) -> Result<Option<Task>> {
        let now = Utc::now();

        // Single atomic select-and-update. SKIP LOCKED keeps concurrent
        // claimers from ever blocking on (or receiving) the same row, and
        // expired-lock rows sort first so stalled tasks cannot starve
        // behind a stream of fresh high-priority work.
        let query = format!(
            r#"
            UPDATE tasks
            SET status = $1,
                locked_at = $2,
                lock_expires_at = $2 + make_interval(secs => timeout_seconds),
                updated_at = $2
            WHERE id = (
                SELECT id
                FROM tasks
                WHERE status = $3
                  AND next_run_at <= $2
                  AND (lock_expires_at IS NULL OR lock_expires_at <= $2)
                ORDER BY
                  CASE WHEN lock_expires_at IS NOT NULL AND lock_expires_at <= $2
                       THEN 0 ELSE 1 END,
                  priority DESC,
                  created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {TASK_COLUMNS}
            "#
        );

        let claimed = sqlx::query_as::<_, Task>(&query)
            .bind(TaskStatus::Running)
            .bind(now)
            .bind(TaskStatus::Queued)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "task claim failed");
                QueueError::DatabaseError(format!("task claim failed: {e}"))
            })?;

        if let Some(task) = &claimed {
            debug!(task_id = task.id, task_type = %task.task_type, "claimed task");
        }

        Ok(claimed)
    }

    async fn schedule_retry(&self, id: i64, error_message: &str) -> Result<()> {
        let task = self.get_task(id).await?;

        if task.retry_count >= task.max_retries {
            return self
                .mark_task_failed(id, &format!("max retries exceeded: {error_message}"))
                .await;
        }

        let retry_count = task.retry_count + 1;
        let delay = compute_backoff(task.backoff_seconds, retry_count as u32);
        let next_run_at = Utc::now() + ChronoDuration::milliseconds(delay.as_millis() as i64);

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $1,
                retry_count = $2,
                last_error = $3,
                next_run_at = $4,
                locked_at = NULL,
                lock_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $5
            "#,
        )
        .bind(TaskStatus::Queued)
        .bind(retry_count)
        .bind(error_message)
        .bind(next_run_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::DatabaseError(format!("retry update failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::TaskNotFound(id));
        }

        self.log_history(
            NewTaskHistory::new(id, TaskStatus::Queued, EventType::RetryScheduled)
                .with_error(error_message)
                .with_retry_snapshot(
                    retry_count,
                    task.max_retries,
                    task.backoff_seconds,
                    next_run_at,
                ),
        )
        .await;

        Ok(())
    }

    async fn mark_task_failed(&self, id: i64, error_message: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $1,
                last_error = $2,
                locked_at = NULL,
                lock_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(TaskStatus::Failed)
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::DatabaseError(format!("failure update failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::TaskNotFound(id));
        }

        self.log_history(
            NewTaskHistory::new(id, TaskStatus::Failed, EventType::TaskFailedFinal)
                .with_error(error_message),
        )
        .await;

        Ok(())
    }

    async fn complete_task(&self, id: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $1,
                last_error = NULL,
                locked_at = NULL,
                lock_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(TaskStatus::Succeeded)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::DatabaseError(format!("completion update failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::TaskNotFound(id));
        }

        self.log_history(NewTaskHistory::new(
            id,
            TaskStatus::Succeeded,
            EventType::TaskSucceeded,
        ))
        .await;

        Ok(())
    }

    async fn get_stats(&self) -> Result<TaskStats> {
        sqlx::query_as::<_, TaskStats>(
            r#"
            SELECT
                COUNT(*) AS total_tasks,
                COUNT(*) FILTER (WHERE status = 'queued') AS queued_tasks,
                COUNT(*) FILTER (WHERE status = 'running') AS running_tasks,
                COUNT(*) FILTER (WHERE status = 'succeeded') AS succeeded_tasks,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed_tasks,
                COALESCE(AVG(retry_count), 0)::float8 AS avg_retry_count,
                COUNT(*) FILTER (WHERE retry_count > 0) AS tasks_with_retries
            FROM tasks
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QueueError::DatabaseError(format!("stats query failed: {e}")))
    }
}
