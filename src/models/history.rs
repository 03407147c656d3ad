use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::task::TaskStatus;

/// Granular lifecycle events recorded in the append-only history log.
///
/// `TimeoutOccurred` and `WorkerLockExpired` are reserved: representable in
/// the log but not emitted by the current pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_event_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TaskQueued,
    TaskStarted,
    TaskSucceeded,
    TaskFailed,
    RetryScheduled,
    TimeoutOccurred,
    WorkerLockAcquired,
    WorkerLockExpired,
    TaskFailedFinal,
}

/// One append-only history row. Snapshot fields capture retry state as it
/// was when the event happened, not as it is now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TaskHistory {
    pub id: i64,
    pub task_id: i64,
    pub status: TaskStatus,
    pub event_type: EventType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_seconds: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Event to append; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, Default)]
pub struct NewTaskHistory {
    pub task_id: i64,
    pub status: Option<TaskStatus>,
    pub event_type: Option<EventType>,
    pub retry_count: Option<i32>,
    pub max_retries: Option<i32>,
    pub backoff_seconds: Option<i32>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub worker_id: Option<String>,
}

impl NewTaskHistory {
    pub fn new(task_id: i64, status: TaskStatus, event_type: EventType) -> Self {
        Self {
            task_id,
            status: Some(status),
            event_type: Some(event_type),
            ..Self::default()
        }
    }

    pub fn with_worker(mut self, worker_id: &str) -> Self {
        self.worker_id = Some(worker_id.to_string());
        self
    }

    pub fn with_error(mut self, message: &str) -> Self {
        self.error_message = Some(message.to_string());
        self
    }

    pub fn with_retry_snapshot(
        mut self,
        retry_count: i32,
        max_retries: i32,
        backoff_seconds: i32,
        next_run_at: DateTime<Utc>,
    ) -> Self {
        self.retry_count = Some(retry_count);
        self.max_retries = Some(max_retries);
        self.backoff_seconds = Some(backoff_seconds);
        self.next_run_at = Some(next_run_at);
        self
    }

    pub fn status(&self) -> TaskStatus {
        self.status.unwrap_or(TaskStatus::Queued)
    }

    pub fn event_type(&self) -> EventType {
        self.event_type.unwrap_or(EventType::TaskQueued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&EventType::WorkerLockAcquired).unwrap(),
            "\"worker_lock_acquired\""
        );
        assert_eq!(
            serde_json::to_string(&EventType::TaskFailedFinal).unwrap(),
            "\"task_failed_final\""
        );
    }

    #[test]
    fn builder_captures_retry_snapshot() {
        let next_run = Utc::now();
        let event = NewTaskHistory::new(7, TaskStatus::Queued, EventType::RetryScheduled)
            .with_error("boom")
            .with_retry_snapshot(2, 3, 5, next_run);

        assert_eq!(event.task_id, 7);
        assert_eq!(event.event_type(), EventType::RetryScheduled);
        assert_eq!(event.retry_count, Some(2));
        assert_eq!(event.max_retries, Some(3));
        assert_eq!(event.next_run_at, Some(next_run));
        assert_eq!(event.error_message.as_deref(), Some("boom"));
    }
}
