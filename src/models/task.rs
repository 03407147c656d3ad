use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Lifecycle status of a task. These four states are the only ones visible
/// outside the store; everything else (leases, scheduling) lives in the
/// lock and `next_run_at` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    /// Terminal statuses are absorbing: no transition leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A persisted background task. Maps to the `tasks` table.
///
/// Instances held by workers are read-only snapshots taken at claim time;
/// the database row is the single source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub task_type: String,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub priority: i32,

    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,

    pub next_run_at: DateTime<Utc>,
    pub backoff_seconds: i32,

    pub timeout_seconds: i32,
    pub locked_at: Option<DateTime<Utc>>,
    pub lock_expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn to_response(&self) -> TaskResponse {
        TaskResponse {
            id: self.id,
            name: self.name.clone(),
            task_type: self.task_type.clone(),
            payload: self.payload.clone(),
            status: self.status,
            priority: self.priority,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            last_error: self.last_error.clone(),
            timeout_seconds: self.timeout_seconds,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Submission request for a new task. Unset knobs get the store defaults
/// (`max_retries = 3`, `timeout_seconds = 30`, `backoff_seconds = 5`,
/// `payload = {}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub priority: i32,
    pub max_retries: Option<i32>,
    pub timeout_seconds: Option<i32>,
    pub backoff_seconds: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub id: i64,
    pub status: TaskStatus,
}

/// External task view. Scheduling internals (`next_run_at`, lock fields,
/// `backoff_seconds`) are deliberately omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub priority: i32,
    pub retry_count: i32,
    pub max_retries: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub timeout_seconds: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate counters for the dashboard / stats endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TaskStats {
    pub total_tasks: i64,
    pub queued_tasks: i64,
    pub running_tasks: i64,
    pub succeeded_tasks: i64,
    pub failed_tasks: i64,
    pub avg_retry_count: f64,
    pub tasks_with_retries: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Succeeded).unwrap(),
            "\"succeeded\""
        );
        assert_eq!(TaskStatus::Running.to_string(), "running");
    }

    #[test]
    fn terminal_statuses_are_absorbing() {
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn create_request_accepts_minimal_body() {
        let req: CreateTaskRequest =
            serde_json::from_str(r#"{"name":"t1","type":"NOOP"}"#).unwrap();
        assert_eq!(req.task_type, "NOOP");
        assert_eq!(req.priority, 0);
        assert!(req.payload.is_none());
        assert!(req.max_retries.is_none());
    }

    #[test]
    fn response_uses_the_type_key() {
        let req: CreateTaskRequest =
            serde_json::from_str(r#"{"name":"t1","type":"send_email","priority":7}"#).unwrap();
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], "send_email");
        assert_eq!(json["priority"], 7);
    }
}
