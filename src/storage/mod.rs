//! Task storage SPI.
//!
//! The store is the single source of truth for task state and the only
//! coordination primitive between worker processes. Implementations must
//! guarantee that `claim_next_task` is atomic (no two concurrent callers
//! ever receive the same task) and that history appends are best-effort
//! siblings of the primary transition, never a reason to abort it.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{CreateTaskRequest, NewTaskHistory, Task, TaskHistory, TaskStats, TaskStatus};

pub(crate) const DEFAULT_MAX_RETRIES: i32 = 3;
pub(crate) const DEFAULT_TIMEOUT_SECONDS: i32 = 30;
pub(crate) const DEFAULT_BACKOFF_SECONDS: i32 = 5;

/// Storage operations required by the worker pipeline and the API layer.
///
/// Every method is a cooperative suspension point; callers cancel by
/// dropping the returned future.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a queued task with defaults applied and the type tag
    /// normalized to lowercase. Appends a `task_queued` event.
    async fn create_task(&self, req: CreateTaskRequest) -> Result<Task>;

    /// Fetch one task, `TaskNotFound` if absent.
    async fn get_task(&self, id: i64) -> Result<Task>;

    /// Lifecycle events for a task, ascending by `created_at`. Unknown ids
    /// yield an empty sequence; callers wanting 404 semantics should check
    /// existence first.
    async fn get_task_history(&self, task_id: i64) -> Result<Vec<TaskHistory>>;

    /// Append one history event.
    async fn insert_history(&self, event: NewTaskHistory) -> Result<()>;

    /// Administrative status override. Does not touch lock fields.
    async fn update_task_status(
        &self,
        id: i64,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<()>;

    /// Atomically claim the next eligible task: transition it to running
    /// and take a lease of `timeout_seconds`. Candidates are ordered with
    /// expired-lock rows first (stalled recoveries preempt fresh work),
    /// then priority descending, then created_at ascending.
    async fn claim_next_task(&self, worker_id: &str) -> Result<Option<Task>>;

    /// Requeue a failed attempt with exponential backoff, or promote to a
    /// terminal failure when retries are exhausted.
    async fn schedule_retry(&self, id: i64, error_message: &str) -> Result<()>;

    /// Terminal failure: no further attempts. Appends `task_failed_final`.
    async fn mark_task_failed(&self, id: i64, error_message: &str) -> Result<()>;

    /// Terminal success. Clears `last_error` and the lock fields.
    async fn complete_task(&self, id: i64) -> Result<()>;

    /// Aggregate counters for introspection.
    async fn get_stats(&self) -> Result<TaskStats>;
}
