//! In-process store.
//!
//! Implements the full `Store` contract over process-local state with the
//! same claim ordering and retry semantics as the Postgres store. One mutex
//! serializes claims, which trivially satisfies the no-duplicate-claim
//! guarantee. Used for embedded deployments and by the integration tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::backoff::compute_backoff;
use crate::error::{QueueError, Result};
use crate::models::{
    CreateTaskRequest, EventType, NewTaskHistory, Task, TaskHistory, TaskStats, TaskStatus,
};
use crate::storage::{
    Store, DEFAULT_BACKOFF_SECONDS, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECONDS,
};

#[derive(Default)]
struct Inner {
    tasks: BTreeMap<i64, Task>,
    history: Vec<TaskHistory>,
    next_task_id: i64,
    next_history_id: i64,
    last_event_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_inner(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| QueueError::DatabaseError("store lock poisoned".to_string()))
    }
}

impl Inner {
    /// History rows must stay strictly ordered by `created_at` within a
    /// task even when several events land in the same clock instant.
    fn next_event_timestamp(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_event_at {
            if now <= last {
                now = last + ChronoDuration::microseconds(1);
            }
        }
        self.last_event_at = Some(now);
        now
    }

    fn append_history(&mut self, event: NewTaskHistory) {
        self.next_history_id += 1;
        let created_at = self.next_event_timestamp();
        self.history.push(TaskHistory {
            id: self.next_history_id,
            task_id: event.task_id,
            status: event.status(),
            event_type: event.event_type(),
            retry_count: event.retry_count,
            max_retries: event.max_retries,
            backoff_seconds: event.backoff_seconds,
            next_run_at: event.next_run_at,
            error_message: event.error_message,
            worker_id: event.worker_id,
            created_at,
        });
    }

    fn mark_failed(&mut self, id: i64, error_message: &str) -> Result<()> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(QueueError::TaskNotFound(id))?;
        task.status = TaskStatus::Failed;
        task.last_error = Some(error_message.to_string());
        task.locked_at = None;
        task.lock_expires_at = None;
        task.updated_at = Utc::now();

        self.append_history(
            NewTaskHistory::new(id, TaskStatus::Failed, EventType::TaskFailedFinal)
                .with_error(error_message),
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn create_task(&self, req: CreateTaskRequest) -> Result<Task> {
        let mut inner = self.lock_inner()?;
        inner.next_task_id += 1;
        let now = Utc::now();

        let task = Task {
            id: inner.next_task_id,
            name: req.name,
            task_type: req.task_type.to_lowercase(),
            payload: req
                .payload
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            status: TaskStatus::Queued,
            priority: req.priority,
            retry_count: 0,
            max_retries: req.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            last_error: None,
            next_run_at: now,
            backoff_seconds: req.backoff_seconds.unwrap_or(DEFAULT_BACKOFF_SECONDS),
            timeout_seconds: req.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS),
            locked_at: None,
            lock_expires_at: None,
            created_at: now,
            updated_at: now,
        };

        inner.append_history(
            NewTaskHistory::new(task.id, TaskStatus::Queued, EventType::TaskQueued)
                .with_retry_snapshot(
                    task.retry_count,
                    task.max_retries,
                    task.backoff_seconds,
                    task.next_run_at,
                ),
        );

        inner.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: i64) -> Result<Task> {
        let inner = self.lock_inner()?;
        inner
            .tasks
            .get(&id)
            .cloned()
            .ok_or(QueueError::TaskNotFound(id))
    }

    async fn get_task_history(&self, task_id: i64) -> Result<Vec<TaskHistory>> {
        let inner = self.lock_inner()?;
        let mut events: Vec<TaskHistory> = inner
            .history
            .iter()
            .filter(|h| h.task_id == task_id)
            .cloned()
            .collect();
        events.sort_by_key(|h| (h.created_at, h.id));
        Ok(events)
    }

    async fn insert_history(&self, event: NewTaskHistory) -> Result<()> {
        let mut inner = self.lock_inner()?;
        inner.append_history(event);
        Ok(())
    }

    async fn update_task_status(
        &self,
        id: i64,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let mut inner = self.lock_inner()?;
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or(QueueError::TaskNotFound(id))?;
        task.status = status;
        task.last_error = error_message;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn claim_next_task(&self, _worker_id: &str) -> Result<Option<Task>> {
        let mut inner = self.lock_inner()?;
        let now = Utc::now();

        // Same ordering as the SQL claim: expired locks first, then
        // priority descending, then FIFO.
        let candidate = inner
            .tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Queued
                    && t.next_run_at <= now
                    && t.lock_expires_at.is_none_or(|expires| expires <= now)
            })
            .min_by_key(|t| {
                let stalled = match t.lock_expires_at {
                    Some(expires) if expires <= now => 0,
                    _ => 1,
                };
                (stalled, -i64::from(t.priority), t.created_at, t.id)
            })
            .map(|t| t.id);

        let Some(id) = candidate else {
            return Ok(None);
        };

        let task = inner.tasks.get_mut(&id).ok_or(QueueError::TaskNotFound(id))?;
        task.status = TaskStatus::Running;
        task.locked_at = Some(now);
        task.lock_expires_at = Some(now + ChronoDuration::seconds(i64::from(task.timeout_seconds)));
        task.updated_at = now;

        Ok(Some(task.clone()))
    }

    async fn schedule_retry(&self, id: i64, error_message: &str) -> Result<()> {
        let mut inner = self.lock_inner()?;

        let (retry_count, max_retries, backoff_seconds) = {
            let task = inner.tasks.get(&id).ok_or(QueueError::TaskNotFound(id))?;
            (task.retry_count, task.max_retries, task.backoff_seconds)
        };

        if retry_count >= max_retries {
            return inner.mark_failed(id, &format!("max retries exceeded: {error_message}"));
        }

        let new_retry_count = retry_count + 1;
        let delay = compute_backoff(backoff_seconds, new_retry_count as u32);
        let next_run_at = Utc::now() + ChronoDuration::milliseconds(delay.as_millis() as i64);

        let task = inner.tasks.get_mut(&id).ok_or(QueueError::TaskNotFound(id))?;
        task.status = TaskStatus::Queued;
        task.retry_count = new_retry_count;
        task.last_error = Some(error_message.to_string());
        task.next_run_at = next_run_at;
        task.locked_at = None;
        task.lock_expires_at = None;
        task.updated_at = Utc::now();

        inner.append_history(
            NewTaskHistory::new(id, TaskStatus::Queued, EventType::RetryScheduled)
                .with_error(error_message)
                .with_retry_snapshot(new_retry_count, max_retries, backoff_seconds, next_run_at),
        );

        Ok(())
    }

    async fn mark_task_failed(&self, id: i64, error_message: &str) -> Result<()> {
        let mut inner = self.lock_inner()?;
        inner.mark_failed(id, error_message)
    }

    async fn complete_task(&self, id: i64) -> Result<()> {
        let mut inner = self.lock_inner()?;
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or(QueueError::TaskNotFound(id))?;
        task.status = TaskStatus::Succeeded;
        task.last_error = None;
        task.locked_at = None;
        task.lock_expires_at = None;
        task.updated_at = Utc::now();

        inner.append_history(NewTaskHistory::new(
            id,
            TaskStatus::Succeeded,
            EventType::TaskSucceeded,
        ));
        Ok(())
    }

    async fn get_stats(&self) -> Result<TaskStats> {
        let inner = self.lock_inner()?;
        let total = inner.tasks.len() as i64;
        let count_status = |status: TaskStatus| {
            inner.tasks.values().filter(|t| t.status == status).count() as i64
        };
        let retry_sum: i64 = inner
            .tasks
            .values()
            .map(|t| i64::from(t.retry_count))
            .sum();

        Ok(TaskStats {
            total_tasks: total,
            queued_tasks: count_status(TaskStatus::Queued),
            running_tasks: count_status(TaskStatus::Running),
            succeeded_tasks: count_status(TaskStatus::Succeeded),
            failed_tasks: count_status(TaskStatus::Failed),
            avg_retry_count: if total == 0 {
                0.0
            } else {
                retry_sum as f64 / total as f64
            },
            tasks_with_retries: inner.tasks.values().filter(|t| t.retry_count > 0).count() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, task_type: &str) -> CreateTaskRequest {
        CreateTaskRequest {
            name: name.to_string(),
            task_type: task_type.to_string(),
            payload: None,
            priority: 0,
            max_retries: None,
            timeout_seconds: None,
            backoff_seconds: None,
        }
    }

    #[tokio::test]
    async fn create_applies_defaults_and_lowercases_type() {
        let store = MemoryStore::new();
        let task = store.create_task(request("t1", "NOOP")).await.unwrap();

        assert_eq!(task.task_type, "noop");
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.max_retries, 3);
        assert_eq!(task.timeout_seconds, 30);
        assert_eq!(task.backoff_seconds, 5);
        assert_eq!(task.payload, serde_json::json!({}));
        assert!(task.locked_at.is_none());

        let history = store.get_task_history(task.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event_type, EventType::TaskQueued);
    }

    #[tokio::test]
    async fn claim_transitions_to_running_with_a_lease() {
        let store = MemoryStore::new();
        let created = store.create_task(request("t1", "noop")).await.unwrap();

        let claimed = store.claim_next_task("w1").await.unwrap().unwrap();
        assert_eq!(claimed.id, created.id);
        assert_eq!(claimed.status, TaskStatus::Running);
        let locked_at = claimed.locked_at.unwrap();
        let expires = claimed.lock_expires_at.unwrap();
        assert_eq!(expires, locked_at + ChronoDuration::seconds(30));

        // The claimed row is no longer eligible.
        assert!(store.claim_next_task("w2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_prefers_higher_priority_then_fifo() {
        let store = MemoryStore::new();
        let mut low = request("low", "noop");
        low.priority = 1;
        let mut high = request("high", "noop");
        high.priority = 100;

        let low_a = store.create_task(low.clone()).await.unwrap();
        let high_task = store.create_task(high).await.unwrap();
        let low_b = store.create_task(low).await.unwrap();

        let first = store.claim_next_task("w").await.unwrap().unwrap();
        let second = store.claim_next_task("w").await.unwrap().unwrap();
        let third = store.claim_next_task("w").await.unwrap().unwrap();

        assert_eq!(first.id, high_task.id);
        assert_eq!(second.id, low_a.id);
        assert_eq!(third.id, low_b.id);
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed_before_fresh_work() {
        let store = MemoryStore::new();
        let stalled = store.create_task(request("stalled", "noop")).await.unwrap();
        let mut urgent = request("urgent", "noop");
        urgent.priority = 100;
        let fresh = store.create_task(urgent).await.unwrap();

        // Simulate a crashed holder: queued again, lease already expired.
        {
            let mut inner = store.inner.lock().unwrap();
            let task = inner.tasks.get_mut(&stalled.id).unwrap();
            task.lock_expires_at = Some(Utc::now() - ChronoDuration::seconds(1));
        }

        let reclaimed = store.claim_next_task("w2").await.unwrap().unwrap();
        assert_eq!(reclaimed.id, stalled.id);
        // Recovery does not consume a retry.
        assert_eq!(reclaimed.retry_count, 0);

        let next = store.claim_next_task("w2").await.unwrap().unwrap();
        assert_eq!(next.id, fresh.id);
    }

    #[tokio::test]
    async fn task_is_ineligible_until_next_run_at() {
        let store = MemoryStore::new();
        let task = store.create_task(request("t1", "noop")).await.unwrap();

        store.claim_next_task("w").await.unwrap().unwrap();
        store.schedule_retry(task.id, "boom").await.unwrap();

        // Backoff pushes next_run_at at least one second into the future.
        assert!(store.claim_next_task("w").await.unwrap().is_none());

        let retried = store.get_task(task.id).await.unwrap();
        assert_eq!(retried.status, TaskStatus::Queued);
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.last_error.as_deref(), Some("boom"));
        assert!(retried.next_run_at > Utc::now());
        assert!(retried.locked_at.is_none());
    }

    #[tokio::test]
    async fn retry_exhaustion_promotes_to_terminal_failure() {
        let store = MemoryStore::new();
        let mut req = request("t1", "noop");
        req.max_retries = Some(0);
        let task = store.create_task(req).await.unwrap();

        store.claim_next_task("w").await.unwrap().unwrap();
        store.schedule_retry(task.id, "boom").await.unwrap();

        let failed = store.get_task(task.id).await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.retry_count, 0);
        assert_eq!(
            failed.last_error.as_deref(),
            Some("max retries exceeded: boom")
        );

        let history = store.get_task_history(task.id).await.unwrap();
        assert_eq!(
            history.last().unwrap().event_type,
            EventType::TaskFailedFinal
        );
    }

    #[tokio::test]
    async fn completion_clears_error_and_lock_fields() {
        let store = MemoryStore::new();
        let task = store.create_task(request("t1", "noop")).await.unwrap();
        store.claim_next_task("w").await.unwrap().unwrap();
        store.complete_task(task.id).await.unwrap();

        let done = store.get_task(task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Succeeded);
        assert!(done.last_error.is_none());
        assert!(done.locked_at.is_none());
        assert!(done.lock_expires_at.is_none());
    }

    #[tokio::test]
    async fn history_is_ordered_and_empty_for_unknown_tasks() {
        let store = MemoryStore::new();
        let task = store.create_task(request("t1", "noop")).await.unwrap();
        store.claim_next_task("w").await.unwrap().unwrap();
        store.schedule_retry(task.id, "first").await.unwrap();

        let history = store.get_task_history(task.id).await.unwrap();
        assert!(history.windows(2).all(|w| w[0].created_at < w[1].created_at));

        assert!(store.get_task_history(9999).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_override_leaves_lock_fields_alone() {
        let store = MemoryStore::new();
        let task = store.create_task(request("t1", "noop")).await.unwrap();
        store.claim_next_task("w").await.unwrap().unwrap();

        store
            .update_task_status(task.id, TaskStatus::Queued, Some("requeued by hand".to_string()))
            .await
            .unwrap();

        let overridden = store.get_task(task.id).await.unwrap();
        assert_eq!(overridden.status, TaskStatus::Queued);
        assert_eq!(overridden.last_error.as_deref(), Some("requeued by hand"));
        // The override is a bare status setter; the lease is untouched.
        assert!(overridden.locked_at.is_some());
        assert!(overridden.lock_expires_at.is_some());
    }

    #[tokio::test]
    async fn mutations_on_unknown_ids_report_not_found() {
        let store = MemoryStore::new();
        assert_eq!(
            store.complete_task(1).await,
            Err(QueueError::TaskNotFound(1))
        );
        assert_eq!(
            store.mark_task_failed(2, "x").await,
            Err(QueueError::TaskNotFound(2))
        );
        assert_eq!(
            store.schedule_retry(3, "x").await,
            Err(QueueError::TaskNotFound(3))
        );
    }

    #[tokio::test]
    async fn stats_reflect_status_counts_and_retries() {
        let store = MemoryStore::new();
        let a = store.create_task(request("a", "noop")).await.unwrap();
        let _b = store.create_task(request("b", "noop")).await.unwrap();

        store.claim_next_task("w").await.unwrap().unwrap();
        store.schedule_retry(a.id, "boom").await.unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.queued_tasks, 2);
        assert_eq!(stats.tasks_with_retries, 1);
        assert!((stats.avg_retry_count - 0.5).abs() < f64::EPSILON);
    }
}
