//! # Worker Process
//!
//! One dispatcher plus a pool of N consumers, coordinating through a
//! bounded handoff channel of capacity N.
//!
//! The dispatcher is the only component that talks to the claim path: one
//! claim attempt per tick. Its send into the channel is blocking, so when
//! every pool worker is busy the dispatcher parks instead of raiding the
//! store for work the process cannot absorb. That blocking send is the
//! backpressure primitive; there is no other throttle.
//!
//! Pool workers execute handlers under the process-level task timeout and
//! drive the outcome back into the store. They never extend a lease
//! mid-execution: if an attempt outruns `lock_expires_at`, another process
//! may reclaim the task, and whichever terminal transition reaches the
//! store first wins.

pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{QueueError, Result};
use crate::models::{EventType, NewTaskHistory, Task, TaskStatus};
use crate::registry::HandlerRegistry;
use crate::storage::Store;

/// Tunables for one worker process. Defaults match the documented knobs:
/// 1s poll, 30s handler timeout, 5 pool workers.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub poll_interval: Duration,
    pub task_timeout: Duration,
    pub max_concurrency: usize,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            task_timeout: Duration::from_secs(30),
            max_concurrency: 5,
        }
    }
}

impl From<&crate::config::WorkerConfig> for WorkerOptions {
    fn from(config: &crate::config::WorkerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            task_timeout: config.task_timeout,
            max_concurrency: config.concurrency,
        }
    }
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<Task>>>;

/// A claiming-and-executing worker process.
pub struct Worker {
    store: Arc<dyn Store>,
    registry: Arc<HandlerRegistry>,
    options: WorkerOptions,
    worker_id: String,
}

impl Worker {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<HandlerRegistry>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            store,
            registry,
            options,
            worker_id: generate_worker_id(),
        }
    }

    /// Identity recorded in history events. Stable for the process's life,
    /// unique across concurrent processes.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run the dispatcher and the pool until `shutdown` fires, then drain.
    ///
    /// The process-level `task_timeout` is the authoritative handler
    /// deadline; the per-task `timeout_seconds` column only sizes the lock
    /// lease taken at claim time.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            worker_id = %self.worker_id,
            poll_interval_ms = self.options.poll_interval.as_millis() as u64,
            task_timeout_ms = self.options.task_timeout.as_millis() as u64,
            max_concurrency = self.options.max_concurrency,
            "worker starting"
        );

        let (task_tx, task_rx) = mpsc::channel::<Task>(self.options.max_concurrency);
        let task_rx: SharedReceiver = Arc::new(Mutex::new(task_rx));

        let mut joins = Vec::with_capacity(self.options.max_concurrency + 1);

        {
            let worker = Arc::clone(&self);
            let shutdown = shutdown.clone();
            joins.push(tokio::spawn(async move {
                worker.dispatcher_loop(shutdown, task_tx).await;
            }));
        }

        for worker_num in 1..=self.options.max_concurrency {
            let worker = Arc::clone(&self);
            let shutdown = shutdown.clone();
            let task_rx = Arc::clone(&task_rx);
            joins.push(tokio::spawn(async move {
                worker.pool_loop(shutdown, worker_num, task_rx).await;
            }));
        }

        for join in joins {
            if let Err(e) = join.await {
                error!(error = %e, "worker task panicked");
            }
        }

        info!(worker_id = %self.worker_id, "worker stopped");
    }

    /// Single poller: one claim per tick, blocking handoff to the pool.
    async fn dispatcher_loop(&self, shutdown: CancellationToken, task_tx: mpsc::Sender<Task>) {
        info!("dispatcher started");
        let mut ticker = interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let task = match self.store.claim_next_task(&self.worker_id).await {
                Ok(Some(task)) => task,
                Ok(None) => continue,
                Err(e) => {
                    error!(error = %e, "error claiming task");
                    continue;
                }
            };

            // The claim already moved the row to running; record who holds
            // the lease. Best-effort, like every history append.
            let lock_event =
                NewTaskHistory::new(task.id, TaskStatus::Running, EventType::WorkerLockAcquired)
                    .with_worker(&self.worker_id);
            if let Err(e) = self.store.insert_history(lock_event).await {
                error!(task_id = task.id, error = %e, "failed to insert lock acquired history");
            }

            // Blocking send: a full channel parks the dispatcher until a
            // pool worker frees up, so claimed tasks are never dropped.
            tokio::select! {
                sent = task_tx.send(task) => {
                    if sent.is_err() {
                        break;
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        info!("dispatcher stopped");
    }

    /// One pool consumer.
    async fn pool_loop(
        &self,
        shutdown: CancellationToken,
        worker_num: usize,
        task_rx: SharedReceiver,
    ) {
        debug!(worker_num, "pool worker started");

        loop {
            let task = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = async { task_rx.lock().await.recv().await } => {
                    match received {
                        Some(task) => task,
                        None => break,
                    }
                }
            };

            self.process_task(&shutdown, worker_num, task).await;
        }

        debug!(worker_num, "pool worker stopped");
    }

    async fn process_task(&self, shutdown: &CancellationToken, worker_num: usize, task: Task) {
        info!(
            worker_num,
            task_id = task.id,
            task_name = %task.name,
            task_type = %task.task_type,
            retry_count = task.retry_count,
            max_retries = task.max_retries,
            "processing claimed task"
        );

        let started =
            NewTaskHistory::new(task.id, TaskStatus::Running, EventType::TaskStarted)
                .with_worker(&self.worker_id);
        if let Err(e) = self.store.insert_history(started).await {
            error!(task_id = task.id, error = %e, "failed to insert task started history");
        }

        match self.execute_task(shutdown, &task).await {
            Ok(()) => {
                info!(task_id = task.id, retry_count = task.retry_count, "task succeeded");
                if let Err(e) = self.store.complete_task(task.id).await {
                    error!(task_id = task.id, error = %e, "failed to complete task");
                }
            }
            Err(exec_err) => {
                let message = exec_err.to_string();
                warn!(
                    task_id = task.id,
                    retry_count = task.retry_count,
                    max_retries = task.max_retries,
                    error = %message,
                    "task failed"
                );
                // The store decides whether this becomes a retry or a
                // terminal failure.
                if let Err(e) = self.store.schedule_retry(task.id, &message).await {
                    error!(task_id = task.id, error = %e, "failed to schedule retry");
                }
            }
        }
    }

    async fn execute_task(&self, shutdown: &CancellationToken, task: &Task) -> Result<()> {
        let handler = self.registry.get(&task.task_type).map_err(|e| {
            QueueError::ExecutionError(format!(
                "handler not found for type {}: {e}",
                task.task_type
            ))
        })?;

        debug!(task_id = task.id, task_type = %task.task_type, "executing task");

        tokio::select! {
            outcome = timeout(self.options.task_timeout, handler.execute(&task.payload)) => {
                match outcome {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(QueueError::ExecutionError(format!(
                        "task execution failed: {e}"
                    ))),
                    Err(_) => Err(QueueError::ExecutionError(format!(
                        "task execution timed out after {}s",
                        self.options.task_timeout.as_secs()
                    ))),
                }
            }
            _ = shutdown.cancelled() => Err(QueueError::ExecutionError(
                "task execution cancelled: worker shutting down".to_string(),
            )),
        }
    }
}

/// `hostname-pid-startnanos`. The time component keeps ids unique in
/// containerized deployments where every process is PID 1.
fn generate_worker_id() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let pid = std::process::id();
    let start_nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
    format!("{hostname}-{pid}-{start_nanos}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_ids_are_unique_per_instantiation() {
        let a = generate_worker_id();
        let b = generate_worker_id();
        assert_ne!(a, b);
        assert!(a.split('-').count() >= 3);
    }

    #[test]
    fn options_default_to_documented_knobs() {
        let options = WorkerOptions::default();
        assert_eq!(options.poll_interval, Duration::from_secs(1));
        assert_eq!(options.task_timeout, Duration::from_secs(30));
        assert_eq!(options.max_concurrency, 5);
    }
}
