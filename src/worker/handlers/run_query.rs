use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{QueueError, Result};
use crate::registry::TaskHandler;

#[derive(Debug, Deserialize)]
struct RunQueryPayload {
    #[serde(default)]
    query: String,
}

/// Query execution handler.
///
/// Execution is simulated with three scenarios: 20% immediate failures,
/// 20% slow runs that trip the worker timeout, 60% successes.
#[derive(Debug, Default)]
pub struct RunQueryHandler;

impl RunQueryHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskHandler for RunQueryHandler {
    fn task_type(&self) -> &str {
        "run_query"
    }

    async fn execute(&self, payload: &serde_json::Value) -> Result<()> {
        let request: RunQueryPayload = serde_json::from_value(payload.clone())
            .map_err(|e| QueueError::ValidationError(format!("invalid payload: {e}")))?;

        if request.query.is_empty() {
            return Err(QueueError::ValidationError(
                "missing required field: query".to_string(),
            ));
        }

        info!(query = %request.query, "running query");

        match fastrand::u8(1..=10) {
            1..=2 => {
                warn!(query = %request.query, "query failed (simulated)");
                Err(QueueError::ExecutionError(
                    "query execution failed: database connection error".to_string(),
                ))
            }
            3..=4 => {
                warn!(query = %request.query, "query running long (simulated)");
                tokio::time::sleep(Duration::from_secs(45)).await;
                Err(QueueError::ExecutionError(
                    "query execution failed: database timeout".to_string(),
                ))
            }
            _ => {
                tokio::time::sleep(Duration::from_secs(3)).await;
                info!(query = %request.query, "query executed");
                Ok(())
            }
        }
    }
}
