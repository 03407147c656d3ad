use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{QueueError, Result};
use crate::registry::TaskHandler;

#[derive(Debug, Deserialize)]
struct SendEmailPayload {
    #[serde(default)]
    to: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
}

/// Email delivery handler.
///
/// Delivery is simulated: a short sleep plus a 25% failure rate so the
/// retry pipeline has something to chew on.
/// TODO: wire up a real mail provider behind this handler.
#[derive(Debug, Default)]
pub struct SendEmailHandler;

impl SendEmailHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskHandler for SendEmailHandler {
    fn task_type(&self) -> &str {
        "send_email"
    }

    async fn execute(&self, payload: &serde_json::Value) -> Result<()> {
        let request: SendEmailPayload = serde_json::from_value(payload.clone())
            .map_err(|e| QueueError::ValidationError(format!("invalid payload: {e}")))?;

        if request.to.is_empty() {
            return Err(QueueError::ValidationError(
                "missing required field: to".to_string(),
            ));
        }
        if request.subject.is_empty() {
            return Err(QueueError::ValidationError(
                "missing required field: subject".to_string(),
            ));
        }

        info!(
            to = %request.to,
            subject = %request.subject,
            body_length = request.body.len(),
            "sending email"
        );

        if fastrand::u8(0..4) == 0 {
            warn!(to = %request.to, "email delivery failed (simulated)");
            return Err(QueueError::ExecutionError(
                "email delivery failed: SMTP connection timeout".to_string(),
            ));
        }

        tokio::time::sleep(Duration::from_secs(3)).await;
        info!(to = %request.to, "email sent");
        Ok(())
    }
}
