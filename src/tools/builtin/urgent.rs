//! `send_urgent_alert` — notify the user out of band.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::channels::AlertNotifier;
use crate::context::DecisionContext;
use crate::tools::tool::{Tool, ToolError, ToolOutput, require_reason, require_str};

pub struct SendUrgentAlertTool {
    notifier: Arc<dyn AlertNotifier>,
}

impl SendUrgentAlertTool {
    pub fn new(notifier: Arc<dyn AlertNotifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl Tool for SendUrgentAlertTool {
    fn name(&self) -> &str {
        "send_urgent_alert"
    }

    fn description(&self) -> &str {
        "Send an urgent alert to the user. Use only when something needs attention \
         now: a payment due within 24 hours, an amount of 1000 or more, or a \
         security problem with an account."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Short alert text, readable on a phone lock screen"
                },
                "reason": {
                    "type": "string",
                    "description": "Why this is urgent"
                }
            },
            "required": ["message", "reason"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &DecisionContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let message = require_str(&params, self.name(), "message")?;
        let reason = require_reason(&params, self.name())?;

        self.notifier
            .notify(&ctx.user_email, message)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: self.name().to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(user = %ctx.user_email, reason, "Urgent alert sent");

        Ok(ToolOutput::text(
            format!("Urgent alert sent for user {}: '{}'.", ctx.user_email, message),
            start.elapsed(),
        ))
    }
}
