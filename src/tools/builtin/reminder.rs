//! `schedule_reminder` — persist a reminder for the user.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::context::DecisionContext;
use crate::store::{FinanceStore, NewReminder};
use crate::tools::tool::{Tool, ToolError, ToolOutput, require_reason, require_str};

pub struct ScheduleReminderTool {
    store: Arc<dyn FinanceStore>,
}

impl ScheduleReminderTool {
    pub fn new(store: Arc<dyn FinanceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ScheduleReminderTool {
    fn name(&self) -> &str {
        "schedule_reminder"
    }

    fn description(&self) -> &str {
        "Schedule a reminder for the user, e.g. a few days before a bill is due. \
         Give the reminder text and when it should fire (ISO 8601 preferred)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "reminder": {
                    "type": "string",
                    "description": "What to remind the user about"
                },
                "trigger_time": {
                    "type": "string",
                    "description": "When to remind, e.g. 2025-11-03T09:00:00Z"
                },
                "reason": {
                    "type": "string",
                    "description": "Why this reminder is needed"
                }
            },
            "required": ["reminder", "trigger_time", "reason"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &DecisionContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let text = require_str(&params, self.name(), "reminder")?;
        let trigger_time = require_str(&params, self.name(), "trigger_time")?;
        let reason = require_reason(&params, self.name())?;

        let stored = self
            .store
            .insert_reminder(&NewReminder {
                user_email: ctx.user_email.clone(),
                text: text.to_string(),
                trigger_time: trigger_time.to_string(),
                reason: reason.to_string(),
            })
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: self.name().to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            user = %ctx.user_email,
            reminder_id = %stored.id,
            trigger_at = ?stored.trigger_at,
            "Reminder scheduled"
        );

        Ok(ToolOutput::text(
            format!(
                "Reminder set for user {}: '{}' at {}.",
                ctx.user_email, text, trigger_time
            ),
            start.elapsed(),
        ))
    }
}
