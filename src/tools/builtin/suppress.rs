//! `suppress_reply` — decide that no reply goes out.

use std::time::Instant;

use async_trait::async_trait;

use crate::context::DecisionContext;
use crate::tools::tool::{Directive, Tool, ToolError, ToolOutput, require_reason};

pub struct SuppressReplyTool;

#[async_trait]
impl Tool for SuppressReplyTool {
    fn name(&self) -> &str {
        "suppress_reply"
    }

    fn description(&self) -> &str {
        "Do not send any reply to this email. Call this when the sender asks for \
         no reply, or when the email has nothing to do with the user's finances."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "Why no reply should be sent"
                }
            },
            "required": ["reason"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &DecisionContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let reason = require_reason(&params, self.name())?;
        tracing::info!(decision = %ctx.decision_id, reason, "Reply suppressed");

        Ok(
            ToolOutput::text(format!("Response aborted due to: {reason}"), start.elapsed())
                .with_directive(Directive::SuppressReply),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_suppress_directive() {
        let params = serde_json::json!({"reason": "sender said do not reply"});
        let output = SuppressReplyTool
            .execute(params, &DecisionContext::default())
            .await
            .unwrap();
        assert_eq!(output.directive, Some(Directive::SuppressReply));
        assert_eq!(output.as_text(), "Response aborted due to: sender said do not reply");
    }

    #[tokio::test]
    async fn missing_reason_gives_no_directive() {
        let result = SuppressReplyTool
            .execute(serde_json::json!({}), &DecisionContext::default())
            .await;
        assert!(result.is_err());
    }
}
