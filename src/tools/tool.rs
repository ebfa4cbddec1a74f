//! The action contract.

use std::time::Duration;

use async_trait::async_trait;

use crate::context::DecisionContext;

pub use crate::error::ToolError;

/// Protocol-level instruction an action can hand back to its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// No reply may be sent for this message.
    SuppressReply,
}

/// Result of a successful action.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// What the model sees as the call's output.
    pub result: serde_json::Value,
    /// Wall time spent in the action.
    pub duration: Duration,
    /// Optional instruction for the session.
    pub directive: Option<Directive>,
}

impl ToolOutput {
    pub fn success(result: serde_json::Value, duration: Duration) -> Self {
        Self {
            result,
            duration,
            directive: None,
        }
    }

    pub fn text(text: impl Into<String>, duration: Duration) -> Self {
        Self::success(serde_json::Value::String(text.into()), duration)
    }

    pub fn with_directive(mut self, directive: Directive) -> Self {
        self.directive = Some(directive);
        self
    }

    /// The result rendered as plain text.
    pub fn as_text(&self) -> String {
        match &self.result {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// An action the decision engine may invoke.
///
/// Actions read the context but never mutate shared state; anything the
/// session must know comes back through [`ToolOutput::directive`].
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &DecisionContext,
    ) -> Result<ToolOutput, ToolError>;
}

/// Fetch a required, non-empty string argument.
pub fn require_str<'a>(
    params: &'a serde_json::Value,
    tool: &str,
    key: &str,
) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidParameters {
            name: tool.to_string(),
            reason: format!("missing required string argument '{key}'"),
        })
}

/// Every action must say why it was invoked.
pub fn require_reason<'a>(params: &'a serde_json::Value, tool: &str) -> Result<&'a str, ToolError> {
    require_str(params, tool, "reason")
}

/// Fetch a required argument as text, accepting numbers too.
pub fn require_text(
    params: &serde_json::Value,
    tool: &str,
    key: &str,
) -> Result<String, ToolError> {
    match params.get(key) {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        _ => Err(ToolError::InvalidParameters {
            name: tool.to_string(),
            reason: format!("missing required argument '{key}'"),
        }),
    }
}
