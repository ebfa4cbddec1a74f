//! Decision engines.
//!
//! An engine reads the session's input, invokes actions through the session
//! and returns its final free text. [`LlmDecisionEngine`] runs the usual
//! model → tools → model loop.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::prompt::system_prompt;
use crate::agent::session::{ActionInvocation, ActionSession};
use crate::error::LlmError;
use crate::llm::{ChatMessage, LlmProvider, Reasoning, ReasoningContext, RespondResult};

#[async_trait]
pub trait DecisionEngine: Send + Sync {
    /// Agent name recorded in audit logs.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Decide what to do with the session's input and return the final text.
    async fn decide(&self, session: &mut ActionSession) -> Result<String, LlmError>;
}

pub struct LlmDecisionEngine {
    name: String,
    llm: Arc<dyn LlmProvider>,
    max_turns: usize,
    temperature: Option<f32>,
}

impl LlmDecisionEngine {
    pub fn new(name: impl Into<String>, llm: Arc<dyn LlmProvider>, max_turns: usize) -> Self {
        Self {
            name: name.into(),
            llm,
            max_turns: max_turns.max(1),
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[async_trait]
impl DecisionEngine for LlmDecisionEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        self.llm.model_name()
    }

    async fn decide(&self, session: &mut ActionSession) -> Result<String, LlmError> {
        let ctx = session.context();
        let mut reasoning = Reasoning::new(Arc::clone(&self.llm))
            .with_system_prompt(system_prompt(&ctx.user_name, ctx.reference_day()));
        if let Some(t) = self.temperature {
            reasoning = reasoning.with_temperature(t);
        }

        let decision_id = ctx.decision_id;
        let mut reason_ctx = ReasoningContext::new()
            .with_messages(vec![ChatMessage::user(ctx.original_input.clone())])
            .with_tools(session.tools().tool_definitions().await);
        reason_ctx
            .metadata
            .insert("decision_id".to_string(), decision_id.to_string());

        let mut last_text = String::new();
        for turn in 1..=self.max_turns {
            let output = reasoning.respond_with_tools(&reason_ctx).await?;
            tracing::debug!(
                decision = %decision_id,
                turn,
                tokens = output.usage.total(),
                "Model responded"
            );

            match output.result {
                RespondResult::Text(text) => {
                    session.record_assistant(&text);
                    return Ok(text);
                }
                RespondResult::ToolCalls {
                    tool_calls,
                    content,
                } => {
                    if let Some(text) = content.as_deref().filter(|t| !t.trim().is_empty()) {
                        session.record_assistant(text);
                        last_text = text.to_string();
                    }
                    reason_ctx
                        .messages
                        .push(ChatMessage::assistant_with_tool_calls(
                            content,
                            tool_calls.clone(),
                        ));

                    for call in &tool_calls {
                        let result = session.invoke(&ActionInvocation::from(call)).await;
                        reason_ctx
                            .messages
                            .push(ChatMessage::tool_result(&call.id, &call.name, result));
                    }
                }
            }
        }

        tracing::warn!(
            decision = %decision_id,
            max_turns = self.max_turns,
            "Turn limit reached, using last text as final output"
        );
        Ok(last_text)
    }
}
