//! Bridges rig's `CompletionModel` to our `LlmProvider`.

use std::collections::HashMap;

use async_trait::async_trait;
use rig::OneOrMany;
use rig::completion::{AssistantContent, CompletionModel, Message};
use rig::message::{ToolResultContent, UserContent};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, FinishReason, LlmProvider, Role, ToolCall, ToolCompletionRequest,
    ToolCompletionResponse,
};

/// Wraps any rig completion model.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }
}

/// Split our history into a preamble and rig messages.
fn to_rig_messages(messages: &[ChatMessage]) -> Result<(Option<String>, Vec<Message>), LlmError> {
    let mut preamble: Vec<&str> = Vec::new();
    let mut history = Vec::new();
    // call id -> correlation id, for results of calls that carried one
    let mut call_ids: HashMap<&str, &str> = HashMap::new();

    for msg in messages {
        match msg.role {
            Role::System => preamble.push(&msg.content),
            Role::User => history.push(Message::user(msg.content.clone())),
            Role::Assistant if msg.tool_calls.is_empty() => {
                history.push(Message::assistant(msg.content.clone()))
            }
            Role::Assistant => {
                let mut items = Vec::new();
                if !msg.content.is_empty() {
                    items.push(AssistantContent::text(msg.content.clone()));
                }
                for call in &msg.tool_calls {
                    if let Some(call_id) = &call.call_id {
                        call_ids.insert(&call.id, call_id);
                    }
                    items.push(match &call.call_id {
                        Some(call_id) => AssistantContent::tool_call_with_call_id(
                            call.id.clone(),
                            call_id.clone(),
                            call.name.clone(),
                            call.arguments.clone(),
                        ),
                        None => AssistantContent::tool_call(
                            call.id.clone(),
                            call.name.clone(),
                            call.arguments.clone(),
                        ),
                    });
                }
                let content = OneOrMany::many(items).map_err(|e| LlmError::InvalidResponse {
                    provider: "rig".to_string(),
                    reason: format!("empty assistant message: {e}"),
                })?;
                history.push(Message::Assistant { id: None, content });
            }
            Role::Tool => {
                let id = msg.tool_call_id.as_deref().unwrap_or_default();
                let result = OneOrMany::one(ToolResultContent::text(msg.content.clone()));
                let content = match call_ids.get(id) {
                    Some(call_id) => {
                        UserContent::tool_result_with_call_id(id, call_id.to_string(), result)
                    }
                    None => UserContent::tool_result(id, result),
                };
                history.push(Message::User {
                    content: OneOrMany::one(content),
                });
            }
        }
    }

    let preamble = (!preamble.is_empty()).then(|| preamble.join("\n\n"));
    Ok((preamble, history))
}

fn to_rig_tools(request: &ToolCompletionRequest) -> Vec<rig::completion::ToolDefinition> {
    request
        .tools
        .iter()
        .map(|t| rig::completion::ToolDefinition {
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: t.parameters.clone(),
        })
        .collect()
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let (preamble, mut history) = to_rig_messages(&request.messages)?;
        let prompt = history.pop().ok_or_else(|| LlmError::InvalidResponse {
            provider: self.model_name.clone(),
            reason: "request has no user or tool message".to_string(),
        })?;

        let mut builder = self
            .model
            .completion_request(prompt)
            .messages(history)
            .tools(to_rig_tools(&request));
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: self.model_name.clone(),
            reason: e.to_string(),
        })?;

        let mut text = Vec::new();
        let mut tool_calls = Vec::new();
        for item in response.choice.into_iter() {
            match item {
                AssistantContent::Text(t) => text.push(t.text),
                AssistantContent::ToolCall(tc) => tool_calls.push(ToolCall {
                    id: tc.id,
                    call_id: tc.call_id,
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                }),
                _ => {}
            }
        }

        let finish_reason = if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolUse
        };
        let content = (!text.is_empty()).then(|| text.join("\n"));

        Ok(ToolCompletionResponse {
            content,
            tool_calls,
            input_tokens: response.usage.input_tokens as u32,
            output_tokens: response.usage.output_tokens as u32,
            finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_become_preamble() {
        let (preamble, history) = to_rig_messages(&[
            ChatMessage::system("You are FinBot."),
            ChatMessage::user("Invoice attached"),
        ])
        .unwrap();
        assert_eq!(preamble.as_deref(), Some("You are FinBot."));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn tool_round_trip_is_preserved() {
        let call = ToolCall {
            id: "fc_1".into(),
            call_id: Some("call_1".into()),
            name: "store_record".into(),
            arguments: serde_json::json!({"description": "x", "reason": "y"}),
        };
        let (_, history) = to_rig_messages(&[
            ChatMessage::user("Invoice attached"),
            ChatMessage::assistant_with_tool_calls(None, vec![call]),
            ChatMessage::tool_result("fc_1", "store_record", "stored"),
        ])
        .unwrap();
        assert_eq!(history.len(), 3);
        assert!(matches!(history[1], Message::Assistant { .. }));
        assert!(matches!(history[2], Message::User { .. }));
    }
}
