//! Per-message action session.
//!
//! The session owns the decision context, runs every action the engine asks
//! for, folds returned directives into the suppression flag and records the
//! trace. Nothing an action does can fail the message.

use std::sync::Arc;

use crate::context::DecisionContext;
use crate::error::ToolError;
use crate::llm::ToolCall;
use crate::tools::{Directive, ToolRegistry};
use crate::trace::{ReasoningTrace, TraceStep};

/// One action request from the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionInvocation {
    pub call_id: String,
    pub name: String,
    pub args: serde_json::Value,
    /// The mandatory `reason` argument, if present.
    pub reason: Option<String>,
}

impl ActionInvocation {
    pub fn new(
        call_id: impl Into<String>,
        name: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        let reason = args
            .get("reason")
            .and_then(|r| r.as_str())
            .map(str::to_string);
        Self {
            call_id: call_id.into(),
            name: name.into(),
            args,
            reason,
        }
    }
}

impl From<&ToolCall> for ActionInvocation {
    fn from(call: &ToolCall) -> Self {
        Self::new(call.result_id(), &call.name, call.arguments.clone())
    }
}

/// What the caller must enforce once the engine is done.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// When true no reply may be sent.
    pub suppressed: bool,
    pub trace: ReasoningTrace,
    pub final_output: String,
}

pub struct ActionSession {
    context: DecisionContext,
    tools: Arc<ToolRegistry>,
    suppressed: bool,
    trace: ReasoningTrace,
    invocations: usize,
}

impl ActionSession {
    /// Start a session; the context's input becomes the first trace step.
    pub fn new(context: DecisionContext, tools: Arc<ToolRegistry>) -> Self {
        let mut trace = ReasoningTrace::new();
        trace.push(TraceStep::user(context.original_input.clone()));
        Self {
            context,
            tools,
            suppressed: false,
            trace,
            invocations: 0,
        }
    }

    pub fn context(&self) -> &DecisionContext {
        &self.context
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations
    }

    /// Run one action and return the text the engine sees as its result.
    ///
    /// Failures (unknown action, bad arguments, side effect errors) come
    /// back as `Error: ...` and the session carries on.
    pub async fn invoke(&mut self, invocation: &ActionInvocation) -> String {
        self.invocations += 1;
        self.trace.push(TraceStep::function_call(
            &invocation.call_id,
            &invocation.name,
            &invocation.args,
        ));

        let result = match self.tools.get(&invocation.name).await {
            Some(tool) => tool.execute(invocation.args.clone(), &self.context).await,
            None => Err(ToolError::NotFound {
                name: invocation.name.clone(),
            }),
        };

        let text = match result {
            Ok(output) => {
                if output.directive == Some(Directive::SuppressReply) {
                    self.suppressed = true;
                }
                tracing::debug!(
                    decision = %self.context.decision_id,
                    action = %invocation.name,
                    elapsed_ms = output.duration.as_millis() as u64,
                    "Action completed"
                );
                output.as_text()
            }
            Err(e) => {
                tracing::warn!(
                    decision = %self.context.decision_id,
                    action = %invocation.name,
                    error = %e,
                    "Action failed"
                );
                format!("Error: {e}")
            }
        };

        self.trace
            .push(TraceStep::function_output(&invocation.call_id, &text));
        text
    }

    /// Record free text produced by the engine.
    pub fn record_assistant(&mut self, text: &str) {
        self.trace.push(TraceStep::assistant(text));
    }

    pub fn finish(self, final_output: String) -> ActionOutcome {
        ActionOutcome {
            suppressed: self.suppressed,
            trace: self.trace,
            final_output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::LogAlertNotifier;
    use crate::store::{FinanceStore, LibSqlFinanceStore};
    use serde_json::json;

    async fn session() -> (ActionSession, Arc<LibSqlFinanceStore>) {
        let store = Arc::new(LibSqlFinanceStore::new_memory().await.unwrap());
        let tools = Arc::new(ToolRegistry::with_finance_tools(
            store.clone(),
            Arc::new(LogAlertNotifier),
        ));
        let ctx = DecisionContext::new(
            "u1",
            "me@example.com",
            "Ada",
            "Invoice #42 attached",
            chrono::Utc::now(),
        );
        (ActionSession::new(ctx, tools), store)
    }

    #[tokio::test]
    async fn suppression_is_sticky() {
        let (mut session, _) = session().await;
        let out = session
            .invoke(&ActionInvocation::new(
                "c1",
                "suppress_reply",
                json!({"reason": "newsletter"}),
            ))
            .await;
        assert_eq!(out, "Response aborted due to: newsletter");
        assert!(session.is_suppressed());

        session
            .invoke(&ActionInvocation::new(
                "c2",
                "store_record",
                json!({
                    "due_date": "2025-04-01",
                    "amount": "950",
                    "description": "Rent",
                    "category": "rent",
                    "reason": "invoice"
                }),
            ))
            .await;
        let outcome = session.finish("<subject>x</subject><body>y</body>".into());
        assert!(outcome.suppressed);
    }

    #[tokio::test]
    async fn malformed_action_does_not_stop_the_next_one() {
        let (mut session, store) = session().await;
        let bad = session
            .invoke(&ActionInvocation::new("c1", "store_record", json!({"amount": "12"})))
            .await;
        assert!(bad.starts_with("Error: "), "{bad}");

        let unknown = session
            .invoke(&ActionInvocation::new("c2", "wire_money", json!({"reason": "x"})))
            .await;
        assert!(unknown.starts_with("Error: "));

        let good = session
            .invoke(&ActionInvocation::new(
                "c3",
                "store_record",
                json!({
                    "due_date": "2025-03-20",
                    "amount": "84.10",
                    "description": "Electricity",
                    "category": "utilities",
                    "reason": "utility bill"
                }),
            ))
            .await;
        assert_eq!(
            good,
            "Information stored for user me@example.com for reason: 'utility bill'."
        );
        assert_eq!(store.list_records("me@example.com").await.unwrap().len(), 1);
        assert_eq!(session.invocation_count(), 3);
        assert!(!session.is_suppressed());
    }

    #[tokio::test]
    async fn trace_records_calls_and_results() {
        let (mut session, _) = session().await;
        let invocation = ActionInvocation::new(
            "call_9",
            "send_urgent_alert",
            json!({"message": "Rent due tomorrow", "reason": "due within 24h"}),
        );
        assert_eq!(invocation.reason.as_deref(), Some("due within 24h"));
        session.invoke(&invocation).await;
        session.record_assistant("<subject>Rent</subject><body>Alert sent.</body>");

        let outcome = session.finish("done".into());
        let steps = serde_json::to_value(&outcome.trace).unwrap();
        assert_eq!(steps.as_array().unwrap().len(), 4);
        assert_eq!(steps[0]["role"], "user");
        assert_eq!(steps[1]["call_id"], "call_9");
        assert_eq!(
            steps[2]["output"],
            "Urgent alert sent for user me@example.com: 'Rent due tomorrow'."
        );
        assert_eq!(steps[3]["role"], "assistant");
    }
}
