//! Reasoning traces and the per-message audit log.
//!
//! A [`ReasoningTrace`] records what the decision engine saw and did, step by
//! step, in the item format of the OpenAI Responses API. After each message
//! the [`AuditLogger`] wraps the trace in a [`ReasoningLog`] and writes it to
//! `reasoning_log_<YYYYmmdd_HHMMSS>_<uid>.json`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::AuditError;

/// One entry of the trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraceStep {
    Message(MessageStep),
    Item(ItemStep),
}

/// A role-tagged conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum MessageStep {
    User { content: String },
    Assistant { content: Vec<OutputPart> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputPart {
    OutputText { text: String },
}

/// A type-tagged function call or its output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemStep {
    FunctionCall {
        name: String,
        /// Arguments as JSON text.
        arguments: String,
        call_id: String,
    },
    FunctionCallOutput { call_id: String, output: String },
}

impl TraceStep {
    pub fn user(content: impl Into<String>) -> Self {
        Self::Message(MessageStep::User {
            content: content.into(),
        })
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Message(MessageStep::Assistant {
            content: vec![OutputPart::OutputText { text: text.into() }],
        })
    }

    pub fn function_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: &serde_json::Value,
    ) -> Self {
        Self::Item(ItemStep::FunctionCall {
            name: name.into(),
            arguments: arguments.to_string(),
            call_id: call_id.into(),
        })
    }

    pub fn function_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Item(ItemStep::FunctionCallOutput {
            call_id: call_id.into(),
            output: output.into(),
        })
    }
}

/// Ordered steps of one decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReasoningTrace {
    steps: Vec<TraceStep>,
}

impl ReasoningTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: TraceStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Summarize the trace for the audit log.
    pub fn summarize(
        &self,
        agent_name: &str,
        model: &str,
        input: &str,
        final_output: &str,
    ) -> ReasoningSummary {
        let mut tools_used = Vec::new();
        let mut reasoning_steps = Vec::new();

        for step in &self.steps {
            match step {
                TraceStep::Item(ItemStep::FunctionCall {
                    name, arguments, ..
                }) => {
                    let usage = ToolUsage::from_call(name, arguments);
                    reasoning_steps.push(format!("Used {}: {}", name, usage.reason));
                    tools_used.push(usage);
                }
                TraceStep::Item(ItemStep::FunctionCallOutput { output, .. }) => {
                    reasoning_steps.push(format!("Tool result: {}...", preview(output, 50)));
                }
                TraceStep::Message(_) => {}
            }
        }

        ReasoningSummary {
            agent_name: agent_name.to_string(),
            model: model.to_string(),
            input_length: input.chars().count(),
            tools_used,
            reasoning_steps,
            final_output_length: final_output.chars().count(),
        }
    }

    /// Emit the trace as log events, one per step.
    pub fn log_steps(&self) {
        for (i, step) in self.steps.iter().enumerate() {
            let n = i + 1;
            match step {
                TraceStep::Message(MessageStep::User { content }) => {
                    tracing::info!(step = n, input = %preview(content, 80), "User input");
                }
                TraceStep::Message(MessageStep::Assistant { content }) => {
                    let text = content
                        .first()
                        .map(|OutputPart::OutputText { text }| text.as_str())
                        .unwrap_or_default();
                    tracing::info!(step = n, text = %preview(text, 150), "Assistant");
                }
                TraceStep::Item(ItemStep::FunctionCall {
                    name, arguments, ..
                }) => {
                    let usage = ToolUsage::from_call(name, arguments);
                    tracing::info!(step = n, tool = %name, reason = %usage.reason, "Tool call");
                    tracing::debug!(step = n, tool = %name, arguments = %usage.arguments, "Tool arguments");
                }
                TraceStep::Item(ItemStep::FunctionCallOutput { output, .. }) => {
                    tracing::info!(step = n, output = %preview(output, 80), "Tool result");
                }
            }
        }
    }
}

/// First `max` characters of `s`.
fn preview(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// One action invocation as shown in the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub tool_name: String,
    pub reason: String,
    /// Arguments other than `reason`; the raw text when it was not JSON.
    pub arguments: serde_json::Value,
}

impl ToolUsage {
    fn from_call(name: &str, arguments: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(arguments) {
            Ok(serde_json::Value::Object(mut args)) => {
                let reason = match args.remove("reason") {
                    Some(serde_json::Value::String(r)) => r,
                    _ => "No reason provided".to_string(),
                };
                Self {
                    tool_name: name.to_string(),
                    reason,
                    arguments: serde_json::Value::Object(args),
                }
            }
            _ => Self {
                tool_name: name.to_string(),
                reason: "No reason provided".to_string(),
                arguments: serde_json::Value::String(arguments.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningSummary {
    pub agent_name: String,
    pub model: String,
    pub input_length: usize,
    pub tools_used: Vec<ToolUsage>,
    pub reasoning_steps: Vec<String>,
    pub final_output_length: usize,
}

/// The audit document written for each processed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningLog {
    pub timestamp: DateTime<Local>,
    pub agent_name: String,
    pub model: String,
    pub input: String,
    pub final_output: String,
    pub suppressed: bool,
    pub message_uid: u32,
    pub reasoning_summary: ReasoningSummary,
    pub full_trace: ReasoningTrace,
}

impl ReasoningLog {
    pub fn new(
        agent_name: &str,
        model: &str,
        message_uid: u32,
        input: &str,
        final_output: &str,
        suppressed: bool,
        trace: ReasoningTrace,
    ) -> Self {
        Self {
            timestamp: Local::now(),
            agent_name: agent_name.to_string(),
            model: model.to_string(),
            input: input.to_string(),
            final_output: final_output.to_string(),
            suppressed,
            message_uid,
            reasoning_summary: trace.summarize(agent_name, model, input, final_output),
            full_trace: trace,
        }
    }

    /// File name under the audit directory.
    pub fn file_name(&self) -> String {
        format!(
            "reasoning_log_{}_{}.json",
            self.timestamp.format("%Y%m%d_%H%M%S"),
            self.message_uid
        )
    }
}

/// Writes reasoning logs into one directory.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    dir: PathBuf,
}

impl AuditLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `log` as pretty JSON, creating the directory if needed.
    pub async fn write(&self, log: &ReasoningLog) -> Result<PathBuf, AuditError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(log.file_name());
        let json = serde_json::to_string_pretty(log)?;
        fs::write(&path, json).await?;
        tracing::debug!(path = %path.display(), uid = log.message_uid, "Reasoning log saved");
        Ok(path)
    }

    /// Read a previously written log.
    pub async fn load(path: &Path) -> Result<ReasoningLog, AuditError> {
        let raw = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}
