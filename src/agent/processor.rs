//! Per-message processing: allowlist, input assembly, decision, reply, audit.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::agent::engine::DecisionEngine;
use crate::agent::reply::compose_reply;
use crate::agent::session::ActionSession;
use crate::channels::email::is_sender_allowed;
use crate::channels::{Mailer, NormalizedMessage, OutboundEmail};
use crate::config::AgentConfig;
use crate::context::DecisionContext;
use crate::error::Error;
use crate::extract::AttachmentExtractor;
use crate::tools::ToolRegistry;
use crate::trace::{AuditLogger, ReasoningLog};
use crate::watcher::{HandleOutcome, MessageHandler};

/// Handles each new message for one user.
pub struct MailProcessor {
    config: AgentConfig,
    engine: Arc<dyn DecisionEngine>,
    tools: Arc<ToolRegistry>,
    mailer: Arc<dyn Mailer>,
    extractor: Arc<dyn AttachmentExtractor>,
    audit: Option<AuditLogger>,
}

impl MailProcessor {
    pub fn new(
        config: AgentConfig,
        engine: Arc<dyn DecisionEngine>,
        tools: Arc<ToolRegistry>,
        mailer: Arc<dyn Mailer>,
        extractor: Arc<dyn AttachmentExtractor>,
    ) -> Self {
        let audit = config.audit_dir.clone().map(AuditLogger::new);
        Self {
            config,
            engine,
            tools,
            mailer,
            extractor,
            audit,
        }
    }

    /// Build the engine input: metadata, body, then each attachment's text.
    ///
    /// An attachment that cannot be extracted is replaced by a one-line note.
    pub async fn build_input(&self, uid: u32, message: &NormalizedMessage) -> String {
        let mut input = format!(
            "=== EMAIL METADATA ===\nFrom: {}\nTo: {}\nSubject: {}\nDate: {}\n\n=== EMAIL BODY ===\n{}\n",
            message.sender,
            message.recipient,
            message.subject,
            message.date,
            message
                .body_text()
                .map(|b| b.trim().to_string())
                .unwrap_or_else(|| "(no body)".to_string()),
        );

        for attachment in &message.attachments {
            input.push_str(&format!("\n=== ATTACHMENT: {} ===\n", attachment.filename));
            match self.extractor.extract(attachment).await {
                Ok(text) => {
                    input.push_str(text.trim());
                    input.push('\n');
                }
                Err(e) => {
                    warn!(
                        uid,
                        stage = "extract",
                        filename = %attachment.filename,
                        error = %e,
                        "Attachment extraction failed, continuing without it"
                    );
                    input.push_str(&format!("[attachment could not be read: {e}]\n"));
                }
            }
        }
        input
    }

    async fn write_audit(&self, log: &ReasoningLog) {
        let Some(audit) = &self.audit else {
            return;
        };
        if let Err(e) = audit.write(log).await {
            warn!(uid = log.message_uid, stage = "audit", error = %e, "Failed to write reasoning log");
        }
    }
}

#[async_trait]
impl MessageHandler for MailProcessor {
    async fn handle(&self, uid: u32, message: NormalizedMessage) -> Result<HandleOutcome, Error> {
        let sender = message.sender_address();
        if message.is_auto_submitted() {
            info!(uid, sender = %sender, "Auto-submitted message, skipping");
            return Ok(HandleOutcome::Skipped);
        }
        if !is_sender_allowed(&self.config.authorized_senders, &sender) {
            info!(uid, sender = %sender, "Sender not authorized, skipping");
            return Ok(HandleOutcome::Skipped);
        }
        info!(uid, sender = %sender, subject = %message.subject, "Processing message");

        let input = self.build_input(uid, &message).await;
        let context = DecisionContext::new(
            &self.config.user_id,
            &self.config.user_email,
            &self.config.user_name,
            input.clone(),
            message.received_at(),
        );
        let mut session = ActionSession::new(context, Arc::clone(&self.tools));

        let final_output = self.engine.decide(&mut session).await?;
        let invocations = session.invocation_count();
        let outcome = session.finish(final_output);

        if self.config.show_reasoning {
            outcome.trace.log_steps();
        }
        let log = ReasoningLog::new(
            self.engine.name(),
            self.engine.model(),
            uid,
            &input,
            &outcome.final_output,
            outcome.suppressed,
            outcome.trace,
        );
        self.write_audit(&log).await;

        if outcome.suppressed {
            info!(uid, invocations, "Reply suppressed, nothing sent");
            return Ok(HandleOutcome::Suppressed);
        }

        let reply = compose_reply(&log.final_output);
        let email = OutboundEmail::plain(&sender, &reply.subject, &reply.body);
        self.mailer.send(&email).await?;
        info!(uid, to = %sender, subject = %reply.subject, invocations, "Reply sent");
        Ok(HandleOutcome::Replied)
    }
}
