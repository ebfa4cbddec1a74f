//! End-to-end: watch loop → normalizer → decision engine → actions → reply.
//!
//! The mailbox, model and SMTP relay are in-memory stand-ins; everything in
//! between is the real crate.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use finbot::agent::{LlmDecisionEngine, MailProcessor};
use finbot::channels::{ChangeSignal, LogAlertNotifier, Mailbox, Mailer, OutboundEmail};
use finbot::config::{AgentConfig, WatcherConfig};
use finbot::error::{ChannelError, LlmError};
use finbot::extract::PlainTextExtractor;
use finbot::llm::{
    FinishReason, LlmProvider, Role, ToolCall, ToolCompletionRequest, ToolCompletionResponse,
};
use finbot::store::{FinanceStore, LibSqlFinanceStore};
use finbot::tools::ToolRegistry;
use finbot::trace::AuditLogger;
use finbot::watcher::{MailWatcher, WatchState};

struct MemoryMailbox {
    messages: BTreeMap<u32, Vec<u8>>,
    uid_next: u32,
}

#[async_trait]
impl Mailbox for MemoryMailbox {
    async fn connect(&mut self) -> Result<u32, ChannelError> {
        Ok(self.uid_next)
    }

    async fn watch(&mut self, _timeout: Duration) -> Result<ChangeSignal, ChannelError> {
        Ok(ChangeSignal::Notified(vec!["* 3 EXISTS".to_string()]))
    }

    async fn search_since(&mut self, cursor: u32) -> Result<Vec<u32>, ChannelError> {
        Ok(self.messages.keys().copied().filter(|&u| u > cursor).collect())
    }

    async fn fetch(&mut self, uid: u32) -> Result<Vec<u8>, ChannelError> {
        self.messages
            .get(&uid)
            .cloned()
            .ok_or_else(|| ChannelError::imap_lost("no such message"))
    }

    async fn disconnect(&mut self) {}
}

/// Stores a record for anything financial, suppresses when asked not to reply.
struct StubModel;

#[async_trait]
impl LlmProvider for StubModel {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let last = request.messages.last().expect("non-empty history");
        let (content, tool_calls) = match last.role {
            Role::User if last.content.contains("no reply needed") => (
                None,
                vec![ToolCall {
                    id: "fc_1".to_string(),
                    call_id: Some("call_1".to_string()),
                    name: "suppress_reply".to_string(),
                    arguments: json!({"reason": "sender asked for no reply"}),
                }],
            ),
            Role::User => (
                None,
                vec![ToolCall {
                    id: "fc_1".to_string(),
                    call_id: Some("call_1".to_string()),
                    name: "store_record".to_string(),
                    arguments: json!({
                        "due_date": "2025-03-25",
                        "description": "Monthly statement",
                        "amount": "310.55 USD",
                        "category": "banking",
                        "reason": "bank statement"
                    }),
                }],
            ),
            _ => (
                Some("<subject>Statement stored</subject><body>Hi, your statement is filed.</body>".to_string()),
                Vec::new(),
            ),
        };
        let finish_reason = if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolUse
        };
        Ok(ToolCompletionResponse {
            content,
            tool_calls,
            input_tokens: 0,
            output_tokens: 0,
            finish_reason,
        })
    }
}

#[derive(Default)]
struct OutboxMailer {
    sent: Mutex<Vec<OutboundEmail>>,
}

#[async_trait]
impl Mailer for OutboxMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

fn raw(from: &str, subject: &str, body: &str) -> Vec<u8> {
    format!(
        "From: {from}\r\nTo: bot@example.com\r\nSubject: {subject}\r\n\
         Date: Mon, 3 Mar 2025 08:00:00 +0000\r\n\r\n{body}\r\n"
    )
    .into_bytes()
}

#[tokio::test]
async fn one_drain_replies_suppresses_and_skips() {
    let audit_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LibSqlFinanceStore::new_memory().await.unwrap());
    let tools = Arc::new(ToolRegistry::with_finance_tools(
        store.clone(),
        Arc::new(LogAlertNotifier),
    ));
    let mailer = Arc::new(OutboxMailer::default());
    let config = AgentConfig {
        name: "FinBot".to_string(),
        user_id: "u1".to_string(),
        user_name: "Ada".to_string(),
        user_email: "me@example.com".to_string(),
        authorized_senders: vec!["me@example.com".to_string()],
        max_turns: 5,
        audit_dir: Some(audit_dir.path().to_path_buf()),
        show_reasoning: false,
    };
    let engine = Arc::new(LlmDecisionEngine::new("FinBot", Arc::new(StubModel), 5));
    let processor = MailProcessor::new(
        config,
        engine,
        tools,
        mailer.clone(),
        Arc::new(PlainTextExtractor),
    );

    let mailbox = MemoryMailbox {
        messages: BTreeMap::from([
            (10, raw("Old <me@example.com>", "Already seen", "ignore me")),
            (11, raw("Ada <me@example.com>", "March statement", "Balance 310.55 USD")),
            (12, raw("me@example.com", "Receipt", "Thanks, no reply needed")),
            (13, raw("Spam <promo@shop.test>", "Big sale", "Buy now")),
        ]),
        uid_next: 11,
    };
    let watcher_config = WatcherConfig {
        mailbox: "INBOX".to_string(),
        idle_timeout: Duration::from_secs(60),
        reconnect_backoff: Duration::from_millis(1),
        drain_pause: Duration::from_millis(1),
    };
    let mut watcher = MailWatcher::new(mailbox, processor, watcher_config);

    watcher.step().await; // connect
    watcher.step().await; // wait
    assert_eq!(watcher.state(), WatchState::Draining);
    watcher.step().await; // drain
    assert_eq!(watcher.state(), WatchState::IdleWait);
    assert_eq!(watcher.cursor(), Some(13));

    let sent = mailer.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "me@example.com");
    assert_eq!(sent[0].subject, "Statement stored");
    assert_eq!(sent[0].body, "Hi, your statement is filed.");

    let records = store.list_records("me@example.com").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].category.as_deref(), Some("banking"));

    let mut logs = Vec::new();
    for entry in std::fs::read_dir(audit_dir.path()).unwrap() {
        logs.push(AuditLogger::load(&entry.unwrap().path()).await.unwrap());
    }
    logs.sort_by_key(|l| l.message_uid);
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].message_uid, 11);
    assert!(!logs[0].suppressed);
    assert_eq!(logs[0].reasoning_summary.tools_used[0].tool_name, "store_record");
    assert_eq!(logs[1].message_uid, 12);
    assert!(logs[1].suppressed);
}
