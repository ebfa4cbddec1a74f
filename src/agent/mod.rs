//! Agent module — the action session, decision engines, and message processing.

pub mod engine;
pub mod processor;
pub mod prompt;
pub mod reply;
pub mod session;

pub use engine::{DecisionEngine, LlmDecisionEngine};
pub use processor::MailProcessor;
pub use reply::{ReplyEnvelope, compose_reply};
pub use session::{ActionInvocation, ActionOutcome, ActionSession};
