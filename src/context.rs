//! Decision context — who a message is being handled for.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Per-message context handed to the decision engine and every action.
///
/// Built fresh for each message and dropped when that message is done.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionContext {
    /// Unique id for this decision, used in logs.
    pub decision_id: Uuid,
    /// User identifier that owns the mailbox.
    pub user_id: String,
    /// The user's email address.
    pub user_email: String,
    /// Display name used in the prompt.
    pub user_name: String,
    /// Full text the engine was given.
    pub original_input: String,
    /// "Today" from the engine's point of view (the message date).
    pub reference_date: DateTime<Utc>,
}

impl DecisionContext {
    pub fn new(
        user_id: impl Into<String>,
        user_email: impl Into<String>,
        user_name: impl Into<String>,
        original_input: impl Into<String>,
        reference_date: DateTime<Utc>,
    ) -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            user_id: user_id.into(),
            user_email: user_email.into(),
            user_name: user_name.into(),
            original_input: original_input.into(),
            reference_date,
        }
    }

    /// Reference date as a calendar day.
    pub fn reference_day(&self) -> NaiveDate {
        self.reference_date.date_naive()
    }
}

impl Default for DecisionContext {
    fn default() -> Self {
        Self::new("default", "", "", "", Utc::now())
    }
}
