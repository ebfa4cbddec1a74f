//! `FinanceStore` trait and the records it persists.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::error::DatabaseError;

/// A bill, invoice or payment captured from a message.
#[derive(Debug, Clone, Serialize)]
pub struct FinancialRecord {
    pub id: Uuid,
    pub user_email: String,
    /// Due date as the model wrote it.
    pub due_date: Option<String>,
    /// Amount as the model wrote it.
    pub amount: Option<String>,
    /// `amount` parsed, when it looks like a number.
    pub amount_value: Option<Decimal>,
    pub description: String,
    pub category: Option<String>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a [`FinancialRecord`].
#[derive(Debug, Clone, Default)]
pub struct NewRecord {
    pub user_email: String,
    pub due_date: Option<String>,
    pub amount: Option<String>,
    pub description: String,
    pub category: Option<String>,
    pub reason: String,
}

/// A reminder for the user.
#[derive(Debug, Clone, Serialize)]
pub struct Reminder {
    pub id: Uuid,
    pub user_email: String,
    pub text: String,
    /// Trigger time as the model wrote it.
    pub trigger_time: String,
    /// `trigger_time` parsed, when it is a recognizable date/time.
    pub trigger_at: Option<DateTime<Utc>>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a [`Reminder`].
#[derive(Debug, Clone, Default)]
pub struct NewReminder {
    pub user_email: String,
    pub text: String,
    pub trigger_time: String,
    pub reason: String,
}

/// Persistence for the finance actions.
#[async_trait]
pub trait FinanceStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Records ─────────────────────────────────────────────────────

    async fn insert_record(&self, record: &NewRecord) -> Result<FinancialRecord, DatabaseError>;

    /// Records for a user, newest first.
    async fn list_records(&self, user_email: &str) -> Result<Vec<FinancialRecord>, DatabaseError>;

    // ── Reminders ───────────────────────────────────────────────────

    async fn insert_reminder(&self, reminder: &NewReminder) -> Result<Reminder, DatabaseError>;

    /// Reminders for a user, soonest first; unparsed trigger times last.
    async fn list_reminders(&self, user_email: &str) -> Result<Vec<Reminder>, DatabaseError>;
}

/// Parse an amount like `$1,200.50`, `1200 USD` or `-15`.
pub fn parse_amount(text: &str) -> Option<Decimal> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned).ok()
}

/// Parse a trigger time in one of the formats the model tends to use.
pub fn parse_trigger_time(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(ndt.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(9, 0, 0))
        .map(|ndt| ndt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn amounts_with_currency_markup() {
        assert_eq!(parse_amount("$1,200.50"), Some(dec!(1200.50)));
        assert_eq!(parse_amount("1200 USD"), Some(dec!(1200)));
        assert_eq!(parse_amount("-15"), Some(dec!(-15)));
        assert_eq!(parse_amount("unknown"), None);
        assert_eq!(parse_amount("1.2.3"), None);
    }

    #[test]
    fn trigger_time_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 11, 3, 14, 30, 0).unwrap();
        assert_eq!(parse_trigger_time("2025-11-03T14:30:00Z"), Some(expected));
        assert_eq!(parse_trigger_time("2025-11-03 14:30"), Some(expected));
        assert_eq!(parse_trigger_time("2025-11-03T14:30"), Some(expected));
        assert_eq!(
            parse_trigger_time("2025-11-03"),
            Some(Utc.with_ymd_and_hms(2025, 11, 3, 9, 0, 0).unwrap())
        );
        assert_eq!(parse_trigger_time("next Tuesday"), None);
    }
}
