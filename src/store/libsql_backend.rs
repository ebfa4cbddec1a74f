//! libSQL backend — async `FinanceStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    FinanceStore, FinancialRecord, NewRecord, NewReminder, Reminder, parse_amount,
    parse_trigger_time,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlFinanceStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlFinanceStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::with_database(db)?;
        store.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let store = Self::with_database(db)?;
        store.run_migrations().await?;
        Ok(store)
    }

    fn with_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

const RECORD_COLUMNS: &str =
    "id, user_email, due_date, amount, amount_value, description, category, reason, created_at";

/// Column order matches RECORD_COLUMNS.
fn row_to_record(row: &libsql::Row) -> Result<FinancialRecord, libsql::Error> {
    let id: String = row.get(0)?;
    let amount_value: Option<String> = row.get(4).ok();
    let created: String = row.get(8)?;
    Ok(FinancialRecord {
        id: parse_uuid(&id),
        user_email: row.get(1)?,
        due_date: row.get(2).ok(),
        amount: row.get(3).ok(),
        amount_value: amount_value.and_then(|v| Decimal::from_str(&v).ok()),
        description: row.get(5)?,
        category: row.get(6).ok(),
        reason: row.get(7)?,
        created_at: parse_datetime(&created),
    })
}

const REMINDER_COLUMNS: &str = "id, user_email, text, trigger_time, trigger_at, reason, created_at";

/// Column order matches REMINDER_COLUMNS.
fn row_to_reminder(row: &libsql::Row) -> Result<Reminder, libsql::Error> {
    let id: String = row.get(0)?;
    let trigger_at: Option<String> = row.get(4).ok();
    let created: String = row.get(6)?;
    Ok(Reminder {
        id: parse_uuid(&id),
        user_email: row.get(1)?,
        text: row.get(2)?,
        trigger_time: row.get(3)?,
        trigger_at: trigger_at.map(|s| parse_datetime(&s)),
        reason: row.get(5)?,
        created_at: parse_datetime(&created),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl FinanceStore for LibSqlFinanceStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn insert_record(&self, record: &NewRecord) -> Result<FinancialRecord, DatabaseError> {
        let stored = FinancialRecord {
            id: Uuid::new_v4(),
            user_email: record.user_email.clone(),
            due_date: record.due_date.clone(),
            amount: record.amount.clone(),
            amount_value: record.amount.as_deref().and_then(parse_amount),
            description: record.description.clone(),
            category: record.category.clone(),
            reason: record.reason.clone(),
            created_at: Utc::now(),
        };

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO financial_records ({RECORD_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    stored.id.to_string(),
                    stored.user_email.as_str(),
                    opt_text(stored.due_date.as_deref()),
                    opt_text(stored.amount.as_deref()),
                    opt_text(stored.amount_value.map(|d| d.to_string()).as_deref()),
                    stored.description.as_str(),
                    opt_text(stored.category.as_deref()),
                    stored.reason.as_str(),
                    stored.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_record: {e}")))?;

        debug!(id = %stored.id, user = %stored.user_email, "Financial record inserted");
        Ok(stored)
    }

    async fn list_records(&self, user_email: &str) -> Result<Vec<FinancialRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM financial_records
                     WHERE user_email = ?1 ORDER BY created_at DESC"
                ),
                params![user_email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_records: {e}")))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_record(&row) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping record row: {e}"),
            }
        }
        Ok(records)
    }

    async fn insert_reminder(&self, reminder: &NewReminder) -> Result<Reminder, DatabaseError> {
        let stored = Reminder {
            id: Uuid::new_v4(),
            user_email: reminder.user_email.clone(),
            text: reminder.text.clone(),
            trigger_time: reminder.trigger_time.clone(),
            trigger_at: parse_trigger_time(&reminder.trigger_time),
            reason: reminder.reason.clone(),
            created_at: Utc::now(),
        };

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO reminders ({REMINDER_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    stored.id.to_string(),
                    stored.user_email.as_str(),
                    stored.text.as_str(),
                    stored.trigger_time.as_str(),
                    opt_text(stored.trigger_at.map(|t| t.to_rfc3339()).as_deref()),
                    stored.reason.as_str(),
                    stored.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_reminder: {e}")))?;

        debug!(id = %stored.id, trigger_at = ?stored.trigger_at, "Reminder inserted");
        Ok(stored)
    }

    async fn list_reminders(&self, user_email: &str) -> Result<Vec<Reminder>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {REMINDER_COLUMNS} FROM reminders
                     WHERE user_email = ?1
                     ORDER BY trigger_at IS NULL, trigger_at ASC, created_at ASC"
                ),
                params![user_email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_reminders: {e}")))?;

        let mut reminders = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_reminder(&row) {
                Ok(reminder) => reminders.push(reminder),
                Err(e) => tracing::warn!("Skipping reminder row: {e}"),
            }
        }
        Ok(reminders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record(user: &str, amount: Option<&str>) -> NewRecord {
        NewRecord {
            user_email: user.into(),
            due_date: Some("2025-11-01".into()),
            amount: amount.map(String::from),
            description: "Electricity bill".into(),
            category: Some("utilities".into()),
            reason: "Invoice received".into(),
        }
    }

    #[tokio::test]
    async fn record_roundtrip() {
        let store = LibSqlFinanceStore::new_memory().await.unwrap();
        let inserted = store
            .insert_record(&record("me@x.com", Some("$1,250.00")))
            .await
            .unwrap();
        assert_eq!(inserted.amount_value, Some(dec!(1250.00)));

        let records = store.list_records("me@x.com").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, inserted.id);
        assert_eq!(records[0].amount.as_deref(), Some("$1,250.00"));
        assert_eq!(records[0].amount_value, Some(dec!(1250)));
        assert_eq!(records[0].category.as_deref(), Some("utilities"));
    }

    #[tokio::test]
    async fn record_without_amount() {
        let store = LibSqlFinanceStore::new_memory().await.unwrap();
        store.insert_record(&record("me@x.com", None)).await.unwrap();
        let records = store.list_records("me@x.com").await.unwrap();
        assert!(records[0].amount.is_none());
        assert!(records[0].amount_value.is_none());
    }

    #[tokio::test]
    async fn records_are_scoped_to_user() {
        let store = LibSqlFinanceStore::new_memory().await.unwrap();
        store.insert_record(&record("a@x.com", Some("1"))).await.unwrap();
        store.insert_record(&record("b@x.com", Some("2"))).await.unwrap();
        assert_eq!(store.list_records("a@x.com").await.unwrap().len(), 1);
        assert!(store.list_records("c@x.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reminders_sorted_with_unparsed_last() {
        let store = LibSqlFinanceStore::new_memory().await.unwrap();
        for (text, when) in [
            ("vague", "sometime soon"),
            ("later", "2025-12-01 10:00"),
            ("sooner", "2025-11-01T08:00:00Z"),
        ] {
            store
                .insert_reminder(&NewReminder {
                    user_email: "me@x.com".into(),
                    text: text.into(),
                    trigger_time: when.into(),
                    reason: "bill".into(),
                })
                .await
                .unwrap();
        }

        let reminders = store.list_reminders("me@x.com").await.unwrap();
        let texts: Vec<_> = reminders.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["sooner", "later", "vague"]);
        assert!(reminders[2].trigger_at.is_none());
        assert_eq!(reminders[2].trigger_time, "sometime soon");
    }

    #[tokio::test]
    async fn local_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("finbot.db");
        {
            let store = LibSqlFinanceStore::new_local(&path).await.unwrap();
            store.insert_record(&record("me@x.com", Some("5"))).await.unwrap();
        }
        let store = LibSqlFinanceStore::new_local(&path).await.unwrap();
        assert_eq!(store.list_records("me@x.com").await.unwrap().len(), 1);
    }
}
