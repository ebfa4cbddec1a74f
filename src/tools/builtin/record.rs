//! `store_record` — save bill or payment details.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::context::DecisionContext;
use crate::store::{FinanceStore, NewRecord};
use crate::tools::tool::{Tool, ToolError, ToolOutput, require_reason, require_str, require_text};

pub struct StoreRecordTool {
    store: Arc<dyn FinanceStore>,
}

impl StoreRecordTool {
    pub fn new(store: Arc<dyn FinanceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for StoreRecordTool {
    fn name(&self) -> &str {
        "store_record"
    }

    fn description(&self) -> &str {
        "Store the details of an invoice, bill, payment confirmation or other \
         financial document so the user can look it up later."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "due_date": {
                    "type": "string",
                    "description": "Due date, YYYY-MM-DD"
                },
                "amount": {
                    "type": ["string", "number"],
                    "description": "Amount with currency, e.g. '120.00 USD'"
                },
                "description": {
                    "type": "string",
                    "description": "What the document is about"
                },
                "category": {
                    "type": "string",
                    "description": "e.g. utilities, rent, subscription, tax, insurance"
                },
                "reason": {
                    "type": "string",
                    "description": "Why this is worth storing"
                }
            },
            "required": ["due_date", "amount", "description", "category", "reason"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &DecisionContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let due_date = require_text(&params, self.name(), "due_date")?;
        let amount = require_text(&params, self.name(), "amount")?;
        let description = require_str(&params, self.name(), "description")?;
        let category = require_text(&params, self.name(), "category")?;
        let reason = require_reason(&params, self.name())?;

        let stored = self
            .store
            .insert_record(&NewRecord {
                user_email: ctx.user_email.clone(),
                due_date: Some(due_date),
                amount: Some(amount),
                description: description.to_string(),
                category: Some(category),
                reason: reason.to_string(),
            })
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: self.name().to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            user = %ctx.user_email,
            record_id = %stored.id,
            amount = ?stored.amount_value,
            "Financial record stored"
        );

        Ok(ToolOutput::text(
            format!(
                "Information stored for user {} for reason: '{}'.",
                ctx.user_email, reason
            ),
            start.elapsed(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlFinanceStore;
    use rust_decimal_macros::dec;

    fn ctx() -> DecisionContext {
        DecisionContext {
            user_email: "me@x.com".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn record_is_stored() {
        let store = Arc::new(LibSqlFinanceStore::new_memory().await.unwrap());
        let tool = StoreRecordTool::new(store.clone());
        let params = serde_json::json!({
            "due_date": "2025-11-05",
            "amount": 89.9,
            "description": "Internet, October",
            "category": "utilities",
            "reason": "Monthly invoice"
        });

        let output = tool.execute(params, &ctx()).await.unwrap();
        assert_eq!(
            output.as_text(),
            "Information stored for user me@x.com for reason: 'Monthly invoice'."
        );

        let records = store.list_records("me@x.com").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].amount_value, Some(dec!(89.9)));
        assert_eq!(records[0].due_date.as_deref(), Some("2025-11-05"));
    }

    #[tokio::test]
    async fn description_is_required() {
        let store = Arc::new(LibSqlFinanceStore::new_memory().await.unwrap());
        let tool = StoreRecordTool::new(store);
        let params = serde_json::json!({
            "due_date": "2025-11-05",
            "amount": "10",
            "category": "utilities",
            "reason": "r"
        });
        assert!(tool.execute(params, &ctx()).await.is_err());
    }

    #[tokio::test]
    async fn missing_due_date_stores_nothing() {
        let store = Arc::new(LibSqlFinanceStore::new_memory().await.unwrap());
        let tool = StoreRecordTool::new(store.clone());
        let params = serde_json::json!({
            "amount": "10",
            "description": "Gym membership",
            "category": "subscription",
            "reason": "r"
        });

        let err = tool.execute(params, &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("due_date"), "{err}");
        assert!(store.list_records("me@x.com").await.unwrap().is_empty());
    }
}
