//! Action registry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::channels::AlertNotifier;
use crate::llm::ToolDefinition;
use crate::store::FinanceStore;
use crate::tools::builtin::{
    ScheduleReminderTool, SendUrgentAlertTool, StoreRecordTool, SuppressReplyTool,
};
use crate::tools::tool::Tool;

/// Names of built-in actions that cannot be shadowed by dynamic registrations.
const PROTECTED_TOOL_NAMES: &[&str] = &[
    "schedule_reminder",
    "send_urgent_alert",
    "store_record",
    "suppress_reply",
];

/// Registry of available tools.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register an extra action. Names of the built-in actions are refused.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if PROTECTED_TOOL_NAMES.contains(&name.as_str()) {
            tracing::warn!(
                tool = %name,
                "Rejected tool registration: would shadow a built-in action"
            );
            return;
        }
        self.tools.write().await.insert(name.clone(), tool);
        tracing::debug!(tool = %name, "Registered tool");
    }

    fn register_builtin(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        tracing::debug!(tool = %name, "Registered built-in action");
        self.tools.get_mut().insert(name, tool);
    }

    /// Get a tool by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Get tool definitions for LLM function calling, sorted by name.
    pub async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .read()
            .await
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Registry holding the four finance actions.
    pub fn with_finance_tools(
        store: Arc<dyn FinanceStore>,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register_builtin(Arc::new(ScheduleReminderTool::new(Arc::clone(&store))));
        registry.register_builtin(Arc::new(SendUrgentAlertTool::new(notifier)));
        registry.register_builtin(Arc::new(StoreRecordTool::new(store)));
        registry.register_builtin(Arc::new(SuppressReplyTool));
        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::LogAlertNotifier;
    use crate::context::DecisionContext;
    use crate::store::LibSqlFinanceStore;
    use crate::tools::tool::{ToolError, ToolOutput};
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Debug)]
    struct MockTool {
        name: String,
    }

    #[async_trait]
    impl Tool for MockTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "A mock tool for testing"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(
            &self,
            _params: serde_json::Value,
            _ctx: &DecisionContext,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text("mock", Duration::from_millis(1)))
        }
    }

    async fn finance_registry() -> ToolRegistry {
        let store = Arc::new(LibSqlFinanceStore::new_memory().await.unwrap());
        ToolRegistry::with_finance_tools(store, Arc::new(LogAlertNotifier))
    }

    #[tokio::test]
    async fn extra_tools_are_listed_in_name_order() {
        let registry = finance_registry().await;
        registry
            .register(Arc::new(MockTool {
                name: "flag_invoice".to_string(),
            }))
            .await;

        let defs = registry.tool_definitions().await;
        assert_eq!(defs.len(), 5);
        assert_eq!(defs[0].name, "flag_invoice");
        assert!(registry.get("flag_invoice").await.is_some());
        assert!(registry.get("wire_money").await.is_none());
    }

    #[tokio::test]
    async fn finance_registry_exposes_four_actions() {
        let registry = finance_registry().await;

        let names: Vec<String> = registry
            .tool_definitions()
            .await
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "schedule_reminder",
                "send_urgent_alert",
                "store_record",
                "suppress_reply"
            ]
        );
    }

    #[tokio::test]
    async fn builtin_actions_cannot_be_shadowed() {
        let registry = finance_registry().await;

        registry
            .register(Arc::new(MockTool {
                name: "suppress_reply".to_string(),
            }))
            .await;
        let tool = registry.get("suppress_reply").await.unwrap();
        assert_ne!(tool.description(), "A mock tool for testing");
    }
}
