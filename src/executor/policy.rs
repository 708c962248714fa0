use crate::config::PolicyConfig;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

/// Maps a tool call to an operation category (e.g. "send", "read").
/// Treated as an opaque evaluator; classification failure is recoverable
/// and falls back to the per-agent policy.
pub trait OperationClassifier: Send + Sync {
    fn classify<'a>(
        &'a self,
        tool_name: &'a str,
        parameters: &'a Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;
}

/// Default classifier: verb-prefix heuristic over snake_case tool names.
pub struct KeywordClassifier;

impl OperationClassifier for KeywordClassifier {
    fn classify<'a>(
        &'a self,
        tool_name: &'a str,
        _parameters: &'a Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let verb = tool_name
                .split('_')
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase();
            let category = match verb.as_str() {
                "send" | "reply" | "forward" | "post" | "publish" => "send",
                "create" | "add" | "schedule" | "book" | "insert" => "create",
                "update" | "edit" | "modify" | "move" | "rename" | "set" => "update",
                "delete" | "remove" | "cancel" | "clear" | "archive" => "delete",
                "get" | "list" | "read" | "search" | "fetch" | "find" | "check" | "lookup" => {
                    "read"
                }
                _ => anyhow::bail!("no operation category for tool '{tool_name}'"),
            };
            Ok(category.to_string())
        })
    }
}

/// Per-agent confirmation policy consulted by the tool executor.
#[derive(Debug, Clone)]
pub struct ConfirmationPolicy {
    confirm_categories: HashSet<String>,
    confirm_agents: HashSet<String>,
    critical_tools: HashSet<String>,
}

impl ConfirmationPolicy {
    pub fn from_config(config: &PolicyConfig) -> Self {
        Self {
            confirm_categories: config.confirm_categories.iter().cloned().collect(),
            confirm_agents: config.confirm_agents.iter().cloned().collect(),
            critical_tools: config.critical_tools.iter().cloned().collect(),
        }
    }

    pub fn category_requires_confirmation(&self, category: &str) -> bool {
        self.confirm_categories.contains(category)
    }

    /// Coarser fallback used when classification fails.
    pub fn agent_requires_confirmation(&self, agent_name: &str) -> bool {
        self.confirm_agents.contains(agent_name)
    }

    /// A critical tool's failure halts a batch of executions.
    pub fn is_critical(&self, tool_name: &str) -> bool {
        self.critical_tools.contains(tool_name)
    }
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self::from_config(&PolicyConfig::default())
    }
}
