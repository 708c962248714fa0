use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named action request targeting a domain agent. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }

    /// Malformed calls fail fast and are never retried.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::ToolCall("tool name is empty".into()));
        }
        Ok(())
    }
}

/// Correlates one execution across layers; passed by value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub session_id: String,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub channel_context: Option<Value>,
}

impl ExecutionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: None,
            timestamp: Utc::now(),
            channel_context: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.session_id.trim().is_empty() {
            return Err(ValidationError::Context("session id is empty".into()));
        }
        Ok(())
    }
}

/// Whether a call should be previewed or committed.
///
/// Preview mode only holds back actions that need confirmation; anything
/// confirmation-free executes for real immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Preview,
    Commit,
}

impl ExecutionMode {
    pub fn is_preview(self) -> bool {
        matches!(self, Self::Preview)
    }
}

/// Output of one tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub output: Value,
    pub success: bool,
    pub error: Option<String>,
    #[serde(default)]
    pub needs_reauth: bool,
    #[serde(default)]
    pub reauth_reason: Option<String>,
    pub execution_time_ms: u64,
}

impl ToolResult {
    pub fn success(tool_name: impl Into<String>, output: Value, execution_time_ms: u64) -> Self {
        Self {
            tool_name: tool_name.into(),
            output,
            success: true,
            error: None,
            needs_reauth: false,
            reauth_reason: None,
            execution_time_ms,
        }
    }

    pub fn failure(tool_name: impl Into<String>, error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            tool_name: tool_name.into(),
            output: Value::Null,
            success: false,
            error: Some(error.into()),
            needs_reauth: false,
            reauth_reason: None,
            execution_time_ms,
        }
    }

    /// Normalized shape for agent-signaled authorization failures.
    pub fn reauth_required(
        tool_name: impl Into<String>,
        reason: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        let reason = reason.into();
        Self {
            tool_name: tool_name.into(),
            output: Value::Null,
            success: false,
            error: Some(format!("authorization required: {reason}")),
            needs_reauth: true,
            reauth_reason: Some(reason),
            execution_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_call_empty_name_fails_validation() {
        let call = ToolCall::new("  ", Map::new());
        assert!(call.validate().is_err());
    }

    #[test]
    fn tool_call_serde_defaults_parameters_when_missing() {
        let raw = json!({ "name": "send_email" });
        let parsed: ToolCall = serde_json::from_value(raw).unwrap();
        assert!(parsed.parameters.is_empty());
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn context_empty_session_fails_validation() {
        let ctx = ExecutionContext::new("");
        assert!(ctx.validate().is_err());
    }

    #[test]
    fn context_with_user_keeps_session() {
        let ctx = ExecutionContext::new("session-1").with_user("acme:jane");
        assert_eq!(ctx.session_id, "session-1");
        assert_eq!(ctx.user_id.as_deref(), Some("acme:jane"));
        assert!(ctx.validate().is_ok());
    }

    #[test]
    fn reauth_result_is_normalized() {
        let result = ToolResult::reauth_required("send_email", "token expired", 12);
        assert!(!result.success);
        assert!(result.needs_reauth);
        assert_eq!(result.reauth_reason.as_deref(), Some("token expired"));
        assert!(result.error.as_deref().unwrap().contains("token expired"));
    }

    #[test]
    fn tool_result_serde_defaults_reauth_fields() {
        let raw = json!({
            "tool_name": "search_contacts",
            "output": {"hits": 3},
            "success": true,
            "error": null,
            "execution_time_ms": 8
        });
        let parsed: ToolResult = serde_json::from_value(raw).unwrap();
        assert!(!parsed.needs_reauth);
        assert!(parsed.reauth_reason.is_none());
    }
}
