use crate::confirmation::types::ActionPreview;
use crate::executor::types::ExecutionContext;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Outcome contract every agent must return.
///
/// A discriminated union instead of an untyped payload with an optional
/// `success` field, so callers never sniff result shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AgentOutcome {
    Success {
        output: Value,
    },
    Failure {
        error: String,
        #[serde(default)]
        needs_reauth: bool,
        #[serde(default)]
        reauth_reason: Option<String>,
    },
}

impl AgentOutcome {
    pub fn success(output: Value) -> Self {
        Self::Success { output }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
            needs_reauth: false,
            reauth_reason: None,
        }
    }
}

/// Typed authorization failure an agent can raise from `generate_preview`
/// or `execute`. The executor normalizes it into a reauth tool result
/// instead of propagating it.
#[derive(Debug, Clone, Error)]
#[error("agent authorization expired: {reason}")]
pub struct ReauthRequired {
    pub reason: String,
}

impl ReauthRequired {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A pluggable handler implementing one capability behind a uniform
/// execute/preview interface.
pub trait Agent: Send + Sync {
    /// Agent name, matched against `ToolCall::name`.
    fn name(&self) -> &str;

    /// Service category used to scope credential lookups (e.g. "email",
    /// "calendar").
    fn service_category(&self) -> &str;

    fn execute<'a>(
        &'a self,
        parameters: &'a Map<String, Value>,
        ctx: &'a ExecutionContext,
        credential: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<AgentOutcome>> + Send + 'a>>;

    /// Optional preview capability. `None` means the agent cannot preview
    /// and callers must synthesize a fallback.
    fn generate_preview<'a>(
        &'a self,
        _parameters: &'a Map<String, Value>,
        _ctx: &'a ExecutionContext,
    ) -> Option<Pin<Box<dyn Future<Output = anyhow::Result<ActionPreview>> + Send + 'a>>> {
        None
    }
}

/// Capability lookup. Injected into the executor, confirmation service and
/// workflow executor; never a process-wide mutable singleton.
pub trait AgentRegistry: Send + Sync {
    fn get_agent(&self, name: &str) -> Option<Arc<dyn Agent>>;
}

/// Registry backed by a map built once at startup.
#[derive(Default)]
pub struct InMemoryAgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl InMemoryAgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Register an agent. Replaces any existing agent with the same name.
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.name().to_string(), agent);
    }

    pub fn agent_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl AgentRegistry for InMemoryAgentRegistry {
    fn get_agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoAgent;

    impl Agent for EchoAgent {
        fn name(&self) -> &str {
            "echo"
        }

        fn service_category(&self) -> &str {
            "diagnostics"
        }

        fn execute<'a>(
            &'a self,
            parameters: &'a Map<String, Value>,
            _ctx: &'a ExecutionContext,
            _credential: Option<&'a str>,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<AgentOutcome>> + Send + 'a>> {
            Box::pin(async move { Ok(AgentOutcome::success(Value::Object(parameters.clone()))) })
        }
    }

    #[test]
    fn registry_lookup_by_name() {
        let mut registry = InMemoryAgentRegistry::new();
        registry.register(Arc::new(EchoAgent));

        assert!(registry.get_agent("echo").is_some());
        assert!(registry.get_agent("missing").is_none());
        assert_eq!(registry.agent_names(), vec!["echo"]);
    }

    #[tokio::test]
    async fn default_preview_capability_is_absent() {
        let agent = EchoAgent;
        let ctx = ExecutionContext::new("session-1");
        assert!(agent.generate_preview(&Map::new(), &ctx).is_none());
    }

    #[tokio::test]
    async fn echo_agent_returns_success_outcome() {
        let agent = EchoAgent;
        let ctx = ExecutionContext::new("session-1");
        let mut parameters = Map::new();
        parameters.insert("k".to_string(), json!("v"));

        let outcome = agent.execute(&parameters, &ctx, None).await.unwrap();
        match outcome {
            AgentOutcome::Success { output } => assert_eq!(output["k"], json!("v")),
            AgentOutcome::Failure { .. } => unreachable!(),
        }
    }

    #[test]
    fn outcome_serde_discriminates_by_tag() {
        let raw = json!({
            "outcome": "failure",
            "error": "token expired",
            "needs_reauth": true,
            "reauth_reason": "oauth token expired"
        });
        let parsed: AgentOutcome = serde_json::from_value(raw).unwrap();
        match parsed {
            AgentOutcome::Failure {
                needs_reauth,
                reauth_reason,
                ..
            } => {
                assert!(needs_reauth);
                assert_eq!(reauth_reason.as_deref(), Some("oauth token expired"));
            }
            AgentOutcome::Success { .. } => unreachable!(),
        }
    }
}
