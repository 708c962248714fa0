pub mod policy;
pub mod types;

pub use policy::{ConfirmationPolicy, KeywordClassifier, OperationClassifier};
pub use types::{ExecutionContext, ExecutionMode, ToolCall, ToolResult};

use crate::agents::{AgentOutcome, AgentRegistry, ReauthRequired};
use crate::error::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Executes single actions and ordered batches, deciding per call whether
/// confirmation is required and whether to run in preview or real mode.
pub struct ToolExecutor {
    registry: Arc<dyn AgentRegistry>,
    classifier: Arc<dyn OperationClassifier>,
    policy: ConfirmationPolicy,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<dyn AgentRegistry>,
        classifier: Arc<dyn OperationClassifier>,
        policy: ConfirmationPolicy,
    ) -> Self {
        Self {
            registry,
            classifier,
            policy,
        }
    }

    pub fn policy(&self) -> &ConfirmationPolicy {
        &self.policy
    }

    /// Classify the call into an operation category and consult the policy.
    /// Classification failure falls back to the coarser per-agent policy.
    pub async fn requires_confirmation(&self, call: &ToolCall) -> bool {
        match self.classifier.classify(&call.name, &call.parameters).await {
            Ok(category) => self.policy.category_requires_confirmation(&category),
            Err(error) => {
                tracing::debug!(
                    tool = %call.name,
                    error = %error,
                    "classification failed; falling back to per-agent policy"
                );
                self.policy.agent_requires_confirmation(&call.name)
            }
        }
    }

    /// Execute one call. Malformed input fails fast with a typed error;
    /// everything downstream is converted into a failed [`ToolResult`]
    /// rather than propagated.
    pub async fn execute_tool(
        &self,
        call: &ToolCall,
        ctx: &ExecutionContext,
        credential: Option<&str>,
        mode: ExecutionMode,
    ) -> Result<ToolResult> {
        call.validate()?;
        ctx.validate()?;

        let started = Instant::now();
        tracing::info!(
            tool = %call.name,
            session_id = %ctx.session_id,
            preview = mode.is_preview(),
            "tool execution started"
        );

        let result = if mode.is_preview() && self.requires_confirmation(call).await {
            self.preview_pending_action(call, ctx, started).await
        } else {
            // Preview mode without a confirmation requirement skips over no
            // irreversible risk, so the action runs for real immediately.
            self.execute_real(call, ctx, credential, started).await
        };

        tracing::info!(
            tool = %call.name,
            session_id = %ctx.session_id,
            success = result.success,
            has_error = result.error.is_some(),
            "tool execution finished"
        );
        Ok(result)
    }

    /// Execute calls strictly in order. A failing call whose tool is
    /// critical halts the batch, returning the results gathered so far;
    /// non-critical failures do not halt. Per-call errors become failed
    /// results, never propagate.
    pub async fn execute_tools(
        &self,
        calls: &[ToolCall],
        ctx: &ExecutionContext,
        credential: Option<&str>,
        mode: ExecutionMode,
    ) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let result = match self.execute_tool(call, ctx, credential, mode).await {
                Ok(result) => result,
                Err(error) => ToolResult::failure(&call.name, error.to_string(), 0),
            };
            let halt = !result.success && self.policy.is_critical(&call.name);
            results.push(result);
            if halt {
                tracing::warn!(tool = %call.name, "critical tool failed; halting batch");
                break;
            }
        }
        results
    }

    async fn preview_pending_action(
        &self,
        call: &ToolCall,
        ctx: &ExecutionContext,
        started: Instant,
    ) -> ToolResult {
        let Some(agent) = self.registry.get_agent(&call.name) else {
            return ToolResult::failure(
                &call.name,
                format!("agent not found: {}", call.name),
                elapsed_ms(started),
            );
        };

        match agent.generate_preview(&call.parameters, ctx) {
            Some(preview) => match preview.await {
                Ok(preview) => {
                    let output = serde_json::to_value(&preview).unwrap_or(Value::Null);
                    ToolResult::success(&call.name, output, elapsed_ms(started))
                }
                Err(error) => match error.downcast_ref::<ReauthRequired>() {
                    Some(reauth) => ToolResult::reauth_required(
                        &call.name,
                        reauth.reason.clone(),
                        elapsed_ms(started),
                    ),
                    None => ToolResult::failure(
                        &call.name,
                        format!("preview failed: {error:#}"),
                        elapsed_ms(started),
                    ),
                },
            },
            None => {
                // Agent cannot preview; hold the action with a placeholder.
                let output = serde_json::json!({
                    "status": "awaiting_confirmation",
                    "tool": call.name,
                });
                ToolResult::success(&call.name, output, elapsed_ms(started))
            }
        }
    }

    async fn execute_real(
        &self,
        call: &ToolCall,
        ctx: &ExecutionContext,
        credential: Option<&str>,
        started: Instant,
    ) -> ToolResult {
        let Some(agent) = self.registry.get_agent(&call.name) else {
            return ToolResult::failure(
                &call.name,
                format!("agent not found: {}", call.name),
                elapsed_ms(started),
            );
        };

        match agent.execute(&call.parameters, ctx, credential).await {
            Ok(AgentOutcome::Success { output }) => {
                ToolResult::success(&call.name, output, elapsed_ms(started))
            }
            Ok(AgentOutcome::Failure {
                error,
                needs_reauth,
                reauth_reason,
            }) => {
                if needs_reauth {
                    let reason = reauth_reason.unwrap_or_else(|| error.clone());
                    ToolResult::reauth_required(&call.name, reason, elapsed_ms(started))
                } else {
                    ToolResult::failure(&call.name, error, elapsed_ms(started))
                }
            }
            Err(error) => match error.downcast_ref::<ReauthRequired>() {
                Some(reauth) => ToolResult::reauth_required(
                    &call.name,
                    reauth.reason.clone(),
                    elapsed_ms(started),
                ),
                None => {
                    ToolResult::failure(&call.name, format!("{error:#}"), elapsed_ms(started))
                }
            },
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
