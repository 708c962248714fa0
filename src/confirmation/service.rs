use super::repository::{ConfirmationRepository, FallbackRepository, FlowPatch, TransitionOutcome};
use super::types::{ActionPreview, ConfirmationFlow, ConfirmationStats, ConfirmationStatus};
use crate::agents::AgentRegistry;
use crate::config::ConfirmationConfig;
use crate::error::{ConfirmationError, GreenlightError, Result, StoreError, ValidationError};
use crate::executor::{ExecutionContext, ExecutionMode, ToolCall, ToolExecutor};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CreateConfirmationRequest {
    pub session_id: String,
    pub user_id: String,
    pub tool_call: ToolCall,
    pub context: ExecutionContext,
    /// Fractional minutes accepted; defaults to the configured expiration.
    pub expiration_minutes: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ConfirmationResponse {
    pub confirmed: bool,
    pub responded_at: Option<DateTime<Utc>>,
    pub user_context: Option<Value>,
}

impl ConfirmationResponse {
    pub fn approve() -> Self {
        Self {
            confirmed: true,
            responded_at: None,
            user_context: None,
        }
    }

    pub fn reject() -> Self {
        Self {
            confirmed: false,
            responded_at: None,
            user_context: None,
        }
    }
}

/// Owns the confirmation state machine: creation, response, execution,
/// expiration and statistics. The repository is a passive holder; every
/// write goes through this service.
pub struct ConfirmationService {
    repository: Arc<FallbackRepository>,
    registry: Arc<dyn AgentRegistry>,
    executor: Arc<ToolExecutor>,
    default_expiration_minutes: f64,
    sweep_interval_secs: u64,
}

impl ConfirmationService {
    pub fn new(
        repository: Arc<FallbackRepository>,
        registry: Arc<dyn AgentRegistry>,
        executor: Arc<ToolExecutor>,
        config: &ConfirmationConfig,
    ) -> Self {
        Self {
            repository,
            registry,
            executor,
            default_expiration_minutes: config.default_expiration_minutes,
            sweep_interval_secs: config.sweep_interval_secs,
        }
    }

    pub(crate) fn sweep_interval_secs(&self) -> u64 {
        self.sweep_interval_secs
    }

    /// Create a flow in `Pending` with a preview of the action. Durable
    /// persistence is best-effort; creation never fails on store trouble.
    pub async fn create_confirmation(
        &self,
        request: CreateConfirmationRequest,
    ) -> Result<ConfirmationFlow> {
        request.tool_call.validate()?;
        request.context.validate()?;
        if request.session_id.trim().is_empty() {
            return Err(ValidationError::ConfirmationRequest("session id is empty".into()).into());
        }
        let minutes = request
            .expiration_minutes
            .unwrap_or(self.default_expiration_minutes);
        if minutes <= 0.0 {
            return Err(ValidationError::ConfirmationRequest(
                "expiration_minutes must be positive".into(),
            )
            .into());
        }

        let now = Utc::now();
        let expires_at = now + Duration::milliseconds((minutes * 60_000.0).round() as i64);
        let action_preview = self.generate_preview(&request).await;

        let flow = ConfirmationFlow {
            confirmation_id: uuid::Uuid::new_v4().to_string(),
            session_id: request.session_id,
            user_id: request.user_id,
            action_preview,
            original_tool_call: request.tool_call,
            status: ConfirmationStatus::Pending,
            created_at: now,
            expires_at,
            confirmed_at: None,
            executed_at: None,
            execution_result: None,
            channel_context: request.context.channel_context,
        };

        self.repository.upsert(&flow).await.map_err(store_error)?;
        tracing::info!(
            confirmation_id = %flow.confirmation_id,
            session_id = %flow.session_id,
            tool = %flow.original_tool_call.name,
            expires_at = %flow.expires_at,
            "confirmation created"
        );
        Ok(flow)
    }

    /// Read one flow. Past-due pending flows are transitioned to `Expired`
    /// (exactly once, even under racing readers) and reported as not found;
    /// expired flows are never visible as pending.
    pub async fn get_confirmation(&self, id: &str) -> Result<Option<ConfirmationFlow>> {
        let Some(flow) = self.repository.fetch(id).await.map_err(store_error)? else {
            return Ok(None);
        };
        if flow.status == ConfirmationStatus::Expired {
            return Ok(None);
        }
        if flow.is_past_due(Utc::now()) {
            self.expire_flow(&flow.confirmation_id).await?;
            return Ok(None);
        }
        Ok(Some(flow))
    }

    /// Record the user's decision. Requires `Pending`; a concurrent
    /// responder loses with `AlreadyResponded`.
    pub async fn respond_to_confirmation(
        &self,
        id: &str,
        response: ConfirmationResponse,
    ) -> Result<ConfirmationFlow> {
        if self.get_confirmation(id).await?.is_none() {
            return Err(ConfirmationError::NotFound { id: id.to_string() }.into());
        }

        if let Some(user_context) = &response.user_context {
            tracing::debug!(confirmation_id = id, user_context = %user_context, "response context attached");
        }

        let next = if response.confirmed {
            ConfirmationStatus::Confirmed
        } else {
            ConfirmationStatus::Rejected
        };
        guard_transition(ConfirmationStatus::Pending, next)?;
        let responded_at = response.responded_at.unwrap_or_else(Utc::now);

        match self
            .repository
            .transition(id, ConfirmationStatus::Pending, FlowPatch::responded(next, responded_at))
            .await
            .map_err(store_error)?
        {
            TransitionOutcome::Applied(flow) => {
                tracing::info!(
                    confirmation_id = id,
                    status = %flow.status,
                    "confirmation responded"
                );
                Ok(flow)
            }
            TransitionOutcome::StatusMismatch { actual } => {
                Err(ConfirmationError::AlreadyResponded {
                    id: id.to_string(),
                    status: actual.to_string(),
                }
                .into())
            }
            TransitionOutcome::NotFound => {
                Err(ConfirmationError::NotFound { id: id.to_string() }.into())
            }
        }
    }

    /// Perform the real action for a confirmed flow. The status gate runs
    /// before any domain action; a non-`Confirmed` flow never executes.
    pub async fn execute_confirmed_action(&self, id: &str) -> Result<ConfirmationFlow> {
        let Some(flow) = self.repository.fetch(id).await.map_err(store_error)? else {
            return Err(ConfirmationError::NotFound { id: id.to_string() }.into());
        };
        if flow.status != ConfirmationStatus::Confirmed {
            return Err(ConfirmationError::ExecutionFailed {
                id: id.to_string(),
                reason: format!("status is {}, expected confirmed", flow.status),
            }
            .into());
        }

        let ctx = ExecutionContext {
            session_id: flow.session_id.clone(),
            user_id: Some(flow.user_id.clone()),
            timestamp: Utc::now(),
            channel_context: flow.channel_context.clone(),
        };
        let result = self
            .executor
            .execute_tool(&flow.original_tool_call, &ctx, None, ExecutionMode::Commit)
            .await?;

        let next = if result.success {
            ConfirmationStatus::Executed
        } else {
            ConfirmationStatus::Failed
        };
        guard_transition(ConfirmationStatus::Confirmed, next)?;
        match self
            .repository
            .transition(
                id,
                ConfirmationStatus::Confirmed,
                FlowPatch::executed(next, Utc::now(), result),
            )
            .await
            .map_err(store_error)?
        {
            TransitionOutcome::Applied(flow) => {
                tracing::info!(
                    confirmation_id = id,
                    status = %flow.status,
                    "confirmed action executed"
                );
                Ok(flow)
            }
            TransitionOutcome::StatusMismatch { actual } => {
                Err(ConfirmationError::IllegalTransition {
                    from: actual.to_string(),
                    to: next.to_string(),
                }
                .into())
            }
            TransitionOutcome::NotFound => {
                Err(ConfirmationError::NotFound { id: id.to_string() }.into())
            }
        }
    }

    /// Eager sweep over pending flows in both backings. Returns how many
    /// were transitioned; the lazy read-path check stays correct even if
    /// this never runs.
    pub async fn cleanup_expired_confirmations(&self) -> Result<usize> {
        let now = Utc::now();
        let pending = self.repository.pending(None).await.map_err(store_error)?;

        let mut cleaned = 0_usize;
        for flow in pending {
            if flow.is_past_due(now) && self.expire_flow(&flow.confirmation_id).await? {
                cleaned += 1;
            }
        }
        if cleaned > 0 {
            tracing::info!(cleaned, "expired confirmations cleaned");
        }
        Ok(cleaned)
    }

    /// Pending flows for a session, merged across backings, hiding (and
    /// lazily expiring) past-due entries.
    pub async fn get_pending_confirmations(&self, session_id: &str) -> Result<Vec<ConfirmationFlow>> {
        let now = Utc::now();
        let pending = self
            .repository
            .pending(Some(session_id))
            .await
            .map_err(store_error)?;

        let mut visible = Vec::with_capacity(pending.len());
        for flow in pending {
            if flow.is_past_due(now) {
                self.expire_flow(&flow.confirmation_id).await?;
            } else {
                visible.push(flow);
            }
        }
        Ok(visible)
    }

    /// Aggregate statistics, preferring durable-store aggregation with an
    /// in-memory fallback.
    pub async fn get_confirmation_stats(
        &self,
        session_id: Option<&str>,
    ) -> Result<ConfirmationStats> {
        match self
            .repository
            .stats(session_id)
            .await
            .map_err(store_error)?
        {
            Some(stats) => Ok(stats),
            None => {
                let flows = self
                    .repository
                    .all(session_id)
                    .await
                    .map_err(store_error)?;
                Ok(ConfirmationStats::from_flows(&flows))
            }
        }
    }

    /// Transition a pending flow to `Expired`. Returns whether this call
    /// applied the transition (false when another caller won the race or
    /// the flow already left `Pending`).
    async fn expire_flow(&self, id: &str) -> Result<bool> {
        match self
            .repository
            .transition(
                id,
                ConfirmationStatus::Pending,
                FlowPatch::status_only(ConfirmationStatus::Expired),
            )
            .await
            .map_err(store_error)?
        {
            TransitionOutcome::Applied(_) => {
                tracing::info!(confirmation_id = id, "confirmation expired");
                Ok(true)
            }
            TransitionOutcome::StatusMismatch { .. } | TransitionOutcome::NotFound => Ok(false),
        }
    }

    async fn generate_preview(&self, request: &CreateConfirmationRequest) -> ActionPreview {
        let call = &request.tool_call;
        let original_query = original_query_of(call);

        if let Some(agent) = self.registry.get_agent(&call.name)
            && let Some(preview) = agent.generate_preview(&call.parameters, &request.context)
        {
            match preview.await {
                Ok(preview) => return preview,
                Err(error) => {
                    let preview_error = ConfirmationError::PreviewGeneration {
                        tool: call.name.clone(),
                        reason: format!("{error:#}"),
                    };
                    tracing::warn!(
                        code = preview_error.code(),
                        error = %preview_error,
                        "preview generation failed; synthesizing fallback preview"
                    );
                }
            }
        }

        ActionPreview::fallback(&call.name, &original_query, &call.parameters)
    }
}

/// The human request that motivated the call, when the caller carried one.
fn original_query_of(call: &ToolCall) -> String {
    call.parameters
        .get("query")
        .or_else(|| call.parameters.get("request"))
        .and_then(Value::as_str)
        .map_or_else(|| call.name.replace('_', " "), ToString::to_string)
}

fn store_error(error: anyhow::Error) -> GreenlightError {
    StoreError::Query(format!("{error:#}")).into()
}

/// The state machine admits no other transitions; anything else is a bug in
/// the caller and surfaces as a typed error naming the illegal pair.
fn guard_transition(from: ConfirmationStatus, to: ConfirmationStatus) -> Result<()> {
    if from.can_transition_to(to) {
        return Ok(());
    }
    Err(ConfirmationError::IllegalTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
    .into())
}
