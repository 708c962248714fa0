pub mod evaluators;

pub use evaluators::{
    ActionDecision, ActionEvaluator, EvaluationMeta, ProgressDecision, ProgressEvaluator,
    ReadinessDecision, ReadinessEvaluator,
};

use crate::agents::{AgentOutcome, AgentRegistry};
use crate::config::WorkflowConfig;
use crate::credentials::{CredentialResolver, TenantIdentity};
use crate::error::{Result, ValidationError, WorkflowError, WorkflowPhase};
use crate::executor::ExecutionContext;
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct WorkflowRequest {
    pub session_id: String,
    pub user_id: Option<String>,
    /// The task in the user's words; seeds the narrative context.
    pub task: String,
    pub channel_context: Option<Value>,
}

/// How a workflow run ended. Exactly one of these, or an
/// `IterationLimitExceeded` error; the loop never silently overruns.
#[derive(Debug)]
pub enum WorkflowOutcome {
    AwaitingUserInput {
        required_info: Option<String>,
        context: String,
        iterations: u32,
    },
    Completed {
        context: String,
        iterations: u32,
    },
}

/// Bounded multi-step reasoning loop: readiness check, action execution,
/// progress assessment, repeated over one accumulating narrative string.
///
/// One invocation owns its iteration state; invocations for distinct
/// sessions share nothing mutable but configuration.
pub struct WorkflowExecutor {
    registry: Arc<dyn AgentRegistry>,
    credentials: Arc<dyn CredentialResolver>,
    readiness: Arc<dyn ReadinessEvaluator>,
    action: Arc<dyn ActionEvaluator>,
    progress: Arc<dyn ProgressEvaluator>,
    max_iterations: u32,
}

impl WorkflowExecutor {
    pub fn new(
        registry: Arc<dyn AgentRegistry>,
        credentials: Arc<dyn CredentialResolver>,
        readiness: Arc<dyn ReadinessEvaluator>,
        action: Arc<dyn ActionEvaluator>,
        progress: Arc<dyn ProgressEvaluator>,
        config: &WorkflowConfig,
    ) -> Self {
        Self {
            registry,
            credentials,
            readiness,
            action,
            progress,
            max_iterations: config.max_iterations.max(1),
        }
    }

    pub async fn execute(&self, request: WorkflowRequest) -> Result<WorkflowOutcome> {
        if request.session_id.trim().is_empty() {
            return Err(ValidationError::Context("session id is empty".into()).into());
        }

        let correlation_id = uuid::Uuid::new_v4().to_string();
        let mut context = format!("Task: {}", request.task);

        for iteration in 1..=self.max_iterations {
            let meta = EvaluationMeta {
                session_id: request.session_id.clone(),
                user_id: request.user_id.clone(),
                iteration,
                correlation_id: correlation_id.clone(),
            };
            tracing::debug!(
                session_id = %meta.session_id,
                correlation_id = %meta.correlation_id,
                iteration,
                "workflow iteration started"
            );

            // Phase 1: readiness. A user-input requirement exits before any
            // action runs this iteration.
            let readiness = self
                .readiness
                .evaluate(&context, &meta)
                .await
                .map_err(|source| phase_error(WorkflowPhase::Readiness, &meta, source))?;
            context = readiness.updated_context;
            if readiness.needs_user_input {
                tracing::info!(
                    session_id = %meta.session_id,
                    iteration,
                    "workflow awaiting user input"
                );
                return Ok(WorkflowOutcome::AwaitingUserInput {
                    required_info: readiness.required_info,
                    context,
                    iterations: iteration,
                });
            }

            // Phase 2: action. The evaluator's own failure is fatal; the
            // agent call is caught and narrated, never aborts the workflow.
            let action = self
                .action
                .evaluate(&context, &meta)
                .await
                .map_err(|source| phase_error(WorkflowPhase::Action, &meta, source))?;
            context = action.updated_context;
            if let (Some(agent_name), Some(request_text)) = (action.agent, action.request) {
                match self
                    .invoke_agent(&agent_name, &request_text, &request, &meta)
                    .await
                {
                    Ok(output) => {
                        context.push_str("\nAgent Execution Result: ");
                        context.push_str(&output);
                    }
                    Err(error) => {
                        tracing::warn!(
                            session_id = %meta.session_id,
                            agent = %agent_name,
                            iteration,
                            error = %format!("{error:#}"),
                            "agent execution failed; continuing workflow"
                        );
                        context.push_str("\nAgent Execution Error: ");
                        context.push_str(&format!("{error:#}"));
                    }
                }
            }

            // Phase 3: progress. No remaining steps means done.
            let progress = self
                .progress
                .evaluate(&context, &meta)
                .await
                .map_err(|source| phase_error(WorkflowPhase::Progress, &meta, source))?;
            context = progress.updated_context;
            if progress.new_steps.is_empty() {
                tracing::info!(
                    session_id = %meta.session_id,
                    iterations = iteration,
                    "workflow completed"
                );
                return Ok(WorkflowOutcome::Completed {
                    context,
                    iterations: iteration,
                });
            }
            tracing::debug!(
                session_id = %meta.session_id,
                iteration,
                remaining_steps = progress.new_steps.len(),
                "workflow continuing"
            );
        }

        Err(WorkflowError::IterationLimitExceeded {
            session_id: request.session_id,
            iterations: self.max_iterations,
            context,
        }
        .into())
    }

    async fn invoke_agent(
        &self,
        agent_name: &str,
        request_text: &str,
        request: &WorkflowRequest,
        meta: &EvaluationMeta,
    ) -> anyhow::Result<String> {
        let agent = self
            .registry
            .get_agent(agent_name)
            .ok_or_else(|| anyhow::anyhow!("agent not found: {agent_name}"))?;

        let identity =
            TenantIdentity::parse(request.user_id.as_deref().unwrap_or(""));
        let credential = self
            .credentials
            .get_valid_credential(
                &identity.tenant_id,
                &identity.user_id,
                agent.service_category(),
            )
            .await?;

        let ctx = ExecutionContext {
            session_id: request.session_id.clone(),
            user_id: request.user_id.clone(),
            timestamp: Utc::now(),
            channel_context: request.channel_context.clone(),
        };
        let mut parameters = Map::new();
        parameters.insert(
            "request".to_string(),
            Value::String(request_text.to_string()),
        );

        tracing::debug!(
            session_id = %meta.session_id,
            agent = agent_name,
            iteration = meta.iteration,
            has_credential = credential.is_some(),
            "invoking agent"
        );
        match agent
            .execute(&parameters, &ctx, credential.as_deref())
            .await?
        {
            AgentOutcome::Success { output } => Ok(render_output(&output)),
            AgentOutcome::Failure { error, .. } => Err(anyhow::anyhow!(error)),
        }
    }
}

fn render_output(output: &Value) -> String {
    match output {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn phase_error(
    phase: WorkflowPhase,
    meta: &EvaluationMeta,
    source: anyhow::Error,
) -> crate::error::GreenlightError {
    WorkflowError::PhaseEvaluation {
        phase,
        session_id: meta.session_id.clone(),
        iteration: meta.iteration,
        source,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Agent, AgentOutcome, InMemoryAgentRegistry};
    use crate::credentials::{CredentialResolver, NoCredentialResolver};
    use crate::error::GreenlightError;
    use serde_json::json;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct PassReadiness;

    impl ReadinessEvaluator for PassReadiness {
        fn evaluate<'a>(
            &'a self,
            context: &'a str,
            _meta: &'a EvaluationMeta,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<ReadinessDecision>> + Send + 'a>> {
            Box::pin(async move {
                Ok(ReadinessDecision {
                    needs_user_input: false,
                    required_info: None,
                    updated_context: context.to_string(),
                })
            })
        }
    }

    struct NeedsInputReadiness;

    impl ReadinessEvaluator for NeedsInputReadiness {
        fn evaluate<'a>(
            &'a self,
            context: &'a str,
            _meta: &'a EvaluationMeta,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<ReadinessDecision>> + Send + 'a>> {
            Box::pin(async move {
                Ok(ReadinessDecision {
                    needs_user_input: true,
                    required_info: Some("which calendar?".to_string()),
                    updated_context: format!("{context}\nMissing: calendar choice"),
                })
            })
        }
    }

    struct FailingReadiness;

    impl ReadinessEvaluator for FailingReadiness {
        fn evaluate<'a>(
            &'a self,
            _context: &'a str,
            _meta: &'a EvaluationMeta,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<ReadinessDecision>> + Send + 'a>> {
            Box::pin(async move { anyhow::bail!("readiness model unavailable") })
        }
    }

    struct NoopAction;

    impl ActionEvaluator for NoopAction {
        fn evaluate<'a>(
            &'a self,
            context: &'a str,
            _meta: &'a EvaluationMeta,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<ActionDecision>> + Send + 'a>> {
            Box::pin(async move {
                Ok(ActionDecision {
                    updated_context: context.to_string(),
                    agent: None,
                    request: None,
                })
            })
        }
    }

    struct CallAgentAction {
        agent: &'static str,
    }

    impl ActionEvaluator for CallAgentAction {
        fn evaluate<'a>(
            &'a self,
            context: &'a str,
            _meta: &'a EvaluationMeta,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<ActionDecision>> + Send + 'a>> {
            Box::pin(async move {
                Ok(ActionDecision {
                    updated_context: context.to_string(),
                    agent: Some(self.agent.to_string()),
                    request: Some("create the event".to_string()),
                })
            })
        }
    }

    /// Completes after a fixed number of iterations.
    struct CountdownProgress {
        remaining: AtomicU32,
    }

    impl CountdownProgress {
        fn new(iterations: u32) -> Self {
            Self {
                remaining: AtomicU32::new(iterations),
            }
        }
    }

    impl ProgressEvaluator for CountdownProgress {
        fn evaluate<'a>(
            &'a self,
            context: &'a str,
            _meta: &'a EvaluationMeta,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<ProgressDecision>> + Send + 'a>> {
            Box::pin(async move {
                let before = self.remaining.fetch_sub(1, Ordering::SeqCst);
                let new_steps = if before <= 1 {
                    Vec::new()
                } else {
                    vec!["keep going".to_string()]
                };
                Ok(ProgressDecision {
                    updated_context: context.to_string(),
                    new_steps,
                })
            })
        }
    }

    struct NeverDoneProgress;

    impl ProgressEvaluator for NeverDoneProgress {
        fn evaluate<'a>(
            &'a self,
            context: &'a str,
            _meta: &'a EvaluationMeta,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<ProgressDecision>> + Send + 'a>> {
            Box::pin(async move {
                Ok(ProgressDecision {
                    updated_context: context.to_string(),
                    new_steps: vec!["still more".to_string()],
                })
            })
        }
    }

    struct CalendarAgent {
        fail: bool,
        seen_credentials: Mutex<Vec<Option<String>>>,
    }

    impl Agent for CalendarAgent {
        fn name(&self) -> &str {
            "calendar"
        }

        fn service_category(&self) -> &str {
            "calendar"
        }

        fn execute<'a>(
            &'a self,
            _parameters: &'a Map<String, Value>,
            _ctx: &'a ExecutionContext,
            credential: Option<&'a str>,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<AgentOutcome>> + Send + 'a>> {
            Box::pin(async move {
                self.seen_credentials
                    .lock()
                    .unwrap()
                    .push(credential.map(String::from));
                if self.fail {
                    Ok(AgentOutcome::failure("calendar backend 503"))
                } else {
                    Ok(AgentOutcome::success(json!("event created")))
                }
            })
        }
    }

    struct StaticCredential;

    impl CredentialResolver for StaticCredential {
        fn get_valid_credential<'a>(
            &'a self,
            tenant_id: &'a str,
            user_id: &'a str,
            service_category: &'a str,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<String>>> + Send + 'a>> {
            Box::pin(async move {
                Ok(Some(format!("tok-{tenant_id}-{user_id}-{service_category}")))
            })
        }
    }

    fn request() -> WorkflowRequest {
        WorkflowRequest {
            session_id: "s-1".to_string(),
            user_id: Some("acme:jane".to_string()),
            task: "schedule the retro".to_string(),
            channel_context: None,
        }
    }

    fn executor(
        registry: InMemoryAgentRegistry,
        credentials: Arc<dyn CredentialResolver>,
        readiness: Arc<dyn ReadinessEvaluator>,
        action: Arc<dyn ActionEvaluator>,
        progress: Arc<dyn ProgressEvaluator>,
        max_iterations: u32,
    ) -> WorkflowExecutor {
        WorkflowExecutor::new(
            Arc::new(registry),
            credentials,
            readiness,
            action,
            progress,
            &WorkflowConfig { max_iterations },
        )
    }

    #[tokio::test]
    async fn completes_when_no_steps_remain() {
        let executor = executor(
            InMemoryAgentRegistry::new(),
            Arc::new(NoCredentialResolver),
            Arc::new(PassReadiness),
            Arc::new(NoopAction),
            Arc::new(CountdownProgress::new(3)),
            10,
        );

        match executor.execute(request()).await.unwrap() {
            WorkflowOutcome::Completed { iterations, context } => {
                assert_eq!(iterations, 3);
                assert!(context.starts_with("Task: schedule the retro"));
            }
            WorkflowOutcome::AwaitingUserInput { .. } => unreachable!(),
        }
    }

    #[tokio::test]
    async fn exits_awaiting_user_input_without_running_later_phases() {
        let executor = executor(
            InMemoryAgentRegistry::new(),
            Arc::new(NoCredentialResolver),
            Arc::new(NeedsInputReadiness),
            Arc::new(NoopAction),
            Arc::new(NeverDoneProgress),
            10,
        );

        match executor.execute(request()).await.unwrap() {
            WorkflowOutcome::AwaitingUserInput {
                required_info,
                context,
                iterations,
            } => {
                assert_eq!(required_info.as_deref(), Some("which calendar?"));
                assert_eq!(iterations, 1);
                assert!(context.contains("Missing: calendar choice"));
            }
            WorkflowOutcome::Completed { .. } => unreachable!(),
        }
    }

    #[tokio::test]
    async fn iteration_limit_raises_with_narrative() {
        let executor = executor(
            InMemoryAgentRegistry::new(),
            Arc::new(NoCredentialResolver),
            Arc::new(PassReadiness),
            Arc::new(NoopAction),
            Arc::new(NeverDoneProgress),
            4,
        );

        let err = executor.execute(request()).await.unwrap_err();
        assert_eq!(err.code(), "ITERATION_LIMIT_EXCEEDED");
        match err {
            GreenlightError::Workflow(WorkflowError::IterationLimitExceeded {
                session_id,
                iterations,
                context,
            }) => {
                assert_eq!(session_id, "s-1");
                assert_eq!(iterations, 4);
                assert!(context.starts_with("Task:"));
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn readiness_failure_is_fatal() {
        let executor = executor(
            InMemoryAgentRegistry::new(),
            Arc::new(NoCredentialResolver),
            Arc::new(FailingReadiness),
            Arc::new(NoopAction),
            Arc::new(NeverDoneProgress),
            10,
        );

        let err = executor.execute(request()).await.unwrap_err();
        assert_eq!(err.code(), "WORKFLOW_PHASE_FAILED");
        assert!(err.to_string().contains("readiness"));
        assert!(err.to_string().contains("s-1"));
    }

    #[tokio::test]
    async fn agent_failure_is_narrated_not_fatal() {
        let mut registry = InMemoryAgentRegistry::new();
        registry.register(Arc::new(CalendarAgent {
            fail: true,
            seen_credentials: Mutex::new(Vec::new()),
        }));
        let executor = executor(
            registry,
            Arc::new(NoCredentialResolver),
            Arc::new(PassReadiness),
            Arc::new(CallAgentAction { agent: "calendar" }),
            Arc::new(CountdownProgress::new(1)),
            10,
        );

        match executor.execute(request()).await.unwrap() {
            WorkflowOutcome::Completed { context, .. } => {
                assert!(context.contains("Agent Execution Error: calendar backend 503"));
            }
            WorkflowOutcome::AwaitingUserInput { .. } => unreachable!(),
        }
    }

    #[tokio::test]
    async fn missing_agent_is_narrated_not_fatal() {
        let executor = executor(
            InMemoryAgentRegistry::new(),
            Arc::new(NoCredentialResolver),
            Arc::new(PassReadiness),
            Arc::new(CallAgentAction { agent: "calendar" }),
            Arc::new(CountdownProgress::new(1)),
            10,
        );

        match executor.execute(request()).await.unwrap() {
            WorkflowOutcome::Completed { context, .. } => {
                assert!(context.contains("Agent Execution Error: agent not found: calendar"));
            }
            WorkflowOutcome::AwaitingUserInput { .. } => unreachable!(),
        }
    }

    #[tokio::test]
    async fn agent_result_is_appended_with_scoped_credential() {
        let agent = Arc::new(CalendarAgent {
            fail: false,
            seen_credentials: Mutex::new(Vec::new()),
        });
        let mut registry = InMemoryAgentRegistry::new();
        registry.register(Arc::clone(&agent) as Arc<dyn Agent>);
        let executor = executor(
            registry,
            Arc::new(StaticCredential),
            Arc::new(PassReadiness),
            Arc::new(CallAgentAction { agent: "calendar" }),
            Arc::new(CountdownProgress::new(1)),
            10,
        );

        match executor.execute(request()).await.unwrap() {
            WorkflowOutcome::Completed { context, .. } => {
                assert!(context.contains("Agent Execution Result: event created"));
            }
            WorkflowOutcome::AwaitingUserInput { .. } => unreachable!(),
        }

        let seen = agent.seen_credentials.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            &[Some("tok-acme-jane-calendar".to_string())]
        );
    }
}
