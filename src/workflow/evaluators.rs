use std::future::Future;
use std::pin::Pin;

/// Correlation data handed to every evaluator call.
#[derive(Debug, Clone)]
pub struct EvaluationMeta {
    pub session_id: String,
    pub user_id: Option<String>,
    pub iteration: u32,
    pub correlation_id: String,
}

/// Phase 1 verdict: whether the task can proceed without the user.
#[derive(Debug, Clone)]
pub struct ReadinessDecision {
    pub needs_user_input: bool,
    pub required_info: Option<String>,
    pub updated_context: String,
}

/// Phase 2 verdict: the next agent call, if any.
#[derive(Debug, Clone)]
pub struct ActionDecision {
    pub updated_context: String,
    pub agent: Option<String>,
    pub request: Option<String>,
}

/// Phase 3 verdict: remaining steps; empty means the task is complete.
#[derive(Debug, Clone)]
pub struct ProgressDecision {
    pub updated_context: String,
    pub new_steps: Vec<String>,
}

/// Opaque step functions over the narrative context, supplied by
/// configuration. Their failures are fatal to the workflow; only the agent
/// call inside the action phase is caught and narrated instead.
pub trait ReadinessEvaluator: Send + Sync {
    fn evaluate<'a>(
        &'a self,
        context: &'a str,
        meta: &'a EvaluationMeta,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ReadinessDecision>> + Send + 'a>>;
}

pub trait ActionEvaluator: Send + Sync {
    fn evaluate<'a>(
        &'a self,
        context: &'a str,
        meta: &'a EvaluationMeta,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ActionDecision>> + Send + 'a>>;
}

pub trait ProgressEvaluator: Send + Sync {
    fn evaluate<'a>(
        &'a self,
        context: &'a str,
        meta: &'a EvaluationMeta,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ProgressDecision>> + Send + 'a>>;
}
