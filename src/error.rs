use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for Greenlight.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains. Every user-visible variant
/// carries a stable machine-readable code via [`GreenlightError::code`].
#[derive(Debug, Error)]
pub enum GreenlightError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Input validation ────────────────────────────────────────────────
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    // ── Confirmation lifecycle ──────────────────────────────────────────
    #[error("confirmation: {0}")]
    Confirmation(#[from] ConfirmationError),

    // ── Persistence ─────────────────────────────────────────────────────
    #[error("store: {0}")]
    Store(#[from] StoreError),

    // ── Workflow orchestration ──────────────────────────────────────────
    #[error("workflow: {0}")]
    Workflow(#[from] WorkflowError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GreenlightError {
    /// Stable error code surfaced alongside the human-readable message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_INVALID",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::Confirmation(err) => err.code(),
            Self::Store(_) => "STORE_UNAVAILABLE",
            Self::Workflow(err) => err.code(),
            Self::Other(_) => "INTERNAL_ERROR",
        }
    }
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Validation errors ──────────────────────────────────────────────────────

/// Malformed caller input. Fails fast, never retried.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("tool call is malformed: {0}")]
    ToolCall(String),

    #[error("execution context is malformed: {0}")]
    Context(String),

    #[error("confirmation request is malformed: {0}")]
    ConfirmationRequest(String),
}

// ─── Confirmation errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfirmationError {
    #[error("confirmation {id} not found")]
    NotFound { id: String },

    #[error("confirmation {id} was already responded to (status {status})")]
    AlreadyResponded { id: String, status: String },

    #[error("confirmation {id} cannot be executed: {reason}")]
    ExecutionFailed { id: String, reason: String },

    #[error("illegal confirmation transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("preview generation failed for {tool}: {reason}")]
    PreviewGeneration { tool: String, reason: String },
}

impl ConfirmationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "CONFIRMATION_NOT_FOUND",
            Self::AlreadyResponded { .. } => "CONFIRMATION_ALREADY_RESPONDED",
            Self::ExecutionFailed { .. } => "CONFIRMATION_EXECUTION_FAILED",
            Self::IllegalTransition { .. } => "CONFIRMATION_ILLEGAL_TRANSITION",
            Self::PreviewGeneration { .. } => "PREVIEW_GENERATION_FAILED",
        }
    }
}

// ─── Store errors ───────────────────────────────────────────────────────────

/// Durable-store failures are logged and degrade the service to cache-only;
/// they surface only when the requested operation is impossible without the
/// store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("query failed: {0}")]
    Query(String),
}

// ─── Workflow errors ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowPhase {
    Readiness,
    Action,
    Progress,
}

impl std::fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Readiness => write!(f, "readiness"),
            Self::Action => write!(f, "action"),
            Self::Progress => write!(f, "progress"),
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(
        "workflow phase {phase} failed for session {session_id} at iteration {iteration}: {source}"
    )]
    PhaseEvaluation {
        phase: WorkflowPhase,
        session_id: String,
        iteration: u32,
        #[source]
        source: anyhow::Error,
    },

    /// Carries the accumulated narrative so no partial progress is discarded.
    #[error("workflow for session {session_id} exceeded the iteration limit ({iterations})")]
    IterationLimitExceeded {
        session_id: String,
        iterations: u32,
        context: String,
    },
}

impl WorkflowError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::PhaseEvaluation { .. } => "WORKFLOW_PHASE_FAILED",
            Self::IterationLimitExceeded { .. } => "ITERATION_LIMIT_EXCEEDED",
        }
    }
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, GreenlightError>;
