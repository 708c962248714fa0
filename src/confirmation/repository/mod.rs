pub mod fallback;
pub mod memory;
pub mod sqlite;

pub use fallback::FallbackRepository;
pub use memory::InMemoryConfirmationStore;
pub use sqlite::SqliteConfirmationStore;

use super::types::{ConfirmationFlow, ConfirmationStats, ConfirmationStatus};
use crate::executor::types::ToolResult;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Field changes applied when a flow changes status. Applied atomically,
/// conditional on the flow's current status.
#[derive(Debug, Clone)]
pub struct FlowPatch {
    pub status: ConfirmationStatus,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub execution_result: Option<ToolResult>,
}

impl FlowPatch {
    pub fn status_only(status: ConfirmationStatus) -> Self {
        Self {
            status,
            confirmed_at: None,
            executed_at: None,
            execution_result: None,
        }
    }

    pub fn responded(status: ConfirmationStatus, at: DateTime<Utc>) -> Self {
        Self {
            status,
            confirmed_at: Some(at),
            executed_at: None,
            execution_result: None,
        }
    }

    pub fn executed(status: ConfirmationStatus, at: DateTime<Utc>, result: ToolResult) -> Self {
        Self {
            status,
            confirmed_at: None,
            executed_at: Some(at),
            execution_result: Some(result),
        }
    }

    pub fn apply_to(&self, flow: &mut ConfirmationFlow) {
        flow.status = self.status;
        if let Some(at) = self.confirmed_at {
            flow.confirmed_at = Some(at);
        }
        if let Some(at) = self.executed_at {
            flow.executed_at = Some(at);
        }
        if let Some(result) = &self.execution_result {
            flow.execution_result = Some(result.clone());
        }
    }
}

/// Result of a conditional status transition.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Applied(ConfirmationFlow),
    NotFound,
    StatusMismatch { actual: ConfirmationStatus },
}

/// Passive holder of confirmation flows. No mutation logic of its own:
/// the confirmation service owns all writes and drives transitions through
/// the conditional-update primitive.
pub trait ConfirmationRepository: Send + Sync {
    fn upsert<'a>(
        &'a self,
        flow: &'a ConfirmationFlow,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

    fn fetch<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ConfirmationFlow>>> + Send + 'a>>;

    /// Apply `patch` only if the flow's current status equals `expected`.
    /// Two racing callers resolve to exactly one `Applied`.
    fn transition<'a>(
        &'a self,
        id: &'a str,
        expected: ConfirmationStatus,
        patch: FlowPatch,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<TransitionOutcome>> + Send + 'a>>;

    fn pending<'a>(
        &'a self,
        session_id: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ConfirmationFlow>>> + Send + 'a>>;

    fn all<'a>(
        &'a self,
        session_id: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ConfirmationFlow>>> + Send + 'a>>;

    /// Backend-side aggregation. `None` means this backend cannot aggregate
    /// and the caller should compute from `all`.
    fn stats<'a>(
        &'a self,
        session_id: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ConfirmationStats>>> + Send + 'a>>;
}
