use super::{ConfirmationRepository, FlowPatch, TransitionOutcome};
use crate::confirmation::types::{ConfirmationFlow, ConfirmationStats, ConfirmationStatus};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::RwLock;

/// Process-wide keyed cache of confirmation flows.
///
/// The check-and-write of `transition` happens under a single write-lock
/// acquisition, so concurrent responders resolve to exactly one winner.
#[derive(Default)]
pub struct InMemoryConfirmationStore {
    flows: RwLock<HashMap<String, ConfirmationFlow>>,
}

impl InMemoryConfirmationStore {
    pub fn new() -> Self {
        Self {
            flows: RwLock::new(HashMap::new()),
        }
    }
}

impl ConfirmationRepository for InMemoryConfirmationStore {
    fn upsert<'a>(
        &'a self,
        flow: &'a ConfirmationFlow,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.flows
                .write()
                .await
                .insert(flow.confirmation_id.clone(), flow.clone());
            Ok(())
        })
    }

    fn fetch<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ConfirmationFlow>>> + Send + 'a>> {
        Box::pin(async move { Ok(self.flows.read().await.get(id).cloned()) })
    }

    fn transition<'a>(
        &'a self,
        id: &'a str,
        expected: ConfirmationStatus,
        patch: FlowPatch,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<TransitionOutcome>> + Send + 'a>> {
        Box::pin(async move {
            let mut flows = self.flows.write().await;
            let Some(flow) = flows.get_mut(id) else {
                return Ok(TransitionOutcome::NotFound);
            };
            if flow.status != expected {
                return Ok(TransitionOutcome::StatusMismatch {
                    actual: flow.status,
                });
            }
            patch.apply_to(flow);
            Ok(TransitionOutcome::Applied(flow.clone()))
        })
    }

    fn pending<'a>(
        &'a self,
        session_id: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ConfirmationFlow>>> + Send + 'a>> {
        Box::pin(async move {
            let flows = self.flows.read().await;
            let mut pending: Vec<ConfirmationFlow> = flows
                .values()
                .filter(|flow| flow.status == ConfirmationStatus::Pending)
                .filter(|flow| session_id.is_none_or(|session| flow.session_id == session))
                .cloned()
                .collect();
            pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(pending)
        })
    }

    fn all<'a>(
        &'a self,
        session_id: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ConfirmationFlow>>> + Send + 'a>> {
        Box::pin(async move {
            let flows = self.flows.read().await;
            let mut all: Vec<ConfirmationFlow> = flows
                .values()
                .filter(|flow| session_id.is_none_or(|session| flow.session_id == session))
                .cloned()
                .collect();
            all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(all)
        })
    }

    fn stats<'a>(
        &'a self,
        _session_id: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ConfirmationStats>>> + Send + 'a>> {
        // The cache never aggregates: merged-view statistics are computed by
        // the composing repository from `all`.
        Box::pin(async move { Ok(None) })
    }
}
