use super::{
    ConfirmationRepository, FlowPatch, InMemoryConfirmationStore, SqliteConfirmationStore,
    TransitionOutcome,
};
use crate::config::StoreConfig;
use crate::confirmation::types::{ConfirmationFlow, ConfirmationStats, ConfirmationStatus};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Dual-backed repository: the in-memory cache is authoritative and always
/// written; the durable store is best-effort. A failing durable store is
/// logged and the service keeps operating cache-only, never fatally.
pub struct FallbackRepository {
    cache: Arc<InMemoryConfirmationStore>,
    durable: Option<Arc<dyn ConfirmationRepository>>,
}

impl FallbackRepository {
    pub fn cache_only() -> Self {
        Self {
            cache: Arc::new(InMemoryConfirmationStore::new()),
            durable: None,
        }
    }

    pub fn with_durable(durable: Arc<dyn ConfirmationRepository>) -> Self {
        Self {
            cache: Arc::new(InMemoryConfirmationStore::new()),
            durable: Some(durable),
        }
    }

    /// Build from configuration: SQLite backing when durable storage is
    /// enabled, cache-only otherwise. A store that fails to open degrades
    /// to cache-only with a warning instead of failing construction.
    pub async fn from_config(config: &StoreConfig) -> Self {
        if !config.durable {
            return Self::cache_only();
        }
        match SqliteConfirmationStore::connect(&config.db_path).await {
            Ok(store) => Self::with_durable(Arc::new(store)),
            Err(error) => {
                tracing::warn!(
                    code = "STORE_UNAVAILABLE",
                    error = %format!("{error:#}"),
                    "durable store unavailable at startup; running cache-only"
                );
                Self::cache_only()
            }
        }
    }

    pub fn has_durable(&self) -> bool {
        self.durable.is_some()
    }

    /// Populate the cache from the durable store if the flow is not cached.
    async fn ensure_cached(&self, id: &str) -> anyhow::Result<Option<ConfirmationFlow>> {
        if let Some(flow) = self.cache.fetch(id).await? {
            return Ok(Some(flow));
        }
        let Some(durable) = &self.durable else {
            return Ok(None);
        };
        match durable.fetch(id).await {
            Ok(Some(flow)) => {
                self.cache.upsert(&flow).await?;
                Ok(Some(flow))
            }
            Ok(None) => Ok(None),
            Err(error) => {
                tracing::warn!(
                    code = "STORE_UNAVAILABLE",
                    confirmation_id = id,
                    error = %format!("{error:#}"),
                    "durable store read failed; serving cache-only"
                );
                Ok(None)
            }
        }
    }

    fn merge(
        cached: Vec<ConfirmationFlow>,
        durable: Vec<ConfirmationFlow>,
    ) -> Vec<ConfirmationFlow> {
        let seen: HashSet<String> = cached
            .iter()
            .map(|flow| flow.confirmation_id.clone())
            .collect();
        let mut merged = cached;
        merged.extend(
            durable
                .into_iter()
                .filter(|flow| !seen.contains(&flow.confirmation_id)),
        );
        merged.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        merged
    }
}

impl ConfirmationRepository for FallbackRepository {
    fn upsert<'a>(
        &'a self,
        flow: &'a ConfirmationFlow,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.cache.upsert(flow).await?;
            if let Some(durable) = &self.durable
                && let Err(error) = durable.upsert(flow).await
            {
                tracing::warn!(
                    code = "STORE_UNAVAILABLE",
                    confirmation_id = %flow.confirmation_id,
                    error = %format!("{error:#}"),
                    "durable store write failed; continuing cache-only"
                );
            }
            Ok(())
        })
    }

    fn fetch<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ConfirmationFlow>>> + Send + 'a>> {
        Box::pin(self.ensure_cached(id))
    }

    fn transition<'a>(
        &'a self,
        id: &'a str,
        expected: ConfirmationStatus,
        patch: FlowPatch,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<TransitionOutcome>> + Send + 'a>> {
        Box::pin(async move {
            if self.ensure_cached(id).await?.is_none() {
                return Ok(TransitionOutcome::NotFound);
            }

            let outcome = self.cache.transition(id, expected, patch.clone()).await?;

            if let (TransitionOutcome::Applied(updated), Some(durable)) = (&outcome, &self.durable)
            {
                let mirrored = match durable.transition(id, expected, patch).await {
                    // The durable copy can lag (e.g. a missed write); bring
                    // it level with the cache instead of diverging.
                    Ok(TransitionOutcome::NotFound) => durable.upsert(updated).await,
                    Ok(TransitionOutcome::StatusMismatch { .. }) => durable.upsert(updated).await,
                    Ok(TransitionOutcome::Applied(_)) => Ok(()),
                    Err(error) => Err(error),
                };
                if let Err(error) = mirrored {
                    tracing::warn!(
                        code = "STORE_UNAVAILABLE",
                        confirmation_id = id,
                        error = %format!("{error:#}"),
                        "durable store transition failed; continuing cache-only"
                    );
                }
            }

            Ok(outcome)
        })
    }

    fn pending<'a>(
        &'a self,
        session_id: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ConfirmationFlow>>> + Send + 'a>> {
        Box::pin(async move {
            let cached = self.cache.pending(session_id).await?;
            let Some(durable) = &self.durable else {
                return Ok(cached);
            };
            match durable.pending(session_id).await {
                Ok(from_durable) => Ok(Self::merge(cached, from_durable)),
                Err(error) => {
                    tracing::warn!(
                        code = "STORE_UNAVAILABLE",
                        error = %format!("{error:#}"),
                        "durable store scan failed; serving cache-only"
                    );
                    Ok(cached)
                }
            }
        })
    }

    fn all<'a>(
        &'a self,
        session_id: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ConfirmationFlow>>> + Send + 'a>> {
        Box::pin(async move {
            let cached = self.cache.all(session_id).await?;
            let Some(durable) = &self.durable else {
                return Ok(cached);
            };
            match durable.all(session_id).await {
                Ok(from_durable) => Ok(Self::merge(cached, from_durable)),
                Err(error) => {
                    tracing::warn!(
                        code = "STORE_UNAVAILABLE",
                        error = %format!("{error:#}"),
                        "durable store scan failed; serving cache-only"
                    );
                    Ok(cached)
                }
            }
        })
    }

    fn stats<'a>(
        &'a self,
        session_id: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ConfirmationStats>>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(durable) = &self.durable {
                match durable.stats(session_id).await {
                    Ok(Some(stats)) => return Ok(Some(stats)),
                    Ok(None) => {}
                    Err(error) => {
                        tracing::warn!(
                            code = "STORE_UNAVAILABLE",
                            error = %format!("{error:#}"),
                            "durable store aggregation failed; computing in memory"
                        );
                    }
                }
            }
            let flows = self.all(session_id).await?;
            Ok(Some(ConfirmationStats::from_flows(&flows)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirmation::types::ActionPreview;
    use crate::executor::types::ToolCall;
    use chrono::{Duration, Utc};
    use serde_json::Map;

    fn flow(id: &str, session: &str) -> ConfirmationFlow {
        let created = Utc::now();
        ConfirmationFlow {
            confirmation_id: id.to_string(),
            session_id: session.to_string(),
            user_id: "acme:jane".to_string(),
            action_preview: ActionPreview::fallback("send_email", "send it", &Map::new()),
            original_tool_call: ToolCall::new("send_email", Map::new()),
            status: ConfirmationStatus::Pending,
            created_at: created,
            expires_at: created + Duration::minutes(30),
            confirmed_at: None,
            executed_at: None,
            execution_result: None,
            channel_context: None,
        }
    }

    /// Durable stand-in that fails every operation.
    struct BrokenStore;

    impl ConfirmationRepository for BrokenStore {
        fn upsert<'a>(
            &'a self,
            _flow: &'a ConfirmationFlow,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
            Box::pin(async move { anyhow::bail!("disk on fire") })
        }

        fn fetch<'a>(
            &'a self,
            _id: &'a str,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ConfirmationFlow>>> + Send + 'a>>
        {
            Box::pin(async move { anyhow::bail!("disk on fire") })
        }

        fn transition<'a>(
            &'a self,
            _id: &'a str,
            _expected: ConfirmationStatus,
            _patch: FlowPatch,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<TransitionOutcome>> + Send + 'a>> {
            Box::pin(async move { anyhow::bail!("disk on fire") })
        }

        fn pending<'a>(
            &'a self,
            _session_id: Option<&'a str>,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ConfirmationFlow>>> + Send + 'a>>
        {
            Box::pin(async move { anyhow::bail!("disk on fire") })
        }

        fn all<'a>(
            &'a self,
            _session_id: Option<&'a str>,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ConfirmationFlow>>> + Send + 'a>>
        {
            Box::pin(async move { anyhow::bail!("disk on fire") })
        }

        fn stats<'a>(
            &'a self,
            _session_id: Option<&'a str>,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ConfirmationStats>>> + Send + 'a>>
        {
            Box::pin(async move { anyhow::bail!("disk on fire") })
        }
    }

    #[tokio::test]
    async fn from_config_respects_durable_toggle() {
        let disabled = FallbackRepository::from_config(&StoreConfig {
            durable: false,
            db_path: "unused.db".into(),
        })
        .await;
        assert!(!disabled.has_durable());

        let dir = tempfile::TempDir::new().unwrap();
        let enabled = FallbackRepository::from_config(&StoreConfig {
            durable: true,
            db_path: dir.path().join("confirmations.db"),
        })
        .await;
        assert!(enabled.has_durable());
    }

    #[tokio::test]
    async fn cache_only_round_trip() {
        let repo = FallbackRepository::cache_only();
        repo.upsert(&flow("c-1", "s-1")).await.unwrap();
        assert!(repo.fetch("c-1").await.unwrap().is_some());
        assert!(!repo.has_durable());
    }

    #[tokio::test]
    async fn broken_durable_store_degrades_to_cache_only() {
        let repo = FallbackRepository::with_durable(Arc::new(BrokenStore));
        repo.upsert(&flow("c-1", "s-1")).await.unwrap();

        let fetched = repo.fetch("c-1").await.unwrap();
        assert!(fetched.is_some());

        let outcome = repo
            .transition(
                "c-1",
                ConfirmationStatus::Pending,
                FlowPatch::responded(ConfirmationStatus::Confirmed, Utc::now()),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Applied(_)));

        let stats = repo.stats(None).await.unwrap().unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.confirmed, 1);
    }

    #[tokio::test]
    async fn fetch_populates_cache_from_durable() {
        let durable = Arc::new(InMemoryConfirmationStore::new());
        durable.upsert(&flow("c-1", "s-1")).await.unwrap();

        let repo = FallbackRepository::with_durable(durable);
        let fetched = repo.fetch("c-1").await.unwrap();
        assert!(fetched.is_some());

        // Now cached: a pending scan without the durable view still sees it.
        let pending = repo.cache.pending(Some("s-1")).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn merged_views_do_not_duplicate() {
        let durable = Arc::new(InMemoryConfirmationStore::new());
        durable.upsert(&flow("c-1", "s-1")).await.unwrap();
        durable.upsert(&flow("c-2", "s-1")).await.unwrap();

        let repo = FallbackRepository::with_durable(durable);
        repo.upsert(&flow("c-3", "s-1")).await.unwrap();
        // c-1 lives in both backings after a read-through.
        repo.fetch("c-1").await.unwrap();

        let pending = repo.pending(Some("s-1")).await.unwrap();
        let ids: Vec<&str> = pending
            .iter()
            .map(|flow| flow.confirmation_id.as_str())
            .collect();
        assert_eq!(pending.len(), 3);
        assert!(ids.contains(&"c-1") && ids.contains(&"c-2") && ids.contains(&"c-3"));
    }

    #[tokio::test]
    async fn transition_catches_up_lagging_durable_copy() {
        let durable = Arc::new(InMemoryConfirmationStore::new());
        let repo = FallbackRepository::with_durable(durable.clone());

        // Simulate a flow the durable store never saw.
        repo.cache.upsert(&flow("c-1", "s-1")).await.unwrap();

        let outcome = repo
            .transition(
                "c-1",
                ConfirmationStatus::Pending,
                FlowPatch::responded(ConfirmationStatus::Confirmed, Utc::now()),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Applied(_)));

        let mirrored = durable.fetch("c-1").await.unwrap().unwrap();
        assert_eq!(mirrored.status, ConfirmationStatus::Confirmed);
    }
}
