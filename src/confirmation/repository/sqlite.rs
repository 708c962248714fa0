use super::{ConfirmationRepository, FlowPatch, TransitionOutcome};
use crate::confirmation::types::{ConfirmationFlow, ConfirmationStats, ConfirmationStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

/// Durable confirmation store: one row per flow.
pub struct SqliteConfirmationStore {
    pool: SqlitePool,
}

impl SqliteConfirmationStore {
    pub async fn connect(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create store directory: {}", parent.display())
            })?;
        }

        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .with_context(|| format!("Failed to open confirmation DB: {}", db_path.display()))?;

        ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn fetch_row(&self, id: &str) -> Result<Option<ConfirmationFlow>> {
        let row = sqlx::query(
            "SELECT id, session_id, user_id, action_preview, original_tool_call, status,
                    created_at, expires_at, confirmed_at, executed_at, execution_result,
                    channel_context
             FROM confirmations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_flow).transpose()
    }
}

async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS confirmations (
            id                 TEXT PRIMARY KEY,
            session_id         TEXT NOT NULL,
            user_id            TEXT NOT NULL,
            action_preview     TEXT NOT NULL,
            original_tool_call TEXT NOT NULL,
            status             TEXT NOT NULL,
            created_at         TEXT NOT NULL,
            expires_at         TEXT NOT NULL,
            confirmed_at       TEXT,
            executed_at        TEXT,
            execution_result   TEXT,
            channel_context    TEXT
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create confirmations table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_confirmations_session ON confirmations(session_id)",
    )
    .execute(pool)
    .await
    .context("Failed to create confirmations session index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_confirmations_status ON confirmations(status)")
        .execute(pool)
        .await
        .context("Failed to create confirmations status index")?;

    Ok(())
}

impl ConfirmationRepository for SqliteConfirmationStore {
    fn upsert<'a>(
        &'a self,
        flow: &'a ConfirmationFlow,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let action_preview = serde_json::to_string(&flow.action_preview)
                .context("Failed to serialize action preview")?;
            let original_tool_call = serde_json::to_string(&flow.original_tool_call)
                .context("Failed to serialize tool call")?;
            let execution_result = flow
                .execution_result
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .context("Failed to serialize execution result")?;
            let channel_context = flow
                .channel_context
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .context("Failed to serialize channel context")?;

            sqlx::query(
                "INSERT INTO confirmations (
                    id, session_id, user_id, action_preview, original_tool_call, status,
                    created_at, expires_at, confirmed_at, executed_at, execution_result,
                    channel_context
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    confirmed_at = excluded.confirmed_at,
                    executed_at = excluded.executed_at,
                    execution_result = excluded.execution_result",
            )
            .bind(&flow.confirmation_id)
            .bind(&flow.session_id)
            .bind(&flow.user_id)
            .bind(action_preview)
            .bind(original_tool_call)
            .bind(flow.status.as_db())
            .bind(flow.created_at.to_rfc3339())
            .bind(flow.expires_at.to_rfc3339())
            .bind(flow.confirmed_at.as_ref().map(DateTime::to_rfc3339))
            .bind(flow.executed_at.as_ref().map(DateTime::to_rfc3339))
            .bind(execution_result)
            .bind(channel_context)
            .execute(&self.pool)
            .await
            .context("Failed to upsert confirmation")?;

            Ok(())
        })
    }

    fn fetch<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ConfirmationFlow>>> + Send + 'a>> {
        Box::pin(self.fetch_row(id))
    }

    fn transition<'a>(
        &'a self,
        id: &'a str,
        expected: ConfirmationStatus,
        patch: FlowPatch,
    ) -> Pin<Box<dyn Future<Output = Result<TransitionOutcome>> + Send + 'a>> {
        Box::pin(async move {
            let execution_result = patch
                .execution_result
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .context("Failed to serialize execution result")?;

            let result = sqlx::query(
                "UPDATE confirmations
                 SET status = ?,
                     confirmed_at = COALESCE(?, confirmed_at),
                     executed_at = COALESCE(?, executed_at),
                     execution_result = COALESCE(?, execution_result)
                 WHERE id = ? AND status = ?",
            )
            .bind(patch.status.as_db())
            .bind(patch.confirmed_at.as_ref().map(DateTime::to_rfc3339))
            .bind(patch.executed_at.as_ref().map(DateTime::to_rfc3339))
            .bind(execution_result)
            .bind(id)
            .bind(expected.as_db())
            .execute(&self.pool)
            .await
            .context("Failed to transition confirmation")?;

            if result.rows_affected() == 0 {
                return match self.fetch_row(id).await? {
                    None => Ok(TransitionOutcome::NotFound),
                    Some(flow) => Ok(TransitionOutcome::StatusMismatch {
                        actual: flow.status,
                    }),
                };
            }

            match self.fetch_row(id).await? {
                Some(flow) => Ok(TransitionOutcome::Applied(flow)),
                None => Ok(TransitionOutcome::NotFound),
            }
        })
    }

    fn pending<'a>(
        &'a self,
        session_id: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ConfirmationFlow>>> + Send + 'a>> {
        Box::pin(async move {
            let rows = if let Some(session) = session_id {
                sqlx::query(
                    "SELECT id, session_id, user_id, action_preview, original_tool_call, status,
                            created_at, expires_at, confirmed_at, executed_at, execution_result,
                            channel_context
                     FROM confirmations
                     WHERE status = 'pending' AND session_id = ?
                     ORDER BY created_at ASC",
                )
                .bind(session)
                .fetch_all(&self.pool)
                .await?
            } else {
                sqlx::query(
                    "SELECT id, session_id, user_id, action_preview, original_tool_call, status,
                            created_at, expires_at, confirmed_at, executed_at, execution_result,
                            channel_context
                     FROM confirmations
                     WHERE status = 'pending'
                     ORDER BY created_at ASC",
                )
                .fetch_all(&self.pool)
                .await?
            };

            rows.iter().map(row_to_flow).collect()
        })
    }

    fn all<'a>(
        &'a self,
        session_id: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ConfirmationFlow>>> + Send + 'a>> {
        Box::pin(async move {
            let rows = if let Some(session) = session_id {
                sqlx::query(
                    "SELECT id, session_id, user_id, action_preview, original_tool_call, status,
                            created_at, expires_at, confirmed_at, executed_at, execution_result,
                            channel_context
                     FROM confirmations
                     WHERE session_id = ?
                     ORDER BY created_at ASC",
                )
                .bind(session)
                .fetch_all(&self.pool)
                .await?
            } else {
                sqlx::query(
                    "SELECT id, session_id, user_id, action_preview, original_tool_call, status,
                            created_at, expires_at, confirmed_at, executed_at, execution_result,
                            channel_context
                     FROM confirmations
                     ORDER BY created_at ASC",
                )
                .fetch_all(&self.pool)
                .await?
            };

            rows.iter().map(row_to_flow).collect()
        })
    }

    fn stats<'a>(
        &'a self,
        session_id: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ConfirmationStats>>> + Send + 'a>> {
        Box::pin(async move {
            let count_rows = if let Some(session) = session_id {
                sqlx::query(
                    "SELECT status, COUNT(*) AS n FROM confirmations
                     WHERE session_id = ? GROUP BY status",
                )
                .bind(session)
                .fetch_all(&self.pool)
                .await?
            } else {
                sqlx::query("SELECT status, COUNT(*) AS n FROM confirmations GROUP BY status")
                    .fetch_all(&self.pool)
                    .await?
            };

            let mut stats = ConfirmationStats::default();
            for row in &count_rows {
                let status_raw: String = row.get("status");
                let count: i64 = row.get("n");
                let count = u64::try_from(count).unwrap_or(0);
                stats.total += count;
                match ConfirmationStatus::from_db(&status_raw)? {
                    ConfirmationStatus::Pending => stats.pending += count,
                    ConfirmationStatus::Confirmed => stats.confirmed += count,
                    ConfirmationStatus::Rejected => stats.rejected += count,
                    ConfirmationStatus::Expired => stats.expired += count,
                    ConfirmationStatus::Executed => stats.executed += count,
                    ConfirmationStatus::Failed => stats.failed += count,
                }
            }

            let response_rows = if let Some(session) = session_id {
                sqlx::query(
                    "SELECT created_at, confirmed_at FROM confirmations
                     WHERE confirmed_at IS NOT NULL AND session_id = ?",
                )
                .bind(session)
                .fetch_all(&self.pool)
                .await?
            } else {
                sqlx::query(
                    "SELECT created_at, confirmed_at FROM confirmations
                     WHERE confirmed_at IS NOT NULL",
                )
                .fetch_all(&self.pool)
                .await?
            };

            if !response_rows.is_empty() {
                let mut total_secs = 0.0_f64;
                for row in &response_rows {
                    let created_raw: String = row.get("created_at");
                    let confirmed_raw: String = row.get("confirmed_at");
                    let created = parse_rfc3339(&created_raw)?;
                    let confirmed = parse_rfc3339(&confirmed_raw)?;
                    let millis = confirmed.signed_duration_since(created).num_milliseconds();
                    total_secs += millis as f64 / 1000.0;
                }
                stats.average_response_time_secs = total_secs / response_rows.len() as f64;
            }

            stats.finalize_rate();
            Ok(Some(stats))
        })
    }
}

// ── Internal helpers ────────────────────────────────────────────────────────

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp: {raw}"))?
        .with_timezone(&Utc))
}

fn row_to_flow(row: &SqliteRow) -> Result<ConfirmationFlow> {
    let id: String = row.get("id");
    let session_id: String = row.get("session_id");
    let user_id: String = row.get("user_id");
    let action_preview_raw: String = row.get("action_preview");
    let original_tool_call_raw: String = row.get("original_tool_call");
    let status_raw: String = row.get("status");
    let created_at_raw: String = row.get("created_at");
    let expires_at_raw: String = row.get("expires_at");
    let confirmed_at_raw: Option<String> = row.get("confirmed_at");
    let executed_at_raw: Option<String> = row.get("executed_at");
    let execution_result_raw: Option<String> = row.get("execution_result");
    let channel_context_raw: Option<String> = row.get("channel_context");

    Ok(ConfirmationFlow {
        confirmation_id: id,
        session_id,
        user_id,
        action_preview: serde_json::from_str(&action_preview_raw)
            .context("Failed to parse action preview")?,
        original_tool_call: serde_json::from_str(&original_tool_call_raw)
            .context("Failed to parse tool call")?,
        status: ConfirmationStatus::from_db(&status_raw)?,
        created_at: parse_rfc3339(&created_at_raw)?,
        expires_at: parse_rfc3339(&expires_at_raw)?,
        confirmed_at: match confirmed_at_raw {
            Some(raw) => Some(parse_rfc3339(&raw)?),
            None => None,
        },
        executed_at: match executed_at_raw {
            Some(raw) => Some(parse_rfc3339(&raw)?),
            None => None,
        },
        execution_result: match execution_result_raw {
            Some(raw) => {
                Some(serde_json::from_str(&raw).context("Failed to parse execution result")?)
            }
            None => None,
        },
        channel_context: match channel_context_raw {
            Some(raw) => {
                Some(serde_json::from_str(&raw).context("Failed to parse channel context")?)
            }
            None => None,
        },
    })
}
