use crate::executor::types::{ToolCall, ToolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const REDACTION_MARKER: &str = "[REDACTED]";

const SENSITIVE_KEY_MARKERS: [&str; 7] = [
    "token",
    "password",
    "secret",
    "api_key",
    "apikey",
    "credential",
    "auth",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    #[serde(default)]
    pub factors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Human-readable summary of a pending action, produced once per
/// confirmation and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPreview {
    pub action_id: String,
    pub action_type: String,
    pub title: String,
    pub description: String,
    pub risk: RiskAssessment,
    pub estimated_execution_time: String,
    pub reversible: bool,
    pub requires_confirmation: bool,
    #[serde(default)]
    pub preview_data: Map<String, Value>,
    pub original_query: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl ActionPreview {
    /// Conservative preview used when the target agent has no preview
    /// capability or its preview call fails. Always requires confirmation
    /// and never echoes secret-like parameter values.
    pub fn fallback(tool_name: &str, original_query: &str, parameters: &Map<String, Value>) -> Self {
        let readable = tool_name.replace('_', " ");
        Self {
            action_id: uuid::Uuid::new_v4().to_string(),
            action_type: tool_name.to_string(),
            title: format!("Confirm: {readable}"),
            description: format!("The assistant wants to run '{readable}' for: {original_query}"),
            risk: RiskAssessment {
                level: RiskLevel::Medium,
                factors: vec!["preview capability unavailable".to_string()],
                warnings: vec![
                    "action details could not be previewed; review the parameters before approving"
                        .to_string(),
                ],
            },
            estimated_execution_time: "unknown".to_string(),
            reversible: false,
            requires_confirmation: true,
            preview_data: Map::new(),
            original_query: original_query.to_string(),
            parameters: redact_sensitive_parameters(parameters),
        }
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SENSITIVE_KEY_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Replace values of token/password/secret-like keys with the redaction
/// marker. Non-sensitive values pass through untouched.
pub fn redact_sensitive_parameters(parameters: &Map<String, Value>) -> Map<String, Value> {
    parameters
        .iter()
        .map(|(key, value)| {
            if is_sensitive_key(key) {
                (key.clone(), Value::String(REDACTION_MARKER.to_string()))
            } else {
                (key.clone(), value.clone())
            }
        })
        .collect()
}

// ─── Lifecycle ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Pending,
    Confirmed,
    Rejected,
    Expired,
    Executed,
    Failed,
}

impl ConfirmationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Expired | Self::Executed | Self::Failed
        )
    }

    /// The only reachable transitions: Pending responds or expires,
    /// Confirmed executes or fails.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed)
                | (Self::Pending, Self::Rejected)
                | (Self::Pending, Self::Expired)
                | (Self::Confirmed, Self::Executed)
                | (Self::Confirmed, Self::Failed)
        )
    }

    pub fn as_db(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Executed => "executed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db(raw: &str) -> anyhow::Result<Self> {
        match raw {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            "executed" => Ok(Self::Executed),
            "failed" => Ok(Self::Failed),
            other => anyhow::bail!("unknown confirmation status: {other}"),
        }
    }
}

impl std::fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db())
    }
}

/// Tracked record of one confirmation from creation to terminal state.
/// Never deleted, only terminal-stated; retained for audit and statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationFlow {
    pub confirmation_id: String,
    pub session_id: String,
    pub user_id: String,
    pub action_preview: ActionPreview,
    pub original_tool_call: ToolCall,
    pub status: ConfirmationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub execution_result: Option<ToolResult>,
    pub channel_context: Option<Value>,
}

impl ConfirmationFlow {
    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ConfirmationStatus::Pending && now > self.expires_at
    }
}

// ─── Statistics ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfirmationStats {
    pub total: u64,
    pub pending: u64,
    pub confirmed: u64,
    pub rejected: u64,
    pub expired: u64,
    pub executed: u64,
    pub failed: u64,
    pub average_response_time_secs: f64,
    /// Percentage of flows that were approved (confirmed, plus those that
    /// went on to execute or fail) out of all flows.
    pub confirmation_rate: f64,
}

impl ConfirmationStats {
    pub fn from_flows<'a>(flows: impl IntoIterator<Item = &'a ConfirmationFlow>) -> Self {
        let mut stats = Self::default();
        let mut response_total_secs = 0.0_f64;
        let mut responded = 0_u64;

        for flow in flows {
            stats.total += 1;
            match flow.status {
                ConfirmationStatus::Pending => stats.pending += 1,
                ConfirmationStatus::Confirmed => stats.confirmed += 1,
                ConfirmationStatus::Rejected => stats.rejected += 1,
                ConfirmationStatus::Expired => stats.expired += 1,
                ConfirmationStatus::Executed => stats.executed += 1,
                ConfirmationStatus::Failed => stats.failed += 1,
            }
            if let Some(confirmed_at) = flow.confirmed_at {
                let millis = confirmed_at
                    .signed_duration_since(flow.created_at)
                    .num_milliseconds();
                response_total_secs += millis as f64 / 1000.0;
                responded += 1;
            }
        }

        if responded > 0 {
            stats.average_response_time_secs = response_total_secs / responded as f64;
        }
        stats.finalize_rate();
        stats
    }

    /// Recompute `confirmation_rate` from the status counters.
    pub fn finalize_rate(&mut self) {
        let approved = self.confirmed + self.executed + self.failed;
        self.confirmation_rate = if self.total == 0 {
            0.0
        } else {
            approved as f64 / self.total as f64 * 100.0
        };
    }
}
