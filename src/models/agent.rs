//! Agent-level records
//!
//! The externally observable contract of an analysis job: its run
//! parameters and the result record the status endpoint serves while the
//! worker progresses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job status; transitions are monotonic
/// (pending -> processing -> completed | failed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Parameters of one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunParams {
    pub trial_id: String,
    pub medication: String,
    /// Overrides the configured workspace root when present
    pub workspace_root: Option<String>,
    /// Overrides the configured LLM API key when present
    pub llm_api_key: Option<String>,
}

/// The result record of an analysis job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub status: AgentStatus,
    pub agent_name: String,
    pub output_dir: Option<String>,
    pub result_data: serde_json::Value,
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentResult {
    pub fn pending(agent_name: &str) -> Self {
        let now = Utc::now();
        Self {
            status: AgentStatus::Pending,
            agent_name: agent_name.to_string(),
            output_dir: None,
            result_data: serde_json::Value::Null,
            metadata: serde_json::json!({}),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Advance the status; backward transitions are ignored with a warning.
    pub fn transition(&mut self, status: AgentStatus) {
        if status.rank() < self.status.rank() {
            tracing::warn!(
                "Ignoring backward status transition {} -> {}",
                self.status.as_str(),
                status.as_str()
            );
            return;
        }
        self.status = status;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
