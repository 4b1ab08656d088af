//! Tool run domain types — the persisted record of one tool invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::MessageId;
use crate::status::ToolRunStatus;
use crate::thread::ThreadId;

/// Unique identifier for a tool run, store-assigned.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ToolRunId(pub i64);

impl std::fmt::Display for ToolRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One tool invocation during a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRun {
    /// Unique run ID
    pub id: ToolRunId,

    /// Key of the tool that ran
    pub tool_key: String,

    /// Agent the run belongs to
    pub agent_key: String,

    /// Thread the run happened in
    pub thread_id: ThreadId,

    /// Assistant message whose tool calls triggered this run
    pub message_id: MessageId,

    /// Position within that message's tool calls
    pub call_index: u32,

    /// Lifecycle status
    pub status: ToolRunStatus,

    /// Set on first transition into `Running`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Set on entering either terminal state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Captured input arguments
    pub input: serde_json::Value,

    /// Handler output, on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    /// Error text, on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Soft-delete marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input for creating a tool run in `Queued` state.
#[derive(Debug, Clone)]
pub struct NewToolRun {
    pub tool_key: String,
    pub agent_key: String,
    pub thread_id: ThreadId,
    pub message_id: MessageId,
    pub call_index: u32,
    pub input: serde_json::Value,
}

/// Terminal outcome applied to a running tool run.
#[derive(Debug, Clone)]
pub enum ToolRunOutcome {
    Succeeded(serde_json::Value),
    Failed(String),
}
