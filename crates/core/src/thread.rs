//! Thread domain types.
//!
//! A thread is one conversation: it carries its lifecycle status, its
//! rolling summaries, a free-form metadata map, and an optional parent
//! (thread or tool run) when it was spawned as part of another turn.
//! Parent links form a tree — a parent must exist strictly before its
//! child, which the store enforces at creation time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::MessageId;
use crate::status::{ThreadKind, ThreadStatus};
use crate::tool_run::ToolRunId;

/// Metadata key for the memory-extraction idempotency guard.
///
/// Set via [`crate::store::ThreadStore::try_acquire_metadata_flag`] only;
/// cleared by the extraction job when it finishes.
pub const MEMORY_JOB_PENDING_KEY: &str = "memory_job_pending";

/// Unique identifier for a thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    /// Unique thread ID
    pub id: ThreadId,

    /// Key of the agent definition this thread runs under
    pub agent_key: String,

    /// Lifecycle status
    pub status: ThreadStatus,

    /// How the thread came into existence
    pub kind: ThreadKind,

    /// Parent thread, when spawned from another conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_thread_id: Option<ThreadId>,

    /// Tool run that spawned this thread, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_run_id: Option<ToolRunId>,

    /// Optional title (auto-generated or user-set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Rolling short summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Rolling long-form summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_summary: Option<String>,

    /// Highest message id covered by the last summarization pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_summary_message_id: Option<MessageId>,

    /// Free-form metadata map
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Last activity timestamp
    pub last_active_at: DateTime<Utc>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Soft-delete marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Thread {
    /// Read a boolean flag from the metadata map. Absent keys and
    /// non-boolean values read as `false`.
    pub fn metadata_flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Input for creating a thread. The store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewThread {
    pub agent_key: String,
    pub kind: ThreadKind,
    pub parent_thread_id: Option<ThreadId>,
    pub parent_tool_run_id: Option<ToolRunId>,
    pub title: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl NewThread {
    /// A user-originated thread.
    pub fn user(agent_key: impl Into<String>) -> Self {
        Self {
            agent_key: agent_key.into(),
            kind: ThreadKind::User,
            parent_thread_id: None,
            parent_tool_run_id: None,
            title: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// A tool-originated thread nested under a parent turn.
    pub fn tool(
        agent_key: impl Into<String>,
        parent_thread_id: ThreadId,
        parent_tool_run_id: Option<ToolRunId>,
    ) -> Self {
        Self {
            agent_key: agent_key.into(),
            kind: ThreadKind::Tool,
            parent_thread_id: Some(parent_thread_id),
            parent_tool_run_id,
            title: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_thread() -> Thread {
        Thread {
            id: ThreadId::new(),
            agent_key: "concierge".into(),
            status: ThreadStatus::Open,
            kind: ThreadKind::User,
            parent_thread_id: None,
            parent_tool_run_id: None,
            title: None,
            summary: None,
            long_summary: None,
            last_summary_message_id: None,
            metadata: serde_json::Map::new(),
            last_active_at: Utc::now(),
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn metadata_flag_defaults_to_false() {
        let thread = test_thread();
        assert!(!thread.metadata_flag(MEMORY_JOB_PENDING_KEY));
    }

    #[test]
    fn metadata_flag_reads_booleans_only() {
        let mut thread = test_thread();
        thread
            .metadata
            .insert(MEMORY_JOB_PENDING_KEY.into(), serde_json::json!(true));
        assert!(thread.metadata_flag(MEMORY_JOB_PENDING_KEY));

        thread
            .metadata
            .insert("note".into(), serde_json::json!("yes"));
        assert!(!thread.metadata_flag("note"));
    }

    #[test]
    fn tool_thread_links_parent() {
        let parent = ThreadId::new();
        let new = NewThread::tool("worker", parent.clone(), None);
        assert_eq!(new.kind, ThreadKind::Tool);
        assert_eq!(new.parent_thread_id, Some(parent));
    }

    #[test]
    fn thread_serialization_round_trip() {
        let thread = test_thread();
        let json = serde_json::to_string(&thread).unwrap();
        let back: Thread = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, thread.id);
        assert_eq!(back.status, ThreadStatus::Open);
    }
}
