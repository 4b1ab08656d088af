//! Job queue collaborator — background work dispatch.
//!
//! Delivery and ack semantics belong to the queue implementation; this
//! core only dispatches.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::thread::ThreadId;

/// The background jobs this core dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Produce/refresh the rolling summaries of a thread
    SummarizeThread,
    /// Extract durable memories from recent messages
    ExtractMemories,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::SummarizeThread => "summarize_thread",
            JobKind::ExtractMemories => "extract_memories",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The queue collaborator trait.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn dispatch(
        &self,
        job: JobKind,
        thread_id: &ThreadId,
    ) -> std::result::Result<(), QueueError>;
}
