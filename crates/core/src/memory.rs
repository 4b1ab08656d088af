//! Memory domain types — durable facts extracted from conversations.
//!
//! Memories are created only by the extraction workflow. They are never
//! mutated afterwards, only soft-deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::MessageId;
use crate::thread::ThreadId;

/// Unique identifier for a memory, store-assigned.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MemoryId(pub i64);

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whose fact this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryOwner {
    User,
    Agent,
    Org,
}

impl MemoryOwner {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryOwner::User => "user",
            MemoryOwner::Agent => "agent",
            MemoryOwner::Org => "org",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw {
            "agent" => MemoryOwner::Agent,
            "org" => MemoryOwner::Org,
            _ => MemoryOwner::User,
        }
    }
}

/// A durable extracted fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Unique memory ID
    pub id: MemoryId,

    /// Scope of the fact
    pub owner: MemoryOwner,

    /// Agent the fact belongs to
    pub agent_key: String,

    /// Thread the fact was extracted from
    pub thread_id: ThreadId,

    /// The fact itself
    pub content: String,

    /// Messages the fact was derived from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_message_ids: Vec<MessageId>,

    /// Optional importance/kind tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Soft-delete marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input for inserting a memory.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub owner: MemoryOwner,
    pub agent_key: String,
    pub thread_id: ThreadId,
    pub content: String,
    pub source_message_ids: Vec<MessageId>,
    pub kind: Option<String>,
}
