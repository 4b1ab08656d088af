//! Message domain types.
//!
//! A message is one utterance in a thread. Ids are store-assigned and
//! monotonically increasing, so `id > last_summary_message_id` windows are
//! well-defined. `sequence` is unique-and-increasing per thread and its
//! ordering equals chronological order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::{ContentType, MessageRole, MessageStatus};
use crate::thread::ThreadId;

/// Unique identifier for a message, store-assigned and ordered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MessageId(pub i64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token usage reported by the provider for one completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// A single persisted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: MessageId,

    /// Owning thread
    pub thread_id: ThreadId,

    /// Who authored this message
    pub role: MessageRole,

    /// The body
    pub content: String,

    /// Shape of the body
    pub content_type: ContentType,

    /// Position within the thread; unique and increasing, ordering equals
    /// creation order
    pub sequence: i64,

    /// Lifecycle status
    pub status: MessageStatus,

    /// Populated when status is `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,

    /// Model that produced an assistant message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Token counts for an assistant message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,

    /// Provider-side response identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_response_id: Option<String>,

    /// Whether the memory-extraction workflow has already examined this
    /// message
    #[serde(default)]
    pub memory_checked: bool,

    /// Free-form metadata
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Soft-delete marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input for appending a message. The store assigns id, sequence, and
/// timestamps under its per-thread write serialization.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub thread_id: ThreadId,
    pub role: MessageRole,
    pub content: String,
    pub content_type: ContentType,
    pub status: MessageStatus,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl NewMessage {
    /// A user message. User messages are complete on arrival — they never
    /// pass through `Processing`.
    pub fn user(thread_id: ThreadId, content: impl Into<String>) -> Self {
        Self {
            thread_id,
            role: MessageRole::User,
            content: content.into(),
            content_type: ContentType::Text,
            status: MessageStatus::Completed,
            metadata: serde_json::Map::new(),
        }
    }

    /// A pending assistant message, created before the model call and
    /// completed (or failed) afterwards.
    pub fn assistant_pending(thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            role: MessageRole::Assistant,
            content: String::new(),
            content_type: ContentType::Text,
            status: MessageStatus::Processing,
            metadata: serde_json::Map::new(),
        }
    }
}
