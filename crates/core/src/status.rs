//! Lifecycle status vocabularies for threads, messages, and tool runs.
//!
//! Each enum carries its own transition predicate so stores and services
//! reject illegal moves instead of silently recording them.

use serde::{Deserialize, Serialize};

/// Lifecycle of a conversation thread.
///
/// `Open ⇄ Archived`; both can move to `Closed`, which is terminal
/// (closed threads are kept, not deleted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Open,
    Archived,
    Closed,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Open => "open",
            ThreadStatus::Archived => "archived",
            ThreadStatus::Closed => "closed",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw {
            "archived" => ThreadStatus::Archived,
            "closed" => ThreadStatus::Closed,
            _ => ThreadStatus::Open,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ThreadStatus::Closed)
    }

    pub fn can_transition_to(&self, next: ThreadStatus) -> bool {
        match (self, next) {
            (ThreadStatus::Open, ThreadStatus::Archived) => true,
            (ThreadStatus::Archived, ThreadStatus::Open) => true,
            (ThreadStatus::Open, ThreadStatus::Closed) => true,
            (ThreadStatus::Archived, ThreadStatus::Closed) => true,
            _ => false,
        }
    }
}

/// How a thread came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadKind {
    /// Started by a user message.
    User,
    /// Spawned by a tool run inside another thread.
    Tool,
}

impl ThreadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadKind::User => "user",
            ThreadKind::Tool => "tool",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw {
            "tool" => ThreadKind::Tool,
            _ => ThreadKind::User,
        }
    }
}

/// The author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw {
            "assistant" => MessageRole::Assistant,
            _ => MessageRole::User,
        }
    }
}

/// Shape of a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Text,
    Structured,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Structured => "structured",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw {
            "structured" => ContentType::Structured,
            _ => ContentType::Text,
        }
    }
}

/// Lifecycle of a message.
///
/// `Processing → Completed` on the normal path, `Processing → Failed` on a
/// model/provider error. Both end states are terminal: a message is never
/// reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Processing,
    Completed,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Processing => "processing",
            MessageStatus::Completed => "completed",
            MessageStatus::Failed => "failed",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw {
            "completed" => MessageStatus::Completed,
            "failed" => MessageStatus::Failed,
            _ => MessageStatus::Processing,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Completed | MessageStatus::Failed)
    }

    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        matches!(
            (self, next),
            (MessageStatus::Processing, MessageStatus::Completed)
                | (MessageStatus::Processing, MessageStatus::Failed)
        )
    }
}

/// Lifecycle of a tool run.
///
/// `Queued → Running → Succeeded | Failed`. A run never skips `Running`,
/// even when execution is effectively instantaneous; the store stamps
/// `started_at` on entering `Running` and `finished_at` on either terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolRunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl ToolRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolRunStatus::Queued => "queued",
            ToolRunStatus::Running => "running",
            ToolRunStatus::Succeeded => "succeeded",
            ToolRunStatus::Failed => "failed",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw {
            "running" => ToolRunStatus::Running,
            "succeeded" => ToolRunStatus::Succeeded,
            "failed" => ToolRunStatus::Failed,
            _ => ToolRunStatus::Queued,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolRunStatus::Succeeded | ToolRunStatus::Failed)
    }

    pub fn can_transition_to(&self, next: ToolRunStatus) -> bool {
        matches!(
            (self, next),
            (ToolRunStatus::Queued, ToolRunStatus::Running)
                | (ToolRunStatus::Running, ToolRunStatus::Succeeded)
                | (ToolRunStatus::Running, ToolRunStatus::Failed)
        )
    }
}
