//! Chat thread log — the in-memory trace of one model invocation.
//!
//! Append-only: one entry per user/assistant message surfaced by the
//! exchange, one entry per tool invocation. Tool-result-carrier messages
//! are not logged as messages; only the resolved name/arguments/result
//! triple is. The log lives for the request's duration; the orchestrator
//! persists a derived subset (messages, tool runs) from it.

use serde::{Deserialize, Serialize};

use crate::status::MessageRole;

/// One logged message entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

/// One logged tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: serde_json::Value,
    pub result: String,
}

/// The per-call trace. Owned exclusively by the turn that created it.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ChatThreadLog {
    messages: Vec<ChatMessage>,
    invocations: Vec<ToolInvocation>,
}

impl ChatThreadLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message entry in call order.
    pub fn record_message(&mut self, role: MessageRole, content: impl Into<String>) {
        self.messages.push(ChatMessage {
            role,
            content: content.into(),
        });
    }

    /// Append a tool invocation entry in call order.
    pub fn record_invocation(
        &mut self,
        name: impl Into<String>,
        arguments: serde_json::Value,
        result: impl Into<String>,
    ) {
        self.invocations.push(ToolInvocation {
            name: name.into(),
            arguments,
            result: result.into(),
        });
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn invocations(&self) -> &[ToolInvocation] {
        &self.invocations
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.invocations.is_empty()
    }
}
