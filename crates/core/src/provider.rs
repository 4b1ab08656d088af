//! ChatProvider trait — the abstraction over LLM backends.
//!
//! A provider accepts a rendered system prompt, message history, and tool
//! definitions, and returns either a complete response or a stream of
//! events. Transport (HTTP, SDK, streaming protocol) lives outside this
//! core; implementations plug in behind this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::ToolBinding;
use crate::error::ProviderError;
use crate::message::TokenUsage;
use crate::tool::ToolDefinition;

/// The role of one entry in the outbound exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeRole {
    User,
    Assistant,
    /// Carries a tool result back to the model
    Tool,
}

/// One entry in the outbound message list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeMessage {
    pub role: ExchangeRole,
    pub content: String,

    /// Tool calls requested by a prior assistant entry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    /// For `Tool` entries: which call this result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ExchangeMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ExchangeRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: ExchangeRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ExchangeRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-side call id (echoed back with the result)
    pub id: String,

    /// Tool name
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// One outbound model request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,

    /// Rendered system prompt
    pub system_prompt: String,

    /// Conversation so far, oldest first
    pub messages: Vec<ExchangeMessage>,

    /// Runtime tool definitions the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Provider-native tools, passed through with their options
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provider_tools: Vec<ToolBinding>,

    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

/// A complete (non-streaming) model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Assistant text (may be empty when only tool calls were produced)
    pub content: String,

    /// Tool calls the model wants executed before it can finish
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    /// Which model actually responded
    pub model: String,

    /// Token usage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,

    /// Provider-side response identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

/// One chunk of a streamed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub delta: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    #[serde(default)]
    pub done: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Per-limit metadata carried by a rate-limit error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitInfo {
    /// Limit name (e.g., "requests_per_minute")
    pub name: String,
    pub limit: u64,
    pub remaining: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<u64>,
}

impl std::fmt::Display for RateLimitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}/{} remaining",
            self.name, self.remaining, self.limit
        )?;
        if let Some(resets_at) = self.resets_at {
            write!(f, ", resets at {}", resets_at.to_rfc3339())?;
        }
        Ok(())
    }
}

/// The core provider trait.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ChatRequest,
    ) -> std::result::Result<ChatResponse, ProviderError>;

    /// Send a request and get a stream of events.
    ///
    /// Default implementation calls `complete()` and wraps the result as a
    /// single terminal event.
    async fn stream(
        &self,
        request: ChatRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamEvent, ProviderError>>,
        ProviderError,
    > {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamEvent {
                delta: Some(response.content),
                tool_calls: response.tool_calls,
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }
}
