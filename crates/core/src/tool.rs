//! Tool contract — the base trait plus narrow capability interfaces.
//!
//! Every tool exposes a name, description, parameter schema, and an async
//! `handle`. Optional capabilities are separate traits; the invocation
//! runtime probes for each one via the default-`None` accessors and wires
//! them independently before first use. A tool opts in by overriding the
//! accessor for the capabilities it implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{StoreError, ToolError};
use crate::message::MessageId;
use crate::state::ThreadState;
use crate::tool_run::{NewToolRun, ToolRunId, ToolRunOutcome};

/// A tool definition sent to the LLM so it knows what it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// What a tool handler returns: a short status message for the model plus
/// a structured payload persisted on the tool run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub message: String,

    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl ToolResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// The base tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (matches its registry key).
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with validated arguments.
    ///
    /// An `Err` here is caught by the invocation runtime, recorded as a
    /// failed tool run, and surfaced to the model as a tool error result —
    /// it never aborts the turn.
    async fn handle(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolResponse, ToolError>;

    /// Convert this tool into a definition for the provider request.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }

    /// Capability probe: per-agent configuration injection.
    fn as_configurable(&mut self) -> Option<&mut dyn ConfigurableTool> {
        None
    }

    /// Capability probe: read access to the current turn's snapshot.
    fn as_state_aware(&mut self) -> Option<&mut dyn StateAwareTool> {
        None
    }

    /// Capability probe: tool-run logging context.
    fn as_run_logging(&mut self) -> Option<&mut dyn RunLoggingTool> {
        None
    }
}

impl std::fmt::Debug for dyn Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool").field("name", &self.name()).finish()
    }
}

/// Receives the agent's per-tool configuration map before first use.
pub trait ConfigurableTool {
    fn apply_config(&mut self, options: &serde_json::Map<String, serde_json::Value>);
}

/// Receives the current turn's [`ThreadState`] so the handler can read
/// thread/memory/user context.
pub trait StateAwareTool {
    fn bind_state(&mut self, state: Arc<ThreadState>);
}

/// Receives a run logger plus the owning tool key and the triggering
/// assistant-message id, for tools that record additional runs or attach
/// attribution to their side effects.
pub trait RunLoggingTool {
    fn bind_run_logger(&mut self, logger: Arc<dyn ToolRunLogger>, ctx: RunLogContext);
}

/// Attribution handed to run-logging tools.
#[derive(Debug, Clone)]
pub struct RunLogContext {
    pub tool_key: String,
    pub message_id: MessageId,
}

/// Narrow persistence interface for tool-run lifecycle records.
///
/// The invocation runtime implements this over the store and drives the
/// canonical lifecycle for every call; run-logging tools receive the same
/// logger for their own records.
#[async_trait]
pub trait ToolRunLogger: Send + Sync {
    async fn begin(&self, run: NewToolRun) -> std::result::Result<ToolRunId, StoreError>;

    async fn mark_running(&self, id: ToolRunId) -> std::result::Result<(), StoreError>;

    async fn finish(
        &self,
        id: ToolRunId,
        outcome: ToolRunOutcome,
    ) -> std::result::Result<(), StoreError>;
}
