//! Remember tool — persists a durable fact from the conversation.
//!
//! Thread-state aware (scope and agent come from the turn snapshot) and
//! run-logging aware: the bound run context supplies the triggering
//! assistant-message id, which becomes the new memory's source
//! attribution.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use threadloom_core::error::ToolError;
use threadloom_core::memory::{MemoryOwner, NewMemory};
use threadloom_core::state::ThreadState;
use threadloom_core::store::ThreadStore;
use threadloom_core::tool::{
    RunLogContext, RunLoggingTool, StateAwareTool, Tool, ToolResponse, ToolRunLogger,
};

pub struct RememberTool {
    store: Arc<dyn ThreadStore>,
    state: Option<Arc<ThreadState>>,
    run_context: Option<RunLogContext>,
}

impl RememberTool {
    pub fn new(store: Arc<dyn ThreadStore>) -> Self {
        Self {
            store,
            state: None,
            run_context: None,
        }
    }
}

impl StateAwareTool for RememberTool {
    fn bind_state(&mut self, state: Arc<ThreadState>) {
        self.state = Some(state);
    }
}

impl RunLoggingTool for RememberTool {
    fn bind_run_logger(&mut self, _logger: Arc<dyn ToolRunLogger>, ctx: RunLogContext) {
        self.run_context = Some(ctx);
    }
}

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &str {
        "remember"
    }

    fn description(&self) -> &str {
        "Save a durable fact about the user so future conversations can use it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "fact": {
                    "type": "string",
                    "description": "The fact to remember, phrased as a standalone statement"
                },
                "kind": {
                    "type": "string",
                    "description": "Optional tag, e.g. 'preference' or 'biography'"
                }
            },
            "required": ["fact"]
        })
    }

    async fn handle(&self, arguments: serde_json::Value) -> Result<ToolResponse, ToolError> {
        let fact = arguments
            .get("fact")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'fact' argument".into()))?;
        let kind = arguments
            .get("kind")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let state = self.state.as_ref().ok_or_else(|| ToolError::ExecutionFailed {
            tool_name: "remember".into(),
            reason: "no thread state bound".into(),
        })?;

        let source_message_ids = self
            .run_context
            .as_ref()
            .map(|ctx| vec![ctx.message_id])
            .unwrap_or_default();

        let memory = self
            .store
            .insert_memory(NewMemory {
                owner: MemoryOwner::User,
                agent_key: state.agent().key.clone(),
                thread_id: state.thread().id.clone(),
                content: fact.to_string(),
                source_message_ids,
                kind,
            })
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "remember".into(),
                reason: e.to_string(),
            })?;

        debug!(memory_id = %memory.id, "Stored memory");
        Ok(ToolResponse::ok("Fact saved.")
            .with_payload(serde_json::json!({ "memory_id": memory.id.0 })))
    }

    fn as_state_aware(&mut self) -> Option<&mut dyn StateAwareTool> {
        Some(self)
    }

    fn as_run_logging(&mut self) -> Option<&mut dyn RunLoggingTool> {
        Some(self)
    }
}
