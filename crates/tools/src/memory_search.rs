//! Memory search tool — keyword search over the turn's memory set.
//!
//! Configurable (result limit from the agent's per-tool options) and
//! thread-state aware: it reads the memories already loaded into the
//! turn snapshot rather than querying storage again.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use threadloom_core::error::ToolError;
use threadloom_core::state::ThreadState;
use threadloom_core::tool::{ConfigurableTool, StateAwareTool, Tool, ToolResponse};

const DEFAULT_LIMIT: usize = 5;

pub struct MemorySearchTool {
    limit: usize,
    state: Option<Arc<ThreadState>>,
}

impl MemorySearchTool {
    pub fn new() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            state: None,
        }
    }
}

impl Default for MemorySearchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurableTool for MemorySearchTool {
    fn apply_config(&mut self, options: &serde_json::Map<String, serde_json::Value>) {
        if let Some(limit) = options.get("limit").and_then(|v| v.as_u64()) {
            self.limit = limit as usize;
        }
    }
}

impl StateAwareTool for MemorySearchTool {
    fn bind_state(&mut self, state: Arc<ThreadState>) {
        self.state = Some(state);
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search the stored facts about this user and agent by keyword."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Keywords to match against stored facts"
                }
            },
            "required": ["query"]
        })
    }

    async fn handle(&self, arguments: serde_json::Value) -> Result<ToolResponse, ToolError> {
        let query = arguments
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let state = self.state.as_ref().ok_or_else(|| ToolError::ExecutionFailed {
            tool_name: "memory_search".into(),
            reason: "no thread state bound".into(),
        })?;

        let needle = query.to_lowercase();
        let matches: Vec<&str> = state
            .memories()
            .iter()
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .take(self.limit)
            .map(|m| m.content.as_str())
            .collect();
        debug!(query, hits = matches.len(), "Memory search");

        if matches.is_empty() {
            return Ok(ToolResponse::ok("No stored facts matched."));
        }

        let mut listing = String::new();
        for content in &matches {
            listing.push_str("- ");
            listing.push_str(content);
            listing.push('\n');
        }
        Ok(ToolResponse::ok(listing.trim_end())
            .with_payload(serde_json::json!({ "matches": matches })))
    }

    fn as_configurable(&mut self) -> Option<&mut dyn ConfigurableTool> {
        Some(self)
    }

    fn as_state_aware(&mut self) -> Option<&mut dyn StateAwareTool> {
        Some(self)
    }
}
