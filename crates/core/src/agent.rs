//! Agent definition — the configured persona+model+tool policy applied to
//! a thread.
//!
//! One entity covers what other systems sometimes split into "assistant"
//! and "agent"; there is exactly one hierarchy here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A tool (or provider-native tool) attached to an agent, with its
/// per-agent configuration map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolBinding {
    /// Registry key of the tool
    pub key: String,

    /// Per-tool options injected before first use
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl ToolBinding {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            options: serde_json::Map::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}

/// Model parameters for an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    /// Model name (e.g., "claude-sonnet-4", "gpt-4o")
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Nucleus sampling cutoff
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Maximum output tokens per response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// Maximum model/tool round-trips per turn (safety limit)
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_steps() -> u32 {
    8
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: default_temperature(),
            top_p: None,
            max_output_tokens: None,
            max_steps: default_max_steps(),
        }
    }
}

/// A resolved agent definition, cached process-wide by the agent registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Stable lookup key
    pub key: String,

    /// Display name
    pub name: String,

    /// Model parameters
    pub params: ModelParams,

    /// Ordered tool bindings
    #[serde(default)]
    pub tools: Vec<ToolBinding>,

    /// Ordered provider-native tool bindings (passed through to the
    /// provider request untouched)
    #[serde(default)]
    pub provider_tools: Vec<ToolBinding>,

    /// Free-form metadata
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Hidden from listings
    #[serde(default)]
    pub hidden: bool,

    /// Whether the agent accepts new turns
    #[serde(default = "default_active")]
    pub active: bool,

    /// Inline system-prompt template, the raw fallback when no persisted
    /// prompt version is active
    pub prompt_template: String,
}

fn default_active() -> bool {
    true
}

/// A persisted, versioned system-prompt for an agent. The aggregator
/// selects the highest `version` with `is_active = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPrompt {
    pub id: i64,
    pub agent_key: String,
    pub version: i64,
    pub body: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for persisting a prompt version.
#[derive(Debug, Clone)]
pub struct NewAgentPrompt {
    pub agent_key: String,
    pub version: i64,
    pub body: String,
    pub is_active: bool,
}

/// Resolves agent definitions by key.
///
/// Implemented by the runtime's agent registry; the aggregator depends on
/// this trait so it stays free of registry internals.
pub trait AgentSource: Send + Sync {
    fn resolve(&self, key: &str) -> Option<Arc<AgentDefinition>>;
}
