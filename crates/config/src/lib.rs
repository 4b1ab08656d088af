//! Configuration loading, validation, and management for threadloom.
//!
//! Loads configuration from a TOML file. Everything named here is
//! resolved against the registries at startup; unknown keys are fatal at
//! resolution time, never silently defaulted.

use serde::{Deserialize, Serialize};
use std::path::Path;
use threadloom_core::agent::{AgentDefinition, ModelParams, ToolBinding};
use threadloom_core::error::ConfigError;
use threadloom_core::store::DEFAULT_PURGE_CHUNK;
use tracing::debug;

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Agent definitions, keyed by their `key` field
    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    /// Hook configuration
    #[serde(default)]
    pub hooks: HooksConfig,

    /// Purge configuration
    #[serde(default)]
    pub purge: PurgeConfig,
}

/// One configured agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Stable lookup key
    pub key: String,

    /// Display name
    pub name: String,

    /// Model name
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Ordered tool bindings with per-tool option maps
    #[serde(default)]
    pub tools: Vec<ToolBindingConfig>,

    /// Ordered provider-native tool bindings
    #[serde(default)]
    pub provider_tools: Vec<ToolBindingConfig>,

    #[serde(default)]
    pub hidden: bool,

    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Inline system-prompt template
    pub prompt_template: String,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_steps() -> u32 {
    8
}
fn default_true() -> bool {
    true
}

/// A tool attached to an agent in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolBindingConfig {
    pub key: String,

    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl AgentConfig {
    /// Convert into the resolved domain definition.
    pub fn into_definition(self) -> AgentDefinition {
        AgentDefinition {
            key: self.key,
            name: self.name,
            params: ModelParams {
                model: self.model,
                temperature: self.temperature,
                top_p: self.top_p,
                max_output_tokens: self.max_output_tokens,
                max_steps: self.max_steps,
            },
            tools: self.tools.into_iter().map(ToolBindingConfig::into_binding).collect(),
            provider_tools: self
                .provider_tools
                .into_iter()
                .map(ToolBindingConfig::into_binding)
                .collect(),
            metadata: self.metadata,
            hidden: self.hidden,
            active: self.active,
            prompt_template: self.prompt_template,
        }
    }
}

impl ToolBindingConfig {
    fn into_binding(self) -> ToolBinding {
        ToolBinding {
            key: self.key,
            options: self.options,
        }
    }
}

/// Hook enablement and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HooksConfig {
    /// Hook keys to build from the hook registry, in execution order
    #[serde(default = "default_enabled_hooks")]
    pub enabled: Vec<String>,

    #[serde(default)]
    pub summary: SummaryHookConfig,

    #[serde(default)]
    pub memory: MemoryHookConfig,
}

fn default_enabled_hooks() -> Vec<String> {
    vec!["thread_summary".into(), "memory_extraction".into()]
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_hooks(),
            summary: SummaryHookConfig::default(),
            memory: MemoryHookConfig::default(),
        }
    }
}

/// Thresholds for the summary hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryHookConfig {
    /// Completed messages required before the first summary
    #[serde(default = "default_summary_min")]
    pub min_messages: u64,

    /// Completed messages past the last summarized id before the next one
    #[serde(default = "default_summary_interval")]
    pub interval: u64,

    /// Agent key of the summary worker; threads running under it are the
    /// background-processing threads for this workflow
    #[serde(default = "default_summary_worker")]
    pub worker_agent_key: String,
}

fn default_summary_min() -> u64 {
    2
}
fn default_summary_interval() -> u64 {
    10
}
fn default_summary_worker() -> String {
    "summary_worker".into()
}

impl Default for SummaryHookConfig {
    fn default() -> Self {
        Self {
            min_messages: default_summary_min(),
            interval: default_summary_interval(),
            worker_agent_key: default_summary_worker(),
        }
    }
}

/// Thresholds for the memory-extraction hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHookConfig {
    /// Completed, not-yet-checked messages required before dispatch
    #[serde(default = "default_memory_threshold")]
    pub threshold: u64,

    /// Agent key of the memory worker
    #[serde(default = "default_memory_worker")]
    pub worker_agent_key: String,
}

fn default_memory_threshold() -> u64 {
    4
}
fn default_memory_worker() -> String {
    "memory_worker".into()
}

impl Default for MemoryHookConfig {
    fn default() -> Self {
        Self {
            threshold: default_memory_threshold(),
            worker_agent_key: default_memory_worker(),
        }
    }
}

/// Purge batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeConfig {
    #[serde(default = "default_purge_chunk")]
    pub chunk_size: usize,
}

fn default_purge_chunk() -> usize {
    DEFAULT_PURGE_CHUNK
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_purge_chunk(),
        }
    }
}

impl AppConfig {
    /// Parse from a TOML string and validate.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "Loading configuration");
        Self::from_toml_str(&raw)
    }

    /// Validate the configuration, failing fast on anything malformed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if agent.key.trim().is_empty() {
                return Err(ConfigError::Invalid("agent key must not be empty".into()));
            }
            if !seen.insert(agent.key.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate agent key: {}",
                    agent.key
                )));
            }
            if agent.model.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "agent '{}' has no model",
                    agent.key
                )));
            }
            if !(0.0..=2.0).contains(&agent.temperature) {
                return Err(ConfigError::Invalid(format!(
                    "agent '{}' temperature {} out of range 0.0-2.0",
                    agent.key, agent.temperature
                )));
            }
            if agent.max_steps == 0 {
                return Err(ConfigError::Invalid(format!(
                    "agent '{}' max_steps must be at least 1",
                    agent.key
                )));
            }
            for tool in agent.tools.iter().chain(agent.provider_tools.iter()) {
                if tool.key.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "agent '{}' has a tool binding with an empty key",
                        agent.key
                    )));
                }
            }
        }

        if self.hooks.summary.min_messages == 0 {
            return Err(ConfigError::Invalid(
                "hooks.summary.min_messages must be at least 1".into(),
            ));
        }
        if self.hooks.summary.interval == 0 {
            return Err(ConfigError::Invalid(
                "hooks.summary.interval must be at least 1".into(),
            ));
        }
        if self.hooks.memory.threshold == 0 {
            return Err(ConfigError::Invalid(
                "hooks.memory.threshold must be at least 1".into(),
            ));
        }
        if self.purge.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "purge.chunk_size must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Look up an agent config by key.
    pub fn agent(&self, key: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.key == key)
    }
}
