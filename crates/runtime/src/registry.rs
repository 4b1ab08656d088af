//! Agent and tool registries.
//!
//! Both map string keys from configuration to constructed objects and
//! fail fast on anything unregistered. The agent registry caches resolved
//! definitions process-wide; `refresh` builds a complete replacement map
//! before swapping it in, so concurrent readers see either the old or the
//! new set, never a partially-rebuilt one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

use threadloom_config::AppConfig;
use threadloom_core::agent::{AgentDefinition, AgentSource};
use threadloom_core::error::ConfigError;
use threadloom_core::tool::Tool;

type ToolFactory = Box<dyn Fn() -> Box<dyn Tool> + Send + Sync>;

/// Maps tool keys to factories producing fresh instances per turn.
///
/// Tools carry per-turn wiring (configuration, thread state, run
/// logging), so the registry hands out new instances rather than shared
/// ones.
pub struct ToolRegistry {
    factories: HashMap<String, ToolFactory>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, key: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Tool> + Send + Sync + 'static,
    {
        let key = key.into();
        info!(tool = %key, "Registered tool");
        self.factories.insert(key, Box::new(factory));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    /// Construct a fresh tool instance; unknown keys are configuration
    /// errors.
    pub fn build(&self, key: &str) -> Result<Box<dyn Tool>, ConfigError> {
        self.factories
            .get(key)
            .map(|factory| factory())
            .ok_or_else(|| ConfigError::ToolNotRegistered(key.to_string()))
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide cache of resolved agent definitions.
#[derive(Debug)]
pub struct AgentRegistry {
    agents: RwLock<Arc<HashMap<String, Arc<AgentDefinition>>>>,
}

impl AgentRegistry {
    /// Resolve every configured agent, validating each runtime tool key
    /// against the tool registry. Unknown keys fail here — at resolution
    /// time, not at call time.
    pub fn from_config(config: &AppConfig, tools: &ToolRegistry) -> Result<Self, ConfigError> {
        let agents = Self::build_map(config, tools)?;
        Ok(Self {
            agents: RwLock::new(Arc::new(agents)),
        })
    }

    fn build_map(
        config: &AppConfig,
        tools: &ToolRegistry,
    ) -> Result<HashMap<String, Arc<AgentDefinition>>, ConfigError> {
        let mut agents = HashMap::with_capacity(config.agents.len());
        for agent_config in &config.agents {
            for binding in &agent_config.tools {
                if !tools.contains(&binding.key) {
                    return Err(ConfigError::ToolNotRegistered(format!(
                        "{} (agent '{}')",
                        binding.key, agent_config.key
                    )));
                }
            }
            let definition = Arc::new(agent_config.clone().into_definition());
            agents.insert(definition.key.clone(), definition);
        }
        Ok(agents)
    }

    /// Rebuild the cache from configuration. The replacement map is fully
    /// resolved before the swap; a validation failure leaves the current
    /// cache untouched.
    pub fn refresh(&self, config: &AppConfig, tools: &ToolRegistry) -> Result<(), ConfigError> {
        let replacement = Arc::new(Self::build_map(config, tools)?);
        let mut guard = self.agents.write().unwrap_or_else(|e| e.into_inner());
        *guard = replacement;
        info!(agents = guard.len(), "Agent registry refreshed");
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Arc<AgentDefinition>> {
        let guard = self.agents.read().unwrap_or_else(|e| e.into_inner());
        guard.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let guard = self.agents.read().unwrap_or_else(|e| e.into_inner());
        guard.keys().cloned().collect()
    }
}

impl AgentSource for AgentRegistry {
    fn resolve(&self, key: &str) -> Option<Arc<AgentDefinition>> {
        self.get(key)
    }
}
