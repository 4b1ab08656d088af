//! Post-turn hook system for threadloom.
//!
//! After a successful assistant message, the [`HookRunner`] executes
//! every registered [`ThreadHook`] in order. Each hook re-fetches the
//! thread, evaluates its own threshold, and dispatches at most one
//! background job per pending condition. A hook's failure is logged and
//! never prevents subsequent hooks from running; hooks never retry on
//! their own — retry belongs to the dispatched job.

mod memory;
mod summary;

#[cfg(test)]
pub(crate) mod testutil;

pub use memory::{MemoryExtractionHook, MEMORY_HOOK_KEY};
pub use summary::{SummaryHook, SUMMARY_HOOK_KEY};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use threadloom_config::HooksConfig;
use threadloom_core::error::{ConfigError, HookError};
use threadloom_core::queue::{JobKind, JobQueue};
use threadloom_core::store::ThreadStore;
use threadloom_core::thread::ThreadId;

/// What a hook decided for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// Threshold not met, guard held elsewhere, or the thread is a
    /// workflow's own worker — nothing dispatched.
    Skipped(&'static str),
    /// Exactly one job was dispatched.
    Dispatched(JobKind),
}

/// Post-turn logic evaluated after a successful assistant message.
#[async_trait]
pub trait ThreadHook: Send + Sync {
    fn name(&self) -> &str;

    /// Evaluate thresholds against the refreshed thread and dispatch at
    /// most one job. Never acts on a stale in-memory thread copy.
    async fn on_turn_committed(
        &self,
        thread_id: &ThreadId,
    ) -> Result<HookOutcome, HookError>;
}

impl std::fmt::Debug for dyn ThreadHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadHook")
            .field("name", &self.name())
            .finish()
    }
}

type HookFactory = Box<dyn Fn() -> Arc<dyn ThreadHook> + Send + Sync>;

/// Maps string keys to hook factories. Keys named in configuration that
/// were never registered fail at build time, not at dispatch time.
pub struct HookRegistry {
    factories: HashMap<String, HookFactory>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// The built-in hook set wired over the given collaborators.
    pub fn with_builtin_hooks(
        store: Arc<dyn ThreadStore>,
        queue: Arc<dyn JobQueue>,
        config: &HooksConfig,
    ) -> Self {
        let mut registry = Self::new();

        let summary_config = config.summary.clone();
        let summary_store = store.clone();
        let summary_queue = queue.clone();
        registry.register(SUMMARY_HOOK_KEY, move || {
            Arc::new(SummaryHook::new(
                summary_store.clone(),
                summary_queue.clone(),
                summary_config.clone(),
            ))
        });

        let memory_config = config.memory.clone();
        let summary_worker = config.summary.worker_agent_key.clone();
        registry.register(MEMORY_HOOK_KEY, move || {
            Arc::new(MemoryExtractionHook::new(
                store.clone(),
                queue.clone(),
                memory_config.clone(),
                summary_worker.clone(),
            ))
        });

        registry
    }

    pub fn register<F>(&mut self, key: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn ThreadHook> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Box::new(factory));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Build one hook; an unknown key is a configuration error.
    pub fn build(&self, key: &str) -> Result<Arc<dyn ThreadHook>, ConfigError> {
        self.factories
            .get(key)
            .map(|factory| factory())
            .ok_or_else(|| ConfigError::HookNotRegistered(key.to_string()))
    }

    /// Build all enabled hooks in the configured order, failing fast on
    /// the first unknown key.
    pub fn build_enabled(
        &self,
        enabled: &[String],
    ) -> Result<Vec<Arc<dyn ThreadHook>>, ConfigError> {
        enabled.iter().map(|key| self.build(key)).collect()
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Executes hooks in registration order, isolating failures.
#[derive(Debug)]
pub struct HookRunner {
    hooks: Vec<Arc<dyn ThreadHook>>,
}

impl HookRunner {
    pub fn new(hooks: Vec<Arc<dyn ThreadHook>>) -> Self {
        Self { hooks }
    }

    /// Build from a registry and the configured enabled list.
    pub fn from_registry(
        registry: &HookRegistry,
        enabled: &[String],
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(registry.build_enabled(enabled)?))
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook against the finished turn. One hook's error never
    /// stops the next hook.
    pub async fn run_all(
        &self,
        thread_id: &ThreadId,
    ) -> Vec<(String, Result<HookOutcome, HookError>)> {
        let mut results = Vec::with_capacity(self.hooks.len());
        for hook in &self.hooks {
            let outcome = hook.on_turn_committed(thread_id).await;
            match &outcome {
                Ok(HookOutcome::Dispatched(job)) => {
                    debug!(hook = hook.name(), job = %job, thread_id = %thread_id, "Hook dispatched job");
                }
                Ok(HookOutcome::Skipped(reason)) => {
                    debug!(hook = hook.name(), reason, thread_id = %thread_id, "Hook skipped");
                }
                Err(e) => {
                    warn!(hook = hook.name(), error = %e, thread_id = %thread_id, "Hook failed; continuing");
                }
            }
            results.push((hook.name().to_string(), outcome));
        }
        results
    }
}
