//! Thread-state aggregation — the immutable per-turn snapshot.
//!
//! [`ThreadState`] owns everything one model call needs: the thread
//! record, the resolved agent, the active prompt, the ordered history,
//! the memory set, and the tool bindings. It is built fresh every turn
//! and discarded afterwards.
//!
//! Construction is deliberately restricted to [`StateAggregator`] in this
//! module: fields are private and the constructor is module-private, so
//! no other component can assemble a snapshot from ad-hoc reads.

use std::sync::Arc;
use tracing::debug;

use crate::agent::{AgentDefinition, AgentPrompt, AgentSource, ToolBinding};
use crate::error::{ConfigError, Error, Result, StoreError};
use crate::memory::Memory;
use crate::message::Message;
use crate::store::ThreadStore;
use crate::thread::{Thread, ThreadId};

/// The immutable per-turn aggregate.
#[derive(Debug)]
pub struct ThreadState {
    thread: Thread,
    agent: Arc<AgentDefinition>,
    active_prompt: Option<AgentPrompt>,
    history: Vec<Message>,
    memories: Vec<Memory>,
}

impl ThreadState {
    fn assemble(
        thread: Thread,
        agent: Arc<AgentDefinition>,
        active_prompt: Option<AgentPrompt>,
        history: Vec<Message>,
        memories: Vec<Memory>,
    ) -> Self {
        Self {
            thread,
            agent,
            active_prompt,
            history,
            memories,
        }
    }

    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    pub fn agent(&self) -> &AgentDefinition {
        &self.agent
    }

    /// The persisted active prompt version, when one exists.
    pub fn active_prompt(&self) -> Option<&AgentPrompt> {
        self.active_prompt.as_ref()
    }

    /// The raw template to render: the active prompt's body, falling back
    /// to the agent's inline template.
    pub fn raw_prompt(&self) -> &str {
        self.active_prompt
            .as_ref()
            .map(|p| p.body.as_str())
            .unwrap_or(&self.agent.prompt_template)
    }

    /// Message history ordered by sequence ascending.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Memories scoped to the thread's agent.
    pub fn memories(&self) -> &[Memory] {
        &self.memories
    }

    /// The agent's ordered tool bindings for this turn.
    pub fn tool_bindings(&self) -> &[ToolBinding] {
        &self.agent.tools
    }

    /// The agent's ordered provider-native tool bindings.
    pub fn provider_tool_bindings(&self) -> &[ToolBinding] {
        &self.agent.provider_tools
    }
}

/// Builds [`ThreadState`] snapshots. Purely a read/compose operation; no
/// side effects.
pub struct StateAggregator {
    store: Arc<dyn ThreadStore>,
    agents: Arc<dyn AgentSource>,
}

impl StateAggregator {
    pub fn new(store: Arc<dyn ThreadStore>, agents: Arc<dyn AgentSource>) -> Self {
        Self { store, agents }
    }

    /// Load the per-turn snapshot for a thread.
    ///
    /// All persisted pieces come from a single consistent store read;
    /// agent resolution goes through the process-wide registry cache. A
    /// thread whose `agent_key` is not registered is a configuration
    /// error, surfaced immediately.
    pub async fn load(&self, thread_id: &ThreadId) -> Result<ThreadState> {
        let snapshot = self
            .store
            .fetch_turn_snapshot(thread_id)
            .await?
            .ok_or_else(|| Error::Store(StoreError::not_found("thread", thread_id)))?;

        let agent = self
            .agents
            .resolve(&snapshot.thread.agent_key)
            .ok_or_else(|| {
                Error::Config(ConfigError::AgentNotRegistered(
                    snapshot.thread.agent_key.clone(),
                ))
            })?;

        debug!(
            thread_id = %thread_id,
            agent = %agent.key,
            messages = snapshot.messages.len(),
            memories = snapshot.memories.len(),
            prompt_version = snapshot.active_prompt.as_ref().map(|p| p.version),
            "Thread state assembled"
        );

        Ok(ThreadState::assemble(
            snapshot.thread,
            agent,
            snapshot.active_prompt,
            snapshot.messages,
            snapshot.memories,
        ))
    }
}
