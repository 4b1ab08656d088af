//! Render-time context — a borrowed view over one turn's ThreadState
//! plus optional caller overrides. Exists only for the duration of one
//! render call.

use threadloom_core::agent::AgentDefinition;
use threadloom_core::auth::AuthenticatedUser;
use threadloom_core::memory::Memory;
use threadloom_core::state::ThreadState;
use threadloom_core::thread::Thread;

/// Everything variable groups may read while resolving.
pub struct PromptVariableContext<'a> {
    state: &'a ThreadState,
    user: Option<&'a AuthenticatedUser>,
    agent_override: Option<&'a AgentDefinition>,
    prompt_override: Option<&'a str>,
    thread_override: Option<&'a Thread>,
}

impl<'a> PromptVariableContext<'a> {
    pub fn new(state: &'a ThreadState) -> Self {
        Self {
            state,
            user: None,
            agent_override: None,
            prompt_override: None,
            thread_override: None,
        }
    }

    pub fn with_user(mut self, user: &'a AuthenticatedUser) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_agent_override(mut self, agent: &'a AgentDefinition) -> Self {
        self.agent_override = Some(agent);
        self
    }

    pub fn with_prompt_override(mut self, template: &'a str) -> Self {
        self.prompt_override = Some(template);
        self
    }

    pub fn with_thread_override(mut self, thread: &'a Thread) -> Self {
        self.thread_override = Some(thread);
        self
    }

    pub fn state(&self) -> &ThreadState {
        self.state
    }

    /// The thread being rendered against (override wins).
    pub fn thread(&self) -> &Thread {
        self.thread_override.unwrap_or_else(|| self.state.thread())
    }

    /// The agent being rendered against (override wins).
    pub fn agent(&self) -> &AgentDefinition {
        self.agent_override.unwrap_or_else(|| self.state.agent())
    }

    /// The template to render (override wins over the state's raw prompt).
    pub fn template(&self) -> &str {
        self.prompt_override.unwrap_or_else(|| self.state.raw_prompt())
    }

    pub fn memories(&self) -> &[Memory] {
        self.state.memories()
    }

    pub fn user(&self) -> Option<&AuthenticatedUser> {
        self.user
    }
}
