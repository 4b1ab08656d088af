//! # threadloom-core
//!
//! Domain types, traits, and error definitions for the threadloom
//! conversation orchestrator. This crate has **zero framework
//! dependencies** — it defines the domain model that all other crates
//! implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (persistence, LLM provider, job queue,
//! auth) is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)
//!
//! The one piece of logic that lives here is thread-state aggregation
//! ([`state::StateAggregator`]): module privacy is what guarantees that
//! nothing else can construct a [`state::ThreadState`].

pub mod agent;
pub mod auth;
pub mod error;
pub mod memory;
pub mod message;
pub mod provider;
pub mod queue;
pub mod state;
pub mod status;
pub mod store;
pub mod thread;
pub mod tool;
pub mod tool_run;
pub mod transcript;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentDefinition, AgentPrompt, AgentSource, ModelParams, NewAgentPrompt, ToolBinding};
pub use auth::{AuthResolver, AuthenticatedUser, NoAuth};
pub use error::{
    AuthError, ConfigError, Error, HookError, ProviderError, QueueError, Result, StoreError,
    ToolError,
};
pub use memory::{Memory, MemoryId, MemoryOwner, NewMemory};
pub use message::{Message, MessageId, NewMessage, TokenUsage};
pub use provider::{
    ChatProvider, ChatRequest, ChatResponse, ExchangeMessage, ExchangeRole, RateLimitInfo,
    StreamEvent, ToolCallRequest,
};
pub use queue::{JobKind, JobQueue};
pub use state::{StateAggregator, ThreadState};
pub use status::{
    ContentType, MessageRole, MessageStatus, ThreadKind, ThreadStatus, ToolRunStatus,
};
pub use store::{
    MessageCompletion, PurgeReport, ThreadStore, TurnSnapshot, DEFAULT_PURGE_CHUNK,
};
pub use thread::{NewThread, Thread, ThreadId, MEMORY_JOB_PENDING_KEY};
pub use tool::{
    ConfigurableTool, RunLogContext, RunLoggingTool, StateAwareTool, Tool, ToolDefinition,
    ToolResponse, ToolRunLogger,
};
pub use tool_run::{NewToolRun, ToolRun, ToolRunId, ToolRunOutcome};
pub use transcript::{ChatMessage, ChatThreadLog, ToolInvocation};
