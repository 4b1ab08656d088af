//! ThreadStore trait — the persistence collaborator.
//!
//! Implementations live in the store crate. The trait is shaped so the
//! invariants that matter live at this boundary:
//!
//! - `fetch_turn_snapshot` returns every piece of a turn's context from a
//!   single consistent read — no caller may compose it from racing
//!   sub-queries.
//! - `try_acquire_metadata_flag` is an atomic compare-and-set; a plain
//!   read-then-write of the memory-job guard cannot be written against
//!   this trait.
//! - `append_message` assigns ids and per-thread sequence numbers under
//!   the store's write serialization.
//! - `purge_soft_deleted` processes bounded chunks and cascades tool runs
//!   and messages before their owning threads.

use async_trait::async_trait;

use crate::agent::{AgentPrompt, NewAgentPrompt};
use crate::error::StoreError;
use crate::memory::{Memory, MemoryId, NewMemory};
use crate::message::{Message, MessageId, NewMessage, TokenUsage};
use crate::status::ThreadStatus;
use crate::thread::{NewThread, Thread, ThreadId};
use crate::tool_run::{NewToolRun, ToolRun, ToolRunId, ToolRunOutcome};

/// Everything a turn needs from persistence, read at one point in time.
#[derive(Debug, Clone)]
pub struct TurnSnapshot {
    pub thread: Thread,
    /// Message history ordered by sequence ascending
    pub messages: Vec<Message>,
    /// Memories scoped to the thread's agent
    pub memories: Vec<Memory>,
    /// Highest active prompt version for the thread's agent, if any
    pub active_prompt: Option<AgentPrompt>,
}

/// Fields applied when an assistant message completes.
#[derive(Debug, Clone)]
pub struct MessageCompletion {
    pub content: String,
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
    pub provider_response_id: Option<String>,
}

/// Per-entity counts reported by a purge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub tool_runs: u64,
    pub messages: u64,
    pub memories: u64,
    pub threads: u64,
}

/// Default batch size for purge chunking.
pub const DEFAULT_PURGE_CHUNK: usize = 100;

/// The persistence collaborator trait.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    // ── Threads ───────────────────────────────────────────────────────

    /// Create a thread. Fails with [`StoreError::ParentNotFound`] when a
    /// parent link names a thread that does not exist yet.
    async fn create_thread(&self, new: NewThread) -> std::result::Result<Thread, StoreError>;

    async fn get_thread(
        &self,
        id: &ThreadId,
    ) -> std::result::Result<Option<Thread>, StoreError>;

    /// Apply a status transition, rejecting moves the thread state machine
    /// does not allow.
    async fn update_thread_status(
        &self,
        id: &ThreadId,
        status: ThreadStatus,
    ) -> std::result::Result<Thread, StoreError>;

    async fn update_thread_summary(
        &self,
        id: &ThreadId,
        summary: Option<String>,
        long_summary: Option<String>,
        last_summary_message_id: Option<MessageId>,
    ) -> std::result::Result<(), StoreError>;

    /// Bump `last_active_at`.
    async fn touch_thread(&self, id: &ThreadId) -> std::result::Result<(), StoreError>;

    /// Soft-delete a thread and everything under it (messages, tool runs).
    async fn soft_delete_thread(&self, id: &ThreadId) -> std::result::Result<(), StoreError>;

    /// Atomically set a boolean metadata flag if it is currently unset (or
    /// false). Returns `true` when this call acquired the flag. This is
    /// the only way to set an idempotency guard; see
    /// [`crate::thread::MEMORY_JOB_PENDING_KEY`].
    async fn try_acquire_metadata_flag(
        &self,
        id: &ThreadId,
        key: &str,
    ) -> std::result::Result<bool, StoreError>;

    /// Clear a metadata flag previously acquired.
    async fn release_metadata_flag(
        &self,
        id: &ThreadId,
        key: &str,
    ) -> std::result::Result<(), StoreError>;

    // ── Messages ──────────────────────────────────────────────────────

    /// Append a message, assigning its id and the next sequence number in
    /// its thread.
    async fn append_message(
        &self,
        new: NewMessage,
    ) -> std::result::Result<Message, StoreError>;

    async fn get_message(
        &self,
        id: MessageId,
    ) -> std::result::Result<Option<Message>, StoreError>;

    /// Full history of a thread, ordered by sequence ascending.
    async fn list_messages(
        &self,
        thread_id: &ThreadId,
    ) -> std::result::Result<Vec<Message>, StoreError>;

    /// `Processing → Completed`, applying the completion fields. Rejects
    /// terminal messages.
    async fn complete_message(
        &self,
        id: MessageId,
        completion: MessageCompletion,
    ) -> std::result::Result<Message, StoreError>;

    /// `Processing → Failed` with a human-readable reason. Rejects
    /// terminal messages.
    async fn fail_message(
        &self,
        id: MessageId,
        reason: &str,
    ) -> std::result::Result<Message, StoreError>;

    async fn count_completed_messages(
        &self,
        thread_id: &ThreadId,
    ) -> std::result::Result<u64, StoreError>;

    /// Completed messages with `id > after`.
    async fn count_completed_messages_after(
        &self,
        thread_id: &ThreadId,
        after: MessageId,
    ) -> std::result::Result<u64, StoreError>;

    /// Completed messages the memory workflow has not examined yet.
    async fn count_unchecked_completed_messages(
        &self,
        thread_id: &ThreadId,
    ) -> std::result::Result<u64, StoreError>;

    /// Mark completed messages up to and including `up_to` as
    /// memory-checked. Used by the extraction job; returns how many rows
    /// changed.
    async fn mark_messages_memory_checked(
        &self,
        thread_id: &ThreadId,
        up_to: MessageId,
    ) -> std::result::Result<u64, StoreError>;

    // ── Tool runs ─────────────────────────────────────────────────────

    /// Create a tool run in `Queued` state.
    async fn create_tool_run(
        &self,
        new: NewToolRun,
    ) -> std::result::Result<ToolRun, StoreError>;

    /// `Queued → Running`, stamping `started_at`.
    async fn mark_tool_run_running(
        &self,
        id: ToolRunId,
    ) -> std::result::Result<ToolRun, StoreError>;

    /// `Running → Succeeded | Failed`, stamping `finished_at`.
    async fn finish_tool_run(
        &self,
        id: ToolRunId,
        outcome: ToolRunOutcome,
    ) -> std::result::Result<ToolRun, StoreError>;

    async fn list_tool_runs(
        &self,
        thread_id: &ThreadId,
    ) -> std::result::Result<Vec<ToolRun>, StoreError>;

    // ── Memories ──────────────────────────────────────────────────────

    async fn insert_memory(
        &self,
        new: NewMemory,
    ) -> std::result::Result<Memory, StoreError>;

    /// Non-deleted memories for an agent, oldest first.
    async fn list_memories(
        &self,
        agent_key: &str,
    ) -> std::result::Result<Vec<Memory>, StoreError>;

    async fn soft_delete_memory(
        &self,
        id: MemoryId,
    ) -> std::result::Result<(), StoreError>;

    // ── Prompts ───────────────────────────────────────────────────────

    async fn insert_prompt(
        &self,
        new: NewAgentPrompt,
    ) -> std::result::Result<AgentPrompt, StoreError>;

    /// Highest `version` with `is_active = true` for an agent.
    async fn active_prompt(
        &self,
        agent_key: &str,
    ) -> std::result::Result<Option<AgentPrompt>, StoreError>;

    // ── Aggregate reads ───────────────────────────────────────────────

    /// Load everything a turn needs in one consistent read. `None` when
    /// the thread does not exist or is soft-deleted.
    async fn fetch_turn_snapshot(
        &self,
        thread_id: &ThreadId,
    ) -> std::result::Result<Option<TurnSnapshot>, StoreError>;

    // ── Purge ─────────────────────────────────────────────────────────

    /// Hard-delete soft-deleted rows in bounded chunks, tool runs and
    /// messages before their owning threads, reporting per-entity counts.
    async fn purge_soft_deleted(
        &self,
        chunk_size: usize,
    ) -> std::result::Result<PurgeReport, StoreError>;
}
