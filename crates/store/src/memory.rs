//! In-memory store — useful for testing and ephemeral sessions.
//!
//! A single async mutex guards all tables, which makes the consistency
//! guarantees trivial: `fetch_turn_snapshot` composes every piece under
//! one lock acquisition, and the metadata-flag compare-and-set is a
//! check-and-write with the lock held.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use threadloom_core::agent::{AgentPrompt, NewAgentPrompt};
use threadloom_core::error::StoreError;
use threadloom_core::memory::{Memory, MemoryId, NewMemory};
use threadloom_core::message::{Message, MessageId, NewMessage};
use threadloom_core::status::{MessageStatus, ThreadStatus, ToolRunStatus};
use threadloom_core::store::{MessageCompletion, PurgeReport, ThreadStore, TurnSnapshot};
use threadloom_core::thread::{NewThread, Thread, ThreadId};
use threadloom_core::tool_run::{NewToolRun, ToolRun, ToolRunId, ToolRunOutcome};

#[derive(Default)]
struct Inner {
    threads: HashMap<ThreadId, Thread>,
    messages: BTreeMap<i64, Message>,
    tool_runs: BTreeMap<i64, ToolRun>,
    memories: BTreeMap<i64, Memory>,
    prompts: Vec<AgentPrompt>,
    next_message_id: i64,
    next_tool_run_id: i64,
    next_memory_id: i64,
    next_prompt_id: i64,
}

/// An in-memory `ThreadStore`.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn live_thread(&self, id: &ThreadId) -> Result<&Thread, StoreError> {
        self.threads
            .get(id)
            .filter(|t| !t.is_deleted())
            .ok_or_else(|| StoreError::not_found("thread", id))
    }
}

#[async_trait]
impl ThreadStore for MemoryStore {
    async fn create_thread(&self, new: NewThread) -> Result<Thread, StoreError> {
        let mut inner = self.inner.lock().await;

        if let Some(parent) = &new.parent_thread_id {
            if !inner.threads.contains_key(parent) {
                return Err(StoreError::ParentNotFound(parent.to_string()));
            }
        }

        let now = Utc::now();
        let thread = Thread {
            id: ThreadId::new(),
            agent_key: new.agent_key,
            status: ThreadStatus::Open,
            kind: new.kind,
            parent_thread_id: new.parent_thread_id,
            parent_tool_run_id: new.parent_tool_run_id,
            title: new.title,
            summary: None,
            long_summary: None,
            last_summary_message_id: None,
            metadata: new.metadata,
            last_active_at: now,
            created_at: now,
            deleted_at: None,
        };
        inner.threads.insert(thread.id.clone(), thread.clone());
        Ok(thread)
    }

    async fn get_thread(&self, id: &ThreadId) -> Result<Option<Thread>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.threads.get(id).filter(|t| !t.is_deleted()).cloned())
    }

    async fn update_thread_status(
        &self,
        id: &ThreadId,
        status: ThreadStatus,
    ) -> Result<Thread, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.live_thread(id)?;
        let thread = inner
            .threads
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("thread", id))?;
        if !thread.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                entity: "thread",
                from: thread.status.as_str().into(),
                to: status.as_str().into(),
            });
        }
        thread.status = status;
        Ok(thread.clone())
    }

    async fn update_thread_summary(
        &self,
        id: &ThreadId,
        summary: Option<String>,
        long_summary: Option<String>,
        last_summary_message_id: Option<MessageId>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.live_thread(id)?;
        let thread = inner
            .threads
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("thread", id))?;
        if summary.is_some() {
            thread.summary = summary;
        }
        if long_summary.is_some() {
            thread.long_summary = long_summary;
        }
        if last_summary_message_id.is_some() {
            thread.last_summary_message_id = last_summary_message_id;
        }
        Ok(())
    }

    async fn touch_thread(&self, id: &ThreadId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.live_thread(id)?;
        if let Some(thread) = inner.threads.get_mut(id) {
            thread.last_active_at = Utc::now();
        }
        Ok(())
    }

    async fn soft_delete_thread(&self, id: &ThreadId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.live_thread(id)?;
        let now = Utc::now();
        if let Some(thread) = inner.threads.get_mut(id) {
            thread.deleted_at = Some(now);
        }
        for message in inner.messages.values_mut() {
            if &message.thread_id == id && message.deleted_at.is_none() {
                message.deleted_at = Some(now);
            }
        }
        for run in inner.tool_runs.values_mut() {
            if &run.thread_id == id && run.deleted_at.is_none() {
                run.deleted_at = Some(now);
            }
        }
        Ok(())
    }

    async fn try_acquire_metadata_flag(
        &self,
        id: &ThreadId,
        key: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.live_thread(id)?;
        let thread = inner
            .threads
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("thread", id))?;
        if thread.metadata_flag(key) {
            return Ok(false);
        }
        thread
            .metadata
            .insert(key.to_string(), serde_json::Value::Bool(true));
        Ok(true)
    }

    async fn release_metadata_flag(&self, id: &ThreadId, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.live_thread(id)?;
        if let Some(thread) = inner.threads.get_mut(id) {
            thread.metadata.remove(key);
        }
        Ok(())
    }

    async fn append_message(&self, new: NewMessage) -> Result<Message, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.live_thread(&new.thread_id)?;

        let sequence = inner
            .messages
            .values()
            .filter(|m| m.thread_id == new.thread_id)
            .map(|m| m.sequence)
            .max()
            .unwrap_or(0)
            + 1;

        inner.next_message_id += 1;
        let message = Message {
            id: MessageId(inner.next_message_id),
            thread_id: new.thread_id,
            role: new.role,
            content: new.content,
            content_type: new.content_type,
            sequence,
            status: new.status,
            failed_reason: None,
            model: None,
            usage: None,
            provider_response_id: None,
            memory_checked: false,
            metadata: new.metadata,
            created_at: Utc::now(),
            deleted_at: None,
        };
        inner.messages.insert(message.id.0, message.clone());
        Ok(message)
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .messages
            .get(&id.0)
            .filter(|m| m.deleted_at.is_none())
            .cloned())
    }

    async fn list_messages(&self, thread_id: &ThreadId) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.lock().await;
        let mut messages: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| &m.thread_id == thread_id && m.deleted_at.is_none())
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.sequence);
        Ok(messages)
    }

    async fn complete_message(
        &self,
        id: MessageId,
        completion: MessageCompletion,
    ) -> Result<Message, StoreError> {
        let mut inner = self.inner.lock().await;
        let message = inner
            .messages
            .get_mut(&id.0)
            .filter(|m| m.deleted_at.is_none())
            .ok_or_else(|| StoreError::not_found("message", id))?;
        if !message.status.can_transition_to(MessageStatus::Completed) {
            return Err(StoreError::InvalidTransition {
                entity: "message",
                from: message.status.as_str().into(),
                to: MessageStatus::Completed.as_str().into(),
            });
        }
        message.status = MessageStatus::Completed;
        message.content = completion.content;
        message.model = completion.model;
        message.usage = completion.usage;
        message.provider_response_id = completion.provider_response_id;
        Ok(message.clone())
    }

    async fn fail_message(&self, id: MessageId, reason: &str) -> Result<Message, StoreError> {
        let mut inner = self.inner.lock().await;
        let message = inner
            .messages
            .get_mut(&id.0)
            .filter(|m| m.deleted_at.is_none())
            .ok_or_else(|| StoreError::not_found("message", id))?;
        if !message.status.can_transition_to(MessageStatus::Failed) {
            return Err(StoreError::InvalidTransition {
                entity: "message",
                from: message.status.as_str().into(),
                to: MessageStatus::Failed.as_str().into(),
            });
        }
        message.status = MessageStatus::Failed;
        message.failed_reason = Some(reason.to_string());
        Ok(message.clone())
    }

    async fn count_completed_messages(&self, thread_id: &ThreadId) -> Result<u64, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .messages
            .values()
            .filter(|m| {
                &m.thread_id == thread_id
                    && m.deleted_at.is_none()
                    && m.status == MessageStatus::Completed
            })
            .count() as u64)
    }

    async fn count_completed_messages_after(
        &self,
        thread_id: &ThreadId,
        after: MessageId,
    ) -> Result<u64, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .messages
            .values()
            .filter(|m| {
                &m.thread_id == thread_id
                    && m.deleted_at.is_none()
                    && m.status == MessageStatus::Completed
                    && m.id > after
            })
            .count() as u64)
    }

    async fn count_unchecked_completed_messages(
        &self,
        thread_id: &ThreadId,
    ) -> Result<u64, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .messages
            .values()
            .filter(|m| {
                &m.thread_id == thread_id
                    && m.deleted_at.is_none()
                    && m.status == MessageStatus::Completed
                    && !m.memory_checked
            })
            .count() as u64)
    }

    async fn mark_messages_memory_checked(
        &self,
        thread_id: &ThreadId,
        up_to: MessageId,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let mut changed = 0;
        for message in inner.messages.values_mut() {
            if &message.thread_id == thread_id
                && message.deleted_at.is_none()
                && message.status == MessageStatus::Completed
                && message.id <= up_to
                && !message.memory_checked
            {
                message.memory_checked = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn create_tool_run(&self, new: NewToolRun) -> Result<ToolRun, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.live_thread(&new.thread_id)?;

        inner.next_tool_run_id += 1;
        let run = ToolRun {
            id: ToolRunId(inner.next_tool_run_id),
            tool_key: new.tool_key,
            agent_key: new.agent_key,
            thread_id: new.thread_id,
            message_id: new.message_id,
            call_index: new.call_index,
            status: ToolRunStatus::Queued,
            started_at: None,
            finished_at: None,
            input: new.input,
            output: None,
            error: None,
            created_at: Utc::now(),
            deleted_at: None,
        };
        inner.tool_runs.insert(run.id.0, run.clone());
        Ok(run)
    }

    async fn mark_tool_run_running(&self, id: ToolRunId) -> Result<ToolRun, StoreError> {
        let mut inner = self.inner.lock().await;
        let run = inner
            .tool_runs
            .get_mut(&id.0)
            .filter(|r| r.deleted_at.is_none())
            .ok_or_else(|| StoreError::not_found("tool_run", id))?;
        if !run.status.can_transition_to(ToolRunStatus::Running) {
            return Err(StoreError::InvalidTransition {
                entity: "tool_run",
                from: run.status.as_str().into(),
                to: ToolRunStatus::Running.as_str().into(),
            });
        }
        run.status = ToolRunStatus::Running;
        run.started_at = Some(Utc::now());
        Ok(run.clone())
    }

    async fn finish_tool_run(
        &self,
        id: ToolRunId,
        outcome: ToolRunOutcome,
    ) -> Result<ToolRun, StoreError> {
        let mut inner = self.inner.lock().await;
        let run = inner
            .tool_runs
            .get_mut(&id.0)
            .filter(|r| r.deleted_at.is_none())
            .ok_or_else(|| StoreError::not_found("tool_run", id))?;
        let next = match &outcome {
            ToolRunOutcome::Succeeded(_) => ToolRunStatus::Succeeded,
            ToolRunOutcome::Failed(_) => ToolRunStatus::Failed,
        };
        if !run.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                entity: "tool_run",
                from: run.status.as_str().into(),
                to: next.as_str().into(),
            });
        }
        run.status = next;
        run.finished_at = Some(Utc::now());
        match outcome {
            ToolRunOutcome::Succeeded(output) => run.output = Some(output),
            ToolRunOutcome::Failed(error) => run.error = Some(error),
        }
        Ok(run.clone())
    }

    async fn list_tool_runs(&self, thread_id: &ThreadId) -> Result<Vec<ToolRun>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tool_runs
            .values()
            .filter(|r| &r.thread_id == thread_id && r.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn insert_memory(&self, new: NewMemory) -> Result<Memory, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_memory_id += 1;
        let memory = Memory {
            id: MemoryId(inner.next_memory_id),
            owner: new.owner,
            agent_key: new.agent_key,
            thread_id: new.thread_id,
            content: new.content,
            source_message_ids: new.source_message_ids,
            kind: new.kind,
            created_at: Utc::now(),
            deleted_at: None,
        };
        inner.memories.insert(memory.id.0, memory.clone());
        Ok(memory)
    }

    async fn list_memories(&self, agent_key: &str) -> Result<Vec<Memory>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .memories
            .values()
            .filter(|m| m.agent_key == agent_key && m.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn soft_delete_memory(&self, id: MemoryId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let memory = inner
            .memories
            .get_mut(&id.0)
            .ok_or_else(|| StoreError::not_found("memory", id))?;
        memory.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn insert_prompt(&self, new: NewAgentPrompt) -> Result<AgentPrompt, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_prompt_id += 1;
        let prompt = AgentPrompt {
            id: inner.next_prompt_id,
            agent_key: new.agent_key,
            version: new.version,
            body: new.body,
            is_active: new.is_active,
            created_at: Utc::now(),
        };
        inner.prompts.push(prompt.clone());
        Ok(prompt)
    }

    async fn active_prompt(&self, agent_key: &str) -> Result<Option<AgentPrompt>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .prompts
            .iter()
            .filter(|p| p.agent_key == agent_key && p.is_active)
            .max_by_key(|p| p.version)
            .cloned())
    }

    async fn fetch_turn_snapshot(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Option<TurnSnapshot>, StoreError> {
        // One lock acquisition covers every piece — the read is consistent
        // by construction.
        let inner = self.inner.lock().await;

        let Some(thread) = inner.threads.get(thread_id).filter(|t| !t.is_deleted()) else {
            return Ok(None);
        };

        let mut messages: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| &m.thread_id == thread_id && m.deleted_at.is_none())
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.sequence);

        let memories: Vec<Memory> = inner
            .memories
            .values()
            .filter(|m| m.agent_key == thread.agent_key && m.deleted_at.is_none())
            .cloned()
            .collect();

        let active_prompt = inner
            .prompts
            .iter()
            .filter(|p| p.agent_key == thread.agent_key && p.is_active)
            .max_by_key(|p| p.version)
            .cloned();

        Ok(Some(TurnSnapshot {
            thread: thread.clone(),
            messages,
            memories,
            active_prompt,
        }))
    }

    async fn purge_soft_deleted(&self, chunk_size: usize) -> Result<PurgeReport, StoreError> {
        if chunk_size == 0 {
            return Err(StoreError::Storage("chunk_size must be at least 1".into()));
        }
        let mut report = PurgeReport::default();

        // Tool runs and messages go before their owning threads.
        loop {
            let mut inner = self.inner.lock().await;
            let ids: Vec<i64> = inner
                .tool_runs
                .values()
                .filter(|r| r.deleted_at.is_some())
                .take(chunk_size)
                .map(|r| r.id.0)
                .collect();
            if ids.is_empty() {
                break;
            }
            for id in ids {
                inner.tool_runs.remove(&id);
                report.tool_runs += 1;
            }
        }

        loop {
            let mut inner = self.inner.lock().await;
            let ids: Vec<i64> = inner
                .messages
                .values()
                .filter(|m| m.deleted_at.is_some())
                .take(chunk_size)
                .map(|m| m.id.0)
                .collect();
            if ids.is_empty() {
                break;
            }
            for id in ids {
                inner.messages.remove(&id);
                report.messages += 1;
            }
        }

        loop {
            let mut inner = self.inner.lock().await;
            let ids: Vec<i64> = inner
                .memories
                .values()
                .filter(|m| m.deleted_at.is_some())
                .take(chunk_size)
                .map(|m| m.id.0)
                .collect();
            if ids.is_empty() {
                break;
            }
            for id in ids {
                inner.memories.remove(&id);
                report.memories += 1;
            }
        }

        loop {
            let mut inner = self.inner.lock().await;
            let ids: Vec<ThreadId> = inner
                .threads
                .values()
                .filter(|t| t.deleted_at.is_some())
                .take(chunk_size)
                .map(|t| t.id.clone())
                .collect();
            if ids.is_empty() {
                break;
            }
            for id in ids {
                inner.threads.remove(&id);
                report.threads += 1;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadloom_core::memory::MemoryOwner;
    use threadloom_core::message::TokenUsage;

    async fn seeded_thread(store: &MemoryStore) -> Thread {
        store
            .create_thread(NewThread::user("concierge"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn sequence_order_equals_creation_order() {
        let store = MemoryStore::new();
        let thread = seeded_thread(&store).await;

        for i in 0..5 {
            store
                .append_message(NewMessage::user(thread.id.clone(), format!("msg {i}")))
                .await
                .unwrap();
        }

        let messages = store.list_messages(&thread.id).await.unwrap();
        let sequences: Vec<i64> = messages.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);

        // Ordering by sequence equals ordering by creation time
        let mut by_created = messages.clone();
        by_created.sort_by_key(|m| (m.created_at, m.sequence));
        let created_order: Vec<MessageId> = by_created.iter().map(|m| m.id).collect();
        let sequence_order: Vec<MessageId> = messages.iter().map(|m| m.id).collect();
        assert_eq!(created_order, sequence_order);
    }

    #[tokio::test]
    async fn sequences_are_per_thread() {
        let store = MemoryStore::new();
        let t1 = seeded_thread(&store).await;
        let t2 = seeded_thread(&store).await;

        store
            .append_message(NewMessage::user(t1.id.clone(), "a"))
            .await
            .unwrap();
        let m2 = store
            .append_message(NewMessage::user(t2.id.clone(), "b"))
            .await
            .unwrap();
        assert_eq!(m2.sequence, 1);
    }

    #[tokio::test]
    async fn complete_message_applies_fields_once() {
        let store = MemoryStore::new();
        let thread = seeded_thread(&store).await;
        let pending = store
            .append_message(NewMessage::assistant_pending(thread.id.clone()))
            .await
            .unwrap();
        assert_eq!(pending.status, MessageStatus::Processing);

        let completed = store
            .complete_message(
                pending.id,
                MessageCompletion {
                    content: "Answer.".into(),
                    model: Some("claude-sonnet-4".into()),
                    usage: Some(TokenUsage {
                        input_tokens: 100,
                        output_tokens: 20,
                    }),
                    provider_response_id: Some("resp_9".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(completed.status, MessageStatus::Completed);
        assert_eq!(completed.content, "Answer.");

        // Terminal: completing again is an invalid transition
        let err = store
            .complete_message(
                pending.id,
                MessageCompletion {
                    content: "again".into(),
                    model: None,
                    usage: None,
                    provider_response_id: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn fail_message_records_reason() {
        let store = MemoryStore::new();
        let thread = seeded_thread(&store).await;
        let pending = store
            .append_message(NewMessage::assistant_pending(thread.id.clone()))
            .await
            .unwrap();

        let failed = store
            .fail_message(pending.id, "Rate limited: requests 0/60 remaining")
            .await
            .unwrap();
        assert_eq!(failed.status, MessageStatus::Failed);
        assert!(failed.failed_reason.unwrap().contains("Rate limited"));
    }

    #[tokio::test]
    async fn tool_run_lifecycle_stamps_timestamps() {
        let store = MemoryStore::new();
        let thread = seeded_thread(&store).await;
        let message = store
            .append_message(NewMessage::assistant_pending(thread.id.clone()))
            .await
            .unwrap();

        let run = store
            .create_tool_run(NewToolRun {
                tool_key: "calculator".into(),
                agent_key: "concierge".into(),
                thread_id: thread.id.clone(),
                message_id: message.id,
                call_index: 0,
                input: serde_json::json!({"expr": "2+2"}),
            })
            .await
            .unwrap();
        assert_eq!(run.status, ToolRunStatus::Queued);
        assert!(run.started_at.is_none());

        // Skipping Running is rejected
        let err = store
            .finish_tool_run(run.id, ToolRunOutcome::Succeeded(serde_json::json!(4)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let running = store.mark_tool_run_running(run.id).await.unwrap();
        assert!(running.started_at.is_some());

        let done = store
            .finish_tool_run(run.id, ToolRunOutcome::Succeeded(serde_json::json!(4)))
            .await
            .unwrap();
        assert_eq!(done.status, ToolRunStatus::Succeeded);
        assert!(done.finished_at.is_some());
        assert_eq!(done.output, Some(serde_json::json!(4)));
    }

    #[tokio::test]
    async fn metadata_flag_cas_single_acquirer() {
        let store = MemoryStore::new();
        let thread = seeded_thread(&store).await;

        assert!(store
            .try_acquire_metadata_flag(&thread.id, "memory_job_pending")
            .await
            .unwrap());
        // Second acquire sees the flag held
        assert!(!store
            .try_acquire_metadata_flag(&thread.id, "memory_job_pending")
            .await
            .unwrap());

        store
            .release_metadata_flag(&thread.id, "memory_job_pending")
            .await
            .unwrap();
        assert!(store
            .try_acquire_metadata_flag(&thread.id, "memory_job_pending")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn parent_must_exist_before_child() {
        let store = MemoryStore::new();
        let err = store
            .create_thread(NewThread::tool("worker", ThreadId::new(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ParentNotFound(_)));

        let parent = seeded_thread(&store).await;
        let child = store
            .create_thread(NewThread::tool("worker", parent.id.clone(), None))
            .await
            .unwrap();
        assert_eq!(child.parent_thread_id, Some(parent.id));
    }

    #[tokio::test]
    async fn thread_status_machine_enforced() {
        let store = MemoryStore::new();
        let thread = seeded_thread(&store).await;

        let archived = store
            .update_thread_status(&thread.id, ThreadStatus::Archived)
            .await
            .unwrap();
        assert_eq!(archived.status, ThreadStatus::Archived);

        let reopened = store
            .update_thread_status(&thread.id, ThreadStatus::Open)
            .await
            .unwrap();
        assert_eq!(reopened.status, ThreadStatus::Open);

        store
            .update_thread_status(&thread.id, ThreadStatus::Closed)
            .await
            .unwrap();
        let err = store
            .update_thread_status(&thread.id, ThreadStatus::Open)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn active_prompt_picks_highest_version() {
        let store = MemoryStore::new();
        for (version, active) in [(1, true), (2, true), (3, false)] {
            store
                .insert_prompt(NewAgentPrompt {
                    agent_key: "concierge".into(),
                    version,
                    body: format!("v{version}"),
                    is_active: active,
                })
                .await
                .unwrap();
        }
        let prompt = store.active_prompt("concierge").await.unwrap().unwrap();
        assert_eq!(prompt.version, 2);
        assert!(store.active_prompt("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshot_composes_all_pieces() {
        let store = MemoryStore::new();
        let thread = seeded_thread(&store).await;
        store
            .append_message(NewMessage::user(thread.id.clone(), "hi"))
            .await
            .unwrap();
        store
            .insert_memory(NewMemory {
                owner: MemoryOwner::User,
                agent_key: "concierge".into(),
                thread_id: thread.id.clone(),
                content: "Prefers window seats".into(),
                source_message_ids: vec![],
                kind: None,
            })
            .await
            .unwrap();
        store
            .insert_prompt(NewAgentPrompt {
                agent_key: "concierge".into(),
                version: 1,
                body: "prompt".into(),
                is_active: true,
            })
            .await
            .unwrap();

        let snapshot = store
            .fetch_turn_snapshot(&thread.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.memories.len(), 1);
        assert_eq!(snapshot.active_prompt.unwrap().version, 1);

        assert!(store
            .fetch_turn_snapshot(&ThreadId::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn purge_deletes_all_soft_deleted_in_chunks() {
        let store = MemoryStore::new();

        for _ in 0..250 {
            let thread = seeded_thread(&store).await;
            let message = store
                .append_message(NewMessage::user(thread.id.clone(), "m"))
                .await
                .unwrap();
            store
                .create_tool_run(NewToolRun {
                    tool_key: "calculator".into(),
                    agent_key: "concierge".into(),
                    thread_id: thread.id.clone(),
                    message_id: message.id,
                    call_index: 0,
                    input: serde_json::Value::Null,
                })
                .await
                .unwrap();
            let memory = store
                .insert_memory(NewMemory {
                    owner: MemoryOwner::User,
                    agent_key: "concierge".into(),
                    thread_id: thread.id.clone(),
                    content: "fact".into(),
                    source_message_ids: vec![],
                    kind: None,
                })
                .await
                .unwrap();
            store.soft_delete_memory(memory.id).await.unwrap();
            store.soft_delete_thread(&thread.id).await.unwrap();
        }

        let report = store.purge_soft_deleted(100).await.unwrap();
        assert_eq!(report.tool_runs, 250);
        assert_eq!(report.messages, 250);
        assert_eq!(report.memories, 250);
        assert_eq!(report.threads, 250);

        // Nothing left to purge
        let second = store.purge_soft_deleted(100).await.unwrap();
        assert_eq!(second, PurgeReport::default());
    }

    #[tokio::test]
    async fn purge_leaves_live_rows() {
        let store = MemoryStore::new();
        let keep = seeded_thread(&store).await;
        store
            .append_message(NewMessage::user(keep.id.clone(), "keep me"))
            .await
            .unwrap();
        let drop = seeded_thread(&store).await;
        store.soft_delete_thread(&drop.id).await.unwrap();

        let report = store.purge_soft_deleted(100).await.unwrap();
        assert_eq!(report.threads, 1);
        assert!(store.get_thread(&keep.id).await.unwrap().is_some());
        assert_eq!(store.list_messages(&keep.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unchecked_message_counting() {
        let store = MemoryStore::new();
        let thread = seeded_thread(&store).await;
        let mut last = None;
        for i in 0..4 {
            let m = store
                .append_message(NewMessage::user(thread.id.clone(), format!("m{i}")))
                .await
                .unwrap();
            last = Some(m.id);
        }
        assert_eq!(
            store
                .count_unchecked_completed_messages(&thread.id)
                .await
                .unwrap(),
            4
        );

        let changed = store
            .mark_messages_memory_checked(&thread.id, last.unwrap())
            .await
            .unwrap();
        assert_eq!(changed, 4);
        assert_eq!(
            store
                .count_unchecked_completed_messages(&thread.id)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn completed_after_counts_window() {
        let store = MemoryStore::new();
        let thread = seeded_thread(&store).await;
        let mut ids = Vec::new();
        for i in 0..6 {
            let m = store
                .append_message(NewMessage::user(thread.id.clone(), format!("m{i}")))
                .await
                .unwrap();
            ids.push(m.id);
        }
        assert_eq!(
            store
                .count_completed_messages_after(&thread.id, ids[2])
                .await
                .unwrap(),
            3
        );
    }
}
