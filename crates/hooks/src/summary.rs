//! Summary hook — sparse-then-periodic summarization cadence.
//!
//! The first summary fires once the target thread has a configurable
//! minimum of completed messages (default 2). After that, another summary
//! fires every time a configurable number of completed messages (default
//! 10) accumulates past `last_summary_message_id` — the dispatched job is
//! what advances that pointer, never the hook.

use async_trait::async_trait;
use std::sync::Arc;

use threadloom_config::SummaryHookConfig;
use threadloom_core::error::HookError;
use threadloom_core::queue::{JobKind, JobQueue};
use threadloom_core::store::ThreadStore;
use threadloom_core::thread::{Thread, ThreadId};

use crate::{HookOutcome, ThreadHook};

pub const SUMMARY_HOOK_KEY: &str = "thread_summary";

pub struct SummaryHook {
    store: Arc<dyn ThreadStore>,
    queue: Arc<dyn JobQueue>,
    config: SummaryHookConfig,
}

impl SummaryHook {
    pub fn new(
        store: Arc<dyn ThreadStore>,
        queue: Arc<dyn JobQueue>,
        config: SummaryHookConfig,
    ) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// The thread to summarize. When the current thread is the summary
    /// workflow's own worker, the target is its parent — a worker must
    /// not be hook-triggered on its own transcript.
    async fn resolve_target(&self, thread: Thread) -> Result<Option<Thread>, HookError> {
        if thread.agent_key != self.config.worker_agent_key {
            return Ok(Some(thread));
        }
        let Some(parent_id) = &thread.parent_thread_id else {
            return Ok(None);
        };
        Ok(self.store.get_thread(parent_id).await?)
    }
}

#[async_trait]
impl ThreadHook for SummaryHook {
    fn name(&self) -> &str {
        SUMMARY_HOOK_KEY
    }

    async fn on_turn_committed(
        &self,
        thread_id: &ThreadId,
    ) -> Result<HookOutcome, HookError> {
        // Re-fetch: never evaluate against a stale in-memory copy.
        let Some(thread) = self.store.get_thread(thread_id).await? else {
            return Ok(HookOutcome::Skipped("thread missing"));
        };

        let Some(target) = self.resolve_target(thread).await? else {
            return Ok(HookOutcome::Skipped("summary target unresolved"));
        };

        let should_dispatch = match target.last_summary_message_id {
            None => {
                let completed = self.store.count_completed_messages(&target.id).await?;
                completed >= self.config.min_messages
            }
            Some(last) => {
                let fresh = self
                    .store
                    .count_completed_messages_after(&target.id, last)
                    .await?;
                fresh >= self.config.interval
            }
        };

        if !should_dispatch {
            return Ok(HookOutcome::Skipped("below summary threshold"));
        }

        self.queue
            .dispatch(JobKind::SummarizeThread, &target.id)
            .await?;
        Ok(HookOutcome::Dispatched(JobKind::SummarizeThread))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{seed_completed_messages, RecordingQueue};
    use threadloom_core::thread::NewThread;
    use threadloom_store::MemoryStore;

    fn hook(
        store: Arc<MemoryStore>,
        queue: Arc<RecordingQueue>,
    ) -> SummaryHook {
        SummaryHook::new(store, queue, SummaryHookConfig::default())
    }

    #[tokio::test]
    async fn first_summary_after_two_completed_messages() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(RecordingQueue::new());
        let thread = store.create_thread(NewThread::user("concierge")).await.unwrap();
        let hook = hook(store.clone(), queue.clone());

        // One message: below the minimum
        seed_completed_messages(&store, &thread.id, 1).await;
        assert_eq!(
            hook.on_turn_committed(&thread.id).await.unwrap(),
            HookOutcome::Skipped("below summary threshold")
        );

        // Two messages: dispatch exactly once
        seed_completed_messages(&store, &thread.id, 1).await;
        assert_eq!(
            hook.on_turn_committed(&thread.id).await.unwrap(),
            HookOutcome::Dispatched(JobKind::SummarizeThread)
        );
        assert_eq!(queue.count().await, 1);
    }

    #[tokio::test]
    async fn no_additional_dispatch_before_interval_boundary() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(RecordingQueue::new());
        let thread = store.create_thread(NewThread::user("concierge")).await.unwrap();
        let hook = hook(store.clone(), queue.clone());

        let messages = seed_completed_messages(&store, &thread.id, 2).await;
        hook.on_turn_committed(&thread.id).await.unwrap();
        assert_eq!(queue.count().await, 1);

        // The summary job completes and advances the pointer
        store
            .update_thread_summary(
                &thread.id,
                Some("summary".into()),
                None,
                Some(messages.last().unwrap().id),
            )
            .await
            .unwrap();

        // A third message arrives — 1 < interval(10), so nothing fires
        seed_completed_messages(&store, &thread.id, 1).await;
        assert_eq!(
            hook.on_turn_committed(&thread.id).await.unwrap(),
            HookOutcome::Skipped("below summary threshold")
        );
        assert_eq!(queue.count().await, 1);

        // Nine more reach the interval of ten fresh messages
        seed_completed_messages(&store, &thread.id, 9).await;
        assert_eq!(
            hook.on_turn_committed(&thread.id).await.unwrap(),
            HookOutcome::Dispatched(JobKind::SummarizeThread)
        );
        assert_eq!(queue.count().await, 2);
    }

    #[tokio::test]
    async fn worker_thread_targets_its_parent() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(RecordingQueue::new());

        let parent = store.create_thread(NewThread::user("concierge")).await.unwrap();
        seed_completed_messages(&store, &parent.id, 2).await;

        let worker = store
            .create_thread(NewThread::tool("summary_worker", parent.id.clone(), None))
            .await
            .unwrap();

        let hook = hook(store.clone(), queue.clone());
        assert_eq!(
            hook.on_turn_committed(&worker.id).await.unwrap(),
            HookOutcome::Dispatched(JobKind::SummarizeThread)
        );

        let dispatched = queue.dispatched.lock().await;
        assert_eq!(dispatched[0].1, parent.id);
    }

    #[tokio::test]
    async fn worker_without_parent_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(RecordingQueue::new());
        let worker = store
            .create_thread(NewThread::user("summary_worker"))
            .await
            .unwrap();
        seed_completed_messages(&store, &worker.id, 5).await;

        let hook = hook(store.clone(), queue.clone());
        assert_eq!(
            hook.on_turn_committed(&worker.id).await.unwrap(),
            HookOutcome::Skipped("summary target unresolved")
        );
        assert_eq!(queue.count().await, 0);
    }

    #[tokio::test]
    async fn missing_thread_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(RecordingQueue::new());
        let hook = hook(store, queue.clone());
        assert_eq!(
            hook.on_turn_committed(&ThreadId::new()).await.unwrap(),
            HookOutcome::Skipped("thread missing")
        );
        assert_eq!(queue.count().await, 0);
    }
}
