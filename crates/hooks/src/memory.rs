//! Memory-extraction hook — threshold-gated, single-dispatch-at-a-time.
//!
//! Idempotency is a single-writer flag in the thread's metadata map,
//! acquired through the store's atomic compare-and-set. The hook fails
//! closed: if the guard cannot be acquired safely, nothing is dispatched.
//! The dispatched job clears the flag when it finishes.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use threadloom_config::MemoryHookConfig;
use threadloom_core::error::HookError;
use threadloom_core::queue::{JobKind, JobQueue};
use threadloom_core::store::ThreadStore;
use threadloom_core::thread::{ThreadId, MEMORY_JOB_PENDING_KEY};

use crate::{HookOutcome, ThreadHook};

pub const MEMORY_HOOK_KEY: &str = "memory_extraction";

pub struct MemoryExtractionHook {
    store: Arc<dyn ThreadStore>,
    queue: Arc<dyn JobQueue>,
    config: MemoryHookConfig,
    summary_worker_key: String,
}

impl MemoryExtractionHook {
    pub fn new(
        store: Arc<dyn ThreadStore>,
        queue: Arc<dyn JobQueue>,
        config: MemoryHookConfig,
        summary_worker_key: String,
    ) -> Self {
        Self {
            store,
            queue,
            config,
            summary_worker_key,
        }
    }

    fn is_worker_thread(&self, agent_key: &str) -> bool {
        agent_key == self.config.worker_agent_key || agent_key == self.summary_worker_key
    }
}

#[async_trait]
impl ThreadHook for MemoryExtractionHook {
    fn name(&self) -> &str {
        MEMORY_HOOK_KEY
    }

    async fn on_turn_committed(
        &self,
        thread_id: &ThreadId,
    ) -> Result<HookOutcome, HookError> {
        // Re-fetch: never evaluate against a stale in-memory copy.
        let Some(thread) = self.store.get_thread(thread_id).await? else {
            return Ok(HookOutcome::Skipped("thread missing"));
        };

        // The extraction and summary workers must not trigger extraction
        // on their own transcripts.
        if self.is_worker_thread(&thread.agent_key) {
            return Ok(HookOutcome::Skipped("workflow worker thread"));
        }

        let unchecked = self
            .store
            .count_unchecked_completed_messages(&thread.id)
            .await?;
        if unchecked < self.config.threshold {
            return Ok(HookOutcome::Skipped("below memory threshold"));
        }

        // Fail closed: a guard that cannot be acquired safely means no
        // dispatch this turn.
        let acquired = self
            .store
            .try_acquire_metadata_flag(&thread.id, MEMORY_JOB_PENDING_KEY)
            .await
            .map_err(|e| HookError::GuardUnavailable(e.to_string()))?;
        if !acquired {
            return Ok(HookOutcome::Skipped("extraction already pending"));
        }

        match self
            .queue
            .dispatch(JobKind::ExtractMemories, &thread.id)
            .await
        {
            Ok(()) => Ok(HookOutcome::Dispatched(JobKind::ExtractMemories)),
            Err(e) => {
                // Best effort: give the flag back so the next turn can
                // try again rather than deadlocking on a job that never
                // ran.
                if let Err(release_err) = self
                    .store
                    .release_metadata_flag(&thread.id, MEMORY_JOB_PENDING_KEY)
                    .await
                {
                    warn!(
                        thread_id = %thread.id,
                        error = %release_err,
                        "Failed to release pending flag after dispatch error"
                    );
                }
                Err(HookError::Queue(e))
            }
        }
    }
}
