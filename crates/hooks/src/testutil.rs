//! Shared helpers for hook tests.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use threadloom_core::error::QueueError;
use threadloom_core::message::NewMessage;
use threadloom_core::queue::{JobKind, JobQueue};
use threadloom_core::store::ThreadStore;
use threadloom_core::thread::ThreadId;
use threadloom_store::MemoryStore;

/// Queue double that records dispatches, optionally failing every call.
pub(crate) struct RecordingQueue {
    pub dispatched: Mutex<Vec<(JobKind, ThreadId)>>,
    pub fail: bool,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self {
            dispatched: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            dispatched: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub async fn count(&self) -> usize {
        self.dispatched.lock().await.len()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn dispatch(&self, job: JobKind, thread_id: &ThreadId) -> Result<(), QueueError> {
        if self.fail {
            return Err(QueueError::Dispatch("queue unavailable".into()));
        }
        self.dispatched.lock().await.push((job, thread_id.clone()));
        Ok(())
    }
}

/// Append `count` completed user messages to a thread.
pub(crate) async fn seed_completed_messages(
    store: &Arc<MemoryStore>,
    thread_id: &ThreadId,
    count: usize,
) -> Vec<threadloom_core::message::Message> {
    let mut messages = Vec::with_capacity(count);
    for i in 0..count {
        let message = store
            .append_message(NewMessage::user(thread_id.clone(), format!("message {i}")))
            .await
            .unwrap();
        messages.push(message);
    }
    messages
}
