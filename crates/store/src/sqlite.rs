//! SQLite store backed by sqlx.
//!
//! One database file, five tables (threads, messages, tool_runs,
//! memories, agent_prompts), created at open. WAL journal mode.
//!
//! Invariants enforced here rather than in callers:
//! - `append_message` assigns id + per-thread sequence inside one
//!   transaction, so sequences are unique and increasing per thread.
//! - Status transitions are checked against the state machines inside
//!   the same transaction that applies them.
//! - `try_acquire_metadata_flag` is a single conditional `UPDATE` over
//!   the metadata JSON — concurrent writers for the same thread are
//!   serialized by SQLite's write lock, so at most one caller acquires.
//! - `fetch_turn_snapshot` reads everything inside one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use threadloom_core::agent::{AgentPrompt, NewAgentPrompt};
use threadloom_core::error::StoreError;
use threadloom_core::memory::{Memory, MemoryId, MemoryOwner, NewMemory};
use threadloom_core::message::{Message, MessageId, NewMessage, TokenUsage};
use threadloom_core::status::{
    ContentType, MessageRole, MessageStatus, ThreadKind, ThreadStatus, ToolRunStatus,
};
use threadloom_core::store::{MessageCompletion, PurgeReport, ThreadStore, TurnSnapshot};
use threadloom_core::thread::{NewThread, Thread, ThreadId};
use threadloom_core::tool_run::{NewToolRun, ToolRun, ToolRunId, ToolRunOutcome};

/// A SQLite-backed `ThreadStore`.
pub struct SqliteStore {
    pool: SqlitePool,
}

fn storage(e: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(e.to_string())
}

fn col<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Storage(format!("column {name}: {e}")))
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp '{raw}': {e}")))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(parse_ts).transpose()
}

fn parse_map(raw: &str) -> Result<serde_json::Map<String, serde_json::Value>, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn parse_json(raw: &str) -> Result<serde_json::Value, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn to_json_text(value: &impl serde::Serialize) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

impl SqliteStore {
    /// Open (creating if missing) a SQLite store at the given path.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite thread store initialized at {path}");
        Ok(store)
    }

    /// An ephemeral in-process database. A single connection keeps every
    /// query on the same `:memory:` instance.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS threads (
                id                      TEXT PRIMARY KEY,
                agent_key               TEXT NOT NULL,
                status                  TEXT NOT NULL DEFAULT 'open',
                kind                    TEXT NOT NULL DEFAULT 'user',
                parent_thread_id        TEXT REFERENCES threads(id),
                parent_tool_run_id      INTEGER,
                title                   TEXT,
                summary                 TEXT,
                long_summary            TEXT,
                last_summary_message_id INTEGER,
                metadata                TEXT NOT NULL DEFAULT '{}',
                last_active_at          TEXT NOT NULL,
                created_at              TEXT NOT NULL,
                deleted_at              TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("threads table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id                   INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id            TEXT NOT NULL REFERENCES threads(id),
                role                 TEXT NOT NULL,
                content              TEXT NOT NULL DEFAULT '',
                content_type         TEXT NOT NULL DEFAULT 'text',
                sequence             INTEGER NOT NULL,
                status               TEXT NOT NULL DEFAULT 'processing',
                failed_reason        TEXT,
                model                TEXT,
                input_tokens         INTEGER,
                output_tokens        INTEGER,
                provider_response_id TEXT,
                memory_checked       INTEGER NOT NULL DEFAULT 0,
                metadata             TEXT NOT NULL DEFAULT '{}',
                created_at           TEXT NOT NULL,
                deleted_at           TEXT,
                UNIQUE(thread_id, sequence)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("messages table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tool_runs (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                tool_key    TEXT NOT NULL,
                agent_key   TEXT NOT NULL,
                thread_id   TEXT NOT NULL REFERENCES threads(id),
                message_id  INTEGER NOT NULL REFERENCES messages(id),
                call_index  INTEGER NOT NULL,
                status      TEXT NOT NULL DEFAULT 'queued',
                started_at  TEXT,
                finished_at TEXT,
                input       TEXT NOT NULL DEFAULT 'null',
                output      TEXT,
                error       TEXT,
                created_at  TEXT NOT NULL,
                deleted_at  TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("tool_runs table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memories (
                id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                owner              TEXT NOT NULL,
                agent_key          TEXT NOT NULL,
                thread_id          TEXT NOT NULL,
                content            TEXT NOT NULL,
                source_message_ids TEXT NOT NULL DEFAULT '[]',
                kind               TEXT,
                created_at         TEXT NOT NULL,
                deleted_at         TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("memories table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_prompts (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_key  TEXT NOT NULL,
                version    INTEGER NOT NULL,
                body       TEXT NOT NULL,
                is_active  INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                UNIQUE(agent_key, version)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("agent_prompts table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_thread_seq ON messages(thread_id, sequence)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("messages index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tool_runs_thread ON tool_runs(thread_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("tool_runs index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_thread(row: &SqliteRow) -> Result<Thread, StoreError> {
        Ok(Thread {
            id: ThreadId(col::<String>(row, "id")?),
            agent_key: col(row, "agent_key")?,
            status: ThreadStatus::from_db(&col::<String>(row, "status")?),
            kind: ThreadKind::from_db(&col::<String>(row, "kind")?),
            parent_thread_id: col::<Option<String>>(row, "parent_thread_id")?.map(ThreadId),
            parent_tool_run_id: col::<Option<i64>>(row, "parent_tool_run_id")?.map(ToolRunId),
            title: col(row, "title")?,
            summary: col(row, "summary")?,
            long_summary: col(row, "long_summary")?,
            last_summary_message_id: col::<Option<i64>>(row, "last_summary_message_id")?
                .map(MessageId),
            metadata: parse_map(&col::<String>(row, "metadata")?)?,
            last_active_at: parse_ts(&col::<String>(row, "last_active_at")?)?,
            created_at: parse_ts(&col::<String>(row, "created_at")?)?,
            deleted_at: parse_opt_ts(col(row, "deleted_at")?)?,
        })
    }

    fn row_to_message(row: &SqliteRow) -> Result<Message, StoreError> {
        let input_tokens = col::<Option<i64>>(row, "input_tokens")?;
        let output_tokens = col::<Option<i64>>(row, "output_tokens")?;
        let usage = match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(TokenUsage {
                input_tokens: input as u32,
                output_tokens: output as u32,
            }),
            _ => None,
        };
        Ok(Message {
            id: MessageId(col::<i64>(row, "id")?),
            thread_id: ThreadId(col::<String>(row, "thread_id")?),
            role: MessageRole::from_db(&col::<String>(row, "role")?),
            content: col(row, "content")?,
            content_type: ContentType::from_db(&col::<String>(row, "content_type")?),
            sequence: col(row, "sequence")?,
            status: MessageStatus::from_db(&col::<String>(row, "status")?),
            failed_reason: col(row, "failed_reason")?,
            model: col(row, "model")?,
            usage,
            provider_response_id: col(row, "provider_response_id")?,
            memory_checked: col::<i64>(row, "memory_checked")? != 0,
            metadata: parse_map(&col::<String>(row, "metadata")?)?,
            created_at: parse_ts(&col::<String>(row, "created_at")?)?,
            deleted_at: parse_opt_ts(col(row, "deleted_at")?)?,
        })
    }

    fn row_to_tool_run(row: &SqliteRow) -> Result<ToolRun, StoreError> {
        Ok(ToolRun {
            id: ToolRunId(col::<i64>(row, "id")?),
            tool_key: col(row, "tool_key")?,
            agent_key: col(row, "agent_key")?,
            thread_id: ThreadId(col::<String>(row, "thread_id")?),
            message_id: MessageId(col::<i64>(row, "message_id")?),
            call_index: col::<i64>(row, "call_index")? as u32,
            status: ToolRunStatus::from_db(&col::<String>(row, "status")?),
            started_at: parse_opt_ts(col(row, "started_at")?)?,
            finished_at: parse_opt_ts(col(row, "finished_at")?)?,
            input: parse_json(&col::<String>(row, "input")?)?,
            output: col::<Option<String>>(row, "output")?
                .as_deref()
                .map(parse_json)
                .transpose()?,
            error: col(row, "error")?,
            created_at: parse_ts(&col::<String>(row, "created_at")?)?,
            deleted_at: parse_opt_ts(col(row, "deleted_at")?)?,
        })
    }

    fn row_to_memory(row: &SqliteRow) -> Result<Memory, StoreError> {
        let source_ids: Vec<i64> = parse_json(&col::<String>(row, "source_message_ids")?)?
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_i64()).collect())
            .unwrap_or_default();
        Ok(Memory {
            id: MemoryId(col::<i64>(row, "id")?),
            owner: MemoryOwner::from_db(&col::<String>(row, "owner")?),
            agent_key: col(row, "agent_key")?,
            thread_id: ThreadId(col::<String>(row, "thread_id")?),
            content: col(row, "content")?,
            source_message_ids: source_ids.into_iter().map(MessageId).collect(),
            kind: col(row, "kind")?,
            created_at: parse_ts(&col::<String>(row, "created_at")?)?,
            deleted_at: parse_opt_ts(col(row, "deleted_at")?)?,
        })
    }

    fn row_to_prompt(row: &SqliteRow) -> Result<AgentPrompt, StoreError> {
        Ok(AgentPrompt {
            id: col(row, "id")?,
            agent_key: col(row, "agent_key")?,
            version: col(row, "version")?,
            body: col(row, "body")?,
            is_active: col::<i64>(row, "is_active")? != 0,
            created_at: parse_ts(&col::<String>(row, "created_at")?)?,
        })
    }

    async fn fetch_thread_tx(
        tx: &mut sqlx::SqliteConnection,
        id: &ThreadId,
    ) -> Result<Option<Thread>, StoreError> {
        let row = sqlx::query("SELECT * FROM threads WHERE id = ?1 AND deleted_at IS NULL")
            .bind(&id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?;
        row.as_ref().map(Self::row_to_thread).transpose()
    }
}

#[async_trait]
impl ThreadStore for SqliteStore {
    async fn create_thread(&self, new: NewThread) -> Result<Thread, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        if let Some(parent) = &new.parent_thread_id {
            let exists = sqlx::query("SELECT 1 FROM threads WHERE id = ?1")
                .bind(&parent.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage)?;
            if exists.is_none() {
                return Err(StoreError::ParentNotFound(parent.to_string()));
            }
        }

        let id = ThreadId::new();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO threads
                (id, agent_key, status, kind, parent_thread_id, parent_tool_run_id,
                 title, metadata, last_active_at, created_at)
            VALUES (?1, ?2, 'open', ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            "#,
        )
        .bind(&id.0)
        .bind(&new.agent_key)
        .bind(new.kind.as_str())
        .bind(new.parent_thread_id.as_ref().map(|p| p.0.clone()))
        .bind(new.parent_tool_run_id.map(|r| r.0))
        .bind(&new.title)
        .bind(to_json_text(&new.metadata)?)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        let thread = Self::fetch_thread_tx(&mut tx, &id)
            .await?
            .ok_or_else(|| StoreError::not_found("thread", &id))?;
        tx.commit().await.map_err(storage)?;
        Ok(thread)
    }

    async fn get_thread(&self, id: &ThreadId) -> Result<Option<Thread>, StoreError> {
        let row = sqlx::query("SELECT * FROM threads WHERE id = ?1 AND deleted_at IS NULL")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(Self::row_to_thread).transpose()
    }

    async fn update_thread_status(
        &self,
        id: &ThreadId,
        status: ThreadStatus,
    ) -> Result<Thread, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let thread = Self::fetch_thread_tx(&mut tx, id)
            .await?
            .ok_or_else(|| StoreError::not_found("thread", id))?;
        if !thread.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                entity: "thread",
                from: thread.status.as_str().into(),
                to: status.as_str().into(),
            });
        }
        sqlx::query("UPDATE threads SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(&id.0)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        let updated = Self::fetch_thread_tx(&mut tx, id)
            .await?
            .ok_or_else(|| StoreError::not_found("thread", id))?;
        tx.commit().await.map_err(storage)?;
        Ok(updated)
    }

    async fn update_thread_summary(
        &self,
        id: &ThreadId,
        summary: Option<String>,
        long_summary: Option<String>,
        last_summary_message_id: Option<MessageId>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE threads SET
                summary = COALESCE(?1, summary),
                long_summary = COALESCE(?2, long_summary),
                last_summary_message_id = COALESCE(?3, last_summary_message_id)
            WHERE id = ?4 AND deleted_at IS NULL
            "#,
        )
        .bind(&summary)
        .bind(&long_summary)
        .bind(last_summary_message_id.map(|m| m.0))
        .bind(&id.0)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("thread", id));
        }
        Ok(())
    }

    async fn touch_thread(&self, id: &ThreadId) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE threads SET last_active_at = ?1 WHERE id = ?2 AND deleted_at IS NULL")
                .bind(Utc::now().to_rfc3339())
                .bind(&id.0)
                .execute(&self.pool)
                .await
                .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("thread", id));
        }
        Ok(())
    }

    async fn soft_delete_thread(&self, id: &ThreadId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let now = Utc::now().to_rfc3339();

        let result =
            sqlx::query("UPDATE threads SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL")
                .bind(&now)
                .bind(&id.0)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("thread", id));
        }

        sqlx::query(
            "UPDATE messages SET deleted_at = ?1 WHERE thread_id = ?2 AND deleted_at IS NULL",
        )
        .bind(&now)
        .bind(&id.0)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            "UPDATE tool_runs SET deleted_at = ?1 WHERE thread_id = ?2 AND deleted_at IS NULL",
        )
        .bind(&now)
        .bind(&id.0)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    async fn try_acquire_metadata_flag(
        &self,
        id: &ThreadId,
        key: &str,
    ) -> Result<bool, StoreError> {
        // One conditional UPDATE: SQLite serializes writers, so exactly
        // one concurrent caller sees the flag unset and flips it.
        let path = format!("$.{key}");
        let result = sqlx::query(
            r#"
            UPDATE threads SET metadata = json_set(metadata, ?1, json('true'))
            WHERE id = ?2 AND deleted_at IS NULL
              AND COALESCE(json_extract(metadata, ?1), 0) = 0
            "#,
        )
        .bind(&path)
        .bind(&id.0)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // Distinguish "already held" from "no such thread".
        let exists = sqlx::query("SELECT 1 FROM threads WHERE id = ?1 AND deleted_at IS NULL")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        if exists.is_none() {
            return Err(StoreError::not_found("thread", id));
        }
        Ok(false)
    }

    async fn release_metadata_flag(&self, id: &ThreadId, key: &str) -> Result<(), StoreError> {
        let path = format!("$.{key}");
        let result = sqlx::query(
            "UPDATE threads SET metadata = json_remove(metadata, ?1) WHERE id = ?2 AND deleted_at IS NULL",
        )
        .bind(&path)
        .bind(&id.0)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("thread", id));
        }
        Ok(())
    }

    async fn append_message(&self, new: NewMessage) -> Result<Message, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        Self::fetch_thread_tx(&mut tx, &new.thread_id)
            .await?
            .ok_or_else(|| StoreError::not_found("thread", &new.thread_id))?;

        let row = sqlx::query(
            "SELECT COALESCE(MAX(sequence), 0) + 1 AS next_seq FROM messages WHERE thread_id = ?1",
        )
        .bind(&new.thread_id.0)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage)?;
        let sequence: i64 = col(&row, "next_seq")?;

        let result = sqlx::query(
            r#"
            INSERT INTO messages
                (thread_id, role, content, content_type, sequence, status, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&new.thread_id.0)
        .bind(new.role.as_str())
        .bind(&new.content)
        .bind(new.content_type.as_str())
        .bind(sequence)
        .bind(new.status.as_str())
        .bind(to_json_text(&new.metadata)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        let id = result.last_insert_rowid();
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage)?;
        let message = Self::row_to_message(&row)?;
        tx.commit().await.map_err(storage)?;
        Ok(message)
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?1 AND deleted_at IS NULL")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(Self::row_to_message).transpose()
    }

    async fn list_messages(&self, thread_id: &ThreadId) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE thread_id = ?1 AND deleted_at IS NULL ORDER BY sequence ASC",
        )
        .bind(&thread_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(Self::row_to_message).collect()
    }

    async fn complete_message(
        &self,
        id: MessageId,
        completion: MessageCompletion,
    ) -> Result<Message, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row = sqlx::query("SELECT status FROM messages WHERE id = ?1 AND deleted_at IS NULL")
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?
            .ok_or_else(|| StoreError::not_found("message", id))?;
        let current = MessageStatus::from_db(&col::<String>(&row, "status")?);
        if !current.can_transition_to(MessageStatus::Completed) {
            return Err(StoreError::InvalidTransition {
                entity: "message",
                from: current.as_str().into(),
                to: MessageStatus::Completed.as_str().into(),
            });
        }

        sqlx::query(
            r#"
            UPDATE messages SET
                status = 'completed',
                content = ?1,
                model = ?2,
                input_tokens = ?3,
                output_tokens = ?4,
                provider_response_id = ?5
            WHERE id = ?6
            "#,
        )
        .bind(&completion.content)
        .bind(&completion.model)
        .bind(completion.usage.map(|u| u.input_tokens as i64))
        .bind(completion.usage.map(|u| u.output_tokens as i64))
        .bind(&completion.provider_response_id)
        .bind(id.0)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        let row = sqlx::query("SELECT * FROM messages WHERE id = ?1")
            .bind(id.0)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage)?;
        let message = Self::row_to_message(&row)?;
        tx.commit().await.map_err(storage)?;
        Ok(message)
    }

    async fn fail_message(&self, id: MessageId, reason: &str) -> Result<Message, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row = sqlx::query("SELECT status FROM messages WHERE id = ?1 AND deleted_at IS NULL")
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?
            .ok_or_else(|| StoreError::not_found("message", id))?;
        let current = MessageStatus::from_db(&col::<String>(&row, "status")?);
        if !current.can_transition_to(MessageStatus::Failed) {
            return Err(StoreError::InvalidTransition {
                entity: "message",
                from: current.as_str().into(),
                to: MessageStatus::Failed.as_str().into(),
            });
        }

        sqlx::query("UPDATE messages SET status = 'failed', failed_reason = ?1 WHERE id = ?2")
            .bind(reason)
            .bind(id.0)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        let row = sqlx::query("SELECT * FROM messages WHERE id = ?1")
            .bind(id.0)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage)?;
        let message = Self::row_to_message(&row)?;
        tx.commit().await.map_err(storage)?;
        Ok(message)
    }

    async fn count_completed_messages(&self, thread_id: &ThreadId) -> Result<u64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM messages WHERE thread_id = ?1 AND status = 'completed' AND deleted_at IS NULL",
        )
        .bind(&thread_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;
        Ok(col::<i64>(&row, "n")? as u64)
    }

    async fn count_completed_messages_after(
        &self,
        thread_id: &ThreadId,
        after: MessageId,
    ) -> Result<u64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM messages WHERE thread_id = ?1 AND status = 'completed' AND id > ?2 AND deleted_at IS NULL",
        )
        .bind(&thread_id.0)
        .bind(after.0)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;
        Ok(col::<i64>(&row, "n")? as u64)
    }

    async fn count_unchecked_completed_messages(
        &self,
        thread_id: &ThreadId,
    ) -> Result<u64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM messages WHERE thread_id = ?1 AND status = 'completed' AND memory_checked = 0 AND deleted_at IS NULL",
        )
        .bind(&thread_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;
        Ok(col::<i64>(&row, "n")? as u64)
    }

    async fn mark_messages_memory_checked(
        &self,
        thread_id: &ThreadId,
        up_to: MessageId,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE messages SET memory_checked = 1 WHERE thread_id = ?1 AND status = 'completed' AND id <= ?2 AND memory_checked = 0 AND deleted_at IS NULL",
        )
        .bind(&thread_id.0)
        .bind(up_to.0)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(result.rows_affected())
    }

    async fn create_tool_run(&self, new: NewToolRun) -> Result<ToolRun, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        Self::fetch_thread_tx(&mut tx, &new.thread_id)
            .await?
            .ok_or_else(|| StoreError::not_found("thread", &new.thread_id))?;

        let result = sqlx::query(
            r#"
            INSERT INTO tool_runs
                (tool_key, agent_key, thread_id, message_id, call_index, status, input, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 'queued', ?6, ?7)
            "#,
        )
        .bind(&new.tool_key)
        .bind(&new.agent_key)
        .bind(&new.thread_id.0)
        .bind(new.message_id.0)
        .bind(new.call_index as i64)
        .bind(to_json_text(&new.input)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        let id = result.last_insert_rowid();
        let row = sqlx::query("SELECT * FROM tool_runs WHERE id = ?1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage)?;
        let run = Self::row_to_tool_run(&row)?;
        tx.commit().await.map_err(storage)?;
        Ok(run)
    }

    async fn mark_tool_run_running(&self, id: ToolRunId) -> Result<ToolRun, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row = sqlx::query("SELECT status FROM tool_runs WHERE id = ?1 AND deleted_at IS NULL")
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?
            .ok_or_else(|| StoreError::not_found("tool_run", id))?;
        let current = ToolRunStatus::from_db(&col::<String>(&row, "status")?);
        if !current.can_transition_to(ToolRunStatus::Running) {
            return Err(StoreError::InvalidTransition {
                entity: "tool_run",
                from: current.as_str().into(),
                to: ToolRunStatus::Running.as_str().into(),
            });
        }

        sqlx::query("UPDATE tool_runs SET status = 'running', started_at = ?1 WHERE id = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(id.0)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        let row = sqlx::query("SELECT * FROM tool_runs WHERE id = ?1")
            .bind(id.0)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage)?;
        let run = Self::row_to_tool_run(&row)?;
        tx.commit().await.map_err(storage)?;
        Ok(run)
    }

    async fn finish_tool_run(
        &self,
        id: ToolRunId,
        outcome: ToolRunOutcome,
    ) -> Result<ToolRun, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row = sqlx::query("SELECT status FROM tool_runs WHERE id = ?1 AND deleted_at IS NULL")
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?
            .ok_or_else(|| StoreError::not_found("tool_run", id))?;
        let current = ToolRunStatus::from_db(&col::<String>(&row, "status")?);
        let next = match &outcome {
            ToolRunOutcome::Succeeded(_) => ToolRunStatus::Succeeded,
            ToolRunOutcome::Failed(_) => ToolRunStatus::Failed,
        };
        if !current.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                entity: "tool_run",
                from: current.as_str().into(),
                to: next.as_str().into(),
            });
        }

        match outcome {
            ToolRunOutcome::Succeeded(output) => {
                sqlx::query(
                    "UPDATE tool_runs SET status = 'succeeded', output = ?1, finished_at = ?2 WHERE id = ?3",
                )
                .bind(to_json_text(&output)?)
                .bind(Utc::now().to_rfc3339())
                .bind(id.0)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
            }
            ToolRunOutcome::Failed(error) => {
                sqlx::query(
                    "UPDATE tool_runs SET status = 'failed', error = ?1, finished_at = ?2 WHERE id = ?3",
                )
                .bind(&error)
                .bind(Utc::now().to_rfc3339())
                .bind(id.0)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
            }
        }

        let row = sqlx::query("SELECT * FROM tool_runs WHERE id = ?1")
            .bind(id.0)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage)?;
        let run = Self::row_to_tool_run(&row)?;
        tx.commit().await.map_err(storage)?;
        Ok(run)
    }

    async fn list_tool_runs(&self, thread_id: &ThreadId) -> Result<Vec<ToolRun>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM tool_runs WHERE thread_id = ?1 AND deleted_at IS NULL ORDER BY id ASC",
        )
        .bind(&thread_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(Self::row_to_tool_run).collect()
    }

    async fn insert_memory(&self, new: NewMemory) -> Result<Memory, StoreError> {
        let source_ids: Vec<i64> = new.source_message_ids.iter().map(|m| m.0).collect();
        let result = sqlx::query(
            r#"
            INSERT INTO memories
                (owner, agent_key, thread_id, content, source_message_ids, kind, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(new.owner.as_str())
        .bind(&new.agent_key)
        .bind(&new.thread_id.0)
        .bind(&new.content)
        .bind(to_json_text(&source_ids)?)
        .bind(&new.kind)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        let row = sqlx::query("SELECT * FROM memories WHERE id = ?1")
            .bind(result.last_insert_rowid())
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        Self::row_to_memory(&row)
    }

    async fn list_memories(&self, agent_key: &str) -> Result<Vec<Memory>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM memories WHERE agent_key = ?1 AND deleted_at IS NULL ORDER BY id ASC",
        )
        .bind(agent_key)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(Self::row_to_memory).collect()
    }

    async fn soft_delete_memory(&self, id: MemoryId) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE memories SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL")
                .bind(Utc::now().to_rfc3339())
                .bind(id.0)
                .execute(&self.pool)
                .await
                .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("memory", id));
        }
        Ok(())
    }

    async fn insert_prompt(&self, new: NewAgentPrompt) -> Result<AgentPrompt, StoreError> {
        let result = sqlx::query(
            "INSERT INTO agent_prompts (agent_key, version, body, is_active, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&new.agent_key)
        .bind(new.version)
        .bind(&new.body)
        .bind(if new.is_active { 1i64 } else { 0i64 })
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        let row = sqlx::query("SELECT * FROM agent_prompts WHERE id = ?1")
            .bind(result.last_insert_rowid())
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        Self::row_to_prompt(&row)
    }

    async fn active_prompt(&self, agent_key: &str) -> Result<Option<AgentPrompt>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM agent_prompts WHERE agent_key = ?1 AND is_active = 1 ORDER BY version DESC LIMIT 1",
        )
        .bind(agent_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.as_ref().map(Self::row_to_prompt).transpose()
    }

    async fn fetch_turn_snapshot(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Option<TurnSnapshot>, StoreError> {
        // Every read goes through one transaction on one connection, so
        // the pieces cannot interleave with a concurrent writer.
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let Some(thread) = Self::fetch_thread_tx(&mut tx, thread_id).await? else {
            return Ok(None);
        };

        let rows = sqlx::query(
            "SELECT * FROM messages WHERE thread_id = ?1 AND deleted_at IS NULL ORDER BY sequence ASC",
        )
        .bind(&thread_id.0)
        .fetch_all(&mut *tx)
        .await
        .map_err(storage)?;
        let messages: Vec<Message> = rows
            .iter()
            .map(Self::row_to_message)
            .collect::<Result<_, _>>()?;

        let rows = sqlx::query(
            "SELECT * FROM memories WHERE agent_key = ?1 AND deleted_at IS NULL ORDER BY id ASC",
        )
        .bind(&thread.agent_key)
        .fetch_all(&mut *tx)
        .await
        .map_err(storage)?;
        let memories: Vec<Memory> = rows
            .iter()
            .map(Self::row_to_memory)
            .collect::<Result<_, _>>()?;

        let row = sqlx::query(
            "SELECT * FROM agent_prompts WHERE agent_key = ?1 AND is_active = 1 ORDER BY version DESC LIMIT 1",
        )
        .bind(&thread.agent_key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage)?;
        let active_prompt = row.as_ref().map(Self::row_to_prompt).transpose()?;

        tx.commit().await.map_err(storage)?;

        Ok(Some(TurnSnapshot {
            thread,
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

        // Cascade order: children before their owning threads.
        let passes: [(&str, &mut u64); 3] = [
            ("tool_runs", &mut report.tool_runs),
            ("messages", &mut report.messages),
            ("memories", &mut report.memories),
        ];
        for (table, count) in passes {
            loop {
                let sql = format!(
                    "DELETE FROM {table} WHERE id IN (SELECT id FROM {table} WHERE deleted_at IS NOT NULL LIMIT ?1)"
                );
                let result = sqlx::query(&sql)
                    .bind(chunk_size as i64)
                    .execute(&self.pool)
                    .await
                    .map_err(storage)?;
                let n = result.rows_affected();
                if n == 0 {
                    break;
                }
                *count += n;
            }
        }

        loop {
            let result = sqlx::query(
                "DELETE FROM threads WHERE id IN (SELECT id FROM threads WHERE deleted_at IS NOT NULL LIMIT ?1)",
            )
            .bind(chunk_size as i64)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
            let n = result.rows_affected();
            if n == 0 {
                break;
            }
            report.threads += n;
        }

        debug!(
            tool_runs = report.tool_runs,
            messages = report.messages,
            memories = report.memories,
            threads = report.threads,
            "Purge pass complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadloom_core::status::MessageStatus;

    async fn store() -> SqliteStore {
        SqliteStore::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threads.db");
        let store = SqliteStore::new(path.to_str().unwrap()).await.unwrap();
        let thread = store.create_thread(NewThread::user("a")).await.unwrap();
        assert!(store.get_thread(&thread.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sequences_assigned_per_thread() {
        let store = store().await;
        let t1 = store.create_thread(NewThread::user("a")).await.unwrap();
        let t2 = store.create_thread(NewThread::user("a")).await.unwrap();

        for i in 0..3 {
            let m = store
                .append_message(NewMessage::user(t1.id.clone(), format!("m{i}")))
                .await
                .unwrap();
            assert_eq!(m.sequence, i + 1);
        }
        let other = store
            .append_message(NewMessage::user(t2.id.clone(), "x"))
            .await
            .unwrap();
        assert_eq!(other.sequence, 1);

        let listed = store.list_messages(&t1.id).await.unwrap();
        assert_eq!(
            listed.iter().map(|m| m.sequence).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn message_transitions_enforced() {
        let store = store().await;
        let thread = store.create_thread(NewThread::user("a")).await.unwrap();
        let pending = store
            .append_message(NewMessage::assistant_pending(thread.id.clone()))
            .await
            .unwrap();

        let completed = store
            .complete_message(
                pending.id,
                MessageCompletion {
                    content: "done".into(),
                    model: Some("m".into()),
                    usage: Some(TokenUsage {
                        input_tokens: 5,
                        output_tokens: 7,
                    }),
                    provider_response_id: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(completed.status, MessageStatus::Completed);
        assert_eq!(completed.usage.unwrap().output_tokens, 7);

        let err = store.fail_message(pending.id, "late").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn tool_run_lifecycle() {
        let store = store().await;
        let thread = store.create_thread(NewThread::user("a")).await.unwrap();
        let message = store
            .append_message(NewMessage::assistant_pending(thread.id.clone()))
            .await
            .unwrap();

        let run = store
            .create_tool_run(NewToolRun {
                tool_key: "calculator".into(),
                agent_key: "a".into(),
                thread_id: thread.id.clone(),
                message_id: message.id,
                call_index: 0,
                input: serde_json::json!({"expr": "1+1"}),
            })
            .await
            .unwrap();
        assert_eq!(run.status, ToolRunStatus::Queued);

        let err = store
            .finish_tool_run(run.id, ToolRunOutcome::Succeeded(serde_json::json!(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let running = store.mark_tool_run_running(run.id).await.unwrap();
        assert!(running.started_at.is_some());

        let done = store
            .finish_tool_run(run.id, ToolRunOutcome::Failed("boom".into()))
            .await
            .unwrap();
        assert_eq!(done.status, ToolRunStatus::Failed);
        assert_eq!(done.error.as_deref(), Some("boom"));
        assert!(done.finished_at.is_some());
    }

    #[tokio::test]
    async fn metadata_flag_cas() {
        let store = store().await;
        let thread = store.create_thread(NewThread::user("a")).await.unwrap();

        assert!(store
            .try_acquire_metadata_flag(&thread.id, "memory_job_pending")
            .await
            .unwrap());
        assert!(!store
            .try_acquire_metadata_flag(&thread.id, "memory_job_pending")
            .await
            .unwrap());

        // The flag is visible on the thread row
        let reloaded = store.get_thread(&thread.id).await.unwrap().unwrap();
        assert!(reloaded.metadata_flag("memory_job_pending"));

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
    async fn cas_on_missing_thread_is_not_found() {
        let store = store().await;
        let err = store
            .try_acquire_metadata_flag(&ThreadId::new(), "memory_job_pending")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn parent_checked_at_creation() {
        let store = store().await;
        let err = store
            .create_thread(NewThread::tool("w", ThreadId::new(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ParentNotFound(_)));
    }

    #[tokio::test]
    async fn snapshot_reads_are_composed() {
        let store = store().await;
        let thread = store.create_thread(NewThread::user("a")).await.unwrap();
        store
            .append_message(NewMessage::user(thread.id.clone(), "hello"))
            .await
            .unwrap();
        store
            .insert_prompt(NewAgentPrompt {
                agent_key: "a".into(),
                version: 2,
                body: "v2".into(),
                is_active: true,
            })
            .await
            .unwrap();
        store
            .insert_prompt(NewAgentPrompt {
                agent_key: "a".into(),
                version: 3,
                body: "v3-retired".into(),
                is_active: false,
            })
            .await
            .unwrap();

        let snapshot = store
            .fetch_turn_snapshot(&thread.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.active_prompt.unwrap().body, "v2");
    }

    #[tokio::test]
    async fn purge_250_in_chunks_of_100() {
        let store = store().await;

        for _ in 0..250 {
            let thread = store.create_thread(NewThread::user("a")).await.unwrap();
            let message = store
                .append_message(NewMessage::user(thread.id.clone(), "m"))
                .await
                .unwrap();
            store
                .create_tool_run(NewToolRun {
                    tool_key: "t".into(),
                    agent_key: "a".into(),
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
                    agent_key: "a".into(),
                    thread_id: thread.id.clone(),
                    content: "f".into(),
                    source_message_ids: vec![message.id],
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

        assert_eq!(
            store.purge_soft_deleted(100).await.unwrap(),
            PurgeReport::default()
        );
    }

    #[tokio::test]
    async fn memories_round_trip_source_ids() {
        let store = store().await;
        let thread = store.create_thread(NewThread::user("a")).await.unwrap();
        let memory = store
            .insert_memory(NewMemory {
                owner: MemoryOwner::Agent,
                agent_key: "a".into(),
                thread_id: thread.id.clone(),
                content: "Likes terse answers".into(),
                source_message_ids: vec![MessageId(11), MessageId(12)],
                kind: Some("preference".into()),
            })
            .await
            .unwrap();
        assert_eq!(memory.source_message_ids, vec![MessageId(11), MessageId(12)]);

        let listed = store.list_memories("a").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].owner, MemoryOwner::Agent);
    }
}
