//! End-to-end turn orchestration over the in-memory store, a scripted
//! provider, and the built-in tools.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use threadloom_config::AppConfig;
use threadloom_core::auth::NoAuth;
use threadloom_core::error::{Error, HookError, ProviderError, QueueError, ToolError};
use threadloom_core::message::TokenUsage;
use threadloom_core::provider::{
    ChatProvider, ChatRequest, ChatResponse, RateLimitInfo, ToolCallRequest,
};
use threadloom_core::queue::{JobKind, JobQueue};
use threadloom_core::status::{MessageStatus, ToolRunStatus};
use threadloom_core::store::ThreadStore;
use threadloom_core::thread::{NewThread, ThreadId};
use threadloom_core::tool::{Tool, ToolResponse};
use threadloom_core::transcript::ChatThreadLog;
use threadloom_hooks::{HookOutcome, HookRegistry, HookRunner, ThreadHook};
use threadloom_prompt::PromptVariableService;
use threadloom_runtime::{AgentRegistry, ToolRegistry, TurnOrchestrator};
use threadloom_store::MemoryStore;
use threadloom_tools::{CalculatorTool, RememberTool};

// ── Test doubles ──────────────────────────────────────────────────────

struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<ChatResponse, ProviderError>>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<Result<ChatResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }

    fn text(content: &str) -> Result<ChatResponse, ProviderError> {
        Ok(ChatResponse {
            content: content.into(),
            tool_calls: vec![],
            model: "scripted-model".into(),
            usage: Some(TokenUsage {
                input_tokens: 50,
                output_tokens: 10,
            }),
            response_id: Some("resp_1".into()),
        })
    }

    fn tool_call(name: &str, arguments: serde_json::Value) -> Result<ChatResponse, ProviderError> {
        Ok(ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCallRequest {
                id: "call_1".into(),
                name: name.into(),
                arguments,
            }],
            model: "scripted-model".into(),
            usage: None,
            response_id: None,
        })
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::NotConfigured("script exhausted".into())))
    }
}

struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    async fn handle(&self, _arguments: serde_json::Value) -> Result<ToolResponse, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "failing".into(),
            reason: "deliberate failure".into(),
        })
    }
}

struct CountingHook {
    invocations: Arc<Mutex<u32>>,
}

#[async_trait]
impl ThreadHook for CountingHook {
    fn name(&self) -> &str {
        "counting"
    }
    async fn on_turn_committed(
        &self,
        _thread_id: &ThreadId,
    ) -> Result<HookOutcome, HookError> {
        *self.invocations.lock().await += 1;
        Ok(HookOutcome::Skipped("counted"))
    }
}

struct RecordingQueue {
    dispatched: Mutex<Vec<(JobKind, ThreadId)>>,
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn dispatch(&self, job: JobKind, thread_id: &ThreadId) -> Result<(), QueueError> {
        self.dispatched.lock().await.push((job, thread_id.clone()));
        Ok(())
    }
}

// ── Harness ───────────────────────────────────────────────────────────

const CONFIG: &str = r#"
    [[agents]]
    key = "concierge"
    name = "Concierge"
    model = "claude-sonnet-4"
    prompt_template = "You are a concierge. Facts:\n{MEMORIES.LIST}"

    [[agents.tools]]
    key = "calculator"

    [[agents.tools]]
    key = "remember"

    [[agents.tools]]
    key = "failing"
"#;

struct Harness {
    store: Arc<MemoryStore>,
    orchestrator: TurnOrchestrator,
    thread_id: ThreadId,
}

async fn harness(
    provider: ScriptedProvider,
    hooks: Vec<Arc<dyn ThreadHook>>,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let thread = store
        .create_thread(NewThread::user("concierge"))
        .await
        .unwrap();

    let mut tools = ToolRegistry::new();
    tools.register("calculator", || Box::new(CalculatorTool));
    let remember_store = store.clone();
    tools.register("remember", move || {
        Box::new(RememberTool::new(remember_store.clone()))
    });
    tools.register("failing", || Box::new(FailingTool));

    let config = AppConfig::from_toml_str(CONFIG).unwrap();
    let agents = Arc::new(AgentRegistry::from_config(&config, &tools).unwrap());

    let orchestrator = TurnOrchestrator::new(
        store.clone(),
        agents,
        Arc::new(tools),
        Arc::new(PromptVariableService::with_builtin_groups()),
        Arc::new(provider),
        Arc::new(NoAuth),
        Arc::new(HookRunner::new(hooks)),
    );

    Harness {
        store,
        orchestrator,
        thread_id: thread.id,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn text_only_turn_completes_assistant_message() {
    let h = harness(
        ScriptedProvider::new(vec![ScriptedProvider::text("Happy to help.")]),
        vec![],
    )
    .await;

    let outcome = h
        .orchestrator
        .run_turn(&h.thread_id, "Hello there")
        .await
        .unwrap();

    assert_eq!(outcome.message.status, MessageStatus::Completed);
    assert_eq!(outcome.message.content, "Happy to help.");
    assert_eq!(outcome.message.model.as_deref(), Some("scripted-model"));
    assert_eq!(outcome.message.usage.unwrap().total(), 60);
    assert_eq!(
        outcome.message.provider_response_id.as_deref(),
        Some("resp_1")
    );

    // Both messages persisted in sequence order
    let messages = h.store.list_messages(&h.thread_id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "Hello there");
    assert_eq!(messages[1].content, "Happy to help.");

    // Log holds the user and assistant entries, no invocations
    assert_eq!(outcome.log.messages().len(), 2);
    assert!(outcome.log.invocations().is_empty());
}

#[tokio::test]
async fn tool_call_round_trip_records_run_and_log() {
    let h = harness(
        ScriptedProvider::new(vec![
            ScriptedProvider::tool_call("calculator", serde_json::json!({"expression": "6 * 7"})),
            ScriptedProvider::text("The answer is 42."),
        ]),
        vec![],
    )
    .await;

    let outcome = h
        .orchestrator
        .run_turn(&h.thread_id, "What is six times seven?")
        .await
        .unwrap();

    assert_eq!(outcome.message.content, "The answer is 42.");

    let runs = h.store.list_tool_runs(&h.thread_id).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].tool_key, "calculator");
    assert_eq!(runs[0].status, ToolRunStatus::Succeeded);
    assert_eq!(runs[0].message_id, outcome.message.id);
    assert_eq!(runs[0].call_index, 0);
    assert!(runs[0].started_at.is_some());
    assert!(runs[0].finished_at.is_some());
    assert_eq!(runs[0].output.as_ref().unwrap()["message"], "42");

    assert_eq!(outcome.log.invocations().len(), 1);
    assert_eq!(outcome.log.invocations()[0].name, "calculator");
    assert_eq!(outcome.log.invocations()[0].result, "42");
}

#[tokio::test]
async fn failing_tool_yields_failed_run_but_turn_continues() {
    let h = harness(
        ScriptedProvider::new(vec![
            ScriptedProvider::tool_call("failing", serde_json::json!({})),
            ScriptedProvider::text("I could not use that tool."),
        ]),
        vec![],
    )
    .await;

    let outcome = h
        .orchestrator
        .run_turn(&h.thread_id, "Try the tool")
        .await
        .unwrap();

    // Turn finished normally despite the tool failure
    assert_eq!(outcome.message.status, MessageStatus::Completed);

    let runs = h.store.list_tool_runs(&h.thread_id).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, ToolRunStatus::Failed);
    let error = runs[0].error.as_deref().unwrap();
    assert!(!error.is_empty());
    assert!(error.contains("deliberate failure"));

    // The model saw a tool error result, not an exception
    assert!(outcome.log.invocations()[0].result.starts_with("Tool error:"));
}

#[tokio::test]
async fn unknown_tool_call_rejected_with_audit_run() {
    let h = harness(
        ScriptedProvider::new(vec![
            ScriptedProvider::tool_call("ghost", serde_json::json!({})),
            ScriptedProvider::text("Moving on."),
        ]),
        vec![],
    )
    .await;

    let outcome = h.orchestrator.run_turn(&h.thread_id, "Go").await.unwrap();
    assert_eq!(outcome.message.status, MessageStatus::Completed);

    let runs = h.store.list_tool_runs(&h.thread_id).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].tool_key, "ghost");
    assert_eq!(runs[0].status, ToolRunStatus::Failed);
    assert!(runs[0].error.as_deref().unwrap().contains("not available"));
}

#[tokio::test]
async fn provider_error_fails_message_and_skips_hooks() {
    let invocations = Arc::new(Mutex::new(0));
    let hook = Arc::new(CountingHook {
        invocations: invocations.clone(),
    });

    let rate_limited = ProviderError::RateLimited {
        info: RateLimitInfo {
            name: "requests_per_minute".into(),
            limit: 60,
            remaining: 0,
            resets_at: None,
            window_secs: Some(60),
        },
        retry_after_secs: 30,
    };
    let h = harness(ScriptedProvider::new(vec![Err(rate_limited)]), vec![hook]).await;

    let err = h
        .orchestrator
        .run_turn(&h.thread_id, "Hello?")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Provider(ProviderError::RateLimited { .. })));

    // The in-flight assistant message is failed, reason preserved
    let messages = h.store.list_messages(&h.thread_id).await.unwrap();
    let assistant = messages.last().unwrap();
    assert_eq!(assistant.status, MessageStatus::Failed);
    let reason = assistant.failed_reason.as_deref().unwrap();
    assert!(reason.contains("requests_per_minute"));
    assert!(reason.contains("30s"));

    // Hooks only run after a successful assistant message
    assert_eq!(*invocations.lock().await, 0);
}

#[tokio::test]
async fn hooks_run_after_successful_turn() {
    let invocations = Arc::new(Mutex::new(0));
    let hook = Arc::new(CountingHook {
        invocations: invocations.clone(),
    });
    let h = harness(
        ScriptedProvider::new(vec![ScriptedProvider::text("Done.")]),
        vec![hook],
    )
    .await;

    let outcome = h.orchestrator.run_turn(&h.thread_id, "Hi").await.unwrap();
    assert_eq!(*invocations.lock().await, 1);
    assert_eq!(outcome.hook_results.len(), 1);
    assert_eq!(outcome.hook_results[0].0, "counting");
}

#[tokio::test]
async fn completion_callback_observes_populated_log() {
    let h = harness(
        ScriptedProvider::new(vec![
            ScriptedProvider::tool_call("calculator", serde_json::json!({"expression": "2+2"})),
            ScriptedProvider::text("Four."),
        ]),
        vec![],
    )
    .await;

    let seen: Arc<std::sync::Mutex<Option<(usize, usize, String)>>> =
        Arc::new(std::sync::Mutex::new(None));
    let seen_in_callback = seen.clone();
    let callback = Box::new(move |log: &ChatThreadLog| {
        let last = log.messages().last().map(|m| m.content.clone()).unwrap_or_default();
        *seen_in_callback.lock().unwrap() =
            Some((log.messages().len(), log.invocations().len(), last));
    });

    h.orchestrator
        .run_turn_with_callback(&h.thread_id, "What is 2+2?", Some(callback))
        .await
        .unwrap();

    // The callback observed the final assistant entry and the tool
    // invocation — population happened before it fired.
    let seen = seen.lock().unwrap().clone().unwrap();
    assert_eq!(seen.0, 2);
    assert_eq!(seen.1, 1);
    assert_eq!(seen.2, "Four.");
}

#[tokio::test]
async fn memories_render_into_system_prompt_next_turn() {
    let h = harness(
        ScriptedProvider::new(vec![
            ScriptedProvider::tool_call(
                "remember",
                serde_json::json!({"fact": "Prefers aisle seats"}),
            ),
            ScriptedProvider::text("Noted."),
        ]),
        vec![],
    )
    .await;

    h.orchestrator
        .run_turn(&h.thread_id, "Remember that I prefer aisle seats")
        .await
        .unwrap();

    let memories = h.store.list_memories("concierge").await.unwrap();
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0].content, "Prefers aisle seats");
    // Attributed to the assistant message that triggered the tool
    assert_eq!(memories[0].source_message_ids.len(), 1);

    // The next turn's rendered prompt carries the memory block
    let rendered = h
        .orchestrator
        .preview_prompt(&h.thread_id, &Default::default())
        .await
        .unwrap();
    assert!(rendered.contains("- Prefers aisle seats"));
}

#[tokio::test]
async fn summary_hook_fires_through_full_stack() {
    let store = Arc::new(MemoryStore::new());
    let thread = store
        .create_thread(NewThread::user("concierge"))
        .await
        .unwrap();

    let queue = Arc::new(RecordingQueue {
        dispatched: Mutex::new(Vec::new()),
    });
    let config = AppConfig::from_toml_str(CONFIG).unwrap();
    let registry = HookRegistry::with_builtin_hooks(store.clone(), queue.clone(), &config.hooks);
    let hooks = Arc::new(HookRunner::from_registry(&registry, &config.hooks.enabled).unwrap());

    let mut tools = ToolRegistry::new();
    tools.register("calculator", || Box::new(CalculatorTool));
    let remember_store = store.clone();
    tools.register("remember", move || {
        Box::new(RememberTool::new(remember_store.clone()))
    });
    tools.register("failing", || Box::new(FailingTool));
    let agents = Arc::new(AgentRegistry::from_config(&config, &tools).unwrap());

    let orchestrator = TurnOrchestrator::new(
        store.clone(),
        agents,
        Arc::new(tools),
        Arc::new(PromptVariableService::with_builtin_groups()),
        Arc::new(ScriptedProvider::new(vec![ScriptedProvider::text(
            "First answer.",
        )])),
        Arc::new(NoAuth),
        hooks,
    );

    // One turn produces two completed messages (user + assistant), which
    // meets the first-summary minimum of 2.
    let outcome = orchestrator.run_turn(&thread.id, "Hello").await.unwrap();
    let summary_result = outcome
        .hook_results
        .iter()
        .find(|(name, _)| name == "thread_summary")
        .unwrap();
    assert!(matches!(
        summary_result.1,
        Ok(HookOutcome::Dispatched(JobKind::SummarizeThread))
    ));

    let dispatched = queue.dispatched.lock().await;
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].0, JobKind::SummarizeThread);
    assert_eq!(dispatched[0].1, thread.id);
}
