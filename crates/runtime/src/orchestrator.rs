//! The per-turn orchestrator.
//!
//! Control flow per turn: persist the inbound user message → build the
//! ThreadState snapshot → render the system prompt → drive the model
//! exchange (tool calls routed through the executor) → persist the
//! assistant message with a terminal status → run hooks.
//!
//! A turn that fails at the provider call still persists the assistant
//! message as `failed` (the reason preserves rate-limit detail) and does
//! NOT run hooks.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use threadloom_core::auth::AuthResolver;
use threadloom_core::error::{Error, HookError};
use threadloom_core::message::{Message, NewMessage};
use threadloom_core::provider::{ChatProvider, ChatRequest, ChatResponse, ExchangeMessage};
use threadloom_core::state::StateAggregator;
use threadloom_core::status::{MessageRole, MessageStatus};
use threadloom_core::store::{MessageCompletion, ThreadStore};
use threadloom_core::thread::ThreadId;
use threadloom_core::transcript::ChatThreadLog;
use threadloom_hooks::{HookOutcome, HookRunner};
use threadloom_prompt::{PromptVariableContext, PromptVariableService};

use crate::executor::ToolExecutor;
use crate::registry::{AgentRegistry, ToolRegistry};

/// Caller-supplied completion callback. Always observes the
/// fully-populated [`ChatThreadLog`].
pub type CompletionCallback = Box<dyn FnOnce(&ChatThreadLog) + Send>;

/// Guarantees the log's final recording runs exactly once per request,
/// and strictly before any caller-supplied callback.
pub struct CompletionCapture {
    callback: Option<CompletionCallback>,
    recorded: bool,
}

impl CompletionCapture {
    pub fn new(callback: Option<CompletionCallback>) -> Self {
        Self {
            callback,
            recorded: false,
        }
    }

    /// Record the final assistant response into the log, then fire the
    /// caller's callback. Subsequent calls are no-ops.
    pub fn complete(&mut self, log: &mut ChatThreadLog, response: &ChatResponse) {
        if self.recorded {
            return;
        }
        self.recorded = true;
        if !response.content.is_empty() {
            log.record_message(MessageRole::Assistant, &response.content);
        }
        if let Some(callback) = self.callback.take() {
            callback(log);
        }
    }
}

/// What one finished turn produced.
#[derive(Debug)]
pub struct TurnOutcome {
    /// The persisted assistant message (terminal status)
    pub message: Message,
    /// The in-memory trace of the model exchange
    pub log: ChatThreadLog,
    /// Per-hook results, in execution order
    pub hook_results: Vec<(String, Result<HookOutcome, HookError>)>,
}

/// Orchestrates one model turn end to end.
pub struct TurnOrchestrator {
    store: Arc<dyn ThreadStore>,
    tools: Arc<ToolRegistry>,
    prompts: Arc<PromptVariableService>,
    provider: Arc<dyn ChatProvider>,
    auth: Arc<dyn AuthResolver>,
    hooks: Arc<HookRunner>,
    aggregator: StateAggregator,
    executor: ToolExecutor,
}

impl TurnOrchestrator {
    pub fn new(
        store: Arc<dyn ThreadStore>,
        agents: Arc<AgentRegistry>,
        tools: Arc<ToolRegistry>,
        prompts: Arc<PromptVariableService>,
        provider: Arc<dyn ChatProvider>,
        auth: Arc<dyn AuthResolver>,
        hooks: Arc<HookRunner>,
    ) -> Self {
        Self {
            aggregator: StateAggregator::new(store.clone(), agents),
            executor: ToolExecutor::new(store.clone()),
            store,
            tools,
            prompts,
            provider,
            auth,
            hooks,
        }
    }

    /// Process one inbound user message.
    pub async fn run_turn(
        &self,
        thread_id: &ThreadId,
        user_content: &str,
    ) -> Result<TurnOutcome, Error> {
        self.run_turn_with_callback(thread_id, user_content, None)
            .await
    }

    /// Process one inbound user message, invoking `on_complete` with the
    /// populated log once the exchange finishes.
    pub async fn run_turn_with_callback(
        &self,
        thread_id: &ThreadId,
        user_content: &str,
        on_complete: Option<CompletionCallback>,
    ) -> Result<TurnOutcome, Error> {
        info!(thread_id = %thread_id, "Processing turn");

        // 1. Persist the inbound user message; it becomes part of the
        //    snapshot the rest of the turn sees.
        self.store
            .append_message(NewMessage::user(thread_id.clone(), user_content))
            .await?;

        // 2. Immutable per-turn snapshot.
        let state = Arc::new(self.aggregator.load(thread_id).await?);

        // 3. Resolve the authenticated user; lookup failures degrade to
        //    anonymous rendering rather than failing the turn.
        let user = match self.auth.resolve_user(state.thread()).await {
            Ok(user) => user,
            Err(e) => {
                warn!(thread_id = %thread_id, error = %e, "Auth lookup failed; rendering without user");
                None
            }
        };

        // 4. Render the system prompt against the snapshot.
        let mut ctx = PromptVariableContext::new(&state);
        if let Some(user) = &user {
            ctx = ctx.with_user(user);
        }
        let system_prompt = self.prompts.render(&ctx);

        // 5. The assistant message row exists before the model call so
        //    tool runs can reference it.
        let pending = self
            .store
            .append_message(NewMessage::assistant_pending(thread_id.clone()))
            .await?;

        // 6. Build and wire this turn's tools.
        let prepared = self
            .executor
            .prepare_tools(&self.tools, &state, pending.id)?;
        let tool_definitions: Vec<_> = prepared.iter().map(|t| t.definition()).collect();

        let mut log = ChatThreadLog::new();
        log.record_message(MessageRole::User, user_content);
        let mut capture = CompletionCapture::new(on_complete);

        // History for the exchange: completed messages only, in sequence
        // order (the pending row is not in the snapshot).
        let mut exchange: Vec<ExchangeMessage> = state
            .history()
            .iter()
            .filter(|m| m.status == MessageStatus::Completed)
            .map(|m| match m.role {
                MessageRole::User => ExchangeMessage::user(&m.content),
                MessageRole::Assistant => ExchangeMessage::assistant(&m.content, vec![]),
            })
            .collect();

        let params = &state.agent().params;
        let mut step: u32 = 0;
        let response = loop {
            step += 1;

            let request = ChatRequest {
                model: params.model.clone(),
                system_prompt: system_prompt.clone(),
                messages: exchange.clone(),
                tools: tool_definitions.clone(),
                provider_tools: state.provider_tool_bindings().to_vec(),
                temperature: params.temperature,
                top_p: params.top_p,
                max_output_tokens: params.max_output_tokens,
            };

            let response = match self.provider.complete(request).await {
                Ok(response) => response,
                Err(e) => {
                    // Provider errors are not retried here. The message
                    // fails with a human-readable reason (rate-limit
                    // detail included via Display), and hooks do not run.
                    let reason = e.to_string();
                    self.store.fail_message(pending.id, &reason).await?;
                    return Err(Error::Provider(e));
                }
            };

            if response.tool_calls.is_empty() {
                break response;
            }

            debug!(
                thread_id = %thread_id,
                step,
                tool_calls = response.tool_calls.len(),
                "Executing tool calls"
            );
            if !response.content.is_empty() {
                log.record_message(MessageRole::Assistant, &response.content);
            }
            exchange.push(ExchangeMessage::assistant(
                &response.content,
                response.tool_calls.clone(),
            ));

            for (index, call) in response.tool_calls.iter().enumerate() {
                let tool = prepared.iter().find(|t| t.name() == call.name);
                let executed = match tool {
                    Some(tool) => {
                        self.executor
                            .execute(tool.as_ref(), call, index as u32, &state, pending.id)
                            .await?
                    }
                    None => {
                        self.executor
                            .reject_unknown(call, index as u32, &state, pending.id)
                            .await?
                    }
                };
                log.record_invocation(
                    &call.name,
                    call.arguments.clone(),
                    &executed.result_text,
                );
                exchange.push(ExchangeMessage::tool_result(
                    &call.id,
                    &executed.result_text,
                ));
            }

            if step >= params.max_steps {
                warn!(
                    thread_id = %thread_id,
                    steps = step,
                    "Max reasoning steps reached; forcing text response"
                );
                break ChatResponse {
                    content: "Maximum reasoning steps reached. Please continue with further guidance."
                        .into(),
                    tool_calls: vec![],
                    model: params.model.clone(),
                    usage: None,
                    response_id: None,
                };
            }
        };

        // 7. Log population happens-before the caller's callback.
        capture.complete(&mut log, &response);

        // 8. Terminal status for the assistant message.
        let message = self
            .store
            .complete_message(
                pending.id,
                MessageCompletion {
                    content: response.content.clone(),
                    model: Some(response.model.clone()),
                    usage: response.usage,
                    provider_response_id: response.response_id.clone(),
                },
            )
            .await?;
        self.store.touch_thread(thread_id).await?;

        // 9. Hooks run only after a successful assistant message; each
        //    evaluates its own threshold against refreshed state.
        let hook_results = self.hooks.run_all(thread_id).await;

        Ok(TurnOutcome {
            message,
            log,
            hook_results,
        })
    }

    /// Render the active prompt for a thread without running a turn.
    /// Useful for previewing what the model would receive.
    pub async fn preview_prompt(
        &self,
        thread_id: &ThreadId,
        overrides: &HashMap<String, String>,
    ) -> Result<String, Error> {
        let state = self.aggregator.load(thread_id).await?;
        let ctx = PromptVariableContext::new(&state);
        Ok(self.prompts.render_with_overrides(&ctx, overrides))
    }

    /// Access the aggregator, e.g. to inspect a snapshot in diagnostics.
    pub fn state_aggregator(&self) -> &StateAggregator {
        &self.aggregator
    }
}
