//! Tool invocation runtime.
//!
//! The executor owns the ToolRun lifecycle for every call: `queued` on
//! creation, `running` before the handler (never skipped, even for
//! instantaneous handlers), then `succeeded` or `failed`. A handler error
//! is caught here, recorded with a non-empty error text, and turned into
//! a tool-error result for the model — it never crosses the invocation
//! boundary into the turn.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use threadloom_core::error::{ConfigError, Error, StoreError};
use threadloom_core::message::MessageId;
use threadloom_core::provider::ToolCallRequest;
use threadloom_core::state::ThreadState;
use threadloom_core::store::ThreadStore;
use threadloom_core::tool::{RunLogContext, Tool, ToolRunLogger};
use threadloom_core::tool_run::{NewToolRun, ToolRunId, ToolRunOutcome};

use crate::registry::ToolRegistry;

/// [`ToolRunLogger`] over the persistence collaborator.
pub struct StoreRunLogger {
    store: Arc<dyn ThreadStore>,
}

impl StoreRunLogger {
    pub fn new(store: Arc<dyn ThreadStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolRunLogger for StoreRunLogger {
    async fn begin(&self, run: NewToolRun) -> Result<ToolRunId, StoreError> {
        Ok(self.store.create_tool_run(run).await?.id)
    }

    async fn mark_running(&self, id: ToolRunId) -> Result<(), StoreError> {
        self.store.mark_tool_run_running(id).await?;
        Ok(())
    }

    async fn finish(&self, id: ToolRunId, outcome: ToolRunOutcome) -> Result<(), StoreError> {
        self.store.finish_tool_run(id, outcome).await?;
        Ok(())
    }
}

/// The result of one executed (or rejected) tool call, as fed back to
/// the model.
#[derive(Debug)]
pub struct ExecutedCall {
    pub run_id: ToolRunId,
    /// Text handed back to the model as the tool result
    pub result_text: String,
    pub failed: bool,
}

/// Builds, wires, and invokes tools for one turn.
pub struct ToolExecutor {
    logger: Arc<dyn ToolRunLogger>,
}

impl ToolExecutor {
    pub fn new(store: Arc<dyn ThreadStore>) -> Self {
        Self {
            logger: Arc::new(StoreRunLogger::new(store)),
        }
    }

    /// Construct this turn's tools from the agent's bindings, wiring each
    /// optional capability independently: configuration first, then the
    /// turn snapshot, then run-logging context.
    pub fn prepare_tools(
        &self,
        registry: &ToolRegistry,
        state: &Arc<ThreadState>,
        message_id: MessageId,
    ) -> Result<Vec<Box<dyn Tool>>, ConfigError> {
        state
            .tool_bindings()
            .iter()
            .map(|binding| {
                let mut tool = registry.build(&binding.key)?;
                if let Some(configurable) = tool.as_configurable() {
                    configurable.apply_config(&binding.options);
                }
                if let Some(state_aware) = tool.as_state_aware() {
                    state_aware.bind_state(state.clone());
                }
                if let Some(run_logging) = tool.as_run_logging() {
                    run_logging.bind_run_logger(
                        self.logger.clone(),
                        RunLogContext {
                            tool_key: binding.key.clone(),
                            message_id,
                        },
                    );
                }
                Ok(tool)
            })
            .collect()
    }

    /// Invoke one tool call, driving its run record through the full
    /// lifecycle.
    pub async fn execute(
        &self,
        tool: &dyn Tool,
        call: &ToolCallRequest,
        call_index: u32,
        state: &ThreadState,
        message_id: MessageId,
    ) -> Result<ExecutedCall, Error> {
        let run_id = self
            .logger
            .begin(NewToolRun {
                tool_key: call.name.clone(),
                agent_key: state.agent().key.clone(),
                thread_id: state.thread().id.clone(),
                message_id,
                call_index,
                input: call.arguments.clone(),
            })
            .await?;
        self.logger.mark_running(run_id).await?;

        match tool.handle(call.arguments.clone()).await {
            Ok(response) => {
                debug!(tool = %call.name, run_id = %run_id, "Tool call succeeded");
                let output = serde_json::json!({
                    "message": response.message,
                    "payload": response.payload,
                });
                self.logger
                    .finish(run_id, ToolRunOutcome::Succeeded(output))
                    .await?;
                Ok(ExecutedCall {
                    run_id,
                    result_text: response.message,
                    failed: false,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(tool = %call.name, run_id = %run_id, error = %reason, "Tool call failed");
                self.logger
                    .finish(run_id, ToolRunOutcome::Failed(reason.clone()))
                    .await?;
                Ok(ExecutedCall {
                    run_id,
                    result_text: format!("Tool error: {reason}"),
                    failed: true,
                })
            }
        }
    }

    /// Record a call the model made against a tool the agent does not
    /// have. The run still exists for audit, immediately failed.
    pub async fn reject_unknown(
        &self,
        call: &ToolCallRequest,
        call_index: u32,
        state: &ThreadState,
        message_id: MessageId,
    ) -> Result<ExecutedCall, Error> {
        let run_id = self
            .logger
            .begin(NewToolRun {
                tool_key: call.name.clone(),
                agent_key: state.agent().key.clone(),
                thread_id: state.thread().id.clone(),
                message_id,
                call_index,
                input: call.arguments.clone(),
            })
            .await?;
        self.logger.mark_running(run_id).await?;
        let reason = format!("Tool not available to this agent: {}", call.name);
        self.logger
            .finish(run_id, ToolRunOutcome::Failed(reason.clone()))
            .await?;
        Ok(ExecutedCall {
            run_id,
            result_text: format!("Tool error: {reason}"),
            failed: true,
        })
    }
}
