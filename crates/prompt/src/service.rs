//! The prompt-variable service — ordered group resolution and literal
//! placeholder substitution.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use threadloom_core::error::Error;

use crate::context::PromptVariableContext;
use crate::groups::{MemoryVariables, ThreadVariables, UserVariables};

/// A pluggable resolver contributing one namespace of placeholders.
///
/// `resolve` is a pure function of the context. Keys are full
/// `GROUP.KEY` names; a `None` value means "known but unset" and leaves
/// the placeholder untouched in the rendered output.
pub trait PromptVariableGroup: Send + Sync {
    fn name(&self) -> &str;

    fn resolve(
        &self,
        ctx: &PromptVariableContext<'_>,
    ) -> Result<HashMap<String, Option<String>>, Error>;
}

/// Composes variable groups and renders templates against them.
pub struct PromptVariableService {
    groups: Vec<Arc<dyn PromptVariableGroup>>,
}

impl PromptVariableService {
    /// An empty service; register groups in the order their values should
    /// apply (later groups win key collisions).
    pub fn new() -> Self {
        Self { groups: Vec::new() }
    }

    /// The built-in group set: thread, user, memories.
    pub fn with_builtin_groups() -> Self {
        let mut service = Self::new();
        service.register(Arc::new(ThreadVariables));
        service.register(Arc::new(UserVariables));
        service.register(Arc::new(MemoryVariables));
        service
    }

    /// Register an additional group. Consumers extend the engine this
    /// way; the engine itself never changes.
    pub fn register(&mut self, group: Arc<dyn PromptVariableGroup>) {
        self.groups.push(group);
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.name()).collect()
    }

    /// Merge every group's output into one namespace. A failing group is
    /// logged and contributes nothing; `None` values are dropped rather
    /// than erasing an earlier group's value.
    pub fn resolve_all(&self, ctx: &PromptVariableContext<'_>) -> HashMap<String, String> {
        let mut variables = HashMap::new();
        for group in &self.groups {
            match group.resolve(ctx) {
                Ok(resolved) => {
                    for (key, value) in resolved {
                        if let Some(value) = value {
                            variables.insert(key, value);
                        }
                    }
                }
                Err(e) => {
                    warn!(group = group.name(), error = %e, "Prompt variable group failed; skipping");
                }
            }
        }
        variables
    }

    /// Render the context's template. Every known `{GROUP.KEY}`
    /// occurrence is substituted; unknown or unset placeholders are left
    /// verbatim.
    pub fn render(&self, ctx: &PromptVariableContext<'_>) -> String {
        self.render_with_overrides(ctx, &HashMap::new())
    }

    /// Render with explicit caller overrides layered last.
    pub fn render_with_overrides(
        &self,
        ctx: &PromptVariableContext<'_>,
        overrides: &HashMap<String, String>,
    ) -> String {
        let mut variables = self.resolve_all(ctx);
        for (key, value) in overrides {
            variables.insert(key.clone(), value.clone());
        }

        let mut rendered = ctx.template().to_string();
        for (key, value) in &variables {
            let placeholder = format!("{{{key}}}");
            if rendered.contains(&placeholder) {
                rendered = rendered.replace(&placeholder, value);
            }
        }
        debug!(
            variables = variables.len(),
            rendered_len = rendered.len(),
            "Rendered prompt template"
        );
        rendered
    }
}

impl Default for PromptVariableService {
    fn default() -> Self {
        Self::with_builtin_groups()
    }
}
