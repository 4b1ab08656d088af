//! Prompt-variable resolution for threadloom.
//!
//! Templates embed placeholders as `{GROUP.KEY}`. Each
//! [`PromptVariableGroup`] resolves one namespace of placeholders from a
//! [`PromptVariableContext`]; the [`PromptVariableService`] merges every
//! group's output (later groups win collisions, explicit overrides layer
//! last) and substitutes known placeholders literally.
//!
//! Unresolved placeholders degrade gracefully: a key whose value is
//! absent is left verbatim in the output — never replaced with an empty
//! string, never an error. A group that fails contributes nothing and
//! rendering continues; template rendering must never abort a turn.

mod context;
mod groups;
mod service;

pub use context::PromptVariableContext;
pub use groups::{MemoryVariables, ThreadVariables, UserVariables};
pub use service::{PromptVariableGroup, PromptVariableService};
