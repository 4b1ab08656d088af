//! Built-in prompt variable groups.

use std::collections::HashMap;

use threadloom_core::error::Error;

use crate::context::PromptVariableContext;
use crate::service::PromptVariableGroup;

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Thread identity, title, rolling summaries, and the current UTC time.
pub struct ThreadVariables;

impl PromptVariableGroup for ThreadVariables {
    fn name(&self) -> &str {
        "thread"
    }

    fn resolve(
        &self,
        ctx: &PromptVariableContext<'_>,
    ) -> Result<HashMap<String, Option<String>>, Error> {
        let thread = ctx.thread();
        Ok(HashMap::from([
            ("THREAD.ID".to_string(), Some(thread.id.to_string())),
            ("THREAD.TITLE".to_string(), non_blank(thread.title.as_deref())),
            (
                "THREAD.SUMMARY".to_string(),
                non_blank(thread.summary.as_deref()),
            ),
            (
                "THREAD.LONG_SUMMARY".to_string(),
                non_blank(thread.long_summary.as_deref()),
            ),
            (
                "THREAD.CURRENT_TIME".to_string(),
                Some(chrono::Utc::now().to_rfc3339()),
            ),
        ]))
    }
}

/// The authenticated user's name and email, each individually omitted
/// when absent or blank.
pub struct UserVariables;

impl PromptVariableGroup for UserVariables {
    fn name(&self) -> &str {
        "user"
    }

    fn resolve(
        &self,
        ctx: &PromptVariableContext<'_>,
    ) -> Result<HashMap<String, Option<String>>, Error> {
        let user = ctx.user();
        Ok(HashMap::from([
            (
                "USER.NAME".to_string(),
                user.and_then(|u| non_blank(u.name.as_deref())),
            ),
            (
                "USER.EMAIL".to_string(),
                user.and_then(|u| non_blank(u.email.as_deref())),
            ),
        ]))
    }
}

/// The thread's memories as a bullet block; omitted entirely when the
/// memory list is empty.
pub struct MemoryVariables;

impl PromptVariableGroup for MemoryVariables {
    fn name(&self) -> &str {
        "memories"
    }

    fn resolve(
        &self,
        ctx: &PromptVariableContext<'_>,
    ) -> Result<HashMap<String, Option<String>>, Error> {
        let memories = ctx.memories();
        let block = if memories.is_empty() {
            None
        } else {
            let mut block = String::new();
            for memory in memories {
                block.push_str("- ");
                block.push_str(&memory.content);
                block.push('\n');
            }
            Some(block.trim_end().to_string())
        };
        Ok(HashMap::from([("MEMORIES.LIST".to_string(), block)]))
    }
}
