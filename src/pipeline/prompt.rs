//! Prompt composition. Pure string building, no I/O.

use chrono::SecondsFormat;

use crate::pipeline::context::{ContextItem, EmailContext};

const SYSTEM_PROMPT: &str = concat!(
    "Role: You are a professional customer service manager.\n",
    "\n",
    "You MUST follow these constraints in priority order:\n",
    "1) [Highest Priority] If [Latest Business Rules] conflict with [Past Email History], ",
    "ALWAYS follow [Latest Business Rules].\n",
    "   - Never mention outdated prices/policies when a newer rule exists.\n",
    "2) Keep a natural conversation flow and match the tone of the current email thread.\n",
    "\n",
    "Output requirements:\n",
    "- Return ONLY the draft body text (no markdown fences).\n",
    "- The output must be directly usable as a Gmail Draft body.\n",
);

pub const NO_THREAD_FALLBACK: &str = "(no thread conversation found)";
pub const NO_HISTORY_FALLBACK: &str = "(no similar history found)";
pub const NO_RULES_FALLBACK: &str = "(no business rules found)";

/// System and user prompt for one draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptParts {
    pub system: String,
    pub user: String,
}

pub fn compose(ctx: &EmailContext) -> PromptParts {
    let rules = ctx
        .business_rules
        .iter()
        .map(|rule| {
            format!(
                "- {}: {} (updatedAt={})",
                rule.key,
                rule.content,
                rule.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let user = format!(
        "[Task]\n\
         Write a reply draft to the user's email.\n\
         \n\
         [Current Question]\n\
         {question}\n\
         \n\
         [Current Thread Conversation]\n\
         {thread}\n\
         \n\
         [Similar Past Email History]\n\
         {history}\n\
         \n\
         [Latest Business Rules]\n\
         {rules}\n\
         \n\
         [Instructions]\n\
         - Use Latest Business Rules as the source of truth.\n\
         - Keep the tone consistent with the current thread.\n\
         - Be concise, clear, and professional.\n",
        question = ctx.current_question,
        thread = or_fallback(bullets(&ctx.thread_conversation), NO_THREAD_FALLBACK),
        history = or_fallback(bullets(&ctx.similar_history), NO_HISTORY_FALLBACK),
        rules = or_fallback(rules, NO_RULES_FALLBACK),
    );

    PromptParts {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

fn bullets(items: &[ContextItem]) -> String {
    items
        .iter()
        .map(|item| format!("- {}", item.display_text()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn or_fallback(block: String, fallback: &str) -> String {
    if block.trim().is_empty() {
        fallback.to_string()
    } else {
        block
    }
}
