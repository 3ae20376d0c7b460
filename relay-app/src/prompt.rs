//! Prompt assembly for the completion provider.

use relay_store::{HistoryStore, Turn};

const EMPTY_HISTORY_PLACEHOLDER: &str = "(no previous messages)";

/// System instructions + transcript so far + the new user message.
/// The whole conversation rides in one prompt because the chat surface
/// has no message-level API.
pub fn build_prompt(system_prompt: &str, history: &[Turn], new_message: &str) -> String {
    let rendered = HistoryStore::render(history);
    let rendered = rendered.trim();
    let conversation = if rendered.is_empty() {
        EMPTY_HISTORY_PLACEHOLDER
    } else {
        rendered
    };

    format!(
        "{}\n\nConversation so far:\n{}\n\nuser: {}\nassistant:",
        system_prompt.trim(),
        conversation,
        new_message
    )
}
