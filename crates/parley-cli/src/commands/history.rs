//! /history command - list the transcript with message ids

use super::CommandResult;
use crate::utils::preview;
use parley_engine::ConversationSession;

pub struct HistoryCommand;

impl HistoryCommand {
    pub fn execute(session: &ConversationSession) -> CommandResult {
        let messages = session.transcript().messages();
        if messages.is_empty() {
            return CommandResult::Message("No messages yet.".to_string());
        }

        let mut output = match (session.title(), session.conversation_id()) {
            (Some(title), Some(id)) => format!("{} ({})\n", title, id.short()),
            _ => String::from("Unsaved conversation\n"),
        };
        output.push_str(&"-".repeat(40));
        output.push('\n');

        for (index, message) in messages.iter().enumerate() {
            let id = message
                .id
                .as_ref()
                .map(|id| id.short().to_string())
                .unwrap_or_else(|| "--------".to_string());
            output.push_str(&format!(
                "{:>3}  {}  [{}] {}\n",
                index,
                id,
                message.role,
                preview(&message.content, 60)
            ));
        }

        output.push_str("\nRetry an answer with /retry <index of the question>");
        CommandResult::Message(output)
    }
}
