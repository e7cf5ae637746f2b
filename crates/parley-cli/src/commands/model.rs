//! /model command - show or switch the model

use super::CommandResult;
use parley_engine::ConversationSession;

pub struct ModelCommand;

impl ModelCommand {
    /// Show the current model with no args, otherwise switch to `args`
    pub fn execute(args: &str, session: &ConversationSession) -> CommandResult {
        let current = &session.config().model_id;
        if args.is_empty() {
            CommandResult::Message(format!(
                "Current model: {}\nSwitch with: /model <id>",
                current
            ))
        } else if args == current {
            CommandResult::Message(format!("Already using {}", current))
        } else {
            CommandResult::ChangeModel(args.to_string())
        }
    }
}
