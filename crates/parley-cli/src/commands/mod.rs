//! Slash commands for interactive mode

mod history;
mod model;

pub use history::HistoryCommand;
pub use model::ModelCommand;

use parley_engine::{ConversationSession, MessageId};

/// Result of executing a slash command
#[derive(Debug, PartialEq, Eq)]
pub enum CommandResult {
    /// Show a message to the user (not sent to the model)
    Message(String),
    /// Regenerate the answer after message `N`
    Retry(usize),
    /// Replace a message's content
    Edit { id: MessageId, text: String },
    /// Delete a message
    Delete(MessageId),
    /// Rename the conversation
    Rename(String),
    /// Toggle search-augmented answers
    SetSearch(bool),
    /// Change the model
    ChangeModel(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command
pub fn execute_command(input: &str, session: &ConversationSession) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let parts: Vec<&str> = rest.splitn(2, ' ').collect();
    let command = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "quit" | "exit" | "q" => CommandResult::Exit,

        "history" | "ls" => HistoryCommand::execute(session),

        "model" | "m" => ModelCommand::execute(args, session),

        "retry" | "r" => match args.parse::<usize>() {
            Ok(index) => CommandResult::Retry(index),
            Err(_) => usage("/retry <index>"),
        },

        "edit" | "e" => {
            let (id, text) = args.split_once(' ').unwrap_or((args, ""));
            match (resolve_message_id(session, id), text.trim()) {
                (_, "") => usage("/edit <id> <text>"),
                (Some(id), text) => CommandResult::Edit {
                    id,
                    text: text.to_string(),
                },
                (None, _) => no_such_message(id),
            }
        }

        "delete" | "d" => {
            if args.is_empty() {
                usage("/delete <id>")
            } else {
                match resolve_message_id(session, args) {
                    Some(id) => CommandResult::Delete(id),
                    None => no_such_message(args),
                }
            }
        }

        "rename" => {
            if args.is_empty() {
                usage("/rename <title>")
            } else {
                CommandResult::Rename(args.to_string())
            }
        }

        "search" => match args.to_lowercase().as_str() {
            "on" | "true" | "1" => CommandResult::SetSearch(true),
            "off" | "false" | "0" => CommandResult::SetSearch(false),
            "" => CommandResult::Message(format!(
                "Search is {}",
                if session.config().search_enabled {
                    "on"
                } else {
                    "off"
                }
            )),
            _ => usage("/search on|off"),
        },

        _ => CommandResult::Unknown(command),
    })
}

/// Find the message whose id starts with `prefix`.
///
/// Ambiguous prefixes resolve to nothing.
pub fn resolve_message_id(session: &ConversationSession, prefix: &str) -> Option<MessageId> {
    if prefix.is_empty() {
        return None;
    }
    let mut matches = session
        .transcript()
        .messages()
        .iter()
        .filter_map(|m| m.id.as_ref())
        .filter(|id| id.as_str().starts_with(prefix));

    match (matches.next(), matches.next()) {
        (Some(id), None) => Some(id.clone()),
        _ => None,
    }
}

fn usage(text: &str) -> CommandResult {
    CommandResult::Message(format!("Usage: {}", text))
}

fn no_such_message(id: &str) -> CommandResult {
    CommandResult::Message(format!(
        "No message matching '{}'\nUse /history to list message ids",
        id
    ))
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?           Show this help message
  /history, /ls           List messages with their ids
  /retry, /r <index>      Regenerate the answer after message <index>
  /edit, /e <id> <text>   Replace a message's content (no regeneration)
  /delete, /d <id>        Delete a message
  /rename <title>         Rename this conversation
  /search [on|off]        Show or toggle search-augmented answers
  /model, /m [id]         Show or change the model
  /quit, /exit, /q        Exit parley

Press Ctrl-C while an answer is streaming to stop it.
Message ids may be abbreviated to any unique prefix."#
        .to_string()
}
