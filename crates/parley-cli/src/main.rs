//! parley - terminal chat client with resumable conversations

mod commands;
mod config;
mod store;
mod utils;

use anyhow::Context;
use clap::Parser;
use parley_ai::providers::openai::{DEFAULT_BASE_URL, OpenAICompatProvider};
use parley_engine::{
    CheckpointPolicy, ConversationId, ConversationSession, ConversationStore, MemoryStore,
    SessionConfig, SessionEvent, SessionHandle, TurnOutcome,
};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

use crate::store::JsonlStore;

/// parley - chat with an OpenAI-compatible model from the terminal
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[arg(long)]
    base_url: Option<String>,

    /// Request search-augmented answers with citations
    #[arg(short, long)]
    search: bool,

    /// Run in non-interactive mode with a single prompt
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Resume a saved conversation by ID
    #[arg(long)]
    resume: Option<String>,

    /// List saved conversations
    #[arg(long)]
    sessions: bool,

    /// Delete a saved conversation by ID
    #[arg(long)]
    delete: Option<String>,

    /// Keep the conversation in memory only
    #[arg(long)]
    ephemeral: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

/// What to stream next
enum Turn {
    Submit(String),
    Retry(usize),
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("parley=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // Initialize config and exit
    if args.init_config {
        let path = config::Config::init().context("creating config file")?;
        println!("Config file at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let cfg = config::Config::load();
    let data_dir = cfg.data_dir();

    if args.sessions {
        let store = JsonlStore::open(&data_dir)?;
        return list_conversations(&store).await;
    }

    if let Some(id) = args.delete {
        let store = JsonlStore::open(&data_dir)?;
        store
            .delete_conversation(&ConversationId::from(id.as_str()))
            .await
            .with_context(|| format!("deleting conversation {}", id))?;
        println!("Deleted conversation {}", id);
        return Ok(());
    }

    let Some(api_key) = cfg.api_key() else {
        eprintln!("Error: No API key found");
        eprintln!();
        eprintln!("Set one with: export PARLEY_API_KEY=your-key");
        eprintln!("Or add it to the config file: parley --init-config");
        std::process::exit(1);
    };

    let base_url = args
        .base_url
        .or(cfg.base_url.clone())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let provider = Arc::new(OpenAICompatProvider::new(api_key, base_url));

    let store: Arc<dyn ConversationStore> = if args.ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(JsonlStore::open(&data_dir)?)
    };

    let mut session_config = SessionConfig::new(
        args.model
            .or(cfg.model.clone())
            .unwrap_or_else(|| config::DEFAULT_MODEL.to_string()),
    );
    session_config.search_enabled = args.search || cfg.search.unwrap_or(false);
    if let Some(granularity) = cfg.checkpoint_granularity {
        session_config.checkpoint = CheckpointPolicy::every(granularity);
    }

    let mut session = match args.resume {
        Some(id) => {
            let session = ConversationSession::resume(
                ConversationId::from(id.as_str()),
                session_config,
                provider,
                store,
            )
            .await
            .with_context(|| format!("loading conversation {}", id))?;
            println!(
                "Resuming conversation {} ({} messages)",
                id,
                session.transcript().len()
            );
            session
        }
        None => ConversationSession::new(session_config, provider, store),
    };

    spawn_interrupt_listener(session.handle());

    // Non-interactive mode
    if let Some(command) = args.command {
        return run_turn(&mut session, Turn::Submit(command)).await;
    }

    run_interactive(&mut session).await
}

/// What a Ctrl-C did
#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    /// A streaming answer was stopped
    StoppedAnswer,
    /// Nothing was streaming; the process should exit
    Exit,
}

fn on_interrupt(handle: &SessionHandle) -> Interrupt {
    if handle.abort() {
        Interrupt::StoppedAnswer
    } else {
        Interrupt::Exit
    }
}

/// Listen for Ctrl-C for the life of the process.
///
/// Tokio keeps SIGINT for the rest of the process, so an idle Ctrl-C
/// exits from here.
fn spawn_interrupt_listener(handle: SessionHandle) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if on_interrupt(&handle) == Interrupt::Exit {
                eprintln!();
                std::process::exit(130);
            }
        }
    });
}

/// Print one turn's answer as it streams.
///
/// Deltas are written while they form a contiguous prefix; after a lag the
/// sealed message supplies the rest.
async fn print_events<W: Write>(
    mut receiver: broadcast::Receiver<SessionEvent>,
    mut out: W,
) -> W {
    let mut printed = 0usize;
    let mut lagged = false;
    loop {
        match receiver.recv().await {
            Ok(SessionEvent::ContentDelta { delta, .. }) if !lagged => {
                printed += delta.chars().count();
                let _ = write!(out, "{}", delta);
                let _ = out.flush();
            }
            Ok(SessionEvent::MessageSealed { message, .. }) => {
                let tail: String = message.content.chars().skip(printed).collect();
                let _ = writeln!(out, "{}", tail);
                printed = 0;
                lagged = false;
            }
            Ok(event) if event.is_terminal() => break,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!("Output fell behind by {} events", skipped);
                lagged = true;
            }
            Err(RecvError::Closed) => break,
        }
    }
    out
}

/// Stream one turn to stdout
async fn run_turn(session: &mut ConversationSession, turn: Turn) -> anyhow::Result<()> {
    let printer = tokio::spawn(print_events(session.subscribe(), io::stdout()));

    let result = match turn {
        Turn::Submit(text) => session.submit(&text).await,
        Turn::Retry(index) => session.retry(index).await,
    };

    match result {
        Ok(outcome) => {
            let _ = printer.await;
            match outcome {
                TurnOutcome::Completed => {}
                TurnOutcome::Aborted => eprintln!("[stopped]"),
                TurnOutcome::Errored { message } => eprintln!("[error: {}]", message),
            }
        }
        Err(e) => {
            printer.abort();
            eprintln!("Error: {}", e);
        }
    }
    Ok(())
}

async fn run_interactive(session: &mut ConversationSession) -> anyhow::Result<()> {
    // Show minimal startup info (only if TTY)
    if io::IsTerminal::is_terminal(&io::stderr()) {
        let model = session.config().model_id.clone();
        match session.conversation_id() {
            Some(id) => eprintln!("parley ({}) conversation: {}", model, id.short()),
            None => eprintln!("parley ({})", model),
        }
        eprintln!("Type /help for commands.");
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let Some(result) = commands::execute_command(input, session) else {
            println!();
            run_turn(session, Turn::Submit(input.to_string())).await?;
            println!();
            continue;
        };

        match result {
            commands::CommandResult::Exit => break,
            commands::CommandResult::Message(msg) => println!("{}", msg),
            commands::CommandResult::Retry(index) => {
                println!();
                run_turn(session, Turn::Retry(index)).await?;
            }
            commands::CommandResult::Edit { id, text } => {
                if session.edit_message(&id, &text).await {
                    println!("Edited message {}", id.short());
                } else {
                    println!("No message {}", id.short());
                }
            }
            commands::CommandResult::Delete(id) => {
                if session.delete_message(&id).await {
                    println!("Deleted message {}", id.short());
                } else {
                    println!("No message {}", id.short());
                }
            }
            commands::CommandResult::Rename(title) => match session.rename(&title).await {
                Ok(()) => println!("Renamed to: {}", title),
                Err(e) => println!("Rename failed: {}", e),
            },
            commands::CommandResult::SetSearch(enabled) => {
                session.set_search_enabled(enabled);
                println!("Search {}", if enabled { "on" } else { "off" });
            }
            commands::CommandResult::ChangeModel(model) => {
                println!("Switched to: {}", model);
                session.set_model(model);
            }
            commands::CommandResult::Unknown(cmd) => {
                println!("Unknown command: /{}", cmd);
                println!("Type /help for available commands.");
            }
        }
        println!();
    }

    Ok(())
}

async fn list_conversations(store: &JsonlStore) -> anyhow::Result<()> {
    let conversations = store.list_conversations().await?;
    if conversations.is_empty() {
        println!("No saved conversations found.");
        println!("Conversations are stored in: {}", store.dir().display());
        return Ok(());
    }

    println!("Saved conversations:\n");
    println!("{:<38} {:<18} {:<6} Title", "ID", "Updated", "Msgs");
    println!("{}", "-".repeat(90));
    for c in conversations {
        println!(
            "{:<38} {:<18} {:<6} {}",
            c.id,
            utils::format_timestamp(c.updated_at),
            c.message_count,
            utils::truncate_chars(&c.title, 40)
        );
    }
    println!("\nResume with: parley --resume <conversation-id>");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_ai::Role;
    use parley_engine::{Message, RequestController};

    fn delta(text: &str) -> SessionEvent {
        SessionEvent::ContentDelta {
            index: 1,
            delta: text.into(),
        }
    }

    fn sealed(text: &str) -> SessionEvent {
        SessionEvent::MessageSealed {
            index: 1,
            message: Message::new(Role::Assistant, text),
        }
    }

    fn idle() -> SessionEvent {
        SessionEvent::StateChanged {
            state: parley_engine::SessionState::Idle,
        }
    }

    #[tokio::test]
    async fn test_prints_deltas_then_sealed_tail() {
        let (tx, rx) = broadcast::channel(16);
        for event in [delta("Hel"), delta("lo"), sealed("Hello\n\n_Generation stopped._"), idle()] {
            tx.send(event).unwrap();
        }

        let out = print_events(rx, Vec::new()).await;
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Hello\n\n_Generation stopped._\n"
        );
    }

    #[tokio::test]
    async fn test_lagged_output_recovers_from_sealed_message() {
        let (tx, rx) = broadcast::channel(2);
        for event in [delta("a"), delta("b"), delta("c"), delta("d"), sealed("abcd"), idle()] {
            tx.send(event).unwrap();
        }

        let out = print_events(rx, Vec::new()).await;
        assert_eq!(String::from_utf8(out).unwrap(), "abcd\n");
    }

    #[tokio::test]
    async fn test_interrupt_exits_only_when_idle() {
        let store = Arc::new(MemoryStore::new());
        let conv = store.create_conversation("t").await.unwrap();
        let controller = RequestController::new();
        let session = ConversationSession::resume(
            conv.clone(),
            SessionConfig::new("test-model"),
            Arc::new(parley_ai::providers::openai::OpenAICompatProvider::new(
                "key",
                "http://127.0.0.1:9",
            )),
            store,
        )
        .await
        .unwrap()
        .with_controller(controller.clone());
        let handle = session.handle();

        assert_eq!(on_interrupt(&handle), Interrupt::Exit);

        let ticket = controller.start(&conv).unwrap();
        assert_eq!(on_interrupt(&handle), Interrupt::StoppedAnswer);
        assert!(ticket.is_cancelled());

        drop(ticket);
        assert_eq!(on_interrupt(&handle), Interrupt::Exit);
    }
}
