//! Conversation session: submit, stream, retry, abort, edit, delete

use futures::StreamExt;
use parking_lot::Mutex;
use parley_ai::{CompletionEvent, CompletionProvider, CompletionRequest, Role, StreamEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::{
    accumulator::{SealReason, StreamSession},
    checkpoint::{CheckpointPolicy, Checkpointer},
    controller::{RequestController, StreamTicket},
    error::{Error, Result},
    events::SessionEvent,
    ids::{ConversationId, MessageId},
    store::ConversationStore,
    transcript::{Message, Transcript},
    transport::{RetryConfig, open_stream},
};

/// Longest conversation title derived from the first message
pub const TITLE_MAX_CHARS: usize = 60;

/// Lifecycle of the session's current turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    /// Request dispatched, no event received yet
    Sending,
    Streaming,
    /// Stream completed, final write pending
    Finalizing,
    Aborted,
    Errored,
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Aborted,
    Errored { message: String },
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Model requested from the endpoint
    pub model_id: String,
    /// Ask the endpoint for search-augmented answers
    pub search_enabled: bool,
    pub checkpoint: CheckpointPolicy,
    pub retry: RetryConfig,
}

impl SessionConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            search_enabled: false,
            checkpoint: CheckpointPolicy::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// A cloneable handle for aborting the session's turn from other tasks.
#[derive(Clone)]
pub struct SessionHandle {
    controller: RequestController,
    conversation_id: Arc<Mutex<Option<ConversationId>>>,
}

impl SessionHandle {
    /// Abort the in-flight turn. Returns `false` if nothing was streaming.
    pub fn abort(&self) -> bool {
        match self.conversation_id.lock().as_ref() {
            Some(id) => self.controller.cancel(id),
            None => false,
        }
    }

    /// Whether a turn is in flight
    pub fn is_running(&self) -> bool {
        self.conversation_id
            .lock()
            .as_ref()
            .is_some_and(|id| self.controller.is_active(id))
    }
}

/// Owns one conversation's transcript and drives its turns.
///
/// The durable conversation is created lazily on the first submit.
pub struct ConversationSession {
    config: SessionConfig,
    provider: Arc<dyn CompletionProvider>,
    store: Arc<dyn ConversationStore>,
    controller: RequestController,
    conversation_id: Arc<Mutex<Option<ConversationId>>>,
    title: Option<String>,
    transcript: Transcript,
    state: SessionState,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl ConversationSession {
    /// Create a session for a new conversation
    pub fn new(
        config: SessionConfig,
        provider: Arc<dyn CompletionProvider>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            provider,
            store,
            controller: RequestController::new(),
            conversation_id: Arc::new(Mutex::new(None)),
            title: None,
            transcript: Transcript::new(),
            state: SessionState::Idle,
            event_tx,
        }
    }

    /// Load an existing conversation's transcript from the store
    pub async fn resume(
        conversation_id: ConversationId,
        config: SessionConfig,
        provider: Arc<dyn CompletionProvider>,
        store: Arc<dyn ConversationStore>,
    ) -> Result<Self> {
        let stored = store.list_messages(&conversation_id).await?;
        tracing::info!(
            "Resumed conversation {} ({} messages)",
            conversation_id,
            stored.len()
        );

        let mut session = Self::new(config, provider, store);
        session.transcript = Transcript::from_messages(stored.into_iter().map(Message::from).collect());
        *session.conversation_id.lock() = Some(conversation_id);
        Ok(session)
    }

    /// Share a request controller with other sessions
    pub fn with_controller(mut self, controller: RequestController) -> Self {
        self.controller = controller;
        self
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Get a cloneable handle for aborting from external code
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            controller: self.controller.clone(),
            conversation_id: Arc::clone(&self.conversation_id),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Durable id, absent until the first submit
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation_id.lock().clone()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Set the model used for subsequent turns
    pub fn set_model(&mut self, model_id: impl Into<String>) {
        self.config.model_id = model_id.into();
    }

    pub fn set_search_enabled(&mut self, enabled: bool) {
        self.config.search_enabled = enabled;
    }

    /// Abort the in-flight turn, if any
    pub fn abort(&self) -> bool {
        self.handle().abort()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            self.state = state;
            self.emit(SessionEvent::StateChanged { state });
        }
    }

    /// Create the durable conversation on first use
    async fn ensure_conversation(&mut self, first_message: &str) -> Result<ConversationId> {
        if let Some(id) = self.conversation_id() {
            return Ok(id);
        }

        let title = self
            .title
            .clone()
            .unwrap_or_else(|| title_from(first_message));
        let id = self.store.create_conversation(&title).await?;
        tracing::info!("Created conversation {} ({:?})", id, title);

        *self.conversation_id.lock() = Some(id.clone());
        self.title = Some(title);
        Ok(id)
    }

    /// Send a user message and stream the assistant's answer
    pub async fn submit(&mut self, text: &str) -> Result<TurnOutcome> {
        if text.trim().is_empty() {
            return Err(Error::EmptyInput);
        }

        let conversation_id = self.ensure_conversation(text).await?;
        let ticket = self.controller.start(&conversation_id)?;
        self.set_state(SessionState::Sending);

        let user_index = self.transcript.push(Message::user(text));
        self.emit(SessionEvent::MessageAppended {
            index: user_index,
            message: Message::user(text),
        });

        match self
            .store
            .append_message(&conversation_id, text, Role::User)
            .await
        {
            Ok(id) => self.attach_id(user_index, id),
            Err(e) => {
                tracing::warn!("Failed to persist user message: {}", e);
                let removed = self.transcript.remove(user_index);
                self.emit(SessionEvent::MessageRemoved {
                    index: user_index,
                    id: removed.id,
                });
                drop(ticket);
                self.set_state(SessionState::Idle);
                return Err(e.into());
            }
        }

        let placeholder = Message::assistant_placeholder(Some(self.config.model_id.clone()));
        let target = self.transcript.push(placeholder.clone());
        self.emit(SessionEvent::MessageAppended {
            index: target,
            message: placeholder,
        });

        let history = self.transcript.history_before(target);
        Ok(self.run_turn(ticket, target, None, history).await)
    }

    /// Regenerate the assistant answer following message `turn_index`.
    ///
    /// The answer at `turn_index + 1` is overwritten in place and keeps its
    /// durable id. When `turn_index` is a trailing user message, a new answer
    /// is appended instead.
    pub async fn retry(&mut self, turn_index: usize) -> Result<TurnOutcome> {
        let conversation_id = self
            .conversation_id()
            .ok_or(Error::InvalidTurn(turn_index))?;

        let Some(next) = turn_index
            .checked_add(1)
            .filter(|n| *n <= self.transcript.len())
        else {
            return Err(Error::InvalidTurn(turn_index));
        };

        let appends = next == self.transcript.len();
        let valid = if appends {
            self.transcript
                .get(turn_index)
                .is_some_and(|m| m.role == Role::User)
        } else {
            self.transcript
                .get(next)
                .is_some_and(|m| m.role == Role::Assistant)
        };
        if !valid {
            return Err(Error::InvalidTurn(turn_index));
        }

        let ticket = self.controller.start(&conversation_id)?;
        self.set_state(SessionState::Sending);

        let model_id = self.config.model_id.clone();
        let (target, message_id) = if appends {
            let placeholder = Message::assistant_placeholder(Some(model_id));
            let target = self.transcript.push(placeholder.clone());
            self.emit(SessionEvent::MessageAppended {
                index: target,
                message: placeholder,
            });
            (target, None)
        } else {
            let target = next;
            let mut reset = None;
            if let Some(message) = self.transcript.get_mut(target) {
                message.content.clear();
                message.citations.clear();
                message.model_id = Some(model_id);
                message.is_streaming = true;
                reset = Some(message.clone());
            }
            let id = reset.as_ref().and_then(|m| m.id.clone());
            if id.is_none() {
                // The store can only append, so the new answer lands last
                tracing::warn!(
                    "Answer at {} was never persisted; regenerated answer will be stored at the end of conversation {}",
                    target,
                    conversation_id
                );
            }
            if let Some(message) = reset {
                self.emit(SessionEvent::MessageUpdated {
                    index: target,
                    message,
                });
            }
            (target, id)
        };

        tracing::info!(
            "Retrying turn {} of conversation {}",
            turn_index,
            conversation_id
        );
        let history = self.transcript.history_before(next);
        Ok(self.run_turn(ticket, target, message_id, history).await)
    }

    /// Stream one answer into the message at `target`.
    ///
    /// Every stream-phase failure is folded into the transcript here; the
    /// returned outcome only reports which seal was applied.
    async fn run_turn(
        &mut self,
        ticket: StreamTicket,
        target: usize,
        message_id: Option<MessageId>,
        history: Vec<parley_ai::ChatMessage>,
    ) -> TurnOutcome {
        let request = CompletionRequest {
            history,
            model_id: self.config.model_id.clone(),
            search_enabled: self.config.search_enabled,
        };
        let cancel = ticket.token();
        let checkpointer = Checkpointer::new(Arc::clone(&self.store), self.config.checkpoint);
        let mut session = StreamSession::new(ticket, target, message_id, request.search_enabled);

        let mut events = match open_stream(
            self.provider.as_ref(),
            &request,
            &cancel,
            &self.config.retry,
        )
        .await
        {
            Ok(events) => events,
            Err(parley_ai::Error::Aborted) => {
                return self.seal(&checkpointer, session, SealReason::Stopped).await;
            }
            Err(e) => {
                tracing::warn!("Failed to open completion stream: {}", e);
                return self
                    .seal(&checkpointer, session, SealReason::Failed(e.to_string()))
                    .await;
            }
        };

        while let Some(item) = events.next().await {
            if cancel.is_cancelled() {
                return self.seal(&checkpointer, session, SealReason::Stopped).await;
            }

            match item {
                StreamEvent::Chunk { event } => {
                    self.set_state(SessionState::Streaming);
                    if self.apply_event(&mut session, &event).wants_checkpoint() {
                        if let Some(id) = checkpointer.maybe_persist(&mut session).await {
                            self.attach_id(target, id);
                        }
                    }
                }
                StreamEvent::Done => break,
                StreamEvent::Aborted => {
                    return self.seal(&checkpointer, session, SealReason::Stopped).await;
                }
                StreamEvent::Error { message } => {
                    tracing::warn!("Completion stream failed: {}", message);
                    return self
                        .seal(&checkpointer, session, SealReason::Failed(message))
                        .await;
                }
            }
        }

        self.complete(&checkpointer, session).await
    }

    fn apply_event(
        &mut self,
        session: &mut StreamSession,
        event: &CompletionEvent,
    ) -> crate::accumulator::Applied {
        let index = session.target_index();
        let Some(message) = self.transcript.get_mut(index) else {
            return Default::default();
        };

        let applied = session.apply(message, event);
        if applied.appended > 0 {
            if let Some(delta) = event.content_fragment() {
                self.emit(SessionEvent::ContentDelta {
                    index,
                    delta: delta.to_string(),
                });
            }
        }
        applied
    }

    async fn complete(
        &mut self,
        checkpointer: &Checkpointer,
        mut session: StreamSession,
    ) -> TurnOutcome {
        self.set_state(SessionState::Finalizing);
        let index = session.target_index();
        if let Some(message) = self.transcript.get_mut(index) {
            session.finish(message);
        }
        self.finalize(checkpointer, session).await;
        self.set_state(SessionState::Idle);
        TurnOutcome::Completed
    }

    async fn seal(
        &mut self,
        checkpointer: &Checkpointer,
        mut session: StreamSession,
        reason: SealReason,
    ) -> TurnOutcome {
        let (state, outcome) = match &reason {
            SealReason::Stopped => (SessionState::Aborted, TurnOutcome::Aborted),
            SealReason::Failed(message) => (
                SessionState::Errored,
                TurnOutcome::Errored {
                    message: message.clone(),
                },
            ),
        };
        self.set_state(state);

        let index = session.target_index();
        if let Some(message) = self.transcript.get_mut(index) {
            session.seal(message, &reason);
        }
        self.finalize(checkpointer, session).await;
        self.set_state(SessionState::Idle);
        outcome
    }

    /// Final write, then release the request slot
    async fn finalize(&mut self, checkpointer: &Checkpointer, mut session: StreamSession) {
        let index = session.target_index();
        if let Some(id) = checkpointer.finalize(&mut session).await {
            self.attach_id(index, id);
        }
        if let Some(message) = self.transcript.get(index) {
            self.emit(SessionEvent::MessageSealed {
                index,
                message: message.clone(),
            });
        }
        tracing::debug!(
            "Turn finished for conversation {} ({} units)",
            session.conversation_id(),
            session.content_len()
        );
    }

    fn attach_id(&mut self, index: usize, id: MessageId) {
        if let Some(message) = self.transcript.get_mut(index) {
            message.id = Some(id.clone());
            self.emit(SessionEvent::MessageIdAssigned { index, id });
        }
    }

    /// Replace a message's content in place. No regeneration happens.
    ///
    /// Returns `false` if no message has this id.
    pub async fn edit_message(&mut self, id: &MessageId, text: &str) -> bool {
        let Some(index) = self.transcript.position_of(id) else {
            tracing::warn!("Cannot edit unknown message {}", id);
            return false;
        };
        let Some(message) = self.transcript.get_mut(index) else {
            return false;
        };
        message.content = text.to_string();
        let message = message.clone();
        self.emit(SessionEvent::MessageUpdated { index, message });

        if let Err(e) = self.store.update_message_content(id, text).await {
            tracing::warn!("Failed to persist edit of message {}: {}", id, e);
        }
        true
    }

    /// Remove a message from the transcript and the store.
    ///
    /// Returns `false` if no message has this id.
    pub async fn delete_message(&mut self, id: &MessageId) -> bool {
        let Some(index) = self.transcript.position_of(id) else {
            tracing::warn!("Cannot delete unknown message {}", id);
            return false;
        };
        let removed = self.transcript.remove(index);
        self.emit(SessionEvent::MessageRemoved {
            index,
            id: removed.id,
        });

        if let Err(e) = self.store.delete_message(id).await {
            tracing::warn!("Failed to delete message {} from store: {}", id, e);
        }
        true
    }

    /// Rename the conversation.
    ///
    /// Before the first submit the title is kept and used at creation.
    pub async fn rename(&mut self, title: &str) -> Result<()> {
        if let Some(id) = self.conversation_id() {
            self.store.rename_conversation(&id, title).await?;
            tracing::info!("Renamed conversation {} to {:?}", id, title);
        }
        self.title = Some(title.to_string());
        Ok(())
    }

    /// Delete the conversation and reset to an empty, unsaved session
    pub async fn delete_conversation(&mut self) -> Result<()> {
        let Some(id) = self.conversation_id() else {
            return Ok(());
        };
        if self.controller.is_active(&id) {
            return Err(Error::Busy(id));
        }

        self.store.delete_conversation(&id).await?;
        tracing::info!("Deleted conversation {}", id);

        *self.conversation_id.lock() = None;
        self.title = None;
        while !self.transcript.is_empty() {
            let index = self.transcript.len() - 1;
            let removed = self.transcript.remove(index);
            self.emit(SessionEvent::MessageRemoved {
                index,
                id: removed.id,
            });
        }
        Ok(())
    }
}

/// Title derived from the first line of a message
fn title_from(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .chars()
        .take(TITLE_MAX_CHARS)
        .collect()
}
