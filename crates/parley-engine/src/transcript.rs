//! Transcript state: ordered messages and the streaming flag.

use parley_ai::{ChatMessage, Role};
use serde::{Deserialize, Serialize};

use crate::citations::Citation;
use crate::ids::MessageId;
use crate::store::StoredMessage;

/// A message in the conversation transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Durable identifier, absent until first persisted
    pub id: Option<MessageId>,
    pub role: Role,
    pub content: String,
    /// Model that produced this message, as declared by the server
    pub model_id: Option<String>,
    pub citations: Vec<Citation>,
    pub is_streaming: bool,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: None,
            role,
            content: content.into(),
            model_id: None,
            citations: Vec::new(),
            is_streaming: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Empty assistant message flagged as streaming
    pub fn assistant_placeholder(model_id: Option<String>) -> Self {
        Self {
            model_id,
            is_streaming: true,
            ..Self::new(Role::Assistant, String::new())
        }
    }

    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.content.clone())
    }
}

impl From<StoredMessage> for Message {
    fn from(stored: StoredMessage) -> Self {
        Self {
            id: Some(stored.id),
            ..Self::new(stored.role, stored.content)
        }
    }
}

/// Ordered conversation transcript.
///
/// At most one message is flagged `is_streaming` at any time.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Message> {
        self.messages.get_mut(index)
    }

    /// Append a message, returning its index
    pub fn push(&mut self, message: Message) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    pub fn remove(&mut self, index: usize) -> Message {
        self.messages.remove(index)
    }

    /// Index of the message with the given durable id
    pub fn position_of(&self, id: &MessageId) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.id.as_ref() == Some(id))
    }

    /// Index of the message currently streaming, if any
    pub fn streaming_index(&self) -> Option<usize> {
        self.messages.iter().position(|m| m.is_streaming)
    }

    /// History for a completion request: messages before `end`, exclusive
    pub fn history_before(&self, end: usize) -> Vec<ChatMessage> {
        self.messages[..end.min(self.messages.len())]
            .iter()
            .map(Message::to_chat)
            .collect()
    }
}
