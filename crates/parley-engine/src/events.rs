//! Session event types

use serde::{Deserialize, Serialize};

use crate::ids::MessageId;
use crate::session::SessionState;
use crate::transcript::Message;

/// Transcript changes broadcast to observers.
///
/// `index` is the transcript position at the time of the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session moved to a new state
    StateChanged { state: SessionState },

    /// A message was added at the end of the transcript
    MessageAppended { index: usize, message: Message },

    /// Content appended to the streaming message
    ContentDelta { index: usize, delta: String },

    /// A message received its durable id
    MessageIdAssigned { index: usize, id: MessageId },

    /// The streaming message reached its final content
    MessageSealed { index: usize, message: Message },

    /// A message was replaced in place (edit, retry reset)
    MessageUpdated { index: usize, message: Message },

    /// A message was removed from the transcript
    MessageRemoved {
        index: usize,
        id: Option<MessageId>,
    },
}

impl SessionEvent {
    /// Check if this event ends a turn
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::StateChanged {
                state: SessionState::Idle
            }
        )
    }
}
