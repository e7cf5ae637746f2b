//! Single-flight request registry and cancellation.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::ids::ConversationId;

type Registry = HashMap<ConversationId, CancellationToken>;

/// Owns one cancellation token per conversation with a request in flight.
///
/// Cloning is cheap; all clones share the same registry.
#[derive(Clone, Default)]
pub struct RequestController {
    registry: Arc<Mutex<Registry>>,
}

impl RequestController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new in-flight request.
    ///
    /// Fails with [`Error::Busy`] while another ticket for the same
    /// conversation is alive.
    pub fn start(&self, conversation_id: &ConversationId) -> Result<StreamTicket> {
        let mut registry = self.registry.lock();
        if registry.contains_key(conversation_id) {
            return Err(Error::Busy(conversation_id.clone()));
        }

        let token = CancellationToken::new();
        registry.insert(conversation_id.clone(), token.clone());
        tracing::debug!("Request started for conversation {}", conversation_id);

        Ok(StreamTicket {
            conversation_id: conversation_id.clone(),
            token,
            registry: Arc::clone(&self.registry),
        })
    }

    /// Signal cancellation. Returns `false` if nothing was in flight.
    pub fn cancel(&self, conversation_id: &ConversationId) -> bool {
        match self.registry.lock().get(conversation_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, conversation_id: &ConversationId) -> bool {
        self.registry.lock().contains_key(conversation_id)
    }

    /// Number of conversations with a request in flight
    pub fn active_count(&self) -> usize {
        self.registry.lock().len()
    }
}

/// Registration of an in-flight request; dropping it frees the slot.
pub struct StreamTicket {
    conversation_id: ConversationId,
    token: CancellationToken,
    registry: Arc<Mutex<Registry>>,
}

impl StreamTicket {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Token to pass into every suspension point of this request
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for StreamTicket {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.conversation_id);
        tracing::debug!("Request finished for conversation {}", self.conversation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_start_is_busy() {
        let controller = RequestController::new();
        let conv = ConversationId::from("c-1");

        let ticket = controller.start(&conv).unwrap();
        assert!(matches!(controller.start(&conv), Err(Error::Busy(id)) if id == conv));
        assert!(controller.is_active(&conv));

        drop(ticket);
        assert!(!controller.is_active(&conv));
        assert!(controller.start(&conv).is_ok());
    }

    #[test]
    fn test_conversations_are_independent() {
        let controller = RequestController::new();
        let _a = controller.start(&ConversationId::from("a")).unwrap();
        let _b = controller.start(&ConversationId::from("b")).unwrap();
        assert_eq!(controller.active_count(), 2);
    }

    #[test]
    fn test_cancel_signals_token() {
        let controller = RequestController::new();
        let conv = ConversationId::from("c-1");
        let ticket = controller.start(&conv).unwrap();
        let token = ticket.token();

        assert!(controller.cancel(&conv));
        assert!(token.is_cancelled());
        assert!(ticket.is_cancelled());
        assert!(!controller.cancel(&ConversationId::from("other")));
    }

    #[test]
    fn test_cancel_after_finish_is_noop() {
        let controller = RequestController::new();
        let conv = ConversationId::from("c-1");
        let token = controller.start(&conv).unwrap().token();
        assert!(!controller.cancel(&conv));
        assert!(!token.is_cancelled());
    }
}
