//! Bounded persistence of streaming content.

use parley_ai::Role;
use std::sync::Arc;

use crate::accumulator::StreamSession;
use crate::ids::MessageId;
use crate::store::{ConversationStore, StoreResult};

/// Default number of content units between intermediate checkpoints
pub const DEFAULT_CHECKPOINT_GRANULARITY: usize = 100;

/// How often partial content is written while streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointPolicy {
    /// Content units that must accumulate past the last checkpoint before
    /// another write. Zero disables intermediate checkpoints.
    pub granularity: usize,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            granularity: DEFAULT_CHECKPOINT_GRANULARITY,
        }
    }
}

impl CheckpointPolicy {
    pub fn every(granularity: usize) -> Self {
        Self { granularity }
    }

    pub fn is_due(&self, unpersisted: usize) -> bool {
        self.granularity > 0 && unpersisted >= self.granularity
    }
}

/// Writes streaming content to the store.
///
/// Every write sets the full content, so writes completing out of order
/// still converge. Write failures are logged and swallowed.
pub struct Checkpointer {
    store: Arc<dyn ConversationStore>,
    policy: CheckpointPolicy,
}

impl Checkpointer {
    pub fn new(store: Arc<dyn ConversationStore>, policy: CheckpointPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> CheckpointPolicy {
        self.policy
    }

    /// Persist if enough content accumulated since the last checkpoint.
    ///
    /// Returns the durable id when this call allocated it; the caller must
    /// attach it to the in-memory message.
    pub async fn maybe_persist(&self, session: &mut StreamSession) -> Option<MessageId> {
        if session.is_finalized() || !self.policy.is_due(session.unpersisted_len()) {
            return None;
        }
        self.persist(session, "checkpoint").await
    }

    /// Persist the final content exactly once.
    ///
    /// No-op on a session that was already finalized, even if the first
    /// attempt failed.
    pub async fn finalize(&self, session: &mut StreamSession) -> Option<MessageId> {
        if session.is_finalized() {
            tracing::debug!(
                "Session for message {} already finalized",
                session.target_index()
            );
            return None;
        }
        session.mark_finalized();
        self.persist(session, "final checkpoint").await
    }

    async fn persist(&self, session: &mut StreamSession, what: &str) -> Option<MessageId> {
        let len = session.content_len();
        match self.write(session).await {
            Ok(allocated) => {
                session.mark_persisted(len);
                if let Some(ref id) = allocated {
                    session.set_message_id(id.clone());
                }
                tracing::debug!(
                    "{} written for conversation {} ({} units)",
                    what,
                    session.conversation_id(),
                    len
                );
                allocated
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to write {} for conversation {}: {}",
                    what,
                    session.conversation_id(),
                    e
                );
                None
            }
        }
    }

    async fn write(&self, session: &StreamSession) -> StoreResult<Option<MessageId>> {
        match session.message_id() {
            Some(id) => {
                self.store
                    .update_message_content(id, session.content())
                    .await?;
                Ok(None)
            }
            None => {
                let id = self
                    .store
                    .append_message(session.conversation_id(), session.content(), Role::Assistant)
                    .await?;
                Ok(Some(id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::RequestController;
    use crate::store::MemoryStore;
    use crate::transcript::Message;
    use parley_ai::CompletionEvent;

    struct Fixture {
        store: Arc<MemoryStore>,
        checkpointer: Checkpointer,
        session: StreamSession,
        message: Message,
    }

    async fn fixture(granularity: usize, message_id: Option<MessageId>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let conv = store.create_conversation("t").await.unwrap();
        let ticket = RequestController::new().start(&conv).unwrap();
        Fixture {
            checkpointer: Checkpointer::new(store.clone(), CheckpointPolicy::every(granularity)),
            store,
            session: StreamSession::new(ticket, 0, message_id, false),
            message: Message::assistant_placeholder(None),
        }
    }

    fn text(fragment: &str) -> CompletionEvent {
        CompletionEvent {
            content: Some(fragment.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_persists_only_past_threshold() {
        let mut f = fixture(10, None).await;
        let writes_before = f.store.write_count();

        f.session.apply(&mut f.message, &text("12345"));
        assert_eq!(f.checkpointer.maybe_persist(&mut f.session).await, None);
        assert_eq!(f.store.write_count(), writes_before);

        f.session.apply(&mut f.message, &text("67890"));
        let id = f.checkpointer.maybe_persist(&mut f.session).await;
        assert!(id.is_some());
        assert_eq!(f.session.message_id(), id.as_ref());
        assert_eq!(f.session.persisted_len(), 10);

        // Next write is an update keyed by the allocated id
        f.session.apply(&mut f.message, &text("abcdefghij"));
        assert_eq!(f.checkpointer.maybe_persist(&mut f.session).await, None);
        let stored = f.store.list_messages(f.session.conversation_id()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "1234567890abcdefghij");
        assert_eq!(f.store.write_count(), writes_before + 2);
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent() {
        let mut f = fixture(100, None).await;
        f.session.apply(&mut f.message, &text("short answer"));
        let writes_before = f.store.write_count();

        assert!(f.checkpointer.finalize(&mut f.session).await.is_some());
        assert_eq!(f.checkpointer.finalize(&mut f.session).await, None);
        assert_eq!(f.store.write_count(), writes_before + 1);

        let stored = f.store.list_messages(f.session.conversation_id()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "short answer");
    }

    #[tokio::test]
    async fn test_no_intermediate_writes_after_finalize() {
        let mut f = fixture(1, None).await;
        f.session.apply(&mut f.message, &text("done"));
        f.checkpointer.finalize(&mut f.session).await;
        let writes = f.store.write_count();
        assert_eq!(f.checkpointer.maybe_persist(&mut f.session).await, None);
        assert_eq!(f.store.write_count(), writes);
    }

    #[tokio::test]
    async fn test_failed_write_is_swallowed_and_retried() {
        let mut f = fixture(3, None).await;
        f.session.apply(&mut f.message, &text("abcd"));

        f.store.set_fail_writes(true);
        assert_eq!(f.checkpointer.maybe_persist(&mut f.session).await, None);
        assert_eq!(f.session.persisted_len(), 0);
        assert!(f.session.message_id().is_none());

        f.store.set_fail_writes(false);
        assert!(f.checkpointer.maybe_persist(&mut f.session).await.is_some());
        assert_eq!(f.session.persisted_len(), 4);
    }

    #[tokio::test]
    async fn test_existing_id_is_updated_in_place() {
        let store = Arc::new(MemoryStore::new());
        let conv = store.create_conversation("t").await.unwrap();
        let existing = store
            .append_message(&conv, "old answer", Role::Assistant)
            .await
            .unwrap();
        let ticket = RequestController::new().start(&conv).unwrap();
        let checkpointer = Checkpointer::new(store.clone(), CheckpointPolicy::default());
        let mut session = StreamSession::new(ticket, 1, Some(existing.clone()), false);
        let mut message = Message::assistant_placeholder(None);

        session.apply(&mut message, &text("new answer"));
        assert_eq!(checkpointer.finalize(&mut session).await, None);

        let stored = store.list_messages(&conv).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, existing);
        assert_eq!(stored[0].content, "new answer");
    }

    #[tokio::test]
    async fn test_round_trip_through_list_messages() {
        let mut f = fixture(5, None).await;
        f.session.apply(&mut f.message, &text("streamed content"));
        f.checkpointer.maybe_persist(&mut f.session).await;
        f.checkpointer.finalize(&mut f.session).await;

        let stored = f.store.list_messages(f.session.conversation_id()).await.unwrap();
        let reloaded = Message::from(stored[0].clone());
        assert_eq!(reloaded.content, f.session.content());
        assert_eq!(reloaded.role, Role::Assistant);
        assert_eq!(reloaded.id.as_ref(), f.session.message_id());
    }

    #[test]
    fn test_zero_granularity_disables_intermediate() {
        assert!(!CheckpointPolicy::every(0).is_due(1_000));
        assert!(CheckpointPolicy::default().is_due(100));
        assert!(!CheckpointPolicy::default().is_due(99));
    }
}
