//! Persistence contract consumed by the engine, plus an in-memory store

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_ai::Role;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::ids::{ConversationId, MessageId};

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors reported by a conversation store
#[derive(Error, Debug)]
pub enum StoreError {
    /// The addressed record does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// I/O failure in a file-backed store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Any other backend failure
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn conversation_not_found(id: &ConversationId) -> Self {
        Self::NotFound {
            entity: "conversation",
            id: id.to_string(),
        }
    }

    pub fn message_not_found(id: &MessageId) -> Self {
        Self::NotFound {
            entity: "message",
            id: id.to_string(),
        }
    }
}

/// A message as the store returns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub created_at: i64,
}

/// Listing entry for a stored conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub message_count: usize,
}

/// Durable storage for conversations and their messages.
///
/// `update_message_content` always sets the full content; implementations
/// must treat it as an idempotent overwrite.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, title: &str) -> StoreResult<ConversationId>;

    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
        role: Role,
    ) -> StoreResult<MessageId>;

    async fn update_message_content(&self, message_id: &MessageId, content: &str)
    -> StoreResult<()>;

    async fn delete_message(&self, message_id: &MessageId) -> StoreResult<()>;

    async fn delete_conversation(&self, conversation_id: &ConversationId) -> StoreResult<()>;

    /// Messages of a conversation in conversation order
    async fn list_messages(&self, conversation_id: &ConversationId)
    -> StoreResult<Vec<StoredMessage>>;

    async fn rename_conversation(
        &self,
        conversation_id: &ConversationId,
        title: &str,
    ) -> StoreResult<()>;

    /// All conversations, most recently updated first
    async fn list_conversations(&self) -> StoreResult<Vec<ConversationSummary>>;
}

struct MemoryConversation {
    title: String,
    created_at: i64,
    updated_at: i64,
    messages: Vec<StoredMessage>,
}

#[derive(Default)]
struct MemoryState {
    conversations: HashMap<ConversationId, MemoryConversation>,
    owners: HashMap<MessageId, ConversationId>,
    writes: usize,
    #[cfg(test)]
    fail_writes: bool,
}

impl MemoryState {
    fn check_writable(&mut self) -> StoreResult<()> {
        #[cfg(test)]
        if self.fail_writes {
            return Err(StoreError::Backend("simulated write failure".into()));
        }
        self.writes += 1;
        Ok(())
    }

    fn message_mut(&mut self, message_id: &MessageId) -> StoreResult<&mut StoredMessage> {
        let owner = self
            .owners
            .get(message_id)
            .ok_or_else(|| StoreError::message_not_found(message_id))?;
        let conversation = self
            .conversations
            .get_mut(owner)
            .ok_or_else(|| StoreError::conversation_not_found(owner))?;
        conversation.updated_at = chrono::Utc::now().timestamp_millis();
        conversation
            .messages
            .iter_mut()
            .find(|m| &m.id == message_id)
            .ok_or_else(|| StoreError::message_not_found(message_id))
    }
}

/// Process-local store, used for ephemeral sessions and tests
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful mutating calls so far
    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    #[cfg(test)]
    pub(crate) fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_conversation(&self, title: &str) -> StoreResult<ConversationId> {
        let mut state = self.state.lock();
        state.check_writable()?;
        let id = ConversationId::generate();
        let now = chrono::Utc::now().timestamp_millis();
        state.conversations.insert(
            id.clone(),
            MemoryConversation {
                title: title.to_string(),
                created_at: now,
                updated_at: now,
                messages: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
        role: Role,
    ) -> StoreResult<MessageId> {
        let mut state = self.state.lock();
        state.check_writable()?;
        let now = chrono::Utc::now().timestamp_millis();
        let conversation = state
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::conversation_not_found(conversation_id))?;
        let id = MessageId::generate();
        conversation.messages.push(StoredMessage {
            id: id.clone(),
            role,
            content: content.to_string(),
            created_at: now,
        });
        conversation.updated_at = now;
        state.owners.insert(id.clone(), conversation_id.clone());
        Ok(id)
    }

    async fn update_message_content(
        &self,
        message_id: &MessageId,
        content: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check_writable()?;
        let message = state.message_mut(message_id)?;
        message.content = content.to_string();
        Ok(())
    }

    async fn delete_message(&self, message_id: &MessageId) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check_writable()?;
        let owner = state
            .owners
            .remove(message_id)
            .ok_or_else(|| StoreError::message_not_found(message_id))?;
        if let Some(conversation) = state.conversations.get_mut(&owner) {
            conversation.messages.retain(|m| &m.id != message_id);
            conversation.updated_at = chrono::Utc::now().timestamp_millis();
        }
        Ok(())
    }

    async fn delete_conversation(&self, conversation_id: &ConversationId) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check_writable()?;
        let conversation = state
            .conversations
            .remove(conversation_id)
            .ok_or_else(|| StoreError::conversation_not_found(conversation_id))?;
        for message in &conversation.messages {
            state.owners.remove(&message.id);
        }
        Ok(())
    }

    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> StoreResult<Vec<StoredMessage>> {
        let state = self.state.lock();
        state
            .conversations
            .get(conversation_id)
            .map(|c| c.messages.clone())
            .ok_or_else(|| StoreError::conversation_not_found(conversation_id))
    }

    async fn rename_conversation(
        &self,
        conversation_id: &ConversationId,
        title: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check_writable()?;
        let conversation = state
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::conversation_not_found(conversation_id))?;
        conversation.title = title.to_string();
        conversation.updated_at = chrono::Utc::now().timestamp_millis();
        Ok(())
    }

    async fn list_conversations(&self) -> StoreResult<Vec<ConversationSummary>> {
        let state = self.state.lock();
        let mut summaries: Vec<ConversationSummary> = state
            .conversations
            .iter()
            .map(|(id, c)| ConversationSummary {
                id: id.clone(),
                title: c.title.clone(),
                created_at: c.created_at,
                updated_at: c.updated_at,
                message_count: c.messages.len(),
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_update_list_round_trip() {
        let store = MemoryStore::new();
        let conv = store.create_conversation("greeting").await.unwrap();
        let user = store.append_message(&conv, "hi", Role::User).await.unwrap();
        let reply = store
            .append_message(&conv, "Hel", Role::Assistant)
            .await
            .unwrap();
        store.update_message_content(&reply, "Hello!").await.unwrap();

        let messages = store.list_messages(&conv).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, user);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].content, "Hello!");
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_update_is_idempotent_overwrite() {
        let store = MemoryStore::new();
        let conv = store.create_conversation("t").await.unwrap();
        let id = store.append_message(&conv, "", Role::Assistant).await.unwrap();
        store.update_message_content(&id, "full text").await.unwrap();
        store.update_message_content(&id, "full text").await.unwrap();
        assert_eq!(store.list_messages(&conv).await.unwrap()[0].content, "full text");
    }

    #[tokio::test]
    async fn test_delete_message_and_conversation() {
        let store = MemoryStore::new();
        let conv = store.create_conversation("t").await.unwrap();
        let a = store.append_message(&conv, "a", Role::User).await.unwrap();
        let b = store.append_message(&conv, "b", Role::Assistant).await.unwrap();

        store.delete_message(&a).await.unwrap();
        let remaining = store.list_messages(&conv).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b);

        assert!(matches!(
            store.delete_message(&a).await,
            Err(StoreError::NotFound { entity: "message", .. })
        ));

        store.delete_conversation(&conv).await.unwrap();
        assert!(store.list_messages(&conv).await.is_err());
        assert!(store.update_message_content(&b, "x").await.is_err());
    }

    #[tokio::test]
    async fn test_rename_and_list_conversations() {
        let store = MemoryStore::new();
        let first = store.create_conversation("first").await.unwrap();
        let second = store.create_conversation("second").await.unwrap();
        store.rename_conversation(&first, "renamed").await.unwrap();
        store.append_message(&second, "x", Role::User).await.unwrap();

        let list = store.list_conversations().await.unwrap();
        assert_eq!(list.len(), 2);
        let renamed = list.iter().find(|c| c.id == first).unwrap();
        assert_eq!(renamed.title, "renamed");
        let other = list.iter().find(|c| c.id == second).unwrap();
        assert_eq!(other.message_count, 1);
    }

    #[tokio::test]
    async fn test_simulated_failure_does_not_count() {
        let store = MemoryStore::new();
        let conv = store.create_conversation("t").await.unwrap();
        store.set_fail_writes(true);
        assert!(store.append_message(&conv, "x", Role::User).await.is_err());
        store.set_fail_writes(false);
        assert_eq!(store.write_count(), 1);
    }
}
