//! Conversation persistence as append-only JSONL logs
//!
//! Each conversation lives in `<id>.jsonl`. Edits, deletes and renames are
//! appended as records and replayed on read, so a crash mid-write loses at
//! most the last line. Opening a conversation rewrites its log without the
//! superseded records.

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_ai::Role;
use parley_engine::{
    ConversationId, ConversationStore, ConversationSummary, MessageId, StoreError, StoreResult,
    StoredMessage,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Record types for the JSONL format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Record {
    /// Conversation metadata, always the first line
    Metadata {
        id: ConversationId,
        title: String,
        created_at: i64,
        /// Set when the log was compacted
        #[serde(default, skip_serializing_if = "Option::is_none")]
        updated_at: Option<i64>,
    },
    /// A new message
    Message { message: StoredMessage },
    /// Full replacement of a message's content
    Update {
        id: MessageId,
        content: String,
        timestamp: i64,
    },
    /// Removal of a message
    Delete { id: MessageId, timestamp: i64 },
    /// New conversation title
    Rename { title: String, timestamp: i64 },
}

/// A conversation rebuilt from its log
struct Replayed {
    id: ConversationId,
    title: String,
    created_at: i64,
    updated_at: i64,
    messages: Vec<StoredMessage>,
    /// Records folded into earlier state, dropped by compaction
    superseded: usize,
}

impl Replayed {
    fn apply(&mut self, record: Record) {
        match record {
            Record::Metadata { .. } => {}
            Record::Message { message } => {
                self.updated_at = self.updated_at.max(message.created_at);
                self.messages.push(message);
            }
            Record::Update {
                id,
                content,
                timestamp,
            } => {
                if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
                    message.content = content;
                }
                self.updated_at = self.updated_at.max(timestamp);
                self.superseded += 1;
            }
            Record::Delete { id, timestamp } => {
                self.messages.retain(|m| m.id != id);
                self.updated_at = self.updated_at.max(timestamp);
                self.superseded += 1;
            }
            Record::Rename { title, timestamp } => {
                self.title = title;
                self.updated_at = self.updated_at.max(timestamp);
                self.superseded += 1;
            }
        }
    }

    fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            message_count: self.messages.len(),
        }
    }
}

/// File-backed store with one JSONL log per conversation
pub struct JsonlStore {
    dir: PathBuf,
    /// Which conversation each known message belongs to
    owners: Mutex<HashMap<MessageId, ConversationId>>,
}

impl JsonlStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            owners: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, conversation_id: &ConversationId) -> StoreResult<PathBuf> {
        let raw = conversation_id.as_str();
        let safe = !raw.is_empty()
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(StoreError::conversation_not_found(conversation_id));
        }
        Ok(self.dir.join(format!("{}.jsonl", raw)))
    }

    fn existing_path(&self, conversation_id: &ConversationId) -> StoreResult<PathBuf> {
        let path = self.path(conversation_id)?;
        if !path.exists() {
            return Err(StoreError::conversation_not_found(conversation_id));
        }
        Ok(path)
    }

    fn append(&self, conversation_id: &ConversationId, record: &Record) -> StoreResult<()> {
        let path = self.existing_path(conversation_id)?;
        let mut file = File::options().append(true).open(path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        file.flush()?;
        Ok(())
    }

    fn replay(&self, conversation_id: &ConversationId) -> StoreResult<Replayed> {
        let path = self.existing_path(conversation_id)?;
        Self::replay_file(&path)?.ok_or_else(|| {
            StoreError::Backend(format!("missing metadata in {}", path.display()))
        })
    }

    fn replay_file(path: &Path) -> StoreResult<Option<Replayed>> {
        let reader = BufReader::new(File::open(path)?);
        let mut replayed: Option<Replayed> = None;

        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let record = match serde_json::from_str::<Record>(&line) {
                Ok(record) => record,
                Err(e) => {
                    tracing::debug!(
                        "Skipping malformed line {} in {}: {}",
                        number + 1,
                        path.display(),
                        e
                    );
                    continue;
                }
            };

            match replayed.as_mut() {
                Some(conversation) => conversation.apply(record),
                None => match record {
                    Record::Metadata {
                        id,
                        title,
                        created_at,
                        updated_at,
                    } => {
                        replayed = Some(Replayed {
                            id,
                            title,
                            created_at,
                            updated_at: updated_at.unwrap_or(created_at),
                            messages: Vec::new(),
                            superseded: 0,
                        });
                    }
                    _ => {
                        tracing::warn!("Record before metadata in {}", path.display());
                        return Ok(None);
                    }
                },
            }
        }

        Ok(replayed)
    }

    /// Rewrite the log as metadata plus one record per live message.
    ///
    /// The new log is written beside the old one and renamed over it.
    fn compact(&self, conversation: &Replayed) -> StoreResult<()> {
        let path = self.existing_path(&conversation.id)?;
        let staging = path.with_extension("jsonl.tmp");

        let mut file = File::create(&staging)?;
        let metadata = Record::Metadata {
            id: conversation.id.clone(),
            title: conversation.title.clone(),
            created_at: conversation.created_at,
            updated_at: Some(conversation.updated_at),
        };
        writeln!(file, "{}", serde_json::to_string(&metadata)?)?;
        for message in &conversation.messages {
            let record = Record::Message {
                message: message.clone(),
            };
            writeln!(file, "{}", serde_json::to_string(&record)?)?;
        }
        file.sync_all()?;
        drop(file);

        fs::rename(&staging, &path)?;
        tracing::debug!(
            "Compacted {} ({} records dropped)",
            path.display(),
            conversation.superseded
        );
        Ok(())
    }

    fn conversation_files(&self) -> StoreResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
                files.push(path);
            }
        }
        Ok(files)
    }

    fn remember(&self, conversation: &Replayed) {
        let mut owners = self.owners.lock();
        for message in &conversation.messages {
            owners.insert(message.id.clone(), conversation.id.clone());
        }
    }

    /// Conversation owning `message_id`, scanning every log on a cache miss
    fn owner_of(&self, message_id: &MessageId) -> StoreResult<ConversationId> {
        if let Some(owner) = self.owners.lock().get(message_id) {
            return Ok(owner.clone());
        }

        for path in self.conversation_files()? {
            match Self::replay_file(&path) {
                Ok(Some(conversation)) => self.remember(&conversation),
                Ok(None) => {}
                Err(e) => tracing::warn!("Failed to read {}: {}", path.display(), e),
            }
        }

        self.owners
            .lock()
            .get(message_id)
            .cloned()
            .ok_or_else(|| StoreError::message_not_found(message_id))
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl ConversationStore for JsonlStore {
    async fn create_conversation(&self, title: &str) -> StoreResult<ConversationId> {
        let id = ConversationId::generate();
        let path = self.path(&id)?;

        let metadata = Record::Metadata {
            id: id.clone(),
            title: title.to_string(),
            created_at: now_millis(),
            updated_at: None,
        };
        let mut file = File::create(&path)?;
        writeln!(file, "{}", serde_json::to_string(&metadata)?)?;
        file.flush()?;

        tracing::debug!("Created conversation log {}", path.display());
        Ok(id)
    }

    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
        role: Role,
    ) -> StoreResult<MessageId> {
        let message = StoredMessage {
            id: MessageId::generate(),
            role,
            content: content.to_string(),
            created_at: now_millis(),
        };
        let id = message.id.clone();

        self.append(conversation_id, &Record::Message { message })?;
        self.owners.lock().insert(id.clone(), conversation_id.clone());
        Ok(id)
    }

    async fn update_message_content(
        &self,
        message_id: &MessageId,
        content: &str,
    ) -> StoreResult<()> {
        let owner = self.owner_of(message_id)?;
        self.append(
            &owner,
            &Record::Update {
                id: message_id.clone(),
                content: content.to_string(),
                timestamp: now_millis(),
            },
        )
    }

    async fn delete_message(&self, message_id: &MessageId) -> StoreResult<()> {
        let owner = self.owner_of(message_id)?;
        self.append(
            &owner,
            &Record::Delete {
                id: message_id.clone(),
                timestamp: now_millis(),
            },
        )?;
        self.owners.lock().remove(message_id);
        Ok(())
    }

    async fn delete_conversation(&self, conversation_id: &ConversationId) -> StoreResult<()> {
        let path = self.existing_path(conversation_id)?;
        fs::remove_file(path)?;
        self.owners.lock().retain(|_, owner| owner != conversation_id);
        Ok(())
    }

    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> StoreResult<Vec<StoredMessage>> {
        let conversation = self.replay(conversation_id)?;
        self.remember(&conversation);
        if conversation.superseded > 0 {
            if let Err(e) = self.compact(&conversation) {
                tracing::warn!("Failed to compact conversation {}: {}", conversation_id, e);
            }
        }
        Ok(conversation.messages)
    }

    async fn rename_conversation(
        &self,
        conversation_id: &ConversationId,
        title: &str,
    ) -> StoreResult<()> {
        self.append(
            conversation_id,
            &Record::Rename {
                title: title.to_string(),
                timestamp: now_millis(),
            },
        )
    }

    async fn list_conversations(&self) -> StoreResult<Vec<ConversationSummary>> {
        let mut summaries = Vec::new();
        for path in self.conversation_files()? {
            match Self::replay_file(&path) {
                Ok(Some(conversation)) => summaries.push(conversation.summary()),
                Ok(None) => {}
                Err(e) => tracing::warn!("Failed to read {}: {}", path.display(), e),
            }
        }

        // Newest first
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}
