//! Core types for completion requests and streamed chunks

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Get the role as the tag used on the wire and in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role tag: {}", other)),
        }
    }
}

/// A single history entry sent to the completion endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// A streaming completion request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    /// Conversation history, oldest first
    pub history: Vec<ChatMessage>,
    /// Model the client asks for (the server may route elsewhere)
    pub model_id: String,
    /// Whether the request is search-augmented
    pub search_enabled: bool,
}

/// A source citation as it arrives from the server, before numbering.
///
/// Servers report citations in two overlapping conventions: inline reference
/// objects attached to the chunk, and citation objects carried inside the
/// choice delta. Both collapse into this one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum CitationFragment {
    /// Inline reference object (`references[]` on the chunk)
    Inline {
        title: Option<String>,
        url: String,
        text: Option<String>,
    },
    /// Delta citation object (`choices[].delta.citations[]`)
    Delta {
        title: Option<String>,
        url: String,
        snippet: Option<String>,
    },
}

impl CitationFragment {
    pub fn url(&self) -> &str {
        match self {
            Self::Inline { url, .. } | Self::Delta { url, .. } => url,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            Self::Inline { title, .. } | Self::Delta { title, .. } => title.as_deref(),
        }
    }

    /// Excerpt text, whichever field the shape carries it in
    pub fn excerpt(&self) -> Option<&str> {
        match self {
            Self::Inline { text, .. } => text.as_deref(),
            Self::Delta { snippet, .. } => snippet.as_deref(),
        }
    }
}

/// One decoded completion event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    /// Content fragment to append, if any
    pub content: Option<String>,
    /// Model identifier declared by the server for this event
    pub model: Option<String>,
    /// Citation fragments observed in this event, inline ones first
    pub citations: Vec<CitationFragment>,
    /// Finish reason reported by the server, if any
    pub finish_reason: Option<String>,
}

impl CompletionEvent {
    /// Content fragment if it is non-empty
    pub fn content_fragment(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }
}

// Streaming wire types

/// A `data:` payload as sent by OpenAI-compatible endpoints
#[derive(Debug, Default, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub references: Vec<ReferenceObject>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub citations: Vec<DeltaCitation>,
}

#[derive(Debug, Deserialize)]
pub struct ReferenceObject {
    #[serde(default)]
    pub title: Option<String>,
    pub url: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeltaCitation {
    #[serde(default)]
    pub title: Option<String>,
    pub url: String,
    #[serde(default)]
    pub snippet: Option<String>,
}

impl From<CompletionChunk> for CompletionEvent {
    fn from(chunk: CompletionChunk) -> Self {
        let mut citations: Vec<CitationFragment> = chunk
            .references
            .into_iter()
            .map(|r| CitationFragment::Inline {
                title: r.title,
                url: r.url,
                text: r.text,
            })
            .collect();

        let mut content: Option<String> = None;
        let mut finish_reason = None;

        for choice in chunk.choices {
            if let Some(fragment) = choice.delta.content {
                content.get_or_insert_with(String::new).push_str(&fragment);
            }
            citations.extend(choice.delta.citations.into_iter().map(|c| {
                CitationFragment::Delta {
                    title: c.title,
                    url: c.url,
                    snippet: c.snippet,
                }
            }));
            if choice.finish_reason.is_some() {
                finish_reason = choice.finish_reason;
            }
        }

        CompletionEvent {
            content,
            model: chunk.model,
            citations,
            finish_reason,
        }
    }
}
