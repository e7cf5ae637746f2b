//! Folding decoded events into the streaming message.

use parley_ai::CompletionEvent;

use crate::citations::{Citation, merge_citations, render_citations_block};
use crate::controller::StreamTicket;
use crate::ids::{ConversationId, MessageId};
use crate::transcript::Message;

/// Appended to partial content when the user stops generation
pub const STOPPED_NOTICE: &str = "\n\n_Generation stopped._";

/// Replaces empty content when the user stops generation
pub const STOPPED_REPLACEMENT: &str = "Generation stopped.";

/// Why a streaming message is being sealed early
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SealReason {
    /// User-initiated cancellation
    Stopped,
    /// Transport or stream failure
    Failed(String),
}

impl SealReason {
    fn suffix(&self) -> String {
        match self {
            SealReason::Stopped => STOPPED_NOTICE.to_string(),
            SealReason::Failed(message) => format!("\n\n_Error: {}_", message),
        }
    }

    fn replacement(&self) -> String {
        match self {
            SealReason::Stopped => STOPPED_REPLACEMENT.to_string(),
            SealReason::Failed(message) => format!("Error: {}", message),
        }
    }
}

/// What a single event changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    /// Content units appended
    pub appended: usize,
    /// Citations newly added
    pub citations_added: usize,
}

impl Applied {
    /// Only content growth warrants a checkpoint request
    pub fn wants_checkpoint(&self) -> bool {
        self.appended > 0
    }
}

/// State of one in-flight completion.
///
/// Lives from dispatch until a terminal state; dropping it releases the
/// conversation's single-flight slot.
pub struct StreamSession {
    ticket: StreamTicket,
    target_index: usize,
    message_id: Option<MessageId>,
    content: String,
    content_len: usize,
    citations: Vec<Citation>,
    model_id: Option<String>,
    search_enabled: bool,
    persisted_len: usize,
    finalized: bool,
}

impl StreamSession {
    /// Start accumulating into the message at `target_index`.
    ///
    /// `message_id` is the durable id to update in place, if the target was
    /// persisted before (retry).
    pub fn new(
        ticket: StreamTicket,
        target_index: usize,
        message_id: Option<MessageId>,
        search_enabled: bool,
    ) -> Self {
        Self {
            ticket,
            target_index,
            message_id,
            content: String::new(),
            content_len: 0,
            citations: Vec::new(),
            model_id: None,
            search_enabled,
            persisted_len: 0,
            finalized: false,
        }
    }

    pub fn ticket(&self) -> &StreamTicket {
        &self.ticket
    }

    pub fn conversation_id(&self) -> &ConversationId {
        self.ticket.conversation_id()
    }

    pub fn target_index(&self) -> usize {
        self.target_index
    }

    pub fn message_id(&self) -> Option<&MessageId> {
        self.message_id.as_ref()
    }

    pub(crate) fn set_message_id(&mut self, id: MessageId) {
        self.message_id = Some(id);
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Accumulated content length in content units (chars)
    pub fn content_len(&self) -> usize {
        self.content_len
    }

    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    /// Model most recently declared by the server
    pub fn model_id(&self) -> Option<&str> {
        self.model_id.as_deref()
    }

    pub fn search_enabled(&self) -> bool {
        self.search_enabled
    }

    pub fn persisted_len(&self) -> usize {
        self.persisted_len
    }

    pub(crate) fn mark_persisted(&mut self, len: usize) {
        self.persisted_len = len;
    }

    /// Content units not yet durably checkpointed
    pub fn unpersisted_len(&self) -> usize {
        self.content_len.saturating_sub(self.persisted_len)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub(crate) fn mark_finalized(&mut self) {
        self.finalized = true;
    }

    fn push_content(&mut self, message: &mut Message, fragment: &str) -> usize {
        let units = fragment.chars().count();
        self.content.push_str(fragment);
        self.content_len += units;
        message.content.push_str(fragment);
        units
    }

    /// Fold one decoded event into the target message.
    ///
    /// Content only ever grows. The server-declared model overrides whatever
    /// the message carried.
    pub fn apply(&mut self, message: &mut Message, event: &CompletionEvent) -> Applied {
        debug_assert!(message.is_streaming, "events applied to a sealed message");

        if let Some(model) = event.model.as_deref().filter(|m| !m.is_empty()) {
            self.model_id = Some(model.to_string());
            message.model_id = Some(model.to_string());
        }

        let mut applied = Applied::default();

        if !event.citations.is_empty() {
            applied.citations_added = merge_citations(&mut self.citations, &event.citations);
            if applied.citations_added > 0 {
                message.citations = self.citations.clone();
            }
        }

        if let Some(fragment) = event.content_fragment() {
            applied.appended = self.push_content(message, fragment);
        }

        applied
    }

    /// Finalization pass after the stream completed normally.
    ///
    /// Search-augmented answers with citations get the rendered citation
    /// block appended; everything else is sealed as-is.
    pub fn finish(&mut self, message: &mut Message) {
        if self.search_enabled && !self.citations.is_empty() {
            let block = render_citations_block(&self.citations);
            self.push_content(message, &block);
        }
        message.citations = self.citations.clone();
        message.is_streaming = false;
    }

    /// Seal the message after an abort or failure.
    ///
    /// Partial content keeps what arrived and gets the notice appended; empty
    /// content is replaced by the notice alone.
    pub fn seal(&mut self, message: &mut Message, reason: &SealReason) {
        if self.content.is_empty() {
            let replacement = reason.replacement();
            message.content.clear();
            self.push_content(message, &replacement);
        } else {
            self.push_content(message, &reason.suffix());
        }
        message.citations = self.citations.clone();
        message.is_streaming = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::RequestController;
    use parley_ai::CitationFragment;

    fn session(search_enabled: bool) -> (StreamSession, Message) {
        let controller = RequestController::new();
        let ticket = controller.start(&ConversationId::from("c-1")).unwrap();
        (
            StreamSession::new(ticket, 1, None, search_enabled),
            Message::assistant_placeholder(Some("client-default".into())),
        )
    }

    fn text(fragment: &str) -> CompletionEvent {
        CompletionEvent {
            content: Some(fragment.into()),
            ..Default::default()
        }
    }

    fn cite(url: &str, title: &str) -> CitationFragment {
        CitationFragment::Inline {
            title: Some(title.into()),
            url: url.into(),
            text: None,
        }
    }

    #[test]
    fn test_content_is_append_only() {
        let (mut s, mut msg) = session(false);
        let events = vec![
            text("Hel"),
            CompletionEvent::default(),
            text(""),
            text("lo"),
            CompletionEvent {
                model: Some("m".into()),
                ..Default::default()
            },
            text(", world"),
        ];

        let mut last_len = 0;
        for event in &events {
            s.apply(&mut msg, event);
            assert!(s.content_len() >= last_len);
            assert_eq!(msg.content, s.content());
            last_len = s.content_len();
        }
        assert_eq!(msg.content, "Hello, world");
        assert_eq!(s.content_len(), 12);
    }

    #[test]
    fn test_empty_fragment_does_not_request_checkpoint() {
        let (mut s, mut msg) = session(false);
        assert!(!s.apply(&mut msg, &text("")).wants_checkpoint());
        assert!(!s.apply(&mut msg, &CompletionEvent::default()).wants_checkpoint());
        assert!(s.apply(&mut msg, &text("x")).wants_checkpoint());
    }

    #[test]
    fn test_server_model_overrides_client_default() {
        let (mut s, mut msg) = session(false);
        s.apply(
            &mut msg,
            &CompletionEvent {
                model: Some("fallback-model".into()),
                content: Some("a".into()),
                ..Default::default()
            },
        );
        assert_eq!(msg.model_id.as_deref(), Some("fallback-model"));
        assert_eq!(s.model_id(), Some("fallback-model"));

        // Events without a model keep the last declared one
        s.apply(&mut msg, &text("b"));
        assert_eq!(msg.model_id.as_deref(), Some("fallback-model"));
    }

    #[test]
    fn test_content_units_are_chars() {
        let (mut s, mut msg) = session(false);
        let applied = s.apply(&mut msg, &text("h\u{e9}llo \u{1f980}"));
        assert_eq!(applied.appended, 7);
        assert_eq!(s.content_len(), 7);
    }

    #[test]
    fn test_finish_appends_citations_for_search() {
        let (mut s, mut msg) = session(true);
        s.apply(
            &mut msg,
            &CompletionEvent {
                content: Some("Answer".into()),
                citations: vec![cite("https://a.example", "A"), cite("https://a.example/", "dup")],
                ..Default::default()
            },
        );
        s.apply(
            &mut msg,
            &CompletionEvent {
                citations: vec![cite("https://b.example", "B")],
                ..Default::default()
            },
        );
        s.finish(&mut msg);

        assert!(!msg.is_streaming);
        assert_eq!(msg.citations.len(), 2);
        assert_eq!(
            msg.content,
            "Answer\n\n**Citations:**\n1. [A](https://a.example)\n2. [B](https://b.example)"
        );
        assert_eq!(msg.content, s.content());
    }

    #[test]
    fn test_finish_without_search_leaves_content() {
        let (mut s, mut msg) = session(false);
        s.apply(
            &mut msg,
            &CompletionEvent {
                content: Some("Answer".into()),
                citations: vec![cite("https://a.example", "A")],
                ..Default::default()
            },
        );
        s.finish(&mut msg);
        assert_eq!(msg.content, "Answer");
        assert_eq!(msg.citations.len(), 1);
    }

    #[test]
    fn test_seal_stopped_with_partial_content() {
        let (mut s, mut msg) = session(false);
        s.apply(&mut msg, &text("Par"));
        s.seal(&mut msg, &SealReason::Stopped);
        assert_eq!(msg.content, "Par\n\n_Generation stopped._");
        assert!(!msg.is_streaming);
    }

    #[test]
    fn test_seal_stopped_with_empty_content() {
        let (mut s, mut msg) = session(false);
        s.seal(&mut msg, &SealReason::Stopped);
        assert_eq!(msg.content, "Generation stopped.");
        assert_eq!(s.content(), "Generation stopped.");
    }

    #[test]
    fn test_seal_failed() {
        let (mut s, mut msg) = session(false);
        s.seal(&mut msg, &SealReason::Failed("API error (500): boom".into()));
        assert_eq!(msg.content, "Error: API error (500): boom");

        let (mut s, mut msg) = session(false);
        s.apply(&mut msg, &text("Half"));
        s.seal(&mut msg, &SealReason::Failed("reset".into()));
        assert_eq!(msg.content, "Half\n\n_Error: reset_");
    }
}
