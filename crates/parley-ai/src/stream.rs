//! Streaming event types and the server-sent-events decoder

use crate::types::{CompletionChunk, CompletionEvent};
use async_stream::stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

/// Prefix marking a line that carries a payload
pub const DATA_MARKER: &str = "data:";

/// Payload value that terminates the stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Items produced by a decoded completion stream.
///
/// Every stream ends with exactly one terminal item (`Done`, `Aborted` or
/// `Error`) and yields nothing after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A decoded completion event
    Chunk { event: CompletionEvent },
    /// Sentinel observed or body exhausted
    Done,
    /// Cancellation was observed
    Aborted,
    /// The body failed mid-stream
    Error { message: String },
}

impl StreamEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Chunk { .. })
    }
}

/// A stream of decoded completion events
pub type CompletionEventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

enum Line {
    Event(CompletionEvent),
    Done,
    Skip,
}

enum Read<T> {
    Cancelled,
    Next(Option<T>),
}

/// Decode an SSE response body into completion events.
///
/// The cancellation token is checked before every buffer scan; once it fires
/// the body is dropped and the stream ends with [`StreamEvent::Aborted`].
pub fn decode_event_stream<S, B, E>(body: S, cancel: CancellationToken) -> CompletionEventStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(stream! {
        let mut body = Box::pin(body);
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            // Drain every complete line currently buffered
            loop {
                if cancel.is_cancelled() {
                    yield StreamEvent::Aborted;
                    return;
                }

                let Some(newline) = buffer.iter().position(|b| *b == b'\n') else {
                    break;
                };
                let line: Vec<u8> = buffer.drain(..=newline).collect();

                match parse_line(&line) {
                    Line::Event(event) => yield StreamEvent::Chunk { event },
                    Line::Done => {
                        yield StreamEvent::Done;
                        return;
                    }
                    Line::Skip => {}
                }
            }

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => Read::Cancelled,
                next = body.next() => Read::Next(next),
            };

            match read {
                Read::Cancelled => {
                    yield StreamEvent::Aborted;
                    return;
                }
                Read::Next(Some(Ok(bytes))) => {
                    buffer.extend_from_slice(bytes.as_ref());
                }
                Read::Next(Some(Err(e))) => {
                    yield StreamEvent::Error { message: e.to_string() };
                    return;
                }
                Read::Next(None) => {
                    if !buffer.is_empty() {
                        tracing::debug!(
                            "Discarding {} bytes of unterminated trailing data",
                            buffer.len()
                        );
                    }
                    yield StreamEvent::Done;
                    return;
                }
            }
        }
    })
}

fn parse_line(raw: &[u8]) -> Line {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim_end_matches(['\n', '\r']);

    let Some(payload) = line.strip_prefix(DATA_MARKER) else {
        // event:, id:, retry:, comments and blank keep-alives
        return Line::Skip;
    };
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload.trim() == DONE_SENTINEL {
        return Line::Done;
    }

    match serde_json::from_str::<CompletionChunk>(payload) {
        Ok(chunk) => Line::Event(chunk.into()),
        Err(e) => {
            tracing::debug!("Dropping unparseable payload ({}): {}", e, payload);
            Line::Skip
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tokio_stream::wrappers::ReceiverStream;

    fn body(parts: Vec<&'static str>) -> impl Stream<Item = Result<&'static str, Infallible>> {
        futures::stream::iter(parts.into_iter().map(Ok))
    }

    async fn collect(stream: CompletionEventStream) -> Vec<StreamEvent> {
        stream.collect().await
    }

    fn contents(events: &[StreamEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Chunk { event } => event.content.clone(),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_nothing_after_sentinel() {
        let events = collect(decode_event_stream(
            body(vec![
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n",
                "data: [DONE]\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
            ]),
            CancellationToken::new(),
        ))
        .await;

        assert_eq!(contents(&events), vec!["Hel", "lo"]);
        assert_eq!(events.last(), Some(&StreamEvent::Done));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_sentinel_discards_rest_of_same_chunk() {
        let events = collect(decode_event_stream(
            body(vec![
                "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\ndata: [DONE]\ndata: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n",
            ]),
            CancellationToken::new(),
        ))
        .await;

        assert_eq!(contents(&events), vec!["a"]);
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_payloads_are_dropped() {
        let events = collect(decode_event_stream(
            body(vec![
                ": keep-alive\n",
                "data: {not json\n",
                "event: message\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
                "\n",
                "data: \"just a string\"\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\n",
            ]),
            CancellationToken::new(),
        ))
        .await;

        assert_eq!(contents(&events), vec!["ok", "!"]);
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks_and_crlf() {
        let events = collect(decode_event_stream(
            body(vec![
                "data: {\"model\":\"m-1\",\"choices\":[{\"del",
                "ta\":{\"content\":\"split\"}}]}\r\n",
                "data:{\"choices\":[{\"delta\":{\"content\":\" line\"}}]}\r\n",
            ]),
            CancellationToken::new(),
        ))
        .await;

        assert_eq!(contents(&events), vec!["split", " line"]);
        match &events[0] {
            StreamEvent::Chunk { event } => assert_eq!(event.model.as_deref(), Some("m-1")),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        let payload = "data: {\"choices\":[{\"delta\":{\"content\":\"caf\u{e9}\"}}]}\n".as_bytes();
        let cut = payload.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let parts: Vec<Result<Vec<u8>, Infallible>> =
            vec![Ok(payload[..cut].to_vec()), Ok(payload[cut..].to_vec())];

        let events = collect(decode_event_stream(
            futures::stream::iter(parts),
            CancellationToken::new(),
        ))
        .await;

        assert_eq!(contents(&events), vec!["caf\u{e9}"]);
    }

    #[tokio::test]
    async fn test_exhaustion_without_sentinel_is_done() {
        let events = collect(decode_event_stream(
            body(vec![
                "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"unterminated\"}}]}",
            ]),
            CancellationToken::new(),
        ))
        .await;

        assert_eq!(contents(&events), vec!["x"]);
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[tokio::test]
    async fn test_body_error_is_terminal() {
        let parts: Vec<Result<&'static str, String>> = vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n"),
            Err("connection reset".to_string()),
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"y\"}}]}\n"),
        ];
        let events = collect(decode_event_stream(
            futures::stream::iter(parts),
            CancellationToken::new(),
        ))
        .await;

        assert_eq!(contents(&events), vec!["x"]);
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Error {
                message: "connection reset".into()
            })
        );
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let events = collect(decode_event_stream(
            body(vec!["data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n"]),
            cancel,
        ))
        .await;

        assert_eq!(events, vec![StreamEvent::Aborted]);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_body() {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<&'static str, Infallible>>(4);
        let cancel = CancellationToken::new();
        let mut stream = decode_event_stream(ReceiverStream::new(rx), cancel.clone());

        tx.send(Ok("data: {\"choices\":[{\"delta\":{\"content\":\"Par\"}}]}\n"))
            .await
            .unwrap();
        let first = stream.next().await.unwrap();
        assert!(matches!(first, StreamEvent::Chunk { .. }));

        cancel.cancel();
        assert_eq!(stream.next().await, Some(StreamEvent::Aborted));
        assert_eq!(stream.next().await, None);
        drop(tx);
    }
}
