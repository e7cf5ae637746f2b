//! Completion provider implementations

pub mod openai;

use crate::{CompletionEventStream, CompletionRequest, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Trait for streaming completion providers
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Open a streaming completion.
    ///
    /// A non-success initial response is returned as `Err` before any event
    /// is produced. The token is threaded into the decoder so that
    /// cancellation ends the stream as aborted.
    async fn stream_completion(
        &self,
        request: &CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<CompletionEventStream>;
}
