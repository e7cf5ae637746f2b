//! OpenAI-compatible Chat Completions provider

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::CompletionProvider;
use crate::{
    error::{Error, Result},
    stream::{CompletionEventStream, decode_event_stream},
    types::{ChatMessage, CompletionRequest},
};

/// Default endpoint when none is configured
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for any endpoint speaking the Chat Completions streaming protocol
pub struct OpenAICompatProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAICompatProvider {
    /// Create a new provider with an API key and base URL
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// The endpoint this provider posts to
    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request<'a>(&self, request: &'a CompletionRequest) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &request.model_id,
            messages: &request.history,
            stream: true,
            search: request.search_enabled.then_some(true),
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAICompatProvider {
    async fn stream_completion(
        &self,
        request: &CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<CompletionEventStream> {
        if self.base_url.is_empty() {
            return Err(Error::InvalidConfig("base URL is empty".into()));
        }

        let body = self.build_request(request);
        let mut builder = self
            .client
            .post(self.endpoint())
            .header("content-type", "application/json")
            .header("accept", "text/event-stream")
            .json(&body);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        tracing::debug!(
            "Opening completion stream: model={}, messages={}, search={}",
            request.model_id,
            request.history.len(),
            request.search_enabled
        );

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Aborted),
            response = builder.send() => response?,
        };

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(Error::RateLimited { retry_after });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::InvalidApiKey);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), text));
        }

        Ok(decode_event_stream(response.bytes_stream(), cancel))
    }
}

// Request types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    search: Option<bool>,
}
