//! Opening completion streams with reconnect

use std::time::Duration;

use parley_ai::{CompletionEventStream, CompletionProvider, CompletionRequest, Error, Result};
use tokio_util::sync::CancellationToken;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No reconnect attempts at all
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }

    /// Delay before retrying after `error`, honouring a server `retry-after`
    fn delay_after(&self, error: &Error, attempt: u32) -> Duration {
        match error {
            Error::RateLimited {
                retry_after: Some(secs),
            } => Duration::from_secs(*secs).min(self.max_delay),
            _ => self.delay_for_attempt(attempt),
        }
    }
}

/// Open a completion stream, reconnecting on retryable failures.
///
/// Backoff sleeps race the cancellation token; a cancelled request returns
/// [`Error::Aborted`] without another attempt.
pub async fn open_stream(
    provider: &dyn CompletionProvider,
    request: &CompletionRequest,
    cancel: &CancellationToken,
    retry: &RetryConfig,
) -> Result<CompletionEventStream> {
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Aborted);
        }

        let error = match provider.stream_completion(request, cancel.clone()).await {
            Ok(stream) => return Ok(stream),
            Err(e) => e,
        };

        if matches!(error, Error::Aborted) || !error.is_retryable() || attempt >= retry.max_retries
        {
            return Err(error);
        }

        let delay = retry.delay_after(&error, attempt);
        tracing::warn!(
            "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
            attempt + 1,
            retry.max_retries + 1,
            error,
            delay
        );
        attempt += 1;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Aborted),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
