//! Error types for parley-engine

use thiserror::Error;

use crate::ids::ConversationId;
use crate::store::StoreError;

/// Result type alias using parley-engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by conversation operations
#[derive(Error, Debug)]
pub enum Error {
    /// The completion endpoint could not be reached or refused the request
    #[error(transparent)]
    Transport(#[from] parley_ai::Error),

    /// A request is already in flight for this conversation
    #[error("conversation {0} already has a request in flight")]
    Busy(ConversationId),

    /// A synchronous write the operation depends on failed
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// No assistant turn can be regenerated at this index
    #[error("no retryable turn at message index {0}")]
    InvalidTurn(usize),

    /// Submitted text was empty
    #[error("message is empty")]
    EmptyInput,
}

impl Error {
    /// Check if this error is a single-flight rejection
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Busy(_))
    }
}
