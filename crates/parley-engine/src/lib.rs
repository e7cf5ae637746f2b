//! parley-engine: streaming conversation engine
//!
//! This crate drives a conversation transcript through streaming completion
//! turns: it folds decoded events into the transcript, checkpoints partial
//! answers to a store, and enforces one request in flight per conversation.

pub mod accumulator;
pub mod checkpoint;
pub mod citations;
pub mod controller;
pub mod error;
pub mod events;
pub mod ids;
pub mod session;
pub mod store;
pub mod transcript;
pub mod transport;

pub use accumulator::{SealReason, StreamSession};
pub use checkpoint::{CheckpointPolicy, Checkpointer};
pub use citations::Citation;
pub use controller::{RequestController, StreamTicket};
pub use error::{Error, Result};
pub use events::SessionEvent;
pub use ids::{ConversationId, MessageId};
pub use session::{ConversationSession, SessionConfig, SessionHandle, SessionState, TurnOutcome};
pub use store::{ConversationStore, ConversationSummary, MemoryStore, StoreError, StoreResult, StoredMessage};
pub use transcript::{Message, Transcript};
pub use transport::RetryConfig;
