//! parley-ai: streaming completion transport
//!
//! This crate talks to OpenAI-compatible chat completion endpoints and
//! decodes their server-sent-event bodies into discrete completion events.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use providers::CompletionProvider;
pub use stream::{CompletionEventStream, StreamEvent, decode_event_stream};
pub use types::*;
