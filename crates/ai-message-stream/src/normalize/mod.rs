//! Per-vocabulary translation from upstream JSON chunks to canonical events.
//!
//! Each normalizer holds the private accumulator state of one stream and is
//! created fresh for every request.
mod agent;
mod alias;
mod chat_completion;
mod generic;
mod ui_message;

pub use agent::AgentNormalizer;
pub use alias::Aliases;
pub use chat_completion::ChatCompletionNormalizer;
pub use generic::GenericNormalizer;
pub use ui_message::{UiMessageNormalizer, encode_ui_messages};

use tracing::debug;

use crate::errors::StreamError;
use crate::event::Event;

/// Maps one upstream chunk vocabulary to canonical events.
pub trait Normalizer: Send {
    /// Translates one parsed chunk.
    ///
    /// Unknown chunk types yield no events. An `Err` means the backend
    /// reported a stream-level failure inside the stream.
    fn normalize(&mut self, chunk: &serde_json::Value) -> Result<Vec<Event>, StreamError>;

    /// Closes whatever is still open when the stream ends.
    ///
    /// Called once per stream, whether or not a terminal sentinel arrived.
    /// Returns nothing when the stream already finished cleanly.
    fn finish(&mut self) -> Vec<Event>;
}

/// Parses one frame payload and normalizes it.
///
/// A payload that is not valid JSON is dropped on its own; the stream
/// continues.
pub fn normalize_payload(
    normalizer: &mut dyn Normalizer,
    payload: &str,
) -> Result<Vec<Event>, StreamError> {
    let chunk: serde_json::Value = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!(error = %e, len = payload.len(), "dropping frame with invalid JSON");
            return Ok(Vec::new());
        }
    };
    normalizer.normalize(&chunk)
}

pub(crate) fn new_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}
