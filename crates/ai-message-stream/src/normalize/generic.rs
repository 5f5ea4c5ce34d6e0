use serde_json::Value;
use tracing::debug;

use super::{Aliases, Normalizer};
use crate::errors::StreamError;
use crate::event::Event;

const ERROR_TEXT: Aliases = Aliases(&["errorText", "message", "error"]);

/// Normalizer for the generic event protocol, whose chunks already are
/// canonical events. Also used for the tab-delimited legacy framing.
#[derive(Debug, Default)]
pub struct GenericNormalizer {
    unfinished: Vec<String>,
}

impl Normalizer for GenericNormalizer {
    fn normalize(&mut self, chunk: &Value) -> Result<Vec<Event>, StreamError> {
        if chunk.get("type").and_then(Value::as_str) == Some("error") {
            let message = ERROR_TEXT.str(chunk).unwrap_or("Unknown error");
            return Err(StreamError::upstream(message));
        }
        let event: Event = match serde_json::from_value(chunk.clone()) {
            Ok(event) => event,
            Err(e) => {
                let chunk_type = chunk.get("type").and_then(Value::as_str).unwrap_or("<none>");
                debug!(
                    chunk_type,
                    error = %e,
                    "ignoring unrecognized chunk"
                );
                return Ok(Vec::new());
            }
        };
        let id = event.message_id();
        if matches!(event, Event::Finish { .. }) {
            self.unfinished.retain(|open| open.as_str() != id);
        } else if !self.unfinished.iter().any(|open| open.as_str() == id) {
            self.unfinished.push(id.to_string());
        }
        Ok(vec![event])
    }

    fn finish(&mut self) -> Vec<Event> {
        self.unfinished
            .drain(..)
            .map(|id| Event::Finish {
                id,
                finish_reason: None,
            })
            .collect()
    }
}
