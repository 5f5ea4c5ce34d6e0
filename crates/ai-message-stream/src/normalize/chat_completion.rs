use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use super::{Aliases, Normalizer, new_message_id};
use crate::assembler::parse_input_stream;
use crate::errors::StreamError;
use crate::event::Event;

const CONTENT: Aliases = Aliases(&["content"]);
const REASONING: Aliases = Aliases(&["reasoning_content", "reasoning"]);
const FINISH_REASON: Aliases = Aliases(&["finish_reason"]);

#[derive(Debug)]
struct PendingToolCall {
    id: String,
    name: Option<String>,
    arguments: String,
    started: bool,
}

/// Normalizer for OpenAI-style chat completion chunks
/// (`{choices:[{delta:{content, tool_calls}, finish_reason}]}`).
///
/// Only the first choice is followed. Tool calls are keyed by their `index`
/// because later fragments omit the id.
#[derive(Debug, Default)]
pub struct ChatCompletionNormalizer {
    message_id: Option<String>,
    text_open: bool,
    reasoning_open: bool,
    tools: BTreeMap<u64, PendingToolCall>,
    finished: bool,
}

impl ChatCompletionNormalizer {
    fn message_id(&mut self, chunk: &Value, events: &mut Vec<Event>) -> String {
        if let Some(id) = &self.message_id {
            return id.clone();
        }
        let id = chunk
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(ToOwned::to_owned)
            .unwrap_or_else(new_message_id);
        events.push(Event::Start { id: id.clone() });
        self.message_id = Some(id.clone());
        id
    }

    fn push_reasoning(&mut self, id: &str, delta: &str, events: &mut Vec<Event>) {
        if !self.reasoning_open {
            self.reasoning_open = true;
            events.push(Event::ReasoningStart { id: id.to_string() });
        }
        events.push(Event::ReasoningDelta {
            id: id.to_string(),
            delta: delta.to_string(),
        });
    }

    fn push_text(&mut self, id: &str, delta: &str, events: &mut Vec<Event>) {
        self.close_reasoning(id, events);
        if !self.text_open {
            self.text_open = true;
            events.push(Event::TextStart { id: id.to_string() });
        }
        events.push(Event::TextDelta {
            id: id.to_string(),
            delta: delta.to_string(),
        });
    }

    fn close_reasoning(&mut self, id: &str, events: &mut Vec<Event>) {
        if self.reasoning_open {
            self.reasoning_open = false;
            events.push(Event::ReasoningEnd { id: id.to_string() });
        }
    }

    fn push_tool_fragment(
        &mut self,
        id: &str,
        position: usize,
        fragment: &Value,
        events: &mut Vec<Event>,
    ) {
        let index = fragment
            .get("index")
            .and_then(Value::as_u64)
            .unwrap_or(position as u64);
        let function = fragment.get("function");
        let call_id = fragment.get("id").and_then(Value::as_str);
        let name = function
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty());
        let arguments = function
            .and_then(|f| f.get("arguments"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        let tool = self.tools.entry(index).or_insert_with(|| PendingToolCall {
            id: call_id
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| format!("call_{index}")),
            name: None,
            arguments: String::new(),
            started: false,
        });
        if tool.name.is_none() {
            tool.name = name.map(ToOwned::to_owned);
        }
        tool.arguments.push_str(arguments);

        if !tool.started {
            let Some(tool_name) = tool.name.clone() else {
                return;
            };
            tool.started = true;
            events.push(Event::ToolStart {
                id: id.to_string(),
                tool_call_id: tool.id.clone(),
                tool_name,
                provider_metadata: None,
            });
            if !tool.arguments.is_empty() {
                events.push(Event::ToolDelta {
                    id: id.to_string(),
                    tool_call_id: tool.id.clone(),
                    delta: tool.arguments.clone(),
                });
            }
        } else if !arguments.is_empty() {
            events.push(Event::ToolDelta {
                id: id.to_string(),
                tool_call_id: tool.id.clone(),
                delta: arguments.to_string(),
            });
        }
    }

    fn close(&mut self, id: &str, finish_reason: Option<String>, events: &mut Vec<Event>) {
        self.close_reasoning(id, events);
        if self.text_open {
            self.text_open = false;
            events.push(Event::TextEnd { id: id.to_string() });
        }
        for tool in std::mem::take(&mut self.tools).into_values() {
            if !tool.started {
                debug!(tool_call_id = %tool.id, "dropping tool call that never received a name");
                continue;
            }
            events.push(Event::ToolEnd {
                id: id.to_string(),
                tool_call_id: tool.id.clone(),
            });
            events.push(Event::ToolCall {
                id: id.to_string(),
                tool_call_id: tool.id,
                tool_name: tool.name,
                input: parse_input_stream(Some(&tool.arguments)),
                provider_metadata: None,
            });
        }
        events.push(Event::FinishStep { id: id.to_string() });
        events.push(Event::Finish {
            id: id.to_string(),
            finish_reason,
        });
        self.finished = true;
    }
}

impl Normalizer for ChatCompletionNormalizer {
    fn normalize(&mut self, chunk: &Value) -> Result<Vec<Event>, StreamError> {
        if let Some(error) = chunk.get("error").filter(|e| !e.is_null()) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| error.as_str())
                .unwrap_or("Unknown error");
            return Err(StreamError::upstream(message));
        }
        if self.finished {
            return Ok(Vec::new());
        }
        let Some(choice) = chunk
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
        else {
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        let id = self.message_id(chunk, &mut events);

        if let Some(delta) = choice.get("delta") {
            if let Some(reasoning) = REASONING.str(delta).filter(|s| !s.is_empty()) {
                self.push_reasoning(&id, reasoning, &mut events);
            }
            if let Some(content) = CONTENT.str(delta).filter(|s| !s.is_empty()) {
                self.push_text(&id, content, &mut events);
            }
            if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
                self.close_reasoning(&id, &mut events);
                for (position, fragment) in tool_calls.iter().enumerate() {
                    self.push_tool_fragment(&id, position, fragment, &mut events);
                }
            }
        }

        if let Some(reason) = FINISH_REASON.str(choice) {
            self.close(&id, Some(reason.to_string()), &mut events);
        }
        Ok(events)
    }

    fn finish(&mut self) -> Vec<Event> {
        if self.finished {
            return Vec::new();
        }
        let Some(id) = self.message_id.clone() else {
            return Vec::new();
        };
        let mut events = Vec::new();
        self.close(&id, None, &mut events);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::MessageAssembler;
    use crate::message::ToolStatus;
    use serde_json::json;

    fn run(chunks: &[Value]) -> (ChatCompletionNormalizer, Vec<Event>) {
        let mut normalizer = ChatCompletionNormalizer::default();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(normalizer.normalize(chunk).expect("normalize"));
        }
        (normalizer, events)
    }

    #[test]
    fn content_deltas_become_one_text_segment() {
        let (mut normalizer, events) = run(&[
            json!({"id": "c1", "choices": [{"delta": {"role": "assistant", "content": "A"}}]}),
            json!({"id": "c1", "choices": [{"delta": {"content": "B"}}]}),
            json!({"id": "c1", "choices": [{"delta": {}, "finish_reason": "stop"}]}),
        ]);
        let kinds: Vec<&str> = events.iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![
                "start",
                "text-start",
                "text-delta",
                "text-delta",
                "text-end",
                "finish-step",
                "finish"
            ]
        );
        assert!(normalizer.finish().is_empty());

        let assembler = MessageAssembler::replay(&events);
        assert_eq!(assembler.get_message("c1").expect("message").text(), "AB");
    }

    #[test]
    fn finish_reason_without_delta_is_recognized() {
        let (_, events) = run(&[
            json!({"choices": [{"delta": {"content": "x"}}]}),
            json!({"choices": [{"finish_reason": "length"}]}),
        ]);
        assert!(matches!(
            events.last(),
            Some(Event::Finish { finish_reason: Some(reason), .. }) if reason == "length"
        ));
    }

    #[test]
    fn reasoning_closes_before_text() {
        let (_, events) = run(&[
            json!({"id": "c1", "choices": [{"delta": {"reasoning_content": "think"}}]}),
            json!({"id": "c1", "choices": [{"delta": {"content": "say"}}]}),
        ]);
        let kinds: Vec<&str> = events.iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![
                "start",
                "reasoning-start",
                "reasoning-delta",
                "reasoning-end",
                "text-start",
                "text-delta"
            ]
        );
    }

    #[test]
    fn interleaved_tool_calls_are_tracked_by_index() {
        let (_, events) = run(&[
            json!({"id": "c1", "choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_a", "function": {"name": "weather", "arguments": ""}},
                {"index": 1, "id": "call_b", "function": {"name": "time", "arguments": "{\"tz\""}}
            ]}}]}),
            json!({"id": "c1", "choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{\"city\":\"Oslo\"}"}},
                {"index": 1, "function": {"arguments": ":\"UTC\"}"}}
            ]}}]}),
            json!({"id": "c1", "choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
        ]);
        let assembler = MessageAssembler::replay(&events);
        let message = assembler.get_message("c1").expect("message");
        let weather = message.tool_part("call_a").expect("weather");
        assert_eq!(weather.status, ToolStatus::Pending);
        assert_eq!(weather.input, Some(json!({"city": "Oslo"})));
        let time = message.tool_part("call_b").expect("time");
        assert_eq!(time.input, Some(json!({"tz": "UTC"})));
        assert_eq!(time.input_stream.as_deref(), Some("{\"tz\":\"UTC\"}"));
    }

    #[test]
    fn finish_without_finish_reason_closes_open_state() {
        let (mut normalizer, _) = run(&[json!({"id": "c1", "choices": [{"delta": {
            "content": "partial",
            "tool_calls": [{"index": 0, "id": "t", "function": {"name": "f", "arguments": "{}"}}]
        }}]})]);
        let kinds: Vec<&'static str> = normalizer.finish().iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec!["text-end", "tool-end", "tool-call", "finish-step", "finish"]
        );
        assert!(normalizer.finish().is_empty());
    }

    #[test]
    fn error_chunk_is_upstream_error() {
        let mut normalizer = ChatCompletionNormalizer::default();
        let err = normalizer
            .normalize(&json!({"error": {"message": "rate limited"}}))
            .expect_err("error");
        assert_eq!(err, StreamError::upstream("rate limited"));
    }

    #[test]
    fn usage_only_chunk_yields_nothing() {
        let (mut normalizer, events) = run(&[json!({"choices": [], "usage": {"total_tokens": 3}})]);
        assert!(events.is_empty());
        assert!(normalizer.finish().is_empty());
    }
}
