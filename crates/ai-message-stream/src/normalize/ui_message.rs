use std::collections::HashMap;

use serde_json::{Value, json};
use tracing::debug;

use super::{Aliases, Normalizer, new_message_id};
use crate::errors::StreamError;
use crate::event::Event;
use crate::message::{Message, Part, Role, ToolPart, ToolStatus};

const MESSAGE_ID: Aliases = Aliases(&["messageId"]);
const TEXT_DELTA: Aliases = Aliases(&["delta", "textDelta", "text"]);
const INPUT_DELTA: Aliases = Aliases(&["inputTextDelta", "delta"]);
const TOOL_CALL_ID: Aliases = Aliases(&["toolCallId"]);
const TOOL_NAME: Aliases = Aliases(&["toolName"]);
const ERROR_TEXT: Aliases = Aliases(&["errorText", "message"]);
const FINISH_REASON: Aliases = Aliases(&["finishReason", "finish_reason"]);

#[derive(Debug, Default)]
struct ToolCallState {
    input_streaming: bool,
}

/// Normalizer for the UI-message / tool-streaming protocol.
///
/// Part ids in this vocabulary identify segments, not messages; every event is
/// attributed to the single message the stream is building.
#[derive(Debug, Default)]
pub struct UiMessageNormalizer {
    message_id: Option<String>,
    text_open: bool,
    reasoning_open: bool,
    tools: HashMap<String, ToolCallState>,
    finished: bool,
}

impl UiMessageNormalizer {
    fn message_id(&mut self) -> String {
        self.message_id.get_or_insert_with(new_message_id).clone()
    }

    fn close_segments(&mut self, id: &str, events: &mut Vec<Event>) {
        if self.reasoning_open {
            self.reasoning_open = false;
            events.push(Event::ReasoningEnd { id: id.to_string() });
        }
        if self.text_open {
            self.text_open = false;
            events.push(Event::TextEnd { id: id.to_string() });
        }
        let mut streaming: Vec<String> = self
            .tools
            .iter()
            .filter(|(_, state)| state.input_streaming)
            .map(|(tool_call_id, _)| tool_call_id.clone())
            .collect();
        streaming.sort();
        for tool_call_id in streaming {
            if let Some(state) = self.tools.get_mut(&tool_call_id) {
                state.input_streaming = false;
            }
            events.push(Event::ToolEnd {
                id: id.to_string(),
                tool_call_id,
            });
        }
    }

    fn tool_call_id(chunk: &Value) -> Option<String> {
        let id = TOOL_CALL_ID.str(chunk).map(ToOwned::to_owned);
        if id.is_none() {
            let chunk_type = chunk.get("type").and_then(Value::as_str).unwrap_or_default();
            debug!(chunk_type, "dropping tool chunk without toolCallId");
        }
        id
    }
}

impl Normalizer for UiMessageNormalizer {
    fn normalize(&mut self, chunk: &Value) -> Result<Vec<Event>, StreamError> {
        let Some(chunk_type) = chunk.get("type").and_then(Value::as_str) else {
            return Ok(Vec::new());
        };
        if chunk_type == "error" {
            let message = ERROR_TEXT.str(chunk).unwrap_or("Unknown error");
            return Err(StreamError::upstream(message));
        }
        if self.finished {
            debug!(chunk_type, "ignoring chunk after finish");
            return Ok(Vec::new());
        }
        if chunk_type == "start"
            && self.message_id.is_none()
            && let Some(id) = MESSAGE_ID.str(chunk)
        {
            self.message_id = Some(id.to_string());
        }

        let id = self.message_id();
        let mut events = Vec::new();
        match chunk_type {
            "start" => events.push(Event::Start { id }),
            "start-step" => events.push(Event::StartStep { id }),
            "text-start" => {
                self.text_open = true;
                events.push(Event::TextStart { id });
            }
            "text-delta" => {
                if let Some(delta) = TEXT_DELTA.str(chunk) {
                    events.push(Event::TextDelta {
                        id,
                        delta: delta.to_string(),
                    });
                }
            }
            "text-end" => {
                self.text_open = false;
                events.push(Event::TextEnd { id });
            }
            "reasoning-start" => {
                self.reasoning_open = true;
                events.push(Event::ReasoningStart { id });
            }
            "reasoning-delta" => {
                if let Some(delta) = TEXT_DELTA.str(chunk) {
                    events.push(Event::ReasoningDelta {
                        id,
                        delta: delta.to_string(),
                    });
                }
            }
            "reasoning-end" => {
                self.reasoning_open = false;
                events.push(Event::ReasoningEnd { id });
            }
            "tool-input-start" => {
                let (Some(tool_call_id), Some(tool_name)) =
                    (Self::tool_call_id(chunk), TOOL_NAME.str(chunk))
                else {
                    return Ok(events);
                };
                self.tools.entry(tool_call_id.clone()).or_default().input_streaming = true;
                events.push(Event::ToolStart {
                    id,
                    tool_call_id,
                    tool_name: tool_name.to_string(),
                    provider_metadata: chunk.get("providerMetadata").cloned(),
                });
            }
            "tool-input-delta" => {
                if let (Some(tool_call_id), Some(delta)) =
                    (Self::tool_call_id(chunk), INPUT_DELTA.str(chunk))
                {
                    events.push(Event::ToolDelta {
                        id,
                        tool_call_id,
                        delta: delta.to_string(),
                    });
                }
            }
            "tool-input-available" => {
                let Some(tool_call_id) = Self::tool_call_id(chunk) else {
                    return Ok(events);
                };
                let state = self.tools.entry(tool_call_id.clone()).or_default();
                if state.input_streaming {
                    state.input_streaming = false;
                    events.push(Event::ToolEnd {
                        id: id.clone(),
                        tool_call_id: tool_call_id.clone(),
                    });
                }
                events.push(Event::ToolCall {
                    id,
                    tool_call_id,
                    tool_name: TOOL_NAME.str(chunk).map(ToOwned::to_owned),
                    input: chunk.get("input").cloned().unwrap_or(Value::Null),
                    provider_metadata: chunk.get("providerMetadata").cloned(),
                });
            }
            "tool-input-error" | "tool-output-error" => {
                if let Some(tool_call_id) = Self::tool_call_id(chunk) {
                    if let Some(state) = self.tools.get_mut(&tool_call_id) {
                        state.input_streaming = false;
                    }
                    events.push(Event::ToolError {
                        id,
                        tool_call_id,
                        error_text: ERROR_TEXT.str(chunk).unwrap_or("Tool error").to_string(),
                    });
                }
            }
            "tool-output-available" => {
                if let Some(tool_call_id) = Self::tool_call_id(chunk) {
                    events.push(Event::ToolResult {
                        id,
                        tool_call_id,
                        output: chunk.get("output").cloned().unwrap_or(Value::Null),
                    });
                }
            }
            "finish-step" => events.push(Event::FinishStep { id }),
            "finish" | "abort" => {
                self.close_segments(&id, &mut events);
                let finish_reason = match chunk_type {
                    "abort" => Some("abort".to_string()),
                    _ => FINISH_REASON.str(chunk).map(ToOwned::to_owned),
                };
                events.push(Event::Finish { id, finish_reason });
                self.finished = true;
            }
            other => debug!(chunk_type = other, "ignoring unknown chunk type"),
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
        self.close_segments(&id, &mut events);
        events.push(Event::Finish {
            id,
            finish_reason: None,
        });
        self.finished = true;
        events
    }
}

/// Serializes the message history into the UI-message request vocabulary.
///
/// `system` messages have no representation in that schema and are dropped,
/// as are empty text and reasoning parts.
pub fn encode_ui_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .filter_map(|message| {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => return None,
            };
            let parts: Vec<Value> = message.parts.iter().filter_map(encode_part).collect();
            Some(json!({
                "id": message.id,
                "role": role,
                "parts": parts,
            }))
        })
        .collect()
}

fn encode_part(part: &Part) -> Option<Value> {
    match part {
        Part::Text { text } if !text.is_empty() => Some(json!({"type": "text", "text": text})),
        Part::Reasoning { text } if !text.is_empty() => {
            Some(json!({"type": "reasoning", "text": text}))
        }
        Part::Text { .. } | Part::Reasoning { .. } => None,
        Part::Tool(tool) => Some(encode_tool(tool)),
    }
}

fn encode_tool(tool: &ToolPart) -> Value {
    let state = match tool.status {
        ToolStatus::Streaming => "input-streaming",
        ToolStatus::Pending => "input-available",
        ToolStatus::Completed => "output-available",
        ToolStatus::Error => "output-error",
    };
    let mut value = json!({
        "type": format!("tool-{}", tool.tool_name),
        "toolCallId": tool.tool_call_id,
        "state": state,
    });
    if let Some(input) = &tool.input {
        value["input"] = input.clone();
    }
    if let Some(output) = &tool.output {
        value["output"] = output.clone();
    }
    if let Some(error_text) = &tool.error_text {
        value["errorText"] = Value::String(error_text.clone());
    }
    if let Some(metadata) = &tool.provider_metadata {
        value["callProviderMetadata"] = metadata.clone();
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::MessageAssembler;
    use serde_json::json;

    fn run(chunks: &[Value]) -> (UiMessageNormalizer, Vec<Event>) {
        let mut normalizer = UiMessageNormalizer::default();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(normalizer.normalize(chunk).expect("normalize"));
        }
        (normalizer, events)
    }

    #[test]
    fn text_and_tool_stream_assemble_into_one_message() {
        let (mut normalizer, events) = run(&[
            json!({"type": "start", "messageId": "m1"}),
            json!({"type": "start-step"}),
            json!({"type": "text-start", "id": "txt-0"}),
            json!({"type": "text-delta", "id": "txt-0", "delta": "Looking"}),
            json!({"type": "text-delta", "id": "txt-0", "textDelta": " up"}),
            json!({"type": "text-end", "id": "txt-0"}),
            json!({"type": "tool-input-start", "toolCallId": "t1", "toolName": "search",
                   "providerMetadata": {"openai": {"itemId": "fc_1"}}}),
            json!({"type": "tool-input-delta", "toolCallId": "t1", "inputTextDelta": "{\"q\":"}),
            json!({"type": "tool-input-delta", "toolCallId": "t1", "inputTextDelta": "\"rust\"}"}),
            json!({"type": "tool-input-available", "toolCallId": "t1", "toolName": "search",
                   "input": {"q": "rust"}}),
            json!({"type": "tool-output-available", "toolCallId": "t1", "output": ["a", "b"]}),
            json!({"type": "finish-step"}),
            json!({"type": "finish", "finishReason": "stop"}),
        ]);
        assert!(normalizer.finish().is_empty());

        let assembler = MessageAssembler::replay(&events);
        let message = assembler.get_message("m1").expect("message");
        assert_eq!(message.text(), "Looking up");
        let tool = message.tool_part("t1").expect("tool");
        assert_eq!(tool.status, ToolStatus::Completed);
        assert_eq!(tool.input, Some(json!({"q": "rust"})));
        assert_eq!(tool.output, Some(json!(["a", "b"])));
        assert_eq!(
            tool.provider_metadata,
            Some(json!({"openai": {"itemId": "fc_1"}}))
        );
        assert!(matches!(
            events.last(),
            Some(Event::Finish { finish_reason: Some(reason), .. }) if reason == "stop"
        ));
    }

    #[test]
    fn tool_output_error_becomes_tool_error() {
        let (_, events) = run(&[
            json!({"type": "tool-input-start", "toolCallId": "t1", "toolName": "fetch"}),
            json!({"type": "tool-output-error", "toolCallId": "t1", "errorText": "404"}),
        ]);
        let id = events[0].message_id().to_string();
        assert_eq!(
            events.last(),
            Some(&Event::ToolError {
                id,
                tool_call_id: "t1".into(),
                error_text: "404".into(),
            })
        );
    }

    #[test]
    fn unknown_chunks_and_missing_fields_are_ignored() {
        let (_, events) = run(&[
            json!({"type": "source-url", "url": "https://example.com"}),
            json!({"type": "data-weather", "data": {}}),
            json!({"type": "tool-input-delta", "inputTextDelta": "x"}),
            json!({"no_type": true}),
        ]);
        assert!(events.is_empty());
    }

    #[test]
    fn finish_closes_open_segments_once() {
        let (mut normalizer, _) = run(&[
            json!({"type": "start", "messageId": "m1"}),
            json!({"type": "reasoning-start", "id": "r"}),
            json!({"type": "text-start", "id": "t"}),
            json!({"type": "tool-input-start", "toolCallId": "c", "toolName": "n"}),
        ]);
        let closing = normalizer.finish();
        let kinds: Vec<&str> = closing.iter().map(Event::kind).collect();
        assert_eq!(kinds, vec!["reasoning-end", "text-end", "tool-end", "finish"]);
        assert!(normalizer.finish().is_empty());
    }

    #[test]
    fn error_chunk_is_upstream_error() {
        let mut normalizer = UiMessageNormalizer::default();
        let err = normalizer
            .normalize(&json!({"type": "error", "errorText": "model overloaded"}))
            .expect_err("error");
        assert_eq!(err, StreamError::upstream("model overloaded"));
    }

    #[test]
    fn encoder_drops_system_messages_and_maps_tool_state() {
        let mut tool = ToolPart::streaming("t1", "search");
        tool.status = ToolStatus::Completed;
        tool.input = Some(json!({"q": "x"}));
        tool.output = Some(json!("done"));
        let history = vec![
            Message::system("be brief"),
            Message::new("u1", Role::User).with_text("hi"),
            Message::new("a1", Role::Assistant)
                .with_text("")
                .with_part(Part::Tool(tool)),
        ];
        let encoded = encode_ui_messages(&history);
        assert_eq!(
            encoded,
            vec![
                json!({"id": "u1", "role": "user", "parts": [{"type": "text", "text": "hi"}]}),
                json!({"id": "a1", "role": "assistant", "parts": [{
                    "type": "tool-search",
                    "toolCallId": "t1",
                    "state": "output-available",
                    "input": {"q": "x"},
                    "output": "done"
                }]}),
            ]
        );
    }

    #[test]
    fn tool_chunks_without_call_id_are_dropped() {
        let (_, events) = run(&[
            json!({"type": "start", "messageId": "m1"}),
            json!({"type": "tool-input-start", "toolName": "search"}),
            json!({"type": "tool-input-delta", "inputTextDelta": "{}"}),
            json!({"type": "tool-output-available", "output": 1}),
        ]);
        assert_eq!(events, vec![Event::Start { id: "m1".into() }]);
    }
}
