use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use super::{Aliases, Normalizer, new_message_id};
use crate::assembler::parse_input_stream;
use crate::errors::StreamError;
use crate::event::Event;

// Alias tables for agent-runtime chunks. Fields are looked up in the nested
// `payload` object first, then on the chunk itself; alias order takes
// precedence over source order.
const TEXT_DELTA: Aliases = Aliases(&["delta", "textDelta", "text"]);
const ERROR_MESSAGE: Aliases = Aliases(&["message", "content", "error"]);
const FINISH_REASON: Aliases = Aliases(&["finishReason", "finish_reason"]);
const MESSAGE_ID: Aliases = Aliases(&["messageId", "runId"]);
const TOOL_CALL_ID: Aliases = Aliases(&["toolCallId", "tool_call_id", "id"]);
const TOOL_NAME: Aliases = Aliases(&["toolName", "tool_name", "name"]);
const TOOL_INPUT: Aliases = Aliases(&["args", "input", "arguments"]);
const TOOL_INPUT_DELTA: Aliases = Aliases(&["argsTextDelta", "inputTextDelta", "delta"]);
const TOOL_OUTPUT: Aliases = Aliases(&["result", "output"]);

#[derive(Debug, Default)]
struct AgentToolCall {
    name: Option<String>,
    arguments: String,
    started: bool,
    input_known: bool,
}

/// Normalizer for agent-runtime chunk streams.
///
/// These streams are loosely shaped: text deltas may arrive without an
/// explicit segment start, tool input may be streamed or sent whole, and
/// field names vary between runtime versions.
#[derive(Debug, Default)]
pub struct AgentNormalizer {
    message_id: Option<String>,
    text_buffer: String,
    text_open: bool,
    reasoning_open: bool,
    tools: HashMap<String, AgentToolCall>,
    tool_order: Vec<String>,
    finished: bool,
}

impl AgentNormalizer {
    /// Text accumulated for the current turn.
    pub fn text(&self) -> &str {
        &self.text_buffer
    }

    fn message_id(&mut self) -> String {
        self.message_id.get_or_insert_with(new_message_id).clone()
    }

    fn tool(&mut self, tool_call_id: &str) -> &mut AgentToolCall {
        if !self.tools.contains_key(tool_call_id) {
            self.tool_order.push(tool_call_id.to_string());
        }
        self.tools.entry(tool_call_id.to_string()).or_default()
    }

    fn push_text(&mut self, id: &str, delta: &str, events: &mut Vec<Event>) {
        if delta.is_empty() {
            return;
        }
        if self.reasoning_open {
            self.reasoning_open = false;
            events.push(Event::ReasoningEnd { id: id.to_string() });
        }
        if !self.text_open {
            self.text_open = true;
            events.push(Event::TextStart { id: id.to_string() });
        }
        self.text_buffer.push_str(delta);
        events.push(Event::TextDelta {
            id: id.to_string(),
            delta: delta.to_string(),
        });
    }

    fn push_reasoning(&mut self, id: &str, delta: &str, events: &mut Vec<Event>) {
        if delta.is_empty() {
            return;
        }
        if !self.reasoning_open {
            self.reasoning_open = true;
            events.push(Event::ReasoningStart { id: id.to_string() });
        }
        events.push(Event::ReasoningDelta {
            id: id.to_string(),
            delta: delta.to_string(),
        });
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
    }

    fn start_tool(&mut self, id: &str, tool_call_id: &str, name: &str, events: &mut Vec<Event>) {
        let tool = self.tool(tool_call_id);
        if tool.started {
            return;
        }
        tool.started = true;
        tool.name = Some(name.to_string());
        events.push(Event::ToolStart {
            id: id.to_string(),
            tool_call_id: tool_call_id.to_string(),
            tool_name: name.to_string(),
            provider_metadata: None,
        });
    }

    fn finalize_tool(
        &mut self,
        id: &str,
        tool_call_id: &str,
        input: Option<Value>,
        events: &mut Vec<Event>,
    ) {
        let tool = self.tool(tool_call_id);
        if tool.input_known {
            return;
        }
        tool.input_known = true;
        if tool.started {
            events.push(Event::ToolEnd {
                id: id.to_string(),
                tool_call_id: tool_call_id.to_string(),
            });
        }
        let input = match input {
            Some(Value::String(raw)) => parse_input_stream(Some(&raw)),
            Some(value) => value,
            None => parse_input_stream(Some(&tool.arguments)),
        };
        events.push(Event::ToolCall {
            id: id.to_string(),
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool.name.clone(),
            input,
            provider_metadata: None,
        });
    }

    fn close(&mut self, id: &str, finish_reason: Option<String>, events: &mut Vec<Event>) {
        self.close_segments(id, events);
        for tool_call_id in std::mem::take(&mut self.tool_order) {
            let pending = self
                .tools
                .get(&tool_call_id)
                .is_some_and(|tool| tool.started && !tool.input_known);
            if pending {
                self.finalize_tool(id, &tool_call_id, None, events);
            }
        }
        events.push(Event::Finish {
            id: id.to_string(),
            finish_reason,
        });
        self.finished = true;
    }
}

impl Normalizer for AgentNormalizer {
    fn normalize(&mut self, chunk: &Value) -> Result<Vec<Event>, StreamError> {
        let payload = chunk.get("payload").filter(|p| p.is_object());
        let sources: Vec<&Value> = payload.into_iter().chain(std::iter::once(chunk)).collect();
        let chunk_type = chunk.get("type").and_then(Value::as_str);

        if chunk_type == Some("error") {
            let message = ERROR_MESSAGE
                .value_in(&sources)
                .and_then(|v| v.as_str().or_else(|| v.get("message").and_then(Value::as_str)))
                .unwrap_or("Unknown error");
            return Err(StreamError::upstream(message));
        }
        if self.finished {
            return Ok(Vec::new());
        }
        if matches!(chunk_type, Some("start" | "step-start" | "start-step"))
            && self.message_id.is_none()
            && let Some(id) = MESSAGE_ID.str_in(&sources)
        {
            self.message_id = Some(id.to_string());
        }

        let mut events = Vec::new();
        let id = self.message_id();
        match chunk_type {
            Some("start") => events.push(Event::Start { id }),
            Some("step-start" | "start-step") => events.push(Event::StartStep { id }),
            Some("text-start") => {
                if !self.text_open {
                    self.text_open = true;
                    events.push(Event::TextStart { id });
                }
            }
            Some("text-delta" | "text") => {
                if let Some(delta) = TEXT_DELTA.str_in(&sources) {
                    self.push_text(&id, delta, &mut events);
                }
            }
            Some("text-end") => self.close_segments(&id, &mut events),
            Some("reasoning" | "reasoning-delta") => {
                if let Some(delta) = TEXT_DELTA.str_in(&sources) {
                    self.push_reasoning(&id, delta, &mut events);
                }
            }
            Some("reasoning-start") => {
                if !self.reasoning_open {
                    self.reasoning_open = true;
                    events.push(Event::ReasoningStart { id });
                }
            }
            Some("reasoning-end") => {
                if self.reasoning_open {
                    self.reasoning_open = false;
                    events.push(Event::ReasoningEnd { id });
                }
            }
            Some("tool-call-streaming-start" | "tool-call-input-streaming-start") => {
                if let (Some(tool_call_id), Some(name)) = (
                    TOOL_CALL_ID.str_in(&sources),
                    TOOL_NAME.str_in(&sources),
                ) {
                    self.close_segments(&id, &mut events);
                    self.start_tool(&id, tool_call_id, name, &mut events);
                }
            }
            Some("tool-call-delta") => {
                if let (Some(tool_call_id), Some(delta)) = (
                    TOOL_CALL_ID.str_in(&sources),
                    TOOL_INPUT_DELTA.str_in(&sources),
                ) {
                    if let Some(name) = TOOL_NAME.str_in(&sources) {
                        self.start_tool(&id, tool_call_id, name, &mut events);
                    }
                    let tool = self.tool(tool_call_id);
                    tool.arguments.push_str(delta);
                    if tool.started && !tool.input_known {
                        events.push(Event::ToolDelta {
                            id,
                            tool_call_id: tool_call_id.to_string(),
                            delta: delta.to_string(),
                        });
                    }
                }
            }
            Some("tool-call") => {
                if let Some(tool_call_id) = TOOL_CALL_ID.str_in(&sources) {
                    self.close_segments(&id, &mut events);
                    if let Some(name) = TOOL_NAME.str_in(&sources) {
                        let tool = self.tool(tool_call_id);
                        if tool.name.is_none() {
                            tool.name = Some(name.to_string());
                        }
                    }
                    let input = TOOL_INPUT.value_in(&sources).cloned();
                    self.finalize_tool(&id, tool_call_id, input, &mut events);
                }
            }
            Some("tool-result") => {
                if let Some(tool_call_id) = TOOL_CALL_ID.str_in(&sources) {
                    if let Some(name) = TOOL_NAME.str_in(&sources) {
                        let tool = self.tool(tool_call_id);
                        if tool.name.is_none() {
                            tool.name = Some(name.to_string());
                        }
                    }
                    let input = TOOL_INPUT.value_in(&sources).cloned();
                    self.finalize_tool(&id, tool_call_id, input, &mut events);
                    events.push(Event::ToolResult {
                        id,
                        tool_call_id: tool_call_id.to_string(),
                        output: TOOL_OUTPUT.value_in(&sources).cloned().unwrap_or(Value::Null),
                    });
                }
            }
            Some("tool-error") => {
                if let Some(tool_call_id) = TOOL_CALL_ID.str_in(&sources) {
                    let error_text = ERROR_MESSAGE
                        .value_in(&sources)
                        .and_then(|v| v.as_str().or_else(|| v.get("message").and_then(Value::as_str)))
                        .unwrap_or("Tool error");
                    events.push(Event::ToolError {
                        id,
                        tool_call_id: tool_call_id.to_string(),
                        error_text: error_text.to_string(),
                    });
                }
            }
            Some("step-finish" | "finish-step") => {
                self.close_segments(&id, &mut events);
                events.push(Event::FinishStep { id });
            }
            Some("finish") => {
                let reason = FINISH_REASON.str_in(&sources).map(ToOwned::to_owned);
                self.close(&id, reason, &mut events);
            }
            Some(other) => debug!(chunk_type = other, "ignoring unknown agent chunk"),
            None => {
                if let Some(delta) = TEXT_DELTA.str_in(&sources) {
                    self.push_text(&id, delta, &mut events);
                } else {
                    debug!("ignoring untyped agent chunk without text");
                }
            }
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

    fn run(chunks: &[Value]) -> (AgentNormalizer, Vec<Event>) {
        let mut normalizer = AgentNormalizer::default();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(normalizer.normalize(chunk).expect("normalize"));
        }
        (normalizer, events)
    }

    #[test]
    fn text_aliases_and_payload_nesting() {
        let (normalizer, events) = run(&[
            json!({"type": "start", "payload": {"runId": "run-1"}}),
            json!({"type": "text-delta", "payload": {"text": "Hel"}}),
            json!({"type": "text-delta", "textDelta": "lo"}),
            json!({"delta": ", world"}),
            json!({"type": "finish", "payload": {"finishReason": "stop"}}),
        ]);
        assert_eq!(normalizer.text(), "Hello, world");
        let assembler = MessageAssembler::replay(&events);
        let message = assembler.get_message("run-1").expect("message");
        assert_eq!(message.text(), "Hello, world");
        assert!(matches!(
            events.last(),
            Some(Event::Finish { finish_reason: Some(reason), .. }) if reason == "stop"
        ));
    }

    #[test]
    fn streamed_tool_call_then_result() {
        let (_, events) = run(&[
            json!({"type": "start", "messageId": "m1"}),
            json!({"type": "tool-call-streaming-start", "toolCallId": "t1", "toolName": "calc"}),
            json!({"type": "tool-call-delta", "toolCallId": "t1", "argsTextDelta": "{\"x\":"}),
            json!({"type": "tool-call-delta", "toolCallId": "t1", "argsTextDelta": "2}"}),
            json!({"type": "tool-call", "toolCallId": "t1", "toolName": "calc", "args": {"x": 2}}),
            json!({"type": "tool-result", "toolCallId": "t1", "result": 4}),
        ]);
        let assembler = MessageAssembler::replay(&events);
        let tool = assembler
            .get_message("m1")
            .and_then(|m| m.tool_part("t1"))
            .expect("tool");
        assert_eq!(tool.status, ToolStatus::Completed);
        assert_eq!(tool.input, Some(json!({"x": 2})));
        assert_eq!(tool.input_stream.as_deref(), Some("{\"x\":2}"));
        assert_eq!(tool.output, Some(json!(4)));
    }

    #[test]
    fn unstreamed_tool_result_creates_part() {
        let (_, events) = run(&[
            json!({"type": "start", "messageId": "m1"}),
            json!({"type": "tool-result", "payload": {
                "toolCallId": "t9", "toolName": "lookup", "args": "{\"k\":1}", "result": "v"
            }}),
        ]);
        let assembler = MessageAssembler::replay(&events);
        let tool = assembler
            .get_message("m1")
            .and_then(|m| m.tool_part("t9"))
            .expect("tool");
        assert_eq!(tool.tool_name, "lookup");
        assert_eq!(tool.input, Some(json!({"k": 1})));
        assert_eq!(tool.output, Some(json!("v")));
        assert_eq!(tool.status, ToolStatus::Completed);
    }

    #[test]
    fn error_chunk_uses_message_then_content() {
        let mut normalizer = AgentNormalizer::default();
        let err = normalizer
            .normalize(&json!({"type": "error", "content": "second", "payload": {"message": "first"}}))
            .expect_err("error");
        assert_eq!(err, StreamError::upstream("first"));

        let err = normalizer
            .normalize(&json!({"type": "error", "error": {"message": "nested"}}))
            .expect_err("error");
        assert_eq!(err, StreamError::upstream("nested"));
    }

    #[test]
    fn error_on_plain_chunk_falls_back_to_content() {
        let mut normalizer = AgentNormalizer::default();
        let err = normalizer
            .normalize(&json!({"type": "error", "content": "rate limited"}))
            .expect_err("error");
        assert_eq!(err, StreamError::upstream("rate limited"));

        let err = normalizer
            .normalize(&json!({"type": "error", "content": "second", "message": "first"}))
            .expect_err("error");
        assert_eq!(err, StreamError::upstream("first"));
    }

    #[test]
    fn finish_reason_accepts_snake_case_after_camel_case() {
        let (_, events) = run(&[
            json!({"type": "start", "messageId": "m1"}),
            json!({"type": "finish", "finish_reason": "length"}),
        ]);
        assert!(matches!(
            events.last(),
            Some(Event::Finish { finish_reason: Some(reason), .. }) if reason == "length"
        ));

        let (_, events) = run(&[json!({
            "type": "finish",
            "finish_reason": "length",
            "finishReason": "stop"
        })]);
        assert!(matches!(
            events.last(),
            Some(Event::Finish { finish_reason: Some(reason), .. }) if reason == "stop"
        ));
    }

    #[test]
    fn finish_flushes_streaming_tool_input() {
        let (mut normalizer, mut events) = run(&[
            json!({"type": "start", "messageId": "m1"}),
            json!({"type": "text-delta", "delta": "calling"}),
            json!({"type": "tool-call-streaming-start", "toolCallId": "t1", "toolName": "calc"}),
            json!({"type": "tool-call-delta", "toolCallId": "t1", "argsTextDelta": "{\"x\":1}"}),
        ]);
        let closing = normalizer.finish();
        let kinds: Vec<&str> = closing.iter().map(Event::kind).collect();
        assert_eq!(kinds, vec!["tool-end", "tool-call", "finish"]);
        assert!(normalizer.finish().is_empty());

        events.extend(closing);
        let assembler = MessageAssembler::replay(&events);
        let tool = assembler
            .get_message("m1")
            .and_then(|m| m.tool_part("t1"))
            .expect("tool");
        assert_eq!(tool.status, ToolStatus::Pending);
        assert_eq!(tool.input, Some(json!({"x": 1})));
    }

    #[test]
    fn step_finish_closes_text_and_next_step_reopens_it() {
        let (_, events) = run(&[
            json!({"type": "start", "messageId": "m1"}),
            json!({"type": "text-delta", "text": "one "}),
            json!({"type": "step-finish"}),
            json!({"type": "text-delta", "text": "two"}),
        ]);
        let kinds: Vec<&str> = events.iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![
                "start",
                "text-start",
                "text-delta",
                "text-end",
                "finish-step",
                "text-start",
                "text-delta"
            ]
        );
        let assembler = MessageAssembler::replay(&events);
        assert_eq!(assembler.get_message("m1").expect("m").text(), "one two");
    }
}
