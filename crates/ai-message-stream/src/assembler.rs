use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::event::Event;
use crate::message::{Message, Part, Role, ToolPart, ToolStatus};

/// How a `tool-error` event is reflected on the tool part.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolErrorPolicy {
    /// `status=error` and the error text is kept on the part.
    #[default]
    MarkError,
    /// `status=completed` with no output.
    CompleteWithoutOutput,
}

/// Synchronous fold from canonical events to messages.
///
/// One assembler belongs to one conversation turn. It neither reorders nor
/// buffers events: callers feed them in arrival order. Live messages are owned
/// here; callers that hand them to consumers clone them first.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    messages: HashMap<String, Message>,
    order: Vec<String>,
    tool_error_policy: ToolErrorPolicy,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an assembler that applies `policy` to `tool-error` events.
    pub fn with_tool_error_policy(policy: ToolErrorPolicy) -> Self {
        Self {
            tool_error_policy: policy,
            ..Self::default()
        }
    }

    /// Folds a recorded event log into a fresh assembler.
    pub fn replay<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut assembler = Self::new();
        for event in events {
            assembler.process_event(event);
        }
        assembler
    }

    /// Applies one event.
    ///
    /// Returns the message when the event changed it (including creating it).
    /// Pure signals (`start`, `*-end`, `start-step`, `finish-step`, `finish`)
    /// and dropped events return `None`.
    pub fn process_event(&mut self, event: &Event) -> Option<&Message> {
        let changed = match event {
            Event::Start { .. }
            | Event::StartStep { .. }
            | Event::TextEnd { .. }
            | Event::ReasoningEnd { .. }
            | Event::ToolEnd { .. }
            | Event::FinishStep { .. }
            | Event::Finish { .. } => false,
            Event::TextStart { id } => self.open_segment(id, SegmentKind::Text),
            Event::ReasoningStart { id } => self.open_segment(id, SegmentKind::Reasoning),
            Event::TextDelta { id, delta } => self.append_segment(id, SegmentKind::Text, delta),
            Event::ReasoningDelta { id, delta } => {
                self.append_segment(id, SegmentKind::Reasoning, delta)
            }
            Event::ToolStart {
                id,
                tool_call_id,
                tool_name,
                provider_metadata,
            } => self.start_tool(id, tool_call_id, tool_name, provider_metadata.as_ref()),
            Event::ToolDelta {
                id,
                tool_call_id,
                delta,
            } => self.append_tool_input(id, tool_call_id, delta),
            Event::ToolCall {
                id,
                tool_call_id,
                tool_name,
                input,
                provider_metadata,
            } => self.finalize_tool_input(
                id,
                tool_call_id,
                tool_name.as_deref(),
                input,
                provider_metadata.as_ref(),
            ),
            Event::ToolResult {
                id,
                tool_call_id,
                output,
            } => self.complete_tool(id, tool_call_id, output),
            Event::ToolError {
                id,
                tool_call_id,
                error_text,
            } => self.fail_tool(id, tool_call_id, error_text),
        };
        if changed {
            self.messages.get(event.message_id())
        } else {
            None
        }
    }

    pub fn get_message(&self, id: &str) -> Option<&Message> {
        self.messages.get(id)
    }

    /// Returns all messages in creation order.
    pub fn get_all_messages(&self) -> Vec<&Message> {
        self.order
            .iter()
            .filter_map(|id| self.messages.get(id))
            .collect()
    }

    /// Returns a finalized copy of message `id`.
    ///
    /// Tool parts still streaming get `input` parsed from their raw input
    /// stream (the raw string is kept when it is not valid JSON) and are
    /// promoted to `completed`. The live message is left untouched.
    pub fn get_final_message(&self, id: &str) -> Option<Message> {
        let mut message = self.messages.get(id)?.clone();
        for part in &mut message.parts {
            if let Part::Tool(tool) = part
                && tool.status == ToolStatus::Streaming
            {
                if tool.input.is_none() {
                    tool.input = Some(parse_input_stream(tool.input_stream.as_deref()));
                }
                tool.status = ToolStatus::Completed;
            }
        }
        Some(message)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.order.clear();
    }

    fn ensure_message(&mut self, id: &str) -> &mut Message {
        if !self.messages.contains_key(id) {
            self.order.push(id.to_string());
        }
        self.messages
            .entry(id.to_string())
            .or_insert_with(|| Message::new(id, Role::Assistant))
    }

    fn open_segment(&mut self, id: &str, kind: SegmentKind) -> bool {
        let created = !self.messages.contains_key(id);
        let message = self.ensure_message(id);
        if message.parts.iter().any(|part| kind.matches(part)) {
            return created;
        }
        message.parts.push(kind.empty_part());
        true
    }

    fn append_segment(&mut self, id: &str, kind: SegmentKind, delta: &str) -> bool {
        let Some(message) = self.messages.get_mut(id) else {
            debug!(message_id = id, kind = kind.name(), "dropping delta for unknown message");
            return false;
        };
        let Some(text) = message.parts.iter_mut().find_map(|part| kind.text_mut(part)) else {
            debug!(message_id = id, kind = kind.name(), "dropping delta without open segment");
            return false;
        };
        if delta.is_empty() {
            return false;
        }
        text.push_str(delta);
        true
    }

    fn start_tool(
        &mut self,
        id: &str,
        tool_call_id: &str,
        tool_name: &str,
        provider_metadata: Option<&serde_json::Value>,
    ) -> bool {
        let message = self.ensure_message(id);
        if message.tool_part(tool_call_id).is_some() {
            debug!(message_id = id, tool_call_id, "ignoring duplicate tool-start");
            return false;
        }
        let mut tool = ToolPart::streaming(tool_call_id, tool_name);
        tool.provider_metadata = provider_metadata.cloned();
        message.parts.push(Part::Tool(tool));
        true
    }

    fn append_tool_input(&mut self, id: &str, tool_call_id: &str, delta: &str) -> bool {
        let Some(tool) = self.tool_mut(id, tool_call_id) else {
            debug!(message_id = id, tool_call_id, "dropping tool-delta for unknown tool call");
            return false;
        };
        if tool.status != ToolStatus::Streaming || delta.is_empty() {
            return false;
        }
        tool.input_stream
            .get_or_insert_with(String::new)
            .push_str(delta);
        true
    }

    fn finalize_tool_input(
        &mut self,
        id: &str,
        tool_call_id: &str,
        tool_name: Option<&str>,
        input: &serde_json::Value,
        provider_metadata: Option<&serde_json::Value>,
    ) -> bool {
        if let Some(tool) = self.tool_mut(id, tool_call_id) {
            if !tool.status.can_advance_to(ToolStatus::Pending) {
                debug!(message_id = id, tool_call_id, status = ?tool.status, "ignoring tool-call after finalization");
                return false;
            }
            tool.input = Some(input.clone());
            tool.status = ToolStatus::Pending;
            if let Some(name) = tool_name.filter(|name| !name.is_empty()) {
                tool.tool_name = name.to_string();
            }
            if provider_metadata.is_some() {
                tool.provider_metadata = provider_metadata.cloned();
            }
            return true;
        }

        let Some(tool_name) = tool_name.filter(|name| !name.is_empty()) else {
            debug!(message_id = id, tool_call_id, "dropping tool-call without tool name");
            return false;
        };
        let mut tool = ToolPart::streaming(tool_call_id, tool_name);
        tool.input_stream = None;
        tool.input = Some(input.clone());
        tool.status = ToolStatus::Pending;
        tool.provider_metadata = provider_metadata.cloned();
        self.ensure_message(id).parts.push(Part::Tool(tool));
        true
    }

    fn complete_tool(&mut self, id: &str, tool_call_id: &str, output: &serde_json::Value) -> bool {
        let Some(tool) = self.tool_mut(id, tool_call_id) else {
            debug!(message_id = id, tool_call_id, "dropping tool-result for unknown tool call");
            return false;
        };
        if !tool.status.can_advance_to(ToolStatus::Completed) {
            return false;
        }
        if tool.input.is_none() {
            tool.input = Some(parse_input_stream(tool.input_stream.as_deref()));
        }
        tool.output = Some(output.clone());
        tool.status = ToolStatus::Completed;
        true
    }

    fn fail_tool(&mut self, id: &str, tool_call_id: &str, error_text: &str) -> bool {
        let policy = self.tool_error_policy;
        let Some(tool) = self.tool_mut(id, tool_call_id) else {
            debug!(message_id = id, tool_call_id, "dropping tool-error for unknown tool call");
            return false;
        };
        let next = match policy {
            ToolErrorPolicy::MarkError => ToolStatus::Error,
            ToolErrorPolicy::CompleteWithoutOutput => ToolStatus::Completed,
        };
        if !tool.status.can_advance_to(next) {
            return false;
        }
        if policy == ToolErrorPolicy::MarkError {
            tool.error_text = Some(error_text.to_string());
        }
        tool.status = next;
        true
    }

    fn tool_mut(&mut self, id: &str, tool_call_id: &str) -> Option<&mut ToolPart> {
        self.messages.get_mut(id)?.tool_part_mut(tool_call_id)
    }
}

/// Best-effort parse of a raw tool input stream. Never fails.
pub(crate) fn parse_input_stream(raw: Option<&str>) -> serde_json::Value {
    let raw = raw.unwrap_or_default();
    if raw.trim().is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

#[derive(Clone, Copy)]
enum SegmentKind {
    Text,
    Reasoning,
}

impl SegmentKind {
    fn name(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Reasoning => "reasoning",
        }
    }

    fn matches(self, part: &Part) -> bool {
        matches!(
            (self, part),
            (Self::Text, Part::Text { .. }) | (Self::Reasoning, Part::Reasoning { .. })
        )
    }

    fn empty_part(self) -> Part {
        match self {
            Self::Text => Part::Text {
                text: String::new(),
            },
            Self::Reasoning => Part::Reasoning {
                text: String::new(),
            },
        }
    }

    fn text_mut(self, part: &mut Part) -> Option<&mut String> {
        match (self, part) {
            (Self::Text, Part::Text { text }) | (Self::Reasoning, Part::Reasoning { text }) => {
                Some(text)
            }
            _ => None,
        }
    }
}
