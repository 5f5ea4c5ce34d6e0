use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Derived streaming flag attached to emitted snapshots.
///
/// The assembler never sets this; the client derives it from whether the
/// turn-level `finish` has been seen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingState {
    Streaming,
    Done,
}

/// Lifecycle of a tool part.
///
/// `Streaming` may advance to any other status; `Pending` may only advance to
/// a terminal one. `Completed` and `Error` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Pending,
    Streaming,
    Completed,
    Error,
}

impl ToolStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Returns whether a transition from `self` to `next` is legal.
    ///
    /// Terminal statuses never move; otherwise a status only moves forward.
    pub fn can_advance_to(self, next: ToolStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match self {
            Self::Streaming => next != Self::Streaming,
            _ => next.is_terminal(),
        }
    }
}

/// A tool invocation and, once known, its result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPart {
    pub tool_call_id: String,
    pub tool_name: String,
    pub status: ToolStatus,
    /// Raw input text accumulated before structured input is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_stream: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<serde_json::Value>,
}

impl ToolPart {
    /// Creates a tool part that is still receiving its raw input.
    pub fn streaming(tool_call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            status: ToolStatus::Streaming,
            input_stream: Some(String::new()),
            input: None,
            output: None,
            error_text: None,
            provider_metadata: None,
        }
    }
}

/// One typed content unit within a message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Part {
    Text { text: String },
    Reasoning { text: String },
    Tool(ToolPart),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_tool(&self) -> Option<&ToolPart> {
        match self {
            Self::Tool(tool) => Some(tool),
            _ => None,
        }
    }
}

/// A conversation turn assembled from streamed events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<Part>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming_state: Option<StreamingState>,
}

impl Message {
    /// Creates an empty message.
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            parts: Vec::new(),
            created_at: Utc::now(),
            metadata: None,
            streaming_state: None,
        }
    }

    /// Creates a user message with a single text part and a fresh id.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), Role::User).with_text(text)
    }

    /// Creates a system message with a single text part and a fresh id.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), Role::System).with_text(text)
    }

    /// Creates the synthetic assistant message used to surface a failed request.
    pub fn error(message: &str) -> Self {
        let mut msg = Self::new(uuid::Uuid::new_v4().to_string(), Role::Assistant)
            .with_text(format!("Error: {message}"));
        msg.streaming_state = Some(StreamingState::Done);
        msg
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.parts.push(Part::text(text));
        self
    }

    pub fn with_part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    /// Concatenates all text parts in order, ignoring reasoning and tool parts.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let Part::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }

    /// Returns the tool part for `tool_call_id`, if any.
    pub fn tool_part(&self, tool_call_id: &str) -> Option<&ToolPart> {
        self.parts
            .iter()
            .filter_map(Part::as_tool)
            .find(|tool| tool.tool_call_id == tool_call_id)
    }

    pub(crate) fn tool_part_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolPart> {
        self.parts.iter_mut().find_map(|part| match part {
            Part::Tool(tool) if tool.tool_call_id == tool_call_id => Some(tool),
            _ => None,
        })
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming_state == Some(StreamingState::Streaming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_concatenates_text_parts_only() {
        let message = Message::new("m1", Role::Assistant)
            .with_text("hello")
            .with_part(Part::Reasoning {
                text: "thinking".into(),
            })
            .with_part(Part::Tool(ToolPart::streaming("t1", "search")))
            .with_text(" world");
        assert_eq!(message.text(), "hello world");
        assert_eq!(
            message.tool_part("t1").map(|t| t.status),
            Some(ToolStatus::Streaming)
        );
    }

    #[test]
    fn tool_status_transitions() {
        assert!(ToolStatus::Streaming.can_advance_to(ToolStatus::Pending));
        assert!(ToolStatus::Streaming.can_advance_to(ToolStatus::Error));
        assert!(ToolStatus::Pending.can_advance_to(ToolStatus::Completed));
        assert!(!ToolStatus::Pending.can_advance_to(ToolStatus::Streaming));
        assert!(!ToolStatus::Completed.can_advance_to(ToolStatus::Error));
        assert!(!ToolStatus::Error.can_advance_to(ToolStatus::Completed));
        assert!(!ToolStatus::Pending.can_advance_to(ToolStatus::Pending));
    }

    #[test]
    fn only_completed_and_error_are_terminal() {
        assert!(ToolStatus::Completed.is_terminal());
        assert!(ToolStatus::Error.is_terminal());
        assert!(!ToolStatus::Pending.is_terminal());
        assert!(!ToolStatus::Streaming.is_terminal());
        assert!(!ToolStatus::Completed.can_advance_to(ToolStatus::Completed));
    }

    #[test]
    fn error_message_is_a_finished_assistant_bubble() {
        let message = Message::error("boom");
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.text(), "Error: boom");
        assert_eq!(message.streaming_state, Some(StreamingState::Done));
    }

    #[test]
    fn serializes_tool_part_in_camel_case() {
        let value = serde_json::to_value(Part::Tool(ToolPart::streaming("t1", "search")))
            .expect("json");
        assert_eq!(value["type"], "tool");
        assert_eq!(value["toolCallId"], "t1");
        assert_eq!(value["status"], "streaming");
        assert_eq!(value["inputStream"], "");
    }
}
