use serde::{Deserialize, Serialize};

/// Canonical streaming event.
///
/// Every normalizer produces this vocabulary and the assembler consumes it.
/// The serde representation uses the wire `type` tag so recorded event logs
/// can be replayed from JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    /// Turn start. Pure signal.
    Start { id: String },
    /// Step boundary opened.
    StartStep { id: String },
    /// Opens the text segment of message `id`.
    TextStart { id: String },
    /// Text appended to the open text segment.
    TextDelta { id: String, delta: String },
    /// Closes the text segment. A later `text-start` may reopen it.
    TextEnd { id: String },
    /// Opens the reasoning segment of message `id`.
    ReasoningStart { id: String },
    /// Reasoning text appended to the reasoning segment.
    ReasoningDelta { id: String, delta: String },
    /// Closes the reasoning segment.
    ReasoningEnd { id: String },
    /// A tool call started streaming its raw input.
    ToolStart {
        id: String,
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(
            rename = "providerMetadata",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        provider_metadata: Option<serde_json::Value>,
    },
    /// Raw input text for an open tool call.
    ToolDelta {
        id: String,
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        delta: String,
    },
    /// The raw input stream of a tool call ended. Pure signal.
    ToolEnd {
        id: String,
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
    },
    /// Structured tool input is known.
    ToolCall {
        id: String,
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName", default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        input: serde_json::Value,
        #[serde(
            rename = "providerMetadata",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        provider_metadata: Option<serde_json::Value>,
    },
    /// Tool execution produced an output.
    ToolResult {
        id: String,
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        output: serde_json::Value,
    },
    /// Tool execution failed.
    ToolError {
        id: String,
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "errorText")]
        error_text: String,
    },
    /// Step boundary closed.
    FinishStep { id: String },
    /// Turn complete.
    Finish {
        id: String,
        #[serde(
            rename = "finishReason",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        finish_reason: Option<String>,
    },
}

impl Event {
    /// Returns the id of the message this event belongs to.
    pub fn message_id(&self) -> &str {
        match self {
            Self::Start { id }
            | Self::StartStep { id }
            | Self::TextStart { id }
            | Self::TextDelta { id, .. }
            | Self::TextEnd { id }
            | Self::ReasoningStart { id }
            | Self::ReasoningDelta { id, .. }
            | Self::ReasoningEnd { id }
            | Self::ToolStart { id, .. }
            | Self::ToolDelta { id, .. }
            | Self::ToolEnd { id, .. }
            | Self::ToolCall { id, .. }
            | Self::ToolResult { id, .. }
            | Self::ToolError { id, .. }
            | Self::FinishStep { id }
            | Self::Finish { id, .. } => id,
        }
    }

    /// Returns the tool call id for tool lifecycle events.
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Self::ToolStart { tool_call_id, .. }
            | Self::ToolDelta { tool_call_id, .. }
            | Self::ToolEnd { tool_call_id, .. }
            | Self::ToolCall { tool_call_id, .. }
            | Self::ToolResult { tool_call_id, .. }
            | Self::ToolError { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    /// Returns the wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::StartStep { .. } => "start-step",
            Self::TextStart { .. } => "text-start",
            Self::TextDelta { .. } => "text-delta",
            Self::TextEnd { .. } => "text-end",
            Self::ReasoningStart { .. } => "reasoning-start",
            Self::ReasoningDelta { .. } => "reasoning-delta",
            Self::ReasoningEnd { .. } => "reasoning-end",
            Self::ToolStart { .. } => "tool-start",
            Self::ToolDelta { .. } => "tool-delta",
            Self::ToolEnd { .. } => "tool-end",
            Self::ToolCall { .. } => "tool-call",
            Self::ToolResult { .. } => "tool-result",
            Self::ToolError { .. } => "tool-error",
            Self::FinishStep { .. } => "finish-step",
            Self::Finish { .. } => "finish",
        }
    }
}
