use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::assembler::ToolErrorPolicy;
use crate::errors::StreamError;
use crate::frame::FramePrefix;
use crate::message::{Message, Role};
use crate::normalize::{
    AgentNormalizer, ChatCompletionNormalizer, GenericNormalizer, Normalizer,
    UiMessageNormalizer, encode_ui_messages,
};

const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Upstream wire vocabulary spoken by the endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WireFormat {
    /// `data: <event json>` frames carrying canonical events.
    #[default]
    Generic,
    /// `message\t<event json>` lines carrying canonical events.
    Legacy,
    /// OpenAI-style chat completion deltas.
    ChatCompletion,
    /// UI-message / tool-streaming chunks.
    UiMessage,
    /// Agent-runtime chunks with vendor field aliases.
    Agent,
}

impl WireFormat {
    pub fn frame_prefix(self) -> FramePrefix {
        match self {
            Self::Legacy => FramePrefix::legacy(),
            _ => FramePrefix::Sse,
        }
    }

    /// Creates the per-stream normalizer for this vocabulary.
    pub fn normalizer(self) -> Box<dyn Normalizer> {
        match self {
            Self::Generic | Self::Legacy => Box::new(GenericNormalizer::default()),
            Self::ChatCompletion => Box::new(ChatCompletionNormalizer::default()),
            Self::UiMessage => Box::new(UiMessageNormalizer::default()),
            Self::Agent => Box::new(AgentNormalizer::default()),
        }
    }

    /// Encodes the message history for the request body.
    pub fn encode_messages(self, messages: &[Message]) -> Vec<serde_json::Value> {
        match self {
            Self::UiMessage => encode_ui_messages(messages),
            _ => messages
                .iter()
                .map(|message| {
                    let role = match message.role {
                        Role::User => "user",
                        Role::Assistant => "assistant",
                        Role::System => "system",
                    };
                    serde_json::json!({"role": role, "content": message.text()})
                })
                .collect(),
        }
    }
}

impl FromStr for WireFormat {
    type Err = StreamError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "generic" | "" => Ok(Self::Generic),
            "legacy" => Ok(Self::Legacy),
            "chat-completion" | "chat_completion" | "openai" => Ok(Self::ChatCompletion),
            "ui-message" | "ui_message" => Ok(Self::UiMessage),
            "agent" => Ok(Self::Agent),
            other => Err(StreamError::config(format!("unknown wire format: {other}"))),
        }
    }
}

/// Configuration for a `StreamClient`.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Endpoint receiving `POST` requests.
    pub endpoint: String,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Extra top-level fields merged into every request body.
    pub body_extras: serde_json::Map<String, serde_json::Value>,
    pub wire_format: WireFormat,
    /// HTTP timeout for the whole request, body included.
    pub timeout: Duration,
    pub tool_error_policy: ToolErrorPolicy,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            headers: Vec::new(),
            body_extras: serde_json::Map::new(),
            wire_format: WireFormat::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            tool_error_policy: ToolErrorPolicy::default(),
        }
    }

    /// Builds a config from the environment.
    ///
    /// - `AI_STREAM_ENDPOINT` (required)
    /// - `AI_STREAM_WIRE_FORMAT`: `generic`, `legacy`, `chat-completion`, `ui-message` or `agent`
    /// - `AI_STREAM_TIMEOUT_SECS`: request timeout, default 120
    /// - `AI_STREAM_BEARER_TOKEN`: sent as `Authorization: Bearer <token>`
    pub fn from_env() -> Result<Self, StreamError> {
        let endpoint = std::env::var("AI_STREAM_ENDPOINT").unwrap_or_default();
        if endpoint.trim().is_empty() {
            return Err(StreamError::config("missing AI_STREAM_ENDPOINT"));
        }
        let mut config = Self::new(endpoint.trim());
        if let Ok(format) = std::env::var("AI_STREAM_WIRE_FORMAT") {
            config.wire_format = format.parse()?;
        }
        if let Ok(raw) = std::env::var("AI_STREAM_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                StreamError::config(format!("invalid AI_STREAM_TIMEOUT_SECS: {raw}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Ok(token) = std::env::var("AI_STREAM_BEARER_TOKEN")
            && !token.trim().is_empty()
        {
            config = config.header("Authorization", format!("Bearer {}", token.trim()));
        }
        Ok(config)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.body_extras.insert(key.into(), value);
        self
    }

    pub fn wire_format(mut self, wire_format: WireFormat) -> Self {
        self.wire_format = wire_format;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn tool_error_policy(mut self, policy: ToolErrorPolicy) -> Self {
        self.tool_error_policy = policy;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), StreamError> {
        if self.endpoint.trim().is_empty() {
            return Err(StreamError::config("endpoint must not be empty"));
        }
        if self.timeout.is_zero() {
            return Err(StreamError::config("timeout must be greater than 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_parses_aliases() {
        assert_eq!("chat-completion".parse::<WireFormat>(), Ok(WireFormat::ChatCompletion));
        assert_eq!(" UI_MESSAGE ".parse::<WireFormat>(), Ok(WireFormat::UiMessage));
        assert!("carrier-pigeon".parse::<WireFormat>().is_err());
    }

    #[test]
    fn only_legacy_uses_tabbed_frames() {
        assert_eq!(WireFormat::Legacy.frame_prefix(), FramePrefix::legacy());
        assert_eq!(WireFormat::Agent.frame_prefix(), FramePrefix::Sse);
    }

    #[test]
    fn chat_encoding_joins_text_parts() {
        let messages = vec![
            Message::system("rules"),
            Message::new("u1", Role::User).with_text("a").with_text("b"),
        ];
        let encoded = WireFormat::ChatCompletion.encode_messages(&messages);
        assert_eq!(
            encoded,
            vec![
                serde_json::json!({"role": "system", "content": "rules"}),
                serde_json::json!({"role": "user", "content": "ab"}),
            ]
        );
    }

    #[test]
    fn builder_setters_and_validation() {
        let config = ClientConfig::new("http://localhost/chat")
            .header("x-api-key", "k")
            .body_extra("model", serde_json::json!("m"))
            .wire_format(WireFormat::Agent)
            .tool_error_policy(ToolErrorPolicy::CompleteWithoutOutput);
        assert!(config.validate().is_ok());
        assert_eq!(config.headers, vec![("x-api-key".to_string(), "k".to_string())]);
        assert_eq!(config.body_extras.get("model"), Some(&serde_json::json!("m")));

        assert!(ClientConfig::new(" ").validate().is_err());
        assert!(
            ClientConfig::new("http://x")
                .timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }
}
