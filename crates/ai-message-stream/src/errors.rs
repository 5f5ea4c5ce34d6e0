/// Failures that end one request lifecycle.
///
/// None of these escape `StreamClient::send`; they are folded into a single
/// synthetic assistant message reading `Error: <message>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// The request could not be sent or the body could not be read.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// The backend answered with a non-success status.
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    /// The response shape or framing was unusable.
    #[error("protocol error: {message}")]
    Protocol { message: String },
    /// The backend reported an error inside the stream.
    #[error("upstream error: {message}")]
    Upstream { message: String },
}

impl StreamError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a status error from an HTTP status code and response body.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an error reported by the backend mid-stream.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    /// Returns the text shown after `Error: ` in the synthetic error message.
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(message)
            | Self::Transport { message }
            | Self::Protocol { message }
            | Self::Upstream { message } => message.clone(),
            Self::Status { status, body } if body.trim().is_empty() => {
                format!("HTTP error! status: {status}")
            }
            Self::Status { status, body } => {
                format!("HTTP error! status: {status}: {}", body.trim())
            }
        }
    }
}
