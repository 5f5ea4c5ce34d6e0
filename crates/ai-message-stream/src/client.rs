use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::assembler::MessageAssembler;
use crate::config::ClientConfig;
use crate::emitter::{EmissionBus, Subscription};
use crate::errors::StreamError;
use crate::event::Event;
use crate::frame::{self, FramePrefix};
use crate::message::{Message, StreamingState};
use crate::normalize::{Normalizer, normalize_payload};
use crate::transport::{ByteStream, HttpTransport, OutboundRequest, Transport};

/// Lifecycle of the most recent request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Requested,
    Streaming,
    Completed,
    Error,
}

/// Input to one `send` call.
#[derive(Clone, Debug, Default)]
pub struct SendInput {
    /// Conversation history, encoded per wire format into `messages`.
    pub messages: Vec<Message>,
    /// Extra top-level body fields for this request only.
    pub body: serde_json::Map<String, serde_json::Value>,
}

impl SendInput {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            body: serde_json::Map::new(),
        }
    }

    /// A history consisting of one user message.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![Message::user(text)])
    }

    pub fn body_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.body.insert(key.into(), value);
        self
    }
}

impl From<Vec<Message>> for SendInput {
    fn from(messages: Vec<Message>) -> Self {
        Self::new(messages)
    }
}

impl From<&str> for SendInput {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

/// Streams responses from one endpoint and publishes message snapshots.
///
/// Each `send` owns its request, its read loop and a fresh assembler and
/// normalizer; nothing carries over between requests. Snapshots are emitted
/// synchronously as frames are decoded, in arrival order.
pub struct StreamClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    bus: EmissionBus,
    state: watch::Sender<RequestState>,
}

impl StreamClient {
    /// Creates a client that talks HTTP to `config.endpoint`.
    pub fn new(config: ClientConfig) -> Result<Self, StreamError> {
        config.validate()?;
        let transport = HttpTransport::new(config.timeout)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Creates a client from `ClientConfig::from_env`.
    pub fn from_env() -> Result<Self, StreamError> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Creates a client over a custom transport.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let (state, _) = watch::channel(RequestState::Idle);
        Self {
            config,
            transport,
            bus: EmissionBus::new(),
            state,
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&Message) + Send + Sync + 'static) -> Subscription {
        self.bus.subscribe(listener)
    }

    /// Drops all listeners. Later sends emit nothing.
    pub fn dispose(&self) {
        self.bus.dispose();
    }

    pub fn state(&self) -> RequestState {
        *self.state.borrow()
    }

    /// Watches lifecycle transitions.
    pub fn state_changes(&self) -> watch::Receiver<RequestState> {
        self.state.subscribe()
    }

    /// Sends one request and streams the response to subscribers.
    ///
    /// Never fails: any error before or during streaming is emitted as a
    /// single assistant message reading `Error: <message>`.
    pub async fn send(&self, input: impl Into<SendInput>) {
        if self.bus.is_disposed() {
            debug!("send called on disposed client");
            return;
        }
        let request = self.build_request(input.into());
        self.set_state(RequestState::Requested);

        let bytes = match self.transport.open(request).await {
            Ok(bytes) => bytes,
            Err(err) => return self.fail(err),
        };
        self.set_state(RequestState::Streaming);

        let prefix = self.config.wire_format.frame_prefix();
        let mut turn = Turn::new(&self.config);
        match turn.read(bytes, prefix, &self.bus).await {
            Ok(frames) => {
                turn.finish(&self.bus);
                debug!(frames, messages = turn.assembler.get_all_messages().len(), "stream completed");
                self.set_state(RequestState::Completed);
            }
            Err(err) => self.fail(err),
        }
    }

    fn build_request(&self, input: SendInput) -> OutboundRequest {
        let mut body = serde_json::Map::new();
        body.insert(
            "messages".to_string(),
            serde_json::Value::Array(self.config.wire_format.encode_messages(&input.messages)),
        );
        for (key, value) in self.config.body_extras.iter().chain(input.body.iter()) {
            body.insert(key.clone(), value.clone());
        }
        OutboundRequest {
            endpoint: self.config.endpoint.clone(),
            headers: self.config.headers.clone(),
            body: serde_json::Value::Object(body),
        }
    }

    fn fail(&self, err: StreamError) {
        warn!(error = %err, endpoint = %self.config.endpoint, "stream request failed");
        self.set_state(RequestState::Error);
        self.bus.emit(&Message::error(&err.user_message()));
    }

    fn set_state(&self, next: RequestState) {
        let previous = self.state.send_replace(next);
        debug!(from = ?previous, to = ?next, "request state");
    }
}

/// Per-request fold state.
struct Turn {
    assembler: MessageAssembler,
    normalizer: Box<dyn Normalizer>,
    resolved: HashSet<String>,
}

impl Turn {
    fn new(config: &ClientConfig) -> Self {
        Self {
            assembler: MessageAssembler::with_tool_error_policy(config.tool_error_policy),
            normalizer: config.wire_format.normalizer(),
            resolved: HashSet::new(),
        }
    }

    /// Runs the read loop until `[DONE]` or the end of the body. Returns the
    /// number of frames consumed.
    async fn read(
        &mut self,
        bytes: ByteStream,
        prefix: FramePrefix,
        bus: &EmissionBus,
    ) -> Result<usize, StreamError> {
        let mut frames = std::pin::pin!(frame::frames(bytes, prefix));
        let mut count = 0;
        while let Some(payload) = frames.next().await {
            let payload = payload?;
            count += 1;
            if frame::is_done(&payload) {
                debug!(frames = count, "received done sentinel");
                break;
            }
            for event in normalize_payload(self.normalizer.as_mut(), &payload)? {
                self.apply(&event, bus);
            }
        }
        Ok(count)
    }

    fn apply(&mut self, event: &Event, bus: &EmissionBus) {
        if let Event::Finish { id, .. } = event {
            self.resolve(id, bus);
            return;
        }
        let id = event.message_id();
        let state = if self.resolved.contains(id) {
            StreamingState::Done
        } else {
            StreamingState::Streaming
        };
        if let Some(message) = self.assembler.process_event(event) {
            let mut snapshot = message.clone();
            snapshot.streaming_state = Some(state);
            bus.emit(&snapshot);
        }
    }

    /// Emits the final snapshot of message `id` once.
    fn resolve(&mut self, id: &str, bus: &EmissionBus) {
        if self.resolved.contains(id) {
            return;
        }
        let Some(mut snapshot) = self.assembler.get_final_message(id) else {
            debug!(message_id = id, "finish for unknown message");
            return;
        };
        self.resolved.insert(id.to_string());
        snapshot.streaming_state = Some(StreamingState::Done);
        bus.emit(&snapshot);
    }

    /// Flushes normalizer state and resolves every message still streaming.
    fn finish(&mut self, bus: &EmissionBus) {
        for event in self.normalizer.finish() {
            self.apply(&event, bus);
        }
        let open: Vec<String> = self
            .assembler
            .get_all_messages()
            .into_iter()
            .filter(|message| !self.resolved.contains(&message.id))
            .map(|message| message.id.clone())
            .collect();
        for id in open {
            self.resolve(&id, bus);
        }
    }
}
