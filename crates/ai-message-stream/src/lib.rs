//! Incremental assembly of streamed AI backend responses.
//!
//! A response body arrives as framed chunks (`data: {...}` or
//! `message\t{...}`). Each frame is decoded, normalized from its provider
//! vocabulary into canonical [`Event`]s, folded into [`Message`]s by the
//! [`MessageAssembler`], and every change is published as a snapshot on an
//! [`EmissionBus`]. [`StreamClient`] wires these stages to an HTTP endpoint.
//!
//! ```no_run
//! use ai_message_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), StreamError> {
//! let client = StreamClient::new(
//!     ClientConfig::new("http://localhost:8080/api/chat")
//!         .wire_format(WireFormat::ChatCompletion),
//! )?;
//! let _subscription = client.subscribe(|message| {
//!     println!("{} [{:?}] {}", message.id, message.streaming_state, message.text());
//! });
//! client.send("Say hello").await;
//! # Ok(())
//! # }
//! ```

/// Event-to-message fold.
pub mod assembler;
/// Request orchestration and lifecycle state.
pub mod client;
/// Client configuration and wire format selection.
pub mod config;
/// Snapshot broadcast to subscribers.
pub mod emitter;
pub mod errors;
/// Canonical streaming events.
pub mod event;
/// Line framing of chunked response bodies.
pub mod frame;
/// Conversation message model.
pub mod message;
/// Provider vocabularies mapped onto canonical events.
pub mod normalize;
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// HTTP seam for opening response streams.
pub mod transport;

pub use assembler::{MessageAssembler, ToolErrorPolicy};
pub use client::{RequestState, SendInput, StreamClient};
pub use config::{ClientConfig, WireFormat};
pub use emitter::{EmissionBus, Subscription};
pub use errors::StreamError;
pub use event::Event;
pub use frame::{FrameDecoder, FramePrefix};
pub use message::{Message, Part, Role, StreamingState, ToolPart, ToolStatus};
pub use normalize::Normalizer;
pub use observability::init_observability;
pub use transport::{HttpTransport, OutboundRequest, Transport};
