//! Common imports for typical client usage.
pub use crate::{
    ClientConfig, Event, Message, MessageAssembler, Part, RequestState, Role, SendInput,
    StreamClient, StreamError, StreamingState, Subscription, ToolPart, ToolStatus, WireFormat,
    init_observability,
};
