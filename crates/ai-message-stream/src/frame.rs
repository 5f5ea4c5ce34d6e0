use std::collections::VecDeque;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt as _};
use tracing::debug;

/// Literal payload that terminates a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Line prefix that marks a frame payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FramePrefix {
    /// `data: <payload>` (server-sent events). The space after the colon is optional.
    Sse,
    /// `<tag>\t<payload>`, for example `message\t{...}`.
    Tabbed(String),
}

impl FramePrefix {
    /// The tab-delimited framing used by the legacy endpoint.
    pub fn legacy() -> Self {
        Self::Tabbed("message".to_string())
    }

    fn strip<'a>(&self, line: &'a str) -> Option<&'a str> {
        match self {
            Self::Sse => line
                .strip_prefix("data:")
                .map(|rest| rest.strip_prefix(' ').unwrap_or(rest)),
            Self::Tabbed(tag) => line.strip_prefix(tag.as_str())?.strip_prefix('\t'),
        }
    }
}

/// Returns whether a payload is the terminal `[DONE]` sentinel.
pub fn is_done(payload: &str) -> bool {
    payload.trim() == DONE_SENTINEL
}

/// Splits a chunked byte stream into frame payloads.
///
/// Chunks need not be line-aligned: an incomplete trailing line is held back
/// until the next chunk (or `finish`). Lines without the configured prefix and
/// lines that are not valid UTF-8 are skipped.
#[derive(Debug)]
pub struct FrameDecoder {
    prefix: FramePrefix,
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new(prefix: FramePrefix) -> Self {
        Self {
            prefix,
            buf: Vec::new(),
        }
    }

    /// Feeds one chunk and returns every payload completed by it.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            if let Some(payload) = self.decode_line(&self.buf[start..end]) {
                payloads.push(payload);
            }
            start = end + 1;
        }
        self.buf.drain(..start);
        payloads
    }

    /// Flushes a final line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        self.decode_line(&rest)
    }

    fn decode_line(&self, bytes: &[u8]) -> Option<String> {
        if bytes.is_empty() {
            return None;
        }
        let line = match std::str::from_utf8(bytes) {
            Ok(line) => line.trim_end_matches('\r'),
            Err(e) => {
                debug!(error = %e, len = bytes.len(), "skipping frame with invalid encoding");
                return None;
            }
        };
        let payload = match self.prefix.strip(line) {
            Some(payload) => payload,
            // `data: [DONE]` terminates every framing, tabbed included.
            None => FramePrefix::Sse.strip(line).filter(|payload| is_done(payload))?,
        };
        if payload.trim().is_empty() {
            return None;
        }
        Some(payload.to_string())
    }
}

/// Turns a byte stream into a lazy stream of frame payloads.
///
/// A final unterminated line is flushed when the byte stream ends. A read
/// error is yielded once and ends the sequence.
pub fn frames<S, E>(bytes: S, prefix: FramePrefix) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    struct State<S> {
        bytes: S,
        decoder: FrameDecoder,
        pending: VecDeque<String>,
        done: bool,
    }

    stream::try_unfold(
        State {
            bytes,
            decoder: FrameDecoder::new(prefix),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(payload) = state.pending.pop_front() {
                    return Ok(Some((payload, state)));
                }
                if state.done {
                    return Ok(None);
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        let payloads = state.decoder.push_chunk(&chunk);
                        state.pending.extend(payloads);
                    }
                    Some(Err(e)) => return Err(e),
                    None => {
                        state.done = true;
                        state.pending.extend(state.decoder.finish());
                    }
                }
            }
        },
    )
}
