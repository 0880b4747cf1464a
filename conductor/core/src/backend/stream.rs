//! Response Body Pump
//!
//! Turns a chunked HTTP body into raw text chunks for one stream.
//!
//! # Framing
//!
//! The backend answers either with bare text or with `data: <json>` lines.
//! The first text after any leading line breaks decides which. Only a line
//! that begins with `data:` counts; indented text stays literal:
//!
//! ```text
//! bytes ──► Utf8Buffer ──► ChunkFramer ──► TransportEvent::Chunk
//!                              │
//!                 ┌────────────┴─────────────┐
//!          starts with "data:"         anything else
//!                 │                          │
//!      one chunk per data line        one chunk per read
//!     (envelopes never split)        (text kept verbatim)
//! ```
//!
//! Network reads do not respect line or code point boundaries, so both are
//! reassembled here before anything reaches the parser.

use std::fmt::Display;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use super::traits::TransportEvent;
use crate::messages::StreamId;
use crate::streaming::parser::EVENT_PREFIX;

// ============================================================================
// UTF-8 reassembly
// ============================================================================

/// Holds back the tail of a read that ends inside a multi-byte character
#[derive(Debug, Default)]
struct Utf8Buffer {
    pending: Vec<u8>,
}

impl Utf8Buffer {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let valid_up_to = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // error_len() == None means the input ended mid-character
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => {
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                return text;
            }
        };

        let rest = self.pending.split_off(valid_up_to);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = rest;
        text
    }

    fn finish(self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }
}

// ============================================================================
// Chunk framing
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FramingMode {
    Undecided,
    EventStream,
    Raw,
}

/// Cuts decoded body text into raw chunks
#[derive(Debug)]
pub struct ChunkFramer {
    mode: FramingMode,
    utf8: Utf8Buffer,
    buffer: String,
}

impl Default for ChunkFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkFramer {
    /// Create a framer that has not seen any text yet
    #[must_use]
    pub fn new() -> Self {
        Self {
            mode: FramingMode::Undecided,
            utf8: Utf8Buffer::default(),
            buffer: String::new(),
        }
    }

    /// Whether the body turned out to be an event stream
    #[must_use]
    pub fn is_event_stream(&self) -> bool {
        self.mode == FramingMode::EventStream
    }

    /// Feed one network read, returning the chunks it completed
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let text = self.utf8.push(bytes);
        if text.is_empty() {
            return Vec::new();
        }

        match self.mode {
            FramingMode::Raw => vec![text],
            FramingMode::EventStream => {
                self.buffer.push_str(&text);
                self.drain_lines()
            }
            FramingMode::Undecided => {
                self.buffer.push_str(&text);
                self.decide();
                match self.mode {
                    FramingMode::Undecided => Vec::new(),
                    FramingMode::Raw => vec![std::mem::take(&mut self.buffer)],
                    FramingMode::EventStream => self.drain_lines(),
                }
            }
        }
    }

    /// Flush whatever is buffered once the body has ended
    pub fn finish(mut self) -> Vec<String> {
        let tail = std::mem::take(&mut self.utf8).finish();
        self.buffer.push_str(&tail);

        if self.buffer.is_empty() {
            return Vec::new();
        }

        match self.mode {
            FramingMode::EventStream => {
                let line = self.buffer.trim_end_matches(is_line_break);
                if is_data_line(line) {
                    vec![line.to_string()]
                } else {
                    Vec::new()
                }
            }
            FramingMode::Raw | FramingMode::Undecided => {
                if self.mode == FramingMode::Undecided && self.buffer.trim().is_empty() {
                    return Vec::new();
                }
                vec![self.buffer]
            }
        }
    }

    fn decide(&mut self) {
        let head = self.buffer.trim_start_matches(is_line_break);
        if head.is_empty() {
            return;
        }
        if head.starts_with(EVENT_PREFIX) {
            self.mode = FramingMode::EventStream;
        } else if !EVENT_PREFIX.starts_with(head) {
            self.mode = FramingMode::Raw;
        }
    }

    fn drain_lines(&mut self) -> Vec<String> {
        let mut chunks = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(is_line_break);
            if is_data_line(line) {
                chunks.push(line.to_string());
            } else if !line.trim().is_empty() {
                tracing::trace!(line = %line, "Skipping non-data event stream field");
            }
        }
        chunks
    }
}

fn is_line_break(c: char) -> bool {
    c == '\r' || c == '\n'
}

fn is_data_line(line: &str) -> bool {
    line.starts_with(EVENT_PREFIX)
}

// ============================================================================
// Pump
// ============================================================================

/// Forward a response body to `tx` as transport events for `stream_id`
///
/// Emits every chunk in order, then exactly one terminal event. If no bytes
/// arrive within `idle_timeout` the stream ends with an error. Returns early,
/// without a terminal event, once the receiver is gone.
pub async fn pump<S, B, E>(
    stream_id: StreamId,
    body: S,
    tx: mpsc::Sender<TransportEvent>,
    idle_timeout: Option<Duration>,
) where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut body = std::pin::pin!(body);
    let mut framer = ChunkFramer::new();
    let mut chunk_count: u64 = 0;

    loop {
        let next = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::warn!(
                        stream_id = %stream_id,
                        idle_secs = limit.as_secs_f64(),
                        "Backend stalled, ending stream"
                    );
                    let message = format!("no data from backend for {}s", limit.as_secs());
                    let _ = tx.send(TransportEvent::error(stream_id, message)).await;
                    return;
                }
            },
            None => body.next().await,
        };

        match next {
            Some(Ok(bytes)) => {
                for chunk in framer.push(bytes.as_ref()) {
                    chunk_count += 1;
                    if tx.send(TransportEvent::chunk(stream_id, chunk)).await.is_err() {
                        tracing::debug!(stream_id = %stream_id, "Receiver dropped, stopping pump");
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                tracing::warn!(stream_id = %stream_id, error = %e, "Response body failed");
                let _ = tx
                    .send(TransportEvent::error(stream_id, e.to_string()))
                    .await;
                return;
            }
            None => break,
        }
    }

    for chunk in framer.finish() {
        chunk_count += 1;
        if tx.send(TransportEvent::chunk(stream_id, chunk)).await.is_err() {
            return;
        }
    }

    tracing::debug!(stream_id = %stream_id, chunks = chunk_count, "Response body ended");
    let _ = tx.send(TransportEvent::complete(stream_id)).await;
}
