//! Chunk Parser
//!
//! Decodes one raw chunk into a closed union before any field is read, then
//! extracts the normalized [`Increment`] from it.
//!
//! ```text
//!   RawChunk::Structured(json) ───────────────────────► Event(json)
//!   RawChunk::Text("data: [DONE]") ───────────────────► Sentinel
//!   RawChunk::Text("data: {...}") ──── parse ─────────► Event(json) | DecodeError
//!   RawChunk::Text(anything else) ────────────────────► Raw(text)
//! ```
//!
//! A [`DecodeError`] never ends a stream: [`parse_chunk`] logs it and drops
//! the chunk.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Event-stream line prefix
pub const EVENT_PREFIX: &str = "data:";

/// End-of-stream sentinel payload
pub const DONE_SENTINEL: &str = "[DONE]";

/// A chunk as delivered by a producer
///
/// The HTTP transport only ever yields [`RawChunk::Text`]. `Structured` is
/// the entry point for in-process producers that already hold decoded JSON
/// (a local model runner, a replayed transcript) and skips text decoding.
#[derive(Clone, Debug, PartialEq)]
pub enum RawChunk {
    /// Text off the wire
    Text(String),
    /// An already decoded JSON value from an in-process producer
    Structured(serde_json::Value),
}

impl From<String> for RawChunk {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for RawChunk {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<serde_json::Value> for RawChunk {
    fn from(value: serde_json::Value) -> Self {
        Self::Structured(value)
    }
}

/// The decoded shape of a chunk
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedChunk {
    /// A JSON delta envelope
    Event(serde_json::Value),
    /// Literal content
    Raw(String),
    /// The `[DONE]` marker
    Sentinel,
}

/// A chunk that looked like an event but was not valid JSON
#[derive(Debug, Error)]
#[error("malformed event payload {payload:?}: {source}")]
pub struct DecodeError {
    /// The payload after prefix stripping
    pub payload: String,
    /// Underlying JSON error
    #[source]
    pub source: serde_json::Error,
}

/// Decode a raw chunk
///
/// # Errors
///
/// Returns [`DecodeError`] when a `data:` payload is not valid JSON.
pub fn decode(chunk: RawChunk) -> Result<DecodedChunk, DecodeError> {
    let text = match chunk {
        RawChunk::Structured(value) => return Ok(DecodedChunk::Event(value)),
        RawChunk::Text(text) => text,
    };

    let Some(payload) = text.strip_prefix(EVENT_PREFIX) else {
        return Ok(DecodedChunk::Raw(text));
    };

    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return Ok(DecodedChunk::Sentinel);
    }
    if payload.is_empty() {
        // keep-alive line
        return Ok(DecodedChunk::Event(serde_json::Value::Null));
    }

    serde_json::from_str(payload)
        .map(DecodedChunk::Event)
        .map_err(|source| DecodeError {
            payload: payload.to_string(),
            source,
        })
}

/// The normalized content of one chunk
///
/// Each field is independent: a chunk carrying only reasoning text leaves
/// `content` as `None`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Increment {
    /// Answer text fragment
    pub content: Option<String>,
    /// Reasoning trace fragment
    pub reasoning_content: Option<String>,
    /// Tool call descriptors, passed through untouched
    pub tool_calls: Vec<serde_json::Value>,
}

impl Increment {
    /// Increment carrying only content
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }

    /// Increment carrying only reasoning text
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            reasoning_content: Some(text.into()),
            ..Default::default()
        }
    }

    /// Whether applying this increment would change nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.as_deref().map_or(true, str::is_empty)
            && self.reasoning_content.as_deref().map_or(true, str::is_empty)
            && self.tool_calls.is_empty()
    }
}

impl DecodedChunk {
    /// Extract the increment this chunk carries
    #[must_use]
    pub fn into_increment(self) -> Increment {
        match self {
            Self::Event(value) => extract(&value),
            Self::Raw(text) => Increment {
                content: Some(text).filter(|t| !t.is_empty()),
                ..Default::default()
            },
            Self::Sentinel => Increment::default(),
        }
    }
}

/// Pull `content`, `reasoning_content` and `tool_calls` out of an envelope
#[must_use]
pub fn extract(envelope: &serde_json::Value) -> Increment {
    let delta = envelope.pointer("/choices/0/delta");
    let text_field = |name: &str| {
        delta
            .and_then(|d| d.get(name))
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    let tool_calls = match envelope.get("tool_calls") {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::Array(calls)) => calls.clone(),
        Some(other) => vec![other.clone()],
    };

    Increment {
        content: text_field("content"),
        reasoning_content: text_field("reasoning_content"),
        tool_calls,
    }
}

/// Decode a chunk and extract its increment
///
/// Returns `None` for sentinels, empty increments and malformed payloads.
/// Malformed payloads are logged; the caller carries on with the next chunk.
pub fn parse_chunk(chunk: impl Into<RawChunk>) -> Option<Increment> {
    match decode(chunk.into()) {
        Ok(DecodedChunk::Sentinel) => {
            tracing::debug!("End-of-stream sentinel received");
            None
        }
        Ok(decoded) => Some(decoded.into_increment()).filter(|inc| !inc.is_empty()),
        Err(e) => {
            tracing::warn!(error = %e, "Dropping undecodable chunk");
            None
        }
    }
}
