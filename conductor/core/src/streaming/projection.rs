//! Conversation Projection
//!
//! Folds increments into the assistant placeholder that belongs to a stream.
//! The placeholder is found by id (`MessageId::for_stream`), never by
//! position, so messages appended after it do not redirect chunks.
//!
//! Projection is append-only: `content` and `reasoning_content` are extended
//! by concatenation and `tool_calls` by push. Once a placeholder is sealed its
//! `stream_id` is cleared and every further `apply` for that stream is
//! refused.

use thiserror::Error;

use crate::conversation::{Conversation, Message};
use crate::messages::{MessageId, MessageRole, StreamId};
use crate::streaming::parser::Increment;

/// Text appended to a placeholder sealed by an interrupt
pub const INTERRUPTED_MARKER: &str = "[Interrupted by user]";

/// Why an increment or seal could not be projected
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// No assistant placeholder exists for the stream
    #[error("no placeholder message for stream {0}")]
    MissingPlaceholder(StreamId),
    /// The placeholder exists but is no longer owned by the stream
    #[error("placeholder for stream {0} is already sealed")]
    SealedPlaceholder(StreamId),
}

/// How a stream ended, as far as its placeholder is concerned
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The backend finished
    Completed,
    /// The transport failed
    Errored(String),
    /// The user cancelled
    Interrupted,
}

impl Termination {
    fn marker(&self) -> Option<String> {
        match self {
            Self::Completed => None,
            Self::Errored(error) => Some(format!("[Error: {error}]")),
            Self::Interrupted => Some(INTERRUPTED_MARKER.to_string()),
        }
    }
}

fn live_placeholder(
    conversation: &mut Conversation,
    stream_id: StreamId,
) -> Result<&mut Message, ProtocolError> {
    let message = conversation
        .message_mut(&MessageId::for_stream(stream_id))
        .filter(|m| m.role() == MessageRole::Assistant)
        .ok_or(ProtocolError::MissingPlaceholder(stream_id))?;

    if message.stream_id != Some(stream_id) {
        return Err(ProtocolError::SealedPlaceholder(stream_id));
    }
    Ok(message)
}

/// Append an increment to the placeholder of `stream_id`
///
/// # Errors
///
/// Returns [`ProtocolError`] when the placeholder is missing or sealed. The
/// conversation is left untouched.
pub fn apply(
    conversation: &mut Conversation,
    stream_id: StreamId,
    increment: &Increment,
) -> Result<(), ProtocolError> {
    let message = live_placeholder(conversation, stream_id)?;

    if let Some(content) = &increment.content {
        message.content.push_str(content);
    }
    if let Some(reasoning) = &increment.reasoning_content {
        message.reasoning_content.push_str(reasoning);
    }
    message
        .tool_calls
        .extend(increment.tool_calls.iter().cloned());
    Ok(())
}

/// Freeze the placeholder of `stream_id`
///
/// Errors and interrupts leave a visible marker after whatever content
/// already arrived.
///
/// # Errors
///
/// Returns [`ProtocolError`] when the placeholder is missing or already
/// sealed.
pub fn seal(
    conversation: &mut Conversation,
    stream_id: StreamId,
    termination: &Termination,
) -> Result<(), ProtocolError> {
    let message = live_placeholder(conversation, stream_id)?;

    if let Some(marker) = termination.marker() {
        if !message.content.is_empty() {
            message.content.push_str("\n\n");
        }
        message.content.push_str(&marker);
    }
    message.stream_id = None;
    Ok(())
}
