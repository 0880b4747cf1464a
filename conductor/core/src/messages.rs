//! Conductor Messages
//!
//! Messages sent from the Conductor to UI surfaces, plus the identifiers shared
//! across the privileged-process / UI boundary.
//!
//! # Design Philosophy
//!
//! Surfaces are renderers. Everything a surface needs in order to show a
//! streamed command execution arrives as a `ConductorMessage`: whole message
//! snapshots, per-chunk increments tagged with their stream id, and the three
//! terminal notifications. A surface applies the same stale-stream filtering
//! the core applies, so every stream-scoped message carries a [`StreamId`].

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::{ConversationSummary, ModelInfo, NpcInfo, NpcScope};
use crate::conversation::Message;

/// Messages from Conductor to UI Surface
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ConductorMessage {
    // ============================================
    // Conversation Messages
    // ============================================
    /// Full snapshot of a message (new, or just reached a terminal state)
    Message {
        /// Conversation the message belongs to
        conversation_id: ConversationId,
        /// The message itself
        message: Message,
    },

    /// Snapshot of a whole conversation (reply to `OpenConversation`)
    Conversation {
        /// Conversation identifier
        conversation_id: ConversationId,
        /// Ordered messages
        messages: Vec<Message>,
    },

    /// An increment was applied to the live placeholder
    StreamChunk {
        /// Stream the increment belongs to
        stream_id: StreamId,
        /// Content fragment, if any
        content: Option<String>,
        /// Reasoning fragment, if any
        reasoning_content: Option<String>,
        /// Tool call descriptors appended by this increment
        #[serde(default)]
        tool_calls: Vec<serde_json::Value>,
    },

    /// Stream reached `Completed`
    StreamComplete {
        /// Stream that completed
        stream_id: StreamId,
    },

    /// Stream reached `Errored`
    StreamError {
        /// Stream that errored
        stream_id: StreamId,
        /// Error description
        error: String,
    },

    /// Stream reached `Interrupted`
    StreamInterrupted {
        /// Stream that was interrupted
        stream_id: StreamId,
    },

    // ============================================
    // Request/Response Results
    // ============================================
    /// Result of a non-streamed command execution
    ExecuteResult {
        /// Conversation the command ran in
        conversation_id: ConversationId,
        /// Command output
        output: String,
        /// Backend-reported error, if any
        error: Option<String>,
    },

    /// Available models
    Models {
        /// Model list
        models: Vec<ModelInfo>,
    },

    /// Known conversations
    Conversations {
        /// Conversation summaries
        conversations: Vec<ConversationSummary>,
    },

    /// NPC team listing
    Npcs {
        /// Which team was listed
        scope: NpcScope,
        /// Team members
        npcs: Vec<NpcInfo>,
    },

    /// Backend connectivity report
    BackendStatus {
        /// Whether the backend answered
        healthy: bool,
        /// Raw status body (or the error text)
        detail: serde_json::Value,
    },

    // ============================================
    // System Messages
    // ============================================
    /// System notification
    Notify {
        /// Notification level
        level: NotifyLevel,
        /// Title (optional)
        title: Option<String>,
        /// Message content
        message: String,
    },

    /// Conductor state change
    State {
        /// The new state
        state: ConductorState,
    },

    /// Acknowledgment of received event
    Ack {
        /// Event ID being acknowledged
        event_id: EventId,
    },

    /// Request surface to quit
    Quit {
        /// Optional goodbye message
        message: Option<String>,
    },
}

impl ConductorMessage {
    /// The stream this message is scoped to, if any
    #[must_use]
    pub fn stream_id(&self) -> Option<StreamId> {
        match self {
            Self::StreamChunk { stream_id, .. }
            | Self::StreamComplete { stream_id }
            | Self::StreamError { stream_id, .. }
            | Self::StreamInterrupted { stream_id } => Some(*stream_id),
            _ => None,
        }
    }

    /// Whether this message ends a stream
    #[must_use]
    pub fn is_stream_terminal(&self) -> bool {
        matches!(
            self,
            Self::StreamComplete { .. } | Self::StreamError { .. } | Self::StreamInterrupted { .. }
        )
    }
}

// ============================================
// Identifiers
// ============================================

/// Client-generated identifier of one streamed command execution
///
/// The assistant placeholder created for the stream shares this id
/// (see [`MessageId::for_stream`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(Uuid);

impl StreamId {
    /// Mint a fresh stream id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for StreamId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Conversation identifier
///
/// Either minted locally for a new conversation or taken verbatim from the
/// backend's conversation listing, so it is kept as an opaque string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Mint a new conversation id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow as `&str`
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Message identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(format!("msg_{id}"))
    }

    /// The id of the assistant placeholder owned by `stream_id`
    #[must_use]
    pub fn for_stream(stream_id: StreamId) -> Self {
        Self(stream_id.to_string())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Event identifier (for acks)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

// ============================================
// Enumerations
// ============================================

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User input
    User,
    /// Model output
    Assistant,
    /// Locally generated notes
    System,
}

/// Notification levels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyLevel {
    /// Informational
    Info,
    /// Warning
    Warning,
    /// Error
    Error,
    /// Success
    Success,
}

/// Conductor operational states
///
/// Surfaces enable their input control whenever the state is `Ready`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConductorState {
    /// Starting up, not ready
    Initializing,
    /// Ready for input
    Ready,
    /// A stream is active
    Streaming,
    /// The backend could not be reached
    Error,
    /// Shutting down
    ShuttingDown,
}

impl ConductorState {
    /// Human-readable description
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Initializing => "Starting up...",
            Self::Ready => "Ready",
            Self::Streaming => "Streaming...",
            Self::Error => "Error",
            Self::ShuttingDown => "Shutting down...",
        }
    }

    /// Whether surfaces should accept new input
    #[must_use]
    pub fn accepts_input(&self) -> bool {
        matches!(self, Self::Ready | Self::Error)
    }
}
