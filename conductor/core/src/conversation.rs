//! Conversation Model
//!
//! In-memory projection of the conversations the backend persists. The core
//! treats a conversation as an ordered, append-only sequence of [`Message`]s.
//!
//! # Ownership
//!
//! Message text (`content`, `reasoning_content`, `tool_calls`) can only be
//! extended by [`crate::streaming::projection`]. The fields are private to this
//! crate and surfaces only ever see snapshots.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::messages::{ConversationId, MessageId, MessageRole, StreamId};

/// Current wall-clock time as Unix milliseconds
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============================================================================
// Attachments
// ============================================================================

/// Where an attachment's bytes live
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentSource {
    /// Local file handed to the backend by path
    Path(PathBuf),
    /// Inline preview data (base64) for display only
    Preview(String),
}

/// A file attached to a user message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// File name
    pub name: String,
    /// MIME type
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Size in bytes
    pub size: u64,
    /// Path or inline preview
    pub source: AttachmentSource,
}

impl Attachment {
    /// Attachment backed by a local file
    pub fn from_path(path: impl Into<PathBuf>, mime_type: impl Into<String>, size: u64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            name,
            mime_type: mime_type.into(),
            size,
            source: AttachmentSource::Path(path),
        }
    }

    /// Attachment carried inline for preview only
    pub fn preview(name: impl Into<String>, mime_type: impl Into<String>, data: String) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size: data.len() as u64,
            source: AttachmentSource::Preview(data),
        }
    }

    /// Local path, if the attachment has one
    #[must_use]
    pub fn path(&self) -> Option<&PathBuf> {
        match &self.source {
            AttachmentSource::Path(p) => Some(p),
            AttachmentSource::Preview(_) => None,
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// A message in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    role: MessageRole,
    pub(crate) content: String,
    pub(crate) reasoning_content: String,
    pub(crate) tool_calls: Vec<serde_json::Value>,
    pub(crate) stream_id: Option<StreamId>,
    timestamp: i64,
    model: Option<String>,
    npc: Option<String>,
    attachments: Vec<Attachment>,
}

impl Message {
    fn new(id: MessageId, role: MessageRole, content: String) -> Self {
        Self {
            id,
            role,
            content,
            reasoning_content: String::new(),
            tool_calls: Vec::new(),
            stream_id: None,
            timestamp: now_ms(),
            model: None,
            npc: None,
            attachments: Vec::new(),
        }
    }

    /// A user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageId::new(), MessageRole::User, content.into())
    }

    /// A locally generated system note
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageId::new(), MessageRole::System, content.into())
    }

    /// The empty assistant message that `stream_id` will fill
    #[must_use]
    pub fn placeholder(stream_id: StreamId) -> Self {
        let mut message = Self::new(
            MessageId::for_stream(stream_id),
            MessageRole::Assistant,
            String::new(),
        );
        message.stream_id = Some(stream_id);
        message
    }

    /// Set the model that produced (or was asked for) this message
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the NPC the message was addressed to or produced by
    #[must_use]
    pub fn with_npc(mut self, npc: impl Into<String>) -> Self {
        self.npc = Some(npc.into());
        self
    }

    /// Attach files
    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Message id
    #[must_use]
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Sender role
    #[must_use]
    pub fn role(&self) -> MessageRole {
        self.role
    }

    /// Accumulated content
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Accumulated reasoning trace
    #[must_use]
    pub fn reasoning_content(&self) -> &str {
        &self.reasoning_content
    }

    /// Tool call descriptors in arrival order
    #[must_use]
    pub fn tool_calls(&self) -> &[serde_json::Value] {
        &self.tool_calls
    }

    /// Stream currently allowed to extend this message
    #[must_use]
    pub fn stream_id(&self) -> Option<StreamId> {
        self.stream_id
    }

    /// Whether a stream is still filling this message
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.stream_id.is_some()
    }

    /// Creation time (Unix ms)
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Model name
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// NPC name
    #[must_use]
    pub fn npc(&self) -> Option<&str> {
        self.npc.as_deref()
    }

    /// Attached files
    #[must_use]
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }
}

// ============================================================================
// Conversations
// ============================================================================

/// One conversation: an append-only list of messages
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    id: ConversationId,
    messages: Vec<Message>,
    created_at: i64,
}

impl Conversation {
    /// Create an empty conversation
    #[must_use]
    pub fn new(id: ConversationId) -> Self {
        Self {
            id,
            messages: Vec::new(),
            created_at: now_ms(),
        }
    }

    /// Conversation id
    #[must_use]
    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    /// Messages in order
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Creation time (Unix ms)
    #[must_use]
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Append a message, returning a reference to it
    pub fn push(&mut self, message: Message) -> &Message {
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    /// Find a message by id
    #[must_use]
    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub(crate) fn message_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }

    /// The most recent message
    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the conversation has no messages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// All conversations the core has touched this session
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: HashMap<ConversationId, Conversation>,
}

impl ConversationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a conversation
    #[must_use]
    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    /// Look up a conversation mutably
    pub fn get_mut(&mut self, id: &ConversationId) -> Option<&mut Conversation> {
        self.conversations.get_mut(id)
    }

    /// Get a conversation, creating it empty if unknown
    pub fn get_or_create(&mut self, id: &ConversationId) -> &mut Conversation {
        self.conversations.entry(id.clone()).or_insert_with(|| {
            tracing::debug!(conversation_id = %id, "Opened conversation");
            Conversation::new(id.clone())
        })
    }

    /// Number of conversations
    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
