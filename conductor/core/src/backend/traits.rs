//! Backend Traits
//!
//! Trait definitions for the inference backend. The Conductor only ever talks
//! to the backend through [`StudioBackend`], which lets tests drive the whole
//! streaming pipeline with a scripted mock.
//!
//! # Design Philosophy
//!
//! The backend is an externally owned HTTP service. This trait covers:
//! - Streamed command execution (the transport half of the pipeline)
//! - Non-streamed execution and listings (models, conversations, NPC teams)
//! - Best-effort remote cancellation of a stream
//! - Connectivity checks

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::conversation::{Attachment, AttachmentSource};
use crate::messages::{ConversationId, StreamId};

// ============================================================================
// Transport events
// ============================================================================

/// What the transport observed for one stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEventKind {
    /// One raw chunk of response text
    Chunk(String),
    /// The response body ended
    Complete,
    /// The request or the body failed
    Error(String),
}

/// A transport observation tagged with its stream
///
/// For one stream the transport emits zero or more `Chunk`s followed by
/// exactly one `Complete` or `Error`, and nothing after that.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportEvent {
    /// Stream the event belongs to
    pub stream_id: StreamId,
    /// What happened
    pub kind: TransportEventKind,
}

impl TransportEvent {
    /// A raw chunk
    pub fn chunk(stream_id: StreamId, text: impl Into<String>) -> Self {
        Self {
            stream_id,
            kind: TransportEventKind::Chunk(text.into()),
        }
    }

    /// Normal end of stream
    #[must_use]
    pub fn complete(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            kind: TransportEventKind::Complete,
        }
    }

    /// Transport failure
    pub fn error(stream_id: StreamId, message: impl Into<String>) -> Self {
        Self {
            stream_id,
            kind: TransportEventKind::Error(message.into()),
        }
    }

    /// Whether this is the last event for its stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self.kind, TransportEventKind::Chunk(_))
    }
}

// ============================================================================
// Requests
// ============================================================================

/// A command to run against the backend
///
/// Optional fields are filled from configured defaults by the Conductor
/// before the request reaches a backend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// The command text
    pub command: String,
    /// Conversation to run it in
    pub conversation_id: ConversationId,
    /// Model name
    pub model: Option<String>,
    /// NPC name
    pub npc: Option<String>,
    /// Working directory the backend should resolve paths against
    pub current_path: Option<String>,
    /// Attached files
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl CommandRequest {
    /// Create a request for `command` in `conversation_id`
    pub fn new(command: impl Into<String>, conversation_id: ConversationId) -> Self {
        Self {
            command: command.into(),
            conversation_id,
            ..Default::default()
        }
    }

    /// Set the model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the NPC
    #[must_use]
    pub fn with_npc(mut self, npc: impl Into<String>) -> Self {
        self.npc = Some(npc.into());
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn with_current_path(mut self, path: impl Into<String>) -> Self {
        self.current_path = Some(path.into());
        self
    }

    /// Add an attachment
    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// JSON body shared by `/api/stream` and `/api/execute`
    ///
    /// Inline preview data never leaves the process.
    #[must_use]
    pub fn wire_body(&self) -> serde_json::Value {
        let attachments: Vec<serde_json::Value> = self
            .attachments
            .iter()
            .map(|a| {
                let mut entry = serde_json::json!({
                    "name": a.name,
                    "type": a.mime_type,
                    "size": a.size,
                });
                if let AttachmentSource::Path(path) = &a.source {
                    entry["path"] = serde_json::json!(path.to_string_lossy());
                }
                entry
            })
            .collect();

        serde_json::json!({
            "commandstr": self.command,
            "currentPath": self.current_path,
            "conversationId": self.conversation_id,
            "model": self.model,
            "npc": self.npc,
            "attachments": attachments,
        })
    }
}

/// A command to stream, tagged with the stream id minted for it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamRequest {
    /// Stream the transport events will be tagged with
    pub stream_id: StreamId,
    /// The command
    pub command: CommandRequest,
}

// ============================================================================
// Responses
// ============================================================================

/// Result of a non-streamed command
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    /// Command output
    #[serde(default)]
    pub output: String,
    /// Backend-reported error
    #[serde(default)]
    pub error: Option<String>,
}

/// Information about an available model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier passed back in requests
    pub value: String,
    /// Human-readable label
    #[serde(default)]
    pub display_name: Option<String>,
}

impl ModelInfo {
    /// Label to show, falling back to the identifier
    #[must_use]
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.value)
    }
}

/// A conversation known to the backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation id
    pub id: ConversationId,
    /// Last activity, as reported by the backend
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Short preview of the conversation
    #[serde(default)]
    pub preview: Option<String>,
}

/// Which NPC team to list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NpcScope {
    /// The user's global team
    Global,
    /// The team of a project directory
    Project {
        /// Project directory
        current_path: String,
    },
}

/// An NPC team member
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NpcInfo {
    /// NPC name
    pub name: String,
    /// Preferred model
    #[serde(default)]
    pub model: Option<String>,
    /// Preferred provider
    #[serde(default)]
    pub provider: Option<String>,
    /// Persona directive
    #[serde(default)]
    pub primary_directive: Option<String>,
}

// ============================================================================
// Backend trait
// ============================================================================

/// Inference backend
///
/// Implement this trait to point the Conductor at a different server.
#[async_trait]
pub trait StudioBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;

    /// Raw status body
    async fn status(&self) -> anyhow::Result<serde_json::Value>;

    /// Start a streamed command execution
    ///
    /// Returns immediately with a receiver. Every failure after this point,
    /// including connection errors and non-2xx statuses, arrives on the
    /// receiver as a terminal `Error` event. Dropping the receiver cancels
    /// the request.
    async fn send_streaming(
        &self,
        request: &StreamRequest,
    ) -> anyhow::Result<mpsc::Receiver<TransportEvent>>;

    /// Run a command and wait for its output
    async fn execute(&self, request: &CommandRequest) -> anyhow::Result<ExecuteResponse>;

    /// List models available for a working directory
    async fn list_models(&self, current_path: &str) -> anyhow::Result<Vec<ModelInfo>>;

    /// List conversations recorded under a directory
    async fn list_conversations(&self, path: &str) -> anyhow::Result<Vec<ConversationSummary>>;

    /// List an NPC team
    async fn npc_team(&self, scope: &NpcScope) -> anyhow::Result<Vec<NpcInfo>>;

    /// Ask the backend to stop generating for `stream_id`
    async fn interrupt(&self, stream_id: StreamId) -> anyhow::Result<()>;

    /// Check if a specific model is available
    async fn has_model(&self, current_path: &str, model: &str) -> anyhow::Result<bool> {
        let models = self.list_models(current_path).await?;
        Ok(models.iter().any(|m| m.value == model))
    }
}
