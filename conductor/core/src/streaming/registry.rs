//! Stream Session Registry
//!
//! Single source of truth for which stream, if any, may currently mutate a
//! conversation.

use std::collections::VecDeque;
use std::time::Instant;

use thiserror::Error;

use crate::messages::{ConversationId, StreamId};

// ============================================================================
// Configuration
// ============================================================================

/// Default number of finished sessions kept for inspection
pub const DEFAULT_HISTORY_LIMIT: usize = 256;

/// Configuration for the stream registry
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// How many terminal sessions to remember
    pub history_limit: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// Lifecycle state of a stream session
///
/// `Active` moves to exactly one of the other three, which never change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StreamState {
    /// Chunks may still be applied
    Active,
    /// The backend finished the response
    Completed,
    /// The transport failed
    Errored,
    /// The user cancelled
    Interrupted,
}

impl StreamState {
    /// Whether no further transition is possible
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// One streamed command execution
#[derive(Clone, Debug)]
pub struct StreamSession {
    /// Stream id, shared with the placeholder message
    pub id: StreamId,
    /// Conversation the stream writes into
    pub conversation_id: ConversationId,
    /// Current state
    pub state: StreamState,
    /// Failure message, set when the state is `Errored`
    pub error: Option<String>,
    /// When `begin` was called
    pub started_at: Instant,
    /// When the terminal transition happened
    pub finished_at: Option<Instant>,
}

/// A stream was requested while another one is active
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("stream {active} is still active in conversation {conversation_id}")]
pub struct ConflictError {
    /// The stream that is still running
    pub active: StreamId,
    /// Its conversation
    pub conversation_id: ConversationId,
}

// ============================================================================
// Registry
// ============================================================================

/// Tracks at most one active stream plus a bounded history of finished ones
#[derive(Debug)]
pub struct StreamRegistry {
    active: Option<StreamSession>,
    history: VecDeque<StreamSession>,
    config: RegistryConfig,
    total_started: u64,
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamRegistry {
    /// Create a registry with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry with custom configuration
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            active: None,
            history: VecDeque::new(),
            config,
            total_started: 0,
        }
    }

    /// Start a session for `conversation_id`
    ///
    /// Streams are exclusive across all conversations.
    ///
    /// # Errors
    ///
    /// Returns [`ConflictError`] if a session is already active. Nothing is
    /// changed in that case.
    pub fn begin(&mut self, conversation_id: ConversationId) -> Result<StreamId, ConflictError> {
        if let Some(active) = &self.active {
            return Err(ConflictError {
                active: active.id,
                conversation_id: active.conversation_id.clone(),
            });
        }

        let id = StreamId::new();
        tracing::info!(stream_id = %id, conversation_id = %conversation_id, "Stream started");
        self.active = Some(StreamSession {
            id,
            conversation_id,
            state: StreamState::Active,
            error: None,
            started_at: Instant::now(),
            finished_at: None,
        });
        self.total_started += 1;
        Ok(id)
    }

    /// Whether `id` is the active session
    #[must_use]
    pub fn is_current(&self, id: StreamId) -> bool {
        self.active.as_ref().is_some_and(|s| s.id == id)
    }

    /// Mark `id` as `Completed`; no-op unless it is the active session
    pub fn complete(&mut self, id: StreamId) -> bool {
        self.finish(id, StreamState::Completed, None)
    }

    /// Mark `id` as `Errored`; no-op unless it is the active session
    pub fn fail(&mut self, id: StreamId, error: impl Into<String>) -> bool {
        self.finish(id, StreamState::Errored, Some(error.into()))
    }

    /// Mark `id` as `Interrupted`; no-op unless it is the active session
    pub fn interrupt(&mut self, id: StreamId) -> bool {
        self.finish(id, StreamState::Interrupted, None)
    }

    fn finish(&mut self, id: StreamId, state: StreamState, error: Option<String>) -> bool {
        if !self.is_current(id) {
            tracing::debug!(stream_id = %id, ?state, "Ignoring terminal signal for stale stream");
            return false;
        }
        let Some(mut session) = self.active.take() else {
            return false;
        };

        session.state = state;
        session.error = error;
        session.finished_at = Some(Instant::now());
        tracing::info!(
            stream_id = %id,
            ?state,
            elapsed_ms = session.started_at.elapsed().as_millis() as u64,
            "Stream finished"
        );

        self.history.push_back(session);
        while self.history.len() > self.config.history_limit {
            self.history.pop_front();
        }
        true
    }

    /// The active session
    #[must_use]
    pub fn active(&self) -> Option<&StreamSession> {
        self.active.as_ref()
    }

    /// The active session's id
    #[must_use]
    pub fn active_id(&self) -> Option<StreamId> {
        self.active.as_ref().map(|s| s.id)
    }

    /// Whether any session is active
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    /// Look up a session, active or remembered
    #[must_use]
    pub fn session(&self, id: StreamId) -> Option<&StreamSession> {
        self.active
            .iter()
            .chain(self.history.iter().rev())
            .find(|s| s.id == id)
    }

    /// State of a session, if known
    #[must_use]
    pub fn state(&self, id: StreamId) -> Option<StreamState> {
        self.session(id).map(|s| s.state)
    }

    /// Total sessions ever started
    #[must_use]
    pub fn total_started(&self) -> u64 {
        self.total_started
    }
}
