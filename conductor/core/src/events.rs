//! Surface Events
//!
//! Events sent from UI surfaces to the Conductor.
//!
//! # Design Philosophy
//!
//! UI surfaces forward what the user asked for and nothing else. They never
//! touch conversation state; the Conductor decides how to respond and tells
//! every surface about the result with `ConductorMessage`s.

use serde::{Deserialize, Serialize};

use crate::backend::{CommandRequest, NpcScope};
use crate::messages::{ConversationId, EventId};

/// Events from UI Surface to Conductor
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SurfaceEvent {
    // ============================================
    // Connection Events
    // ============================================
    /// Surface connected to Conductor
    Connected {
        /// Event ID for acknowledgment
        event_id: EventId,
        /// Surface type identifier
        surface_type: SurfaceType,
    },

    /// Surface disconnecting gracefully
    Disconnected {
        /// Event ID for acknowledgment
        event_id: EventId,
        /// Reason for disconnect (optional)
        reason: Option<String>,
    },

    // ============================================
    // Streamed Execution
    // ============================================
    /// Run a command and stream the answer into its conversation
    Submit {
        /// Event ID for acknowledgment
        event_id: EventId,
        /// The command
        request: CommandRequest,
    },

    /// Cancel the active stream
    Interrupt {
        /// Event ID for acknowledgment
        event_id: EventId,
    },

    // ============================================
    // Request/Response
    // ============================================
    /// Run a command without streaming
    Execute {
        /// Event ID for acknowledgment
        event_id: EventId,
        /// The command
        request: CommandRequest,
    },

    /// List models available in a directory
    ListModels {
        /// Event ID for acknowledgment
        event_id: EventId,
        /// Directory to resolve models for (configured base dir if `None`)
        current_path: Option<String>,
    },

    /// List conversations recorded under a directory
    ListConversations {
        /// Event ID for acknowledgment
        event_id: EventId,
        /// Directory (configured base dir if `None`)
        path: Option<String>,
    },

    /// List an NPC team
    ListNpcs {
        /// Event ID for acknowledgment
        event_id: EventId,
        /// Global or project team
        scope: NpcScope,
    },

    /// Check backend connectivity
    CheckStatus {
        /// Event ID for acknowledgment
        event_id: EventId,
    },

    /// Fetch the local projection of a conversation
    OpenConversation {
        /// Event ID for acknowledgment
        event_id: EventId,
        /// Conversation to open; a fresh one is created if `None`
        conversation_id: Option<ConversationId>,
    },

    // ============================================
    // Lifecycle
    // ============================================
    /// User wants to quit
    QuitRequested {
        /// Event ID for acknowledgment
        event_id: EventId,
    },
}

impl SurfaceEvent {
    /// Generate a new event ID
    pub fn new_event_id() -> EventId {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        EventId(format!("evt_{id}"))
    }

    /// The event ID to acknowledge
    #[must_use]
    pub fn event_id(&self) -> &EventId {
        match self {
            Self::Connected { event_id, .. }
            | Self::Disconnected { event_id, .. }
            | Self::Submit { event_id, .. }
            | Self::Interrupt { event_id }
            | Self::Execute { event_id, .. }
            | Self::ListModels { event_id, .. }
            | Self::ListConversations { event_id, .. }
            | Self::ListNpcs { event_id, .. }
            | Self::CheckStatus { event_id }
            | Self::OpenConversation { event_id, .. }
            | Self::QuitRequested { event_id } => event_id,
        }
    }
}

/// Type of UI surface
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfaceType {
    /// Interactive terminal line surface
    Cli,
    /// Desktop renderer
    Desktop,
    /// Headless (for testing/automation)
    Headless,
    /// Custom surface type
    Custom(String),
}

impl SurfaceType {
    /// Human-readable name
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Cli => "Terminal",
            Self::Desktop => "Desktop",
            Self::Headless => "Headless",
            Self::Custom(name) => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_event_id_unique() {
        let id1 = SurfaceEvent::new_event_id();
        let id2 = SurfaceEvent::new_event_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_event_id_accessor() {
        let event_id = SurfaceEvent::new_event_id();
        let event = SurfaceEvent::Interrupt {
            event_id: event_id.clone(),
        };
        assert_eq!(event.event_id(), &event_id);
    }

    #[test]
    fn test_submit_serde_shape() {
        let event = SurfaceEvent::Submit {
            event_id: EventId("evt_1".into()),
            request: CommandRequest::new("hello", ConversationId::from("C1")),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["Submit"]["request"]["command"], "hello");
        assert_eq!(json["Submit"]["request"]["conversation_id"], "C1");
    }

    #[test]
    fn test_surface_type_name() {
        assert_eq!(SurfaceType::Cli.name(), "Terminal");
        assert_eq!(SurfaceType::Custom("Mine".into()).name(), "Mine");
    }
}
