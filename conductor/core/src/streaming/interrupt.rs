//! Interrupt Controller
//!
//! Cancels the active stream in two phases:
//!
//! ```text
//!   interrupt_local()          (synchronous, always succeeds)
//!     ├─ registry: Active ──► Interrupted
//!     └─ projection: seal placeholder with "[Interrupted by user]"
//!
//!   notify_backend()           (spawned, best effort)
//!     └─ backend.interrupt(stream_id) ──► InterruptOutcome
//! ```
//!
//! Phase one is what the user sees. Once it returns, late chunks for the
//! stream fail `is_current` and are dropped, whatever the backend does. Phase
//! two only reports back; a failed notify never edits the sealed message.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::StudioBackend;
use crate::conversation::{ConversationStore, Message};
use crate::messages::{ConversationId, StreamId};
use crate::streaming::projection::{self, Termination};
use crate::streaming::registry::StreamRegistry;

/// Result of asking the backend to stop
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InterruptOutcome {
    /// The backend accepted the interrupt
    Acknowledged {
        /// Interrupted stream
        stream_id: StreamId,
    },
    /// The backend could not be told
    Failed {
        /// Interrupted stream
        stream_id: StreamId,
        /// Conversation the stream belonged to
        conversation_id: ConversationId,
        /// Why the notify failed
        error: String,
    },
}

impl InterruptOutcome {
    /// The system note to append for this outcome, if any
    #[must_use]
    pub fn system_note(&self) -> Option<Message> {
        match self {
            Self::Acknowledged { .. } => None,
            Self::Failed { error, .. } => Some(Message::system(format!(
                "Backend did not confirm the interrupt: {error}"
            ))),
        }
    }
}

/// A locally completed interrupt, waiting for the backend notify
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterruptTicket {
    /// Interrupted stream
    pub stream_id: StreamId,
    /// Conversation the stream belonged to
    pub conversation_id: ConversationId,
}

/// Runs interrupts and collects their backend outcomes
pub struct InterruptController {
    outcome_tx: mpsc::Sender<InterruptOutcome>,
    outcome_rx: mpsc::Receiver<InterruptOutcome>,
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptController {
    /// Create a controller
    #[must_use]
    pub fn new() -> Self {
        let (outcome_tx, outcome_rx) = mpsc::channel(16);
        Self {
            outcome_tx,
            outcome_rx,
        }
    }

    /// Phase one: mark the active stream interrupted and seal its placeholder
    ///
    /// Returns `None` when nothing is streaming.
    pub fn interrupt_local(
        &self,
        registry: &mut StreamRegistry,
        conversations: &mut ConversationStore,
    ) -> Option<InterruptTicket> {
        let session = registry.active()?;
        let ticket = InterruptTicket {
            stream_id: session.id,
            conversation_id: session.conversation_id.clone(),
        };

        if !registry.interrupt(ticket.stream_id) {
            return None;
        }

        let sealed = conversations
            .get_mut(&ticket.conversation_id)
            .ok_or(projection::ProtocolError::MissingPlaceholder(ticket.stream_id))
            .and_then(|conv| projection::seal(conv, ticket.stream_id, &Termination::Interrupted));
        if let Err(e) = sealed {
            tracing::warn!(stream_id = %ticket.stream_id, error = %e, "Interrupted stream had no live placeholder");
        }

        tracing::info!(stream_id = %ticket.stream_id, "Stream interrupted locally");
        Some(ticket)
    }

    /// Phase two: tell the backend, off the caller's task
    ///
    /// The outcome is queued for [`try_next_outcome`](Self::try_next_outcome).
    pub fn notify_backend<B>(&self, backend: Arc<B>, ticket: InterruptTicket) -> JoinHandle<()>
    where
        B: StudioBackend + ?Sized + 'static,
    {
        let tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let outcome = match backend.interrupt(ticket.stream_id).await {
                Ok(()) => {
                    tracing::debug!(stream_id = %ticket.stream_id, "Backend acknowledged interrupt");
                    InterruptOutcome::Acknowledged {
                        stream_id: ticket.stream_id,
                    }
                }
                Err(e) => {
                    tracing::warn!(stream_id = %ticket.stream_id, error = %e, "Backend interrupt failed");
                    InterruptOutcome::Failed {
                        stream_id: ticket.stream_id,
                        conversation_id: ticket.conversation_id,
                        error: e.to_string(),
                    }
                }
            };
            let _ = tx.send(outcome).await;
        })
    }

    /// Next finished backend notify, if any
    pub fn try_next_outcome(&mut self) -> Option<InterruptOutcome> {
        self.outcome_rx.try_recv().ok()
    }

    /// Wait for the next finished backend notify
    pub async fn next_outcome(&mut self) -> Option<InterruptOutcome> {
        self.outcome_rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        CommandRequest, ConversationSummary, ExecuteResponse, ModelInfo, NpcInfo, NpcScope,
        StreamRequest, TransportEvent,
    };
    use crate::messages::MessageId;
    use crate::streaming::parser::Increment;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct InterruptOnly {
        fail: bool,
    }

    #[async_trait]
    impl StudioBackend for InterruptOnly {
        fn name(&self) -> &str {
            "interrupt-only"
        }
        async fn health_check(&self) -> bool {
            true
        }
        async fn status(&self) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
        async fn send_streaming(
            &self,
            _request: &StreamRequest,
        ) -> anyhow::Result<mpsc::Receiver<TransportEvent>> {
            anyhow::bail!("not used")
        }
        async fn execute(&self, _request: &CommandRequest) -> anyhow::Result<ExecuteResponse> {
            anyhow::bail!("not used")
        }
        async fn list_models(&self, _current_path: &str) -> anyhow::Result<Vec<ModelInfo>> {
            Ok(Vec::new())
        }
        async fn list_conversations(
            &self,
            _path: &str,
        ) -> anyhow::Result<Vec<ConversationSummary>> {
            Ok(Vec::new())
        }
        async fn npc_team(&self, _scope: &NpcScope) -> anyhow::Result<Vec<NpcInfo>> {
            Ok(Vec::new())
        }
        async fn interrupt(&self, _stream_id: StreamId) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("connection refused");
            }
            Ok(())
        }
    }

    fn streaming_setup() -> (StreamRegistry, ConversationStore, StreamId, ConversationId) {
        let mut registry = StreamRegistry::new();
        let mut store = ConversationStore::new();
        let conv_id = ConversationId::from("C1");
        let stream_id = registry.begin(conv_id.clone()).unwrap();
        let conv = store.get_or_create(&conv_id);
        conv.push(Message::user("hello"));
        conv.push(Message::placeholder(stream_id));
        projection::apply(conv, stream_id, &Increment::content("Partial")).unwrap();
        (registry, store, stream_id, conv_id)
    }

    #[test]
    fn test_interrupt_local_seals_placeholder() {
        let controller = InterruptController::new();
        let (mut registry, mut store, stream_id, conv_id) = streaming_setup();

        let ticket = controller
            .interrupt_local(&mut registry, &mut store)
            .unwrap();

        assert_eq!(ticket.stream_id, stream_id);
        assert!(!registry.is_current(stream_id));
        let msg = store
            .get(&conv_id)
            .and_then(|c| c.message(&MessageId::for_stream(stream_id)))
            .unwrap();
        assert_eq!(msg.content(), "Partial\n\n[Interrupted by user]");
        assert!(!msg.is_live());
    }

    #[test]
    fn test_interrupt_with_nothing_streaming() {
        let controller = InterruptController::new();
        let mut registry = StreamRegistry::new();
        let mut store = ConversationStore::new();

        assert!(controller.interrupt_local(&mut registry, &mut store).is_none());
    }

    #[test]
    fn test_second_interrupt_is_noop() {
        let controller = InterruptController::new();
        let (mut registry, mut store, _, _) = streaming_setup();

        assert!(controller.interrupt_local(&mut registry, &mut store).is_some());
        assert!(controller.interrupt_local(&mut registry, &mut store).is_none());
    }

    #[tokio::test]
    async fn test_backend_ack_outcome() {
        let mut controller = InterruptController::new();
        let (mut registry, mut store, stream_id, _) = streaming_setup();
        let ticket = controller.interrupt_local(&mut registry, &mut store).unwrap();

        controller
            .notify_backend(Arc::new(InterruptOnly { fail: false }), ticket)
            .await
            .unwrap();

        let outcome = controller.try_next_outcome().unwrap();
        assert_eq!(outcome, InterruptOutcome::Acknowledged { stream_id });
        assert!(outcome.system_note().is_none());
    }

    #[tokio::test]
    async fn test_backend_failure_outcome_does_not_touch_message() {
        let mut controller = InterruptController::new();
        let (mut registry, mut store, stream_id, conv_id) = streaming_setup();
        let ticket = controller.interrupt_local(&mut registry, &mut store).unwrap();

        controller
            .notify_backend(Arc::new(InterruptOnly { fail: true }), ticket)
            .await
            .unwrap();

        let outcome = controller.next_outcome().await.unwrap();
        let note = outcome.system_note().unwrap();
        assert!(note.content().contains("connection refused"));

        let msg = store
            .get(&conv_id)
            .and_then(|c| c.message(&MessageId::for_stream(stream_id)))
            .unwrap();
        assert_eq!(msg.content(), "Partial\n\n[Interrupted by user]");
    }
}
