//! Conductor - The Orchestration Core
//!
//! The Conductor is the single writer of conversation state. It owns:
//! - The stream registry (which stream may write, if any)
//! - The conversation store (the projection surfaces render)
//! - The backend handle and the in-flight transport receiver
//! - The interrupt controller
//! - The registry of connected surfaces
//!
//! # Design Philosophy
//!
//! Surfaces never mutate anything. They send `SurfaceEvent`s in and render the
//! `ConductorMessage`s that come out. Every transport event passes through the
//! same gate before it can touch a message:
//!
//! ```text
//!   TransportEvent ─► is_current? ─► parse_chunk ─► projection::apply ─► StreamChunk
//!                         │ no            │ none           │ err
//!                         ▼               ▼                ▼
//!                       drop            drop          warn + drop
//! ```
//!
//! # Driving the Conductor
//!
//! Either call [`Conductor::poll_streaming`] from a render loop, or await
//! [`Conductor::next_wake`] inside a `tokio::select!` and hand the result to
//! [`Conductor::handle_wake`]. `next_wake` is cancel safe; `handle_wake`
//! never waits, so a select loop stays responsive to interrupts.
//!
//! Broadcasts never wait either. A surface whose channel is full or closed
//! is dropped from the surface registry.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::backend::{
    CommandRequest, NpcScope, StreamRequest, StudioBackend, TransportEvent, TransportEventKind,
};
use crate::config::StudioConfig;
use crate::conversation::{Conversation, ConversationStore, Message};
use crate::events::{SurfaceEvent, SurfaceType};
use crate::messages::{
    ConductorMessage, ConductorState, ConversationId, EventId, MessageId, NotifyLevel, StreamId,
};
use crate::streaming::interrupt::{InterruptController, InterruptOutcome};
use crate::streaming::parser::parse_chunk;
use crate::streaming::projection::{self, ProtocolError, Termination};
use crate::streaming::registry::{ConflictError, RegistryConfig, StreamRegistry};
use crate::surface_registry::{SurfaceRegistry, Subscription};

/// Conductor configuration
#[derive(Clone, Debug)]
pub struct ConductorConfig {
    /// Model used when a request names none
    pub default_model: String,
    /// NPC used when a request names none
    pub default_npc: String,
    /// Working directory used when a request names none
    pub base_dir: PathBuf,
    /// Finished stream sessions to remember
    pub history_limit: usize,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self::from(&StudioConfig::default())
    }
}

impl From<&StudioConfig> for ConductorConfig {
    fn from(config: &StudioConfig) -> Self {
        Self {
            default_model: config.default_model.clone(),
            default_npc: config.default_npc.clone(),
            base_dir: config.base_dir.clone(),
            history_limit: config.history_limit,
        }
    }
}

impl ConductorConfig {
    fn base_dir_str(&self) -> String {
        self.base_dir.to_string_lossy().into_owned()
    }
}

/// Something the streaming side of the Conductor woke up for
#[derive(Debug)]
pub enum StreamWake {
    /// The in-flight transport produced an event
    Transport(TransportEvent),
    /// The in-flight transport closed without a terminal event
    Closed(StreamId),
    /// A backend interrupt notify finished
    Interrupt(InterruptOutcome),
}

struct Inflight {
    stream_id: StreamId,
    rx: mpsc::Receiver<TransportEvent>,
}

/// The Conductor - headless streaming core
pub struct Conductor<B: StudioBackend> {
    config: ConductorConfig,
    backend: Arc<B>,
    registry: StreamRegistry,
    conversations: ConversationStore,
    interrupts: InterruptController,
    inflight: Option<Inflight>,
    state: ConductorState,
    surfaces: SurfaceRegistry,
}

impl<B: StudioBackend + 'static> Conductor<B> {
    /// Create a new Conductor with the given backend
    pub fn new(backend: B, config: ConductorConfig) -> Self {
        Self::with_shared_backend(Arc::new(backend), config)
    }

    /// Create a Conductor around a backend that is also used elsewhere
    pub fn with_shared_backend(backend: Arc<B>, config: ConductorConfig) -> Self {
        let registry = StreamRegistry::with_config(RegistryConfig {
            history_limit: config.history_limit,
        });
        Self {
            config,
            backend,
            registry,
            conversations: ConversationStore::new(),
            interrupts: InterruptController::new(),
            inflight: None,
            state: ConductorState::Initializing,
            surfaces: SurfaceRegistry::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current operational state
    #[must_use]
    pub fn state(&self) -> ConductorState {
        self.state
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    /// Stream registry
    #[must_use]
    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Whether a stream is active
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.registry.is_streaming()
    }

    /// Local projection of a conversation
    #[must_use]
    pub fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    /// Backend handle
    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Connected surfaces
    #[must_use]
    pub fn surfaces(&self) -> &SurfaceRegistry {
        &self.surfaces
    }

    /// Subscribe a new surface to everything the Conductor broadcasts
    #[must_use]
    pub fn subscribe(
        &self,
        surface_type: SurfaceType,
    ) -> (Subscription, mpsc::Receiver<ConductorMessage>) {
        self.surfaces.subscribe(surface_type)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Check the backend and become ready
    ///
    /// An unreachable backend is reported but does not stop the Conductor;
    /// the first request will fail with the real error.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        self.set_state(ConductorState::Initializing);

        if self.backend.health_check().await {
            tracing::info!(backend = self.backend.name(), "Backend reachable");
        } else {
            tracing::warn!(backend = self.backend.name(), "Backend not reachable");
            self.notify(
                NotifyLevel::Warning,
                "Backend not reachable - requests will fail until it is running",
            );
        }

        self.set_state(ConductorState::Ready);
        Ok(())
    }

    /// Interrupt anything in flight and tell surfaces to quit
    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        if self.is_streaming() {
            self.interrupt();
        }
        self.set_state(ConductorState::ShuttingDown);
        self.send(ConductorMessage::Quit {
            message: Some("Goodbye!".to_string()),
        });
        Ok(())
    }

    // ========================================================================
    // Surface Events
    // ========================================================================

    /// Handle an event from a surface
    pub async fn handle_event(&mut self, event: SurfaceEvent) -> anyhow::Result<()> {
        self.ack(event.event_id().clone());

        match event {
            SurfaceEvent::Connected { surface_type, .. } => {
                tracing::info!(surface = surface_type.name(), "Surface connected");
                self.send(ConductorMessage::State { state: self.state });
            }

            SurfaceEvent::Disconnected { reason, .. } => {
                tracing::info!(reason = ?reason, "Surface disconnected");
            }

            SurfaceEvent::Submit { request, .. } => {
                if let Err(conflict) = self.submit(request).await {
                    self.notify(NotifyLevel::Warning, &conflict.to_string());
                }
            }

            SurfaceEvent::Interrupt { .. } => {
                if self.interrupt().is_none() {
                    self.notify(NotifyLevel::Info, "Nothing to interrupt");
                }
            }

            SurfaceEvent::Execute { request, .. } => {
                self.execute(request).await;
            }

            SurfaceEvent::ListModels { current_path, .. } => {
                let path = current_path.unwrap_or_else(|| self.config.base_dir_str());
                match self.backend.list_models(&path).await {
                    Ok(models) => self.send(ConductorMessage::Models { models }),
                    Err(e) => self.report_failure("Listing models failed", &e),
                }
            }

            SurfaceEvent::ListConversations { path, .. } => {
                let path = path.unwrap_or_else(|| self.config.base_dir_str());
                match self.backend.list_conversations(&path).await {
                    Ok(conversations) => {
                        self.send(ConductorMessage::Conversations { conversations });
                    }
                    Err(e) => self.report_failure("Listing conversations failed", &e),
                }
            }

            SurfaceEvent::ListNpcs { scope, .. } => {
                let team = self.backend.npc_team(&scope).await;
                match team {
                    Ok(npcs) => self.send(ConductorMessage::Npcs { scope, npcs }),
                    Err(e) => self.report_failure("Listing NPCs failed", &e),
                }
            }

            SurfaceEvent::CheckStatus { .. } => {
                let message = match self.backend.status().await {
                    Ok(detail) => ConductorMessage::BackendStatus {
                        healthy: true,
                        detail,
                    },
                    Err(e) => ConductorMessage::BackendStatus {
                        healthy: false,
                        detail: serde_json::json!({ "error": e.to_string() }),
                    },
                };
                self.send(message);
            }

            SurfaceEvent::OpenConversation {
                conversation_id, ..
            } => {
                let id = conversation_id.unwrap_or_default();
                let messages = self.conversations.get_or_create(&id).messages().to_vec();
                self.send(ConductorMessage::Conversation {
                    conversation_id: id,
                    messages,
                });
            }

            SurfaceEvent::QuitRequested { .. } => {
                self.shutdown().await?;
            }
        }

        Ok(())
    }

    /// Fill unset request fields from the configured defaults
    fn resolve(&self, mut request: CommandRequest) -> CommandRequest {
        if request.model.is_none() {
            request.model = Some(self.config.default_model.clone());
        }
        if request.npc.is_none() {
            request.npc = Some(self.config.default_npc.clone());
        }
        if request.current_path.is_none() {
            request.current_path = Some(self.config.base_dir_str());
        }
        request
    }

    async fn execute(&self, request: CommandRequest) {
        let request = self.resolve(request);
        let conversation_id = request.conversation_id.clone();
        let message = match self.backend.execute(&request).await {
            Ok(response) => ConductorMessage::ExecuteResult {
                conversation_id,
                output: response.output,
                error: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Execute failed");
                ConductorMessage::ExecuteResult {
                    conversation_id,
                    output: String::new(),
                    error: Some(e.to_string()),
                }
            }
        };
        self.send(message);
    }

    // ========================================================================
    // Streamed Execution
    // ========================================================================

    /// Start a streamed command execution
    ///
    /// Appends the user message and an empty assistant placeholder, then opens
    /// the transport. A transport that cannot be opened fails the stream
    /// right away; the stream id is still returned.
    ///
    /// # Errors
    ///
    /// Returns [`ConflictError`] if another stream is active. Nothing is
    /// appended and no request is made in that case.
    pub async fn submit(&mut self, request: CommandRequest) -> Result<StreamId, ConflictError> {
        let conversation_id = request.conversation_id.clone();
        let stream_id = self.registry.begin(conversation_id.clone())?;
        let request = self.resolve(request);

        let model = request.model.clone().unwrap_or_default();
        let npc = request.npc.clone().unwrap_or_default();
        let user = Message::user(request.command.clone())
            .with_model(model.clone())
            .with_npc(npc.clone())
            .with_attachments(request.attachments.clone());
        let placeholder = Message::placeholder(stream_id)
            .with_model(model)
            .with_npc(npc);

        let conversation = self.conversations.get_or_create(&conversation_id);
        let user = conversation.push(user).clone();
        let placeholder = conversation.push(placeholder).clone();

        self.send(ConductorMessage::Message {
            conversation_id: conversation_id.clone(),
            message: user,
        });
        self.send(ConductorMessage::Message {
            conversation_id,
            message: placeholder,
        });
        self.set_state(ConductorState::Streaming);

        let stream_request = StreamRequest {
            stream_id,
            command: request,
        };
        match self.backend.send_streaming(&stream_request).await {
            Ok(rx) => {
                self.inflight = Some(Inflight { stream_id, rx });
            }
            Err(e) => {
                tracing::warn!(stream_id = %stream_id, error = %e, "Could not open transport");
                self.finish_stream(stream_id, Termination::Errored(e.to_string()));
            }
        }

        Ok(stream_id)
    }

    /// Apply one transport event
    ///
    /// Returns whether the event changed anything. Events for streams other
    /// than the active one are dropped.
    pub fn handle_transport_event(&mut self, event: TransportEvent) -> bool {
        let stream_id = event.stream_id;
        if !self.registry.is_current(stream_id) {
            tracing::debug!(stream_id = %stream_id, "Dropping event for stale stream");
            return false;
        }

        match event.kind {
            TransportEventKind::Chunk(text) => {
                let Some(increment) = parse_chunk(text) else {
                    return false;
                };
                let Some(conversation_id) = self.active_conversation() else {
                    return false;
                };

                let applied = match self.conversations.get_mut(&conversation_id) {
                    Some(conversation) => projection::apply(conversation, stream_id, &increment),
                    None => Err(ProtocolError::MissingPlaceholder(stream_id)),
                };
                if let Err(e) = applied {
                    tracing::warn!(stream_id = %stream_id, error = %e, "Dropping increment");
                    return false;
                }

                self.send(ConductorMessage::StreamChunk {
                    stream_id,
                    content: increment.content,
                    reasoning_content: increment.reasoning_content,
                    tool_calls: increment.tool_calls,
                });
                true
            }
            TransportEventKind::Complete => self.finish_stream(stream_id, Termination::Completed),
            TransportEventKind::Error(error) => {
                self.finish_stream(stream_id, Termination::Errored(error))
            }
        }
    }

    /// Cancel the active stream
    ///
    /// The registry transition and the placeholder seal happen before this
    /// returns; the backend is told afterwards, off this task. Nothing here
    /// waits on a surface or on the backend.
    /// Returns the interrupted stream, or `None` if nothing was streaming.
    pub fn interrupt(&mut self) -> Option<StreamId> {
        let ticket = self
            .interrupts
            .interrupt_local(&mut self.registry, &mut self.conversations)?;

        // Dropping the receiver stops the body pump and closes the request.
        if self
            .inflight
            .as_ref()
            .is_some_and(|i| i.stream_id == ticket.stream_id)
        {
            self.inflight = None;
        }

        self.interrupts
            .notify_backend(Arc::clone(&self.backend), ticket.clone());

        self.announce_terminal(
            &ticket.conversation_id,
            ticket.stream_id,
            &Termination::Interrupted,
        );
        Some(ticket.stream_id)
    }

    /// Drain everything that is ready without waiting
    ///
    /// Returns whether anything was processed.
    pub fn poll_streaming(&mut self) -> bool {
        let mut wakes = Vec::new();

        if let Some(inflight) = self.inflight.as_mut() {
            loop {
                match inflight.rx.try_recv() {
                    Ok(event) => {
                        let terminal = event.is_terminal();
                        wakes.push(StreamWake::Transport(event));
                        if terminal {
                            break;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        wakes.push(StreamWake::Closed(inflight.stream_id));
                        break;
                    }
                }
            }
        }
        while let Some(outcome) = self.interrupts.try_next_outcome() {
            wakes.push(StreamWake::Interrupt(outcome));
        }

        let activity = !wakes.is_empty();
        for wake in wakes {
            self.handle_wake(wake);
        }
        activity
    }

    /// Wait for the next streaming-side event
    ///
    /// Cancel safe. Pending forever while nothing is in flight and no
    /// interrupt notify is outstanding.
    pub async fn next_wake(&mut self) -> StreamWake {
        match self.inflight.as_mut() {
            Some(inflight) => {
                let stream_id = inflight.stream_id;
                tokio::select! {
                    event = inflight.rx.recv() => match event {
                        Some(event) => StreamWake::Transport(event),
                        None => StreamWake::Closed(stream_id),
                    },
                    Some(outcome) = self.interrupts.next_outcome() => StreamWake::Interrupt(outcome),
                }
            }
            None => match self.interrupts.next_outcome().await {
                Some(outcome) => StreamWake::Interrupt(outcome),
                None => std::future::pending().await,
            },
        }
    }

    /// Process a wake returned by [`next_wake`](Self::next_wake)
    pub fn handle_wake(&mut self, wake: StreamWake) {
        match wake {
            StreamWake::Transport(event) => {
                self.handle_transport_event(event);
            }
            StreamWake::Closed(stream_id) => {
                if self
                    .inflight
                    .as_ref()
                    .is_some_and(|i| i.stream_id == stream_id)
                {
                    self.inflight = None;
                }
                if self.registry.is_current(stream_id) {
                    tracing::warn!(stream_id = %stream_id, "Transport closed without a terminal event");
                    self.finish_stream(
                        stream_id,
                        Termination::Errored("transport closed unexpectedly".to_string()),
                    );
                }
            }
            StreamWake::Interrupt(outcome) => self.handle_interrupt_outcome(outcome),
        }
    }

    fn handle_interrupt_outcome(&mut self, outcome: InterruptOutcome) {
        let Some(note) = outcome.system_note() else {
            return;
        };
        let InterruptOutcome::Failed {
            conversation_id,
            error,
            ..
        } = outcome
        else {
            return;
        };

        let note = self.conversations.get_or_create(&conversation_id).push(note).clone();
        self.send(ConductorMessage::Message {
            conversation_id,
            message: note,
        });
        self.notify(
            NotifyLevel::Warning,
            &format!("Backend did not confirm the interrupt: {error}"),
        );
    }

    fn active_conversation(&self) -> Option<ConversationId> {
        self.registry.active().map(|s| s.conversation_id.clone())
    }

    /// Move the active stream to a terminal state and seal its placeholder
    fn finish_stream(&mut self, stream_id: StreamId, termination: Termination) -> bool {
        let Some(conversation_id) = self.active_conversation() else {
            return false;
        };

        let transitioned = match &termination {
            Termination::Completed => self.registry.complete(stream_id),
            Termination::Errored(error) => self.registry.fail(stream_id, error.clone()),
            Termination::Interrupted => self.registry.interrupt(stream_id),
        };
        if !transitioned {
            return false;
        }

        let sealed = match self.conversations.get_mut(&conversation_id) {
            Some(conversation) => projection::seal(conversation, stream_id, &termination),
            None => Err(ProtocolError::MissingPlaceholder(stream_id)),
        };
        if let Err(e) = sealed {
            tracing::warn!(stream_id = %stream_id, error = %e, "Could not seal placeholder");
        }

        if self
            .inflight
            .as_ref()
            .is_some_and(|i| i.stream_id == stream_id)
        {
            self.inflight = None;
        }

        self.announce_terminal(&conversation_id, stream_id, &termination);
        true
    }

    /// Tell surfaces a stream ended and re-enable input
    fn announce_terminal(
        &mut self,
        conversation_id: &ConversationId,
        stream_id: StreamId,
        termination: &Termination,
    ) {
        let terminal = match termination {
            Termination::Completed => ConductorMessage::StreamComplete { stream_id },
            Termination::Errored(error) => ConductorMessage::StreamError {
                stream_id,
                error: error.clone(),
            },
            Termination::Interrupted => ConductorMessage::StreamInterrupted { stream_id },
        };
        self.send(terminal);

        let snapshot = self
            .conversations
            .get(conversation_id)
            .and_then(|c| c.message(&MessageId::for_stream(stream_id)))
            .cloned();
        if let Some(message) = snapshot {
            self.send(ConductorMessage::Message {
                conversation_id: conversation_id.clone(),
                message,
            });
        }

        if let Termination::Errored(error) = termination {
            self.notify(NotifyLevel::Error, error);
        }

        self.set_state(ConductorState::Ready);
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Set state and notify surfaces
    fn set_state(&mut self, state: ConductorState) {
        self.state = state;
        self.send(ConductorMessage::State { state });
    }

    /// Send acknowledgment
    fn ack(&self, event_id: EventId) {
        self.send(ConductorMessage::Ack { event_id });
    }

    /// Send notification
    fn notify(&self, level: NotifyLevel, message: &str) {
        self.send(ConductorMessage::Notify {
            level,
            title: None,
            message: message.to_string(),
        });
    }

    fn report_failure(&self, title: &str, error: &anyhow::Error) {
        tracing::warn!(error = %error, "{title}");
        self.send(ConductorMessage::Notify {
            level: NotifyLevel::Error,
            title: Some(title.to_string()),
            message: error.to_string(),
        });
    }

    /// Broadcast to every connected surface without waiting
    ///
    /// A surface that cannot take the message is dropped from the registry
    /// rather than allowed to hold up the stream.
    fn send(&self, msg: ConductorMessage) {
        let result = self.surfaces.broadcast(&msg);
        if !result.all_succeeded() {
            tracing::warn!(
                dropped = result.failed_ids.len(),
                "Dropped surfaces that stopped reading"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ConversationSummary, ExecuteResponse, ModelInfo, NpcInfo};
    use crate::messages::MessageRole;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    /// Backend whose streams never produce anything on their own
    #[derive(Default)]
    struct SilentBackend {
        healthy: bool,
        open_fails: bool,
        open_streams: parking_lot::Mutex<Vec<mpsc::Sender<TransportEvent>>>,
    }

    #[async_trait]
    impl StudioBackend for SilentBackend {
        fn name(&self) -> &str {
            "silent"
        }
        async fn health_check(&self) -> bool {
            self.healthy
        }
        async fn status(&self) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::json!({"status": "ok"}))
        }
        async fn send_streaming(
            &self,
            _request: &StreamRequest,
        ) -> anyhow::Result<mpsc::Receiver<TransportEvent>> {
            if self.open_fails {
                anyhow::bail!("connection refused");
            }
            let (tx, rx) = mpsc::channel(4);
            self.open_streams.lock().push(tx);
            Ok(rx)
        }
        async fn execute(&self, request: &CommandRequest) -> anyhow::Result<ExecuteResponse> {
            Ok(ExecuteResponse {
                output: format!("ran {}", request.command),
                error: None,
            })
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
            anyhow::bail!("no team")
        }
        async fn interrupt(&self, _stream_id: StreamId) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ConductorMessage>) -> Vec<ConductorMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_conductor_start() {
        let mut conductor = Conductor::new(
            SilentBackend {
                healthy: true,
                ..Default::default()
            },
            ConductorConfig::default(),
        );
        let (_sub, mut rx) = conductor.subscribe(SurfaceType::Headless);

        conductor.start().await.unwrap();

        assert_eq!(conductor.state(), ConductorState::Ready);
        let messages = drain(&mut rx);
        assert!(!messages
            .iter()
            .any(|m| matches!(m, ConductorMessage::Notify { .. })));
        assert!(matches!(
            messages.last(),
            Some(ConductorMessage::State {
                state: ConductorState::Ready
            })
        ));
    }

    #[tokio::test]
    async fn test_start_warns_when_backend_down() {
        let mut conductor = Conductor::new(SilentBackend::default(), ConductorConfig::default());
        let (_sub, mut rx) = conductor.subscribe(SurfaceType::Headless);

        conductor.start().await.unwrap();

        assert!(drain(&mut rx).iter().any(|m| matches!(
            m,
            ConductorMessage::Notify {
                level: NotifyLevel::Warning,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_submit_fills_defaults_and_appends_placeholder() {
        let mut conductor = Conductor::new(SilentBackend::default(), ConductorConfig::default());
        let conv_id = ConversationId::from("C1");

        let stream_id = conductor
            .submit(CommandRequest::new("hello", conv_id.clone()))
            .await
            .unwrap();

        let conv = conductor.conversation(&conv_id).unwrap();
        assert_eq!(conv.len(), 2);
        assert_eq!(conv.messages()[0].role(), MessageRole::User);
        assert_eq!(conv.messages()[0].model(), Some("llama3.2"));
        let placeholder = &conv.messages()[1];
        assert_eq!(placeholder.id(), &MessageId::for_stream(stream_id));
        assert_eq!(placeholder.stream_id(), Some(stream_id));
        assert_eq!(placeholder.npc(), Some("sibiji"));
        assert_eq!(conductor.state(), ConductorState::Streaming);
    }

    #[tokio::test]
    async fn test_second_submit_conflicts_without_mutation() {
        let mut conductor = Conductor::new(SilentBackend::default(), ConductorConfig::default());
        let first = conductor
            .submit(CommandRequest::new("one", ConversationId::from("C1")))
            .await
            .unwrap();

        let err = conductor
            .submit(CommandRequest::new("two", ConversationId::from("C2")))
            .await
            .unwrap_err();

        assert_eq!(err.active, first);
        assert!(conductor.conversation(&ConversationId::from("C2")).is_none());
        assert_eq!(conductor.conversation(&ConversationId::from("C1")).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transport_open_failure_errors_stream() {
        let mut conductor = Conductor::new(
            SilentBackend {
                open_fails: true,
                ..Default::default()
            },
            ConductorConfig::default(),
        );
        let conv_id = ConversationId::from("C1");

        let stream_id = conductor
            .submit(CommandRequest::new("hello", conv_id.clone()))
            .await
            .unwrap();

        assert!(!conductor.is_streaming());
        assert_eq!(conductor.state(), ConductorState::Ready);
        let msg = conductor
            .conversation(&conv_id)
            .and_then(|c| c.message(&MessageId::for_stream(stream_id)))
            .unwrap();
        assert_eq!(msg.content(), "[Error: connection refused]");
    }

    #[tokio::test]
    async fn test_stale_transport_event_dropped() {
        let mut conductor = Conductor::new(SilentBackend::default(), ConductorConfig::default());
        conductor
            .submit(CommandRequest::new("hello", ConversationId::from("C1")))
            .await
            .unwrap();

        let applied = conductor
            .handle_transport_event(TransportEvent::chunk(StreamId::new(), "data: {}"));
        assert!(!applied);
    }

    #[tokio::test]
    async fn test_handle_event_acks_and_executes() {
        let mut conductor = Conductor::new(SilentBackend::default(), ConductorConfig::default());
        let (_sub, mut rx) = conductor.subscribe(SurfaceType::Headless);
        let event_id = SurfaceEvent::new_event_id();

        conductor
            .handle_event(SurfaceEvent::Execute {
                event_id: event_id.clone(),
                request: CommandRequest::new("ls", ConversationId::from("C1")),
            })
            .await
            .unwrap();

        let messages = drain(&mut rx);
        assert!(matches!(&messages[0], ConductorMessage::Ack { event_id: id } if *id == event_id));
        assert!(matches!(
            &messages[1],
            ConductorMessage::ExecuteResult { output, error: None, .. } if output == "ran ls"
        ));
    }

    #[tokio::test]
    async fn test_listing_failure_notifies() {
        let mut conductor = Conductor::new(SilentBackend::default(), ConductorConfig::default());
        let (_sub, mut rx) = conductor.subscribe(SurfaceType::Headless);

        conductor
            .handle_event(SurfaceEvent::ListNpcs {
                event_id: SurfaceEvent::new_event_id(),
                scope: NpcScope::Global,
            })
            .await
            .unwrap();

        assert!(drain(&mut rx).iter().any(|m| matches!(
            m,
            ConductorMessage::Notify { level: NotifyLevel::Error, message, .. } if message.contains("no team")
        )));
    }

    #[tokio::test]
    async fn test_interrupt_with_nothing_streaming() {
        let mut conductor = Conductor::new(SilentBackend::default(), ConductorConfig::default());
        assert!(conductor.interrupt().is_none());
    }
}
