//! Streamed execution scenarios driven through a scripted backend
//!
//! Each test plays the part of `npc serve` by pushing transport events into
//! the channel the Conductor opened, then checks the conversation the
//! Conductor projected and the messages surfaces saw.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

use studio_core::backend::{
    CommandRequest, ConversationSummary, ExecuteResponse, ModelInfo, NpcInfo, NpcScope,
    StreamRequest, StudioBackend, TransportEvent,
};
use studio_core::{
    Conductor, ConductorConfig, ConductorMessage, ConductorState, ConversationId,
    InterruptOutcome, MessageId, MessageRole, StreamId, StreamState, StreamWake, SurfaceEvent,
    SurfaceType,
};

// =============================================================================
// Scripted backend
// =============================================================================

#[derive(Default)]
struct ScriptedBackend {
    streams: Mutex<Vec<(StreamId, mpsc::Sender<TransportEvent>)>>,
    commands: Mutex<Vec<String>>,
    interrupted: Mutex<Vec<StreamId>>,
    interrupt_error: Option<String>,
}

impl ScriptedBackend {
    fn failing_interrupts(error: &str) -> Self {
        Self {
            interrupt_error: Some(error.to_string()),
            ..Default::default()
        }
    }

    fn sender(&self, stream_id: StreamId) -> mpsc::Sender<TransportEvent> {
        self.streams
            .lock()
            .iter()
            .find(|(id, _)| *id == stream_id)
            .map(|(_, tx)| tx.clone())
            .expect("no transport opened for stream")
    }

    fn close(&self, stream_id: StreamId) {
        self.streams.lock().retain(|(id, _)| *id != stream_id);
    }
}

#[async_trait]
impl StudioBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn status(&self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({ "status": "ok" }))
    }

    async fn send_streaming(
        &self,
        request: &StreamRequest,
    ) -> anyhow::Result<mpsc::Receiver<TransportEvent>> {
        let (tx, rx) = mpsc::channel(16);
        self.commands.lock().push(request.command.command.clone());
        self.streams.lock().push((request.stream_id, tx));
        Ok(rx)
    }

    async fn execute(&self, request: &CommandRequest) -> anyhow::Result<ExecuteResponse> {
        Ok(ExecuteResponse {
            output: request.command.clone(),
            error: None,
        })
    }

    async fn list_models(&self, _current_path: &str) -> anyhow::Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            value: "llama3.2".into(),
            display_name: None,
        }])
    }

    async fn list_conversations(&self, _path: &str) -> anyhow::Result<Vec<ConversationSummary>> {
        Ok(Vec::new())
    }

    async fn npc_team(&self, _scope: &NpcScope) -> anyhow::Result<Vec<NpcInfo>> {
        Ok(Vec::new())
    }

    async fn interrupt(&self, stream_id: StreamId) -> anyhow::Result<()> {
        self.interrupted.lock().push(stream_id);
        match &self.interrupt_error {
            Some(error) => anyhow::bail!("{error}"),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn delta(content: &str) -> String {
    format!(
        "data: {}",
        serde_json::json!({ "choices": [{ "delta": { "content": content } }] })
    )
}

async fn push(backend: &ScriptedBackend, event: TransportEvent) {
    backend
        .sender(event.stream_id)
        .send(event)
        .await
        .expect("conductor dropped the transport");
}

/// Process wakes until no stream is active
async fn run_until_idle(conductor: &mut Conductor<ScriptedBackend>) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while conductor.is_streaming() {
            let wake = conductor.next_wake().await;
            conductor.handle_wake(wake);
        }
    })
    .await
    .expect("stream did not finish");
}

async fn next_wake(conductor: &mut Conductor<ScriptedBackend>) -> StreamWake {
    tokio::time::timeout(Duration::from_secs(5), conductor.next_wake())
        .await
        .expect("no wake")
}

fn placeholder_content(
    conductor: &Conductor<ScriptedBackend>,
    conv_id: &ConversationId,
    stream_id: StreamId,
) -> String {
    conductor
        .conversation(conv_id)
        .and_then(|c| c.message(&MessageId::for_stream(stream_id)))
        .map(|m| m.content().to_string())
        .expect("placeholder missing")
}

fn drain(rx: &mut mpsc::Receiver<ConductorMessage>) -> Vec<ConductorMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_hello_streams_into_placeholder() {
    let mut conductor = Conductor::new(ScriptedBackend::default(), ConductorConfig::default());
    let conv_id = ConversationId::from("C1");

    let stream_id = conductor
        .submit(CommandRequest::new("hello", conv_id.clone()))
        .await
        .unwrap();

    let backend = Arc::clone(conductor.backend());
    push(&backend, TransportEvent::chunk(stream_id, delta("Hi"))).await;
    push(&backend, TransportEvent::chunk(stream_id, delta(" there"))).await;
    push(&backend, TransportEvent::chunk(stream_id, "data: [DONE]")).await;
    push(&backend, TransportEvent::complete(stream_id)).await;

    run_until_idle(&mut conductor).await;

    let conv = conductor.conversation(&conv_id).unwrap();
    assert_eq!(conv.len(), 2);
    assert_eq!(conv.messages()[0].content(), "hello");
    let answer = &conv.messages()[1];
    assert_eq!(answer.role(), MessageRole::Assistant);
    assert_eq!(answer.content(), "Hi there");
    assert!(!answer.is_live());
    assert_eq!(
        conductor.registry().state(stream_id),
        Some(StreamState::Completed)
    );
    assert_eq!(conductor.state(), ConductorState::Ready);
    assert_eq!(*backend.commands.lock(), vec!["hello".to_string()]);
}

#[tokio::test]
async fn test_surface_sees_ordered_messages() {
    let mut conductor = Conductor::new(ScriptedBackend::default(), ConductorConfig::default());
    let (_sub, mut rx) = conductor.subscribe(SurfaceType::Headless);

    let stream_id = conductor
        .submit(CommandRequest::new("hello", ConversationId::from("C1")))
        .await
        .unwrap();
    let backend = Arc::clone(conductor.backend());
    push(&backend, TransportEvent::chunk(stream_id, delta("Hi"))).await;
    push(&backend, TransportEvent::complete(stream_id)).await;
    run_until_idle(&mut conductor).await;

    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 7);
    assert!(matches!(&messages[0], ConductorMessage::Message { message, .. } if message.role() == MessageRole::User));
    assert!(matches!(&messages[1], ConductorMessage::Message { message, .. } if message.is_live()));
    assert!(matches!(
        &messages[2],
        ConductorMessage::State { state: ConductorState::Streaming }
    ));
    assert!(matches!(
        &messages[3],
        ConductorMessage::StreamChunk { content: Some(c), .. } if c == "Hi"
    ));
    assert!(matches!(&messages[4], ConductorMessage::StreamComplete { stream_id: id } if *id == stream_id));
    assert!(matches!(&messages[5], ConductorMessage::Message { message, .. } if message.content() == "Hi"));
    assert!(matches!(
        &messages[6],
        ConductorMessage::State { state: ConductorState::Ready }
    ));
}

#[tokio::test]
async fn test_interrupt_mid_stream_drops_late_chunks() {
    let mut conductor = Conductor::new(ScriptedBackend::default(), ConductorConfig::default());
    let conv_id = ConversationId::from("C1");
    let stream_id = conductor
        .submit(CommandRequest::new("tell me a story", conv_id.clone()))
        .await
        .unwrap();

    let backend = Arc::clone(conductor.backend());
    push(&backend, TransportEvent::chunk(stream_id, delta("Once upon"))).await;
    let wake = next_wake(&mut conductor).await;
    conductor.handle_wake(wake);

    assert_eq!(conductor.interrupt(), Some(stream_id));
    assert!(!conductor.is_streaming());
    assert_eq!(
        conductor.registry().state(stream_id),
        Some(StreamState::Interrupted)
    );

    let late =
        conductor.handle_transport_event(TransportEvent::chunk(stream_id, delta(" a time")));
    assert!(!late);
    let late_complete = conductor.handle_transport_event(TransportEvent::complete(stream_id));
    assert!(!late_complete);

    assert_eq!(
        placeholder_content(&conductor, &conv_id, stream_id),
        "Once upon\n\n[Interrupted by user]"
    );

    match next_wake(&mut conductor).await {
        StreamWake::Interrupt(InterruptOutcome::Acknowledged { stream_id: id }) => {
            assert_eq!(id, stream_id);
        }
        other => panic!("unexpected wake: {other:?}"),
    }
    assert_eq!(*backend.interrupted.lock(), vec![stream_id]);
}

#[tokio::test]
async fn test_failed_interrupt_notify_adds_system_note() {
    let mut conductor = Conductor::new(
        ScriptedBackend::failing_interrupts("backend unreachable"),
        ConductorConfig::default(),
    );
    let (_sub, mut rx) = conductor.subscribe(SurfaceType::Headless);
    let conv_id = ConversationId::from("C1");
    let stream_id = conductor
        .submit(CommandRequest::new("hello", conv_id.clone()))
        .await
        .unwrap();

    conductor.interrupt().unwrap();
    let wake = next_wake(&mut conductor).await;
    assert!(matches!(
        wake,
        StreamWake::Interrupt(InterruptOutcome::Failed { .. })
    ));
    conductor.handle_wake(wake);

    let conv = conductor.conversation(&conv_id).unwrap();
    assert_eq!(conv.len(), 3);
    assert_eq!(
        placeholder_content(&conductor, &conv_id, stream_id),
        "[Interrupted by user]"
    );
    let note = conv.last().unwrap();
    assert_eq!(note.role(), MessageRole::System);
    assert_eq!(
        note.content(),
        "Backend did not confirm the interrupt: backend unreachable"
    );
    assert!(drain(&mut rx).iter().any(|m| matches!(
        m,
        ConductorMessage::Notify { message, .. } if message.contains("backend unreachable")
    )));
}

#[tokio::test]
async fn test_http_error_annotates_placeholder() {
    let mut conductor = Conductor::new(ScriptedBackend::default(), ConductorConfig::default());
    let conv_id = ConversationId::from("C1");
    let stream_id = conductor
        .submit(CommandRequest::new("hello", conv_id.clone()))
        .await
        .unwrap();

    let backend = Arc::clone(conductor.backend());
    push(
        &backend,
        TransportEvent::error(stream_id, "backend returned 500 Internal Server Error"),
    )
    .await;
    run_until_idle(&mut conductor).await;

    assert_eq!(
        placeholder_content(&conductor, &conv_id, stream_id),
        "[Error: backend returned 500 Internal Server Error]"
    );
    let session = conductor.registry().session(stream_id).unwrap();
    assert_eq!(session.state, StreamState::Errored);
    assert_eq!(
        session.error.as_deref(),
        Some("backend returned 500 Internal Server Error")
    );

    // The next command is accepted once the errored stream is done.
    assert!(conductor
        .submit(CommandRequest::new("again", conv_id))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_error_after_content_keeps_partial_answer() {
    let mut conductor = Conductor::new(ScriptedBackend::default(), ConductorConfig::default());
    let conv_id = ConversationId::from("C1");
    let stream_id = conductor
        .submit(CommandRequest::new("hello", conv_id.clone()))
        .await
        .unwrap();

    let backend = Arc::clone(conductor.backend());
    push(&backend, TransportEvent::chunk(stream_id, delta("Partial"))).await;
    push(&backend, TransportEvent::error(stream_id, "connection reset")).await;
    run_until_idle(&mut conductor).await;

    assert_eq!(
        placeholder_content(&conductor, &conv_id, stream_id),
        "Partial\n\n[Error: connection reset]"
    );
}

#[tokio::test]
async fn test_raw_text_chunks_and_malformed_events() {
    let mut conductor = Conductor::new(ScriptedBackend::default(), ConductorConfig::default());
    let conv_id = ConversationId::from("C1");
    let stream_id = conductor
        .submit(CommandRequest::new("hello", conv_id.clone()))
        .await
        .unwrap();

    let backend = Arc::clone(conductor.backend());
    push(&backend, TransportEvent::chunk(stream_id, "plain ")).await;
    push(&backend, TransportEvent::chunk(stream_id, "data: {not json")).await;
    push(&backend, TransportEvent::chunk(stream_id, "text")).await;
    push(&backend, TransportEvent::complete(stream_id)).await;
    run_until_idle(&mut conductor).await;

    assert_eq!(
        placeholder_content(&conductor, &conv_id, stream_id),
        "plain text"
    );
    assert_eq!(
        conductor.registry().state(stream_id),
        Some(StreamState::Completed)
    );
}

#[tokio::test]
async fn test_reasoning_and_tool_calls_accumulate() {
    let mut conductor = Conductor::new(ScriptedBackend::default(), ConductorConfig::default());
    let conv_id = ConversationId::from("C1");
    let stream_id = conductor
        .submit(CommandRequest::new("search", conv_id.clone()))
        .await
        .unwrap();

    let backend = Arc::clone(conductor.backend());
    let reasoning = serde_json::json!({
        "choices": [{ "delta": { "reasoning_content": "thinking" } }]
    });
    let tools = serde_json::json!({
        "choices": [{ "delta": {} }],
        "tool_calls": [{ "name": "web_search" }]
    });
    push(&backend, TransportEvent::chunk(stream_id, format!("data: {reasoning}"))).await;
    push(&backend, TransportEvent::chunk(stream_id, format!("data: {tools}"))).await;
    push(&backend, TransportEvent::chunk(stream_id, delta("Found it"))).await;
    push(&backend, TransportEvent::complete(stream_id)).await;
    run_until_idle(&mut conductor).await;

    let answer = conductor
        .conversation(&conv_id)
        .and_then(|c| c.message(&MessageId::for_stream(stream_id)))
        .unwrap();
    assert_eq!(answer.content(), "Found it");
    assert_eq!(answer.reasoning_content(), "thinking");
    assert_eq!(answer.tool_calls(), &[serde_json::json!({ "name": "web_search" })]);
}

#[tokio::test]
async fn test_transport_closed_without_terminal_event() {
    let mut conductor = Conductor::new(ScriptedBackend::default(), ConductorConfig::default());
    let conv_id = ConversationId::from("C1");
    let stream_id = conductor
        .submit(CommandRequest::new("hello", conv_id.clone()))
        .await
        .unwrap();

    conductor.backend().close(stream_id);
    run_until_idle(&mut conductor).await;

    assert_eq!(
        conductor.registry().state(stream_id),
        Some(StreamState::Errored)
    );
    assert_eq!(
        placeholder_content(&conductor, &conv_id, stream_id),
        "[Error: transport closed unexpectedly]"
    );
}

#[tokio::test]
async fn test_poll_streaming_drains_ready_events() {
    let mut conductor = Conductor::new(ScriptedBackend::default(), ConductorConfig::default());
    let conv_id = ConversationId::from("C1");
    let stream_id = conductor
        .submit(CommandRequest::new("hello", conv_id.clone()))
        .await
        .unwrap();

    assert!(!conductor.poll_streaming());

    let backend = Arc::clone(conductor.backend());
    push(&backend, TransportEvent::chunk(stream_id, delta("Hi"))).await;
    push(&backend, TransportEvent::complete(stream_id)).await;

    assert!(conductor.poll_streaming());
    assert!(!conductor.is_streaming());
    assert_eq!(placeholder_content(&conductor, &conv_id, stream_id), "Hi");
}

#[tokio::test]
async fn test_streams_in_two_conversations_run_one_at_a_time() {
    let mut conductor = Conductor::new(ScriptedBackend::default(), ConductorConfig::default());
    let (_sub, mut rx) = conductor.subscribe(SurfaceType::Headless);
    let first = conductor
        .submit(CommandRequest::new("one", ConversationId::from("C1")))
        .await
        .unwrap();

    conductor
        .handle_event(SurfaceEvent::Submit {
            event_id: SurfaceEvent::new_event_id(),
            request: CommandRequest::new("two", ConversationId::from("C2")),
        })
        .await
        .unwrap();
    assert!(conductor.conversation(&ConversationId::from("C2")).is_none());
    assert!(drain(&mut rx).iter().any(|m| matches!(
        m,
        ConductorMessage::Notify { message, .. } if message.contains(&first.to_string())
    )));

    let backend = Arc::clone(conductor.backend());
    push(&backend, TransportEvent::complete(first)).await;
    run_until_idle(&mut conductor).await;

    let second = conductor
        .submit(CommandRequest::new("two", ConversationId::from("C2")))
        .await
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(conductor.registry().total_started(), 2);
}

#[tokio::test]
async fn test_open_conversation_returns_projection() {
    let mut conductor = Conductor::new(ScriptedBackend::default(), ConductorConfig::default());
    let conv_id = ConversationId::from("C1");
    let stream_id = conductor
        .submit(CommandRequest::new("hello", conv_id.clone()))
        .await
        .unwrap();
    let backend = Arc::clone(conductor.backend());
    push(&backend, TransportEvent::chunk(stream_id, delta("Hi"))).await;
    push(&backend, TransportEvent::complete(stream_id)).await;
    run_until_idle(&mut conductor).await;

    let (_sub, mut rx) = conductor.subscribe(SurfaceType::Headless);
    conductor
        .handle_event(SurfaceEvent::OpenConversation {
            event_id: SurfaceEvent::new_event_id(),
            conversation_id: Some(conv_id.clone()),
        })
        .await
        .unwrap();

    let snapshot = drain(&mut rx).into_iter().find_map(|m| match m {
        ConductorMessage::Conversation {
            conversation_id,
            messages,
        } => Some((conversation_id, messages)),
        _ => None,
    });
    let (id, messages) = snapshot.unwrap();
    assert_eq!(id, conv_id);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content(), "Hi");
}

#[tokio::test]
async fn test_shutdown_interrupts_active_stream() {
    let mut conductor = Conductor::new(ScriptedBackend::default(), ConductorConfig::default());
    let (_sub, mut rx) = conductor.subscribe(SurfaceType::Headless);
    let stream_id = conductor
        .submit(CommandRequest::new("hello", ConversationId::from("C1")))
        .await
        .unwrap();

    conductor.shutdown().await.unwrap();

    assert_eq!(
        conductor.registry().state(stream_id),
        Some(StreamState::Interrupted)
    );
    assert_eq!(conductor.state(), ConductorState::ShuttingDown);
    assert!(matches!(
        drain(&mut rx).last(),
        Some(ConductorMessage::Quit { .. })
    ));
}

#[tokio::test]
async fn test_stalled_surface_does_not_block_stream_or_interrupt() {
    let mut conductor = Conductor::new(ScriptedBackend::default(), ConductorConfig::default());
    let (stalled, _stalled_rx) = conductor.subscribe(SurfaceType::Headless);
    let (_live, mut live_rx) = conductor.subscribe(SurfaceType::Cli);
    let conv_id = ConversationId::from("C1");
    let stream_id = conductor
        .submit(CommandRequest::new("hello", conv_id.clone()))
        .await
        .unwrap();

    for _ in 0..400 {
        assert!(conductor.handle_transport_event(TransportEvent::chunk(stream_id, delta("x"))));
        drain(&mut live_rx);
    }

    assert!(!conductor.surfaces().contains(&stalled.id()));
    assert_eq!(conductor.surfaces().count(), 1);

    assert_eq!(conductor.interrupt(), Some(stream_id));
    assert_eq!(
        placeholder_content(&conductor, &conv_id, stream_id),
        format!("{}\n\n[Interrupted by user]", "x".repeat(400))
    );
    assert!(drain(&mut live_rx).iter().any(
        |m| matches!(m, ConductorMessage::StreamInterrupted { stream_id: id } if *id == stream_id)
    ));
}
