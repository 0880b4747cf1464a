//! Line Surface
//!
//! An in-process surface for the terminal: `chat` reads commands from stdin
//! and `ask` runs a single one. Both render the conductor's broadcasts the
//! same way:
//!
//! - content increments go to stdout as they arrive
//! - notices, annotations and system notes go to stderr
//!
//! Ctrl-C interrupts the stream in flight. While idle, Ctrl-C leaves `chat`.

use std::io::{self, Write};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;

use studio_core::{
    CommandRequest, Conductor, ConductorMessage, ConversationId, MessageRole, NotifyLevel,
    StudioBackend, Subscription, SurfaceType,
};

/// What a line typed at the prompt means
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatInput {
    /// Blank line
    Empty,
    /// Command to stream
    Submit(String),
    /// `/quit`
    Quit,
    /// `/new`: start a fresh conversation
    NewConversation,
    /// `/model <name>`
    Model(String),
    /// `/npc <name>`
    Npc(String),
    /// `/help`
    Help,
    /// A slash command we do not know, or one missing its argument
    Invalid(String),
}

impl ChatInput {
    /// Parse one input line
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }

        let (head, arg) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };
        match (head, arg) {
            ("/quit" | "/exit", _) => Self::Quit,
            ("/new", _) => Self::NewConversation,
            ("/help", _) => Self::Help,
            ("/model", name) if !name.is_empty() => Self::Model(name.to_string()),
            ("/npc", name) if !name.is_empty() => Self::Npc(name.to_string()),
            ("/model" | "/npc", _) => Self::Invalid(format!("{head} needs a name")),
            _ => Self::Submit(line.to_string()),
        }
    }
}

const HELP: &str = "\
/new            start a new conversation
/model <name>   use another model
/npc <name>     talk to another NPC
/quit           leave (Ctrl-D works too)
Ctrl-C stops the answer being streamed.";

/// How a rendered stream ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    /// Completed normally
    Completed,
    /// Failed with this error
    Errored(String),
    /// Stopped by the user
    Interrupted,
}

/// Writes conductor broadcasts to an output and an error stream
pub struct Renderer<O: Write, E: Write> {
    out: O,
    err: E,
    mid_line: bool,
}

impl Renderer<io::Stdout, io::Stderr> {
    /// Render to the process's stdout and stderr
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }
}

impl<O: Write, E: Write> Renderer<O, E> {
    /// Render to the given writers
    pub fn new(out: O, err: E) -> Self {
        Self {
            out,
            err,
            mid_line: false,
        }
    }

    fn end_line(&mut self) -> io::Result<()> {
        if self.mid_line {
            writeln!(self.out)?;
            self.out.flush()?;
            self.mid_line = false;
        }
        Ok(())
    }

    /// Render one message; returns how the stream ended if this message ends it
    ///
    /// # Errors
    ///
    /// Write failures.
    pub fn render(&mut self, msg: &ConductorMessage) -> io::Result<Option<StreamEnd>> {
        match msg {
            ConductorMessage::StreamChunk {
                content: Some(text),
                ..
            } => {
                write!(self.out, "{text}")?;
                self.out.flush()?;
                self.mid_line = !text.ends_with('\n');
            }
            ConductorMessage::StreamComplete { .. } => {
                self.end_line()?;
                return Ok(Some(StreamEnd::Completed));
            }
            ConductorMessage::StreamError { error, .. } => {
                self.end_line()?;
                writeln!(self.err, "[Error: {error}]")?;
                return Ok(Some(StreamEnd::Errored(error.clone())));
            }
            ConductorMessage::StreamInterrupted { .. } => {
                self.end_line()?;
                writeln!(self.err, "[Interrupted by user]")?;
                return Ok(Some(StreamEnd::Interrupted));
            }
            ConductorMessage::Message { message, .. } if message.role() == MessageRole::System => {
                self.end_line()?;
                writeln!(self.err, "{}", message.content())?;
            }
            ConductorMessage::Notify { level, message, .. } => match level {
                // Stream errors are already shown through StreamError.
                NotifyLevel::Error => {}
                NotifyLevel::Warning => writeln!(self.err, "warning: {message}")?,
                NotifyLevel::Info | NotifyLevel::Success => writeln!(self.err, "{message}")?,
            },
            ConductorMessage::ExecuteResult { output, error, .. } => match error {
                Some(error) => writeln!(self.err, "error: {error}")?,
                None => writeln!(self.out, "{output}")?,
            },
            _ => {}
        }
        Ok(None)
    }
}

/// An in-process surface bound to one conductor
pub struct LineSurface<B: StudioBackend + 'static> {
    conductor: Conductor<B>,
    rx: mpsc::Receiver<ConductorMessage>,
    _subscription: Subscription,
    conversation_id: ConversationId,
    model: Option<String>,
    npc: Option<String>,
}

impl<B: StudioBackend + 'static> LineSurface<B> {
    /// Subscribe to `conductor` as a terminal surface
    pub fn new(conductor: Conductor<B>, conversation_id: Option<ConversationId>) -> Self {
        let (subscription, rx) = conductor.subscribe(SurfaceType::Cli);
        Self {
            conductor,
            rx,
            _subscription: subscription,
            conversation_id: conversation_id.unwrap_or_default(),
            model: None,
            npc: None,
        }
    }

    fn request(&self, command: String) -> CommandRequest {
        let mut request = CommandRequest::new(command, self.conversation_id.clone());
        request.model.clone_from(&self.model);
        request.npc.clone_from(&self.npc);
        request
    }

    /// Print everything already queued for this surface
    fn flush_rendered<O: Write, E: Write>(
        &mut self,
        renderer: &mut Renderer<O, E>,
    ) -> io::Result<Option<StreamEnd>> {
        let mut end = None;
        while let Ok(msg) = self.rx.try_recv() {
            end = renderer.render(&msg)?.or(end);
        }
        Ok(end)
    }

    /// Stream one command to completion
    ///
    /// # Errors
    ///
    /// Conductor start failure, a conflicting stream, or write failures.
    pub async fn ask(&mut self, command: String) -> anyhow::Result<StreamEnd> {
        let mut renderer = Renderer::stdio();
        self.conductor.start().await?;
        self.flush_rendered(&mut renderer)?;

        let request = self.request(command);
        self.conductor.submit(request).await?;
        loop {
            if let Some(end) = self.flush_rendered(&mut renderer)? {
                return Ok(end);
            }
            tokio::select! {
                Some(msg) = self.rx.recv() => {
                    if let Some(end) = renderer.render(&msg)? {
                        return Ok(end);
                    }
                }
                wake = self.conductor.next_wake() => self.conductor.handle_wake(wake),
                _ = tokio::signal::ctrl_c() => {
                    self.conductor.interrupt();
                }
            }
        }
    }

    /// Run the interactive loop until `/quit`, end of input, or an idle Ctrl-C
    ///
    /// # Errors
    ///
    /// Conductor start failure or write failures.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut renderer = Renderer::stdio();
        self.conductor.start().await?;
        self.flush_rendered(&mut renderer)?;
        eprintln!(
            "conversation {} (type /help for commands)",
            self.conversation_id
        );

        let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
        let mut prompt = true;

        loop {
            self.flush_rendered(&mut renderer)?;
            let streaming = self.conductor.is_streaming();
            if prompt && !streaming {
                print!("> ");
                io::stdout().flush()?;
                prompt = false;
            }

            tokio::select! {
                line = lines.next(), if !streaming => {
                    let Some(line) = line else {
                        println!();
                        break;
                    };
                    prompt = true;
                    if !self.handle_input(ChatInput::parse(&line?)).await {
                        break;
                    }
                }
                Some(msg) = self.rx.recv() => {
                    if renderer.render(&msg)?.is_some() {
                        prompt = true;
                    }
                }
                wake = self.conductor.next_wake() => self.conductor.handle_wake(wake),
                _ = tokio::signal::ctrl_c() => {
                    if self.conductor.interrupt().is_none() {
                        println!();
                        break;
                    }
                }
            }
        }

        self.conductor.shutdown().await?;
        Ok(())
    }

    /// Act on one input line; returns `false` to leave the loop
    async fn handle_input(&mut self, input: ChatInput) -> bool {
        match input {
            ChatInput::Empty => {}
            ChatInput::Quit => return false,
            ChatInput::Help => eprintln!("{HELP}"),
            ChatInput::Invalid(reason) => eprintln!("{reason}"),
            ChatInput::NewConversation => {
                self.conversation_id = ConversationId::new();
                eprintln!("conversation {}", self.conversation_id);
            }
            ChatInput::Model(model) => {
                eprintln!("model: {model}");
                self.model = Some(model);
            }
            ChatInput::Npc(npc) => {
                eprintln!("npc: {npc}");
                self.npc = Some(npc);
            }
            ChatInput::Submit(command) => {
                let request = self.request(command);
                if let Err(conflict) = self.conductor.submit(request).await {
                    eprintln!("{conflict}");
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use studio_core::{Message, StreamId};

    #[test]
    fn test_parse_input() {
        assert_eq!(ChatInput::parse("   "), ChatInput::Empty);
        assert_eq!(ChatInput::parse("/quit"), ChatInput::Quit);
        assert_eq!(ChatInput::parse("/new"), ChatInput::NewConversation);
        assert_eq!(
            ChatInput::parse("/model  qwen2.5 "),
            ChatInput::Model("qwen2.5".into())
        );
        assert_eq!(ChatInput::parse("/npc corca"), ChatInput::Npc("corca".into()));
        assert!(matches!(ChatInput::parse("/npc"), ChatInput::Invalid(_)));
        assert_eq!(
            ChatInput::parse("what is /tmp?"),
            ChatInput::Submit("what is /tmp?".into())
        );
    }

    fn render_all(messages: &[ConductorMessage]) -> (String, String, Option<StreamEnd>) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut end = None;
        {
            let mut renderer = Renderer::new(&mut out, &mut err);
            for msg in messages {
                end = renderer.render(msg).unwrap().or(end);
            }
        }
        (
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
            end,
        )
    }

    fn chunk(stream_id: StreamId, text: &str) -> ConductorMessage {
        ConductorMessage::StreamChunk {
            stream_id,
            content: Some(text.into()),
            reasoning_content: None,
            tool_calls: Vec::new(),
        }
    }

    #[test]
    fn test_render_completed_stream() {
        let id = StreamId::new();
        let (out, err, end) = render_all(&[
            chunk(id, "Hi"),
            chunk(id, " there"),
            ConductorMessage::StreamComplete { stream_id: id },
        ]);
        assert_eq!(out, "Hi there\n");
        assert_eq!(err, "");
        assert_eq!(end, Some(StreamEnd::Completed));
    }

    #[test]
    fn test_render_interrupt_and_system_note() {
        let id = StreamId::new();
        let (out, err, end) = render_all(&[
            chunk(id, "Once"),
            ConductorMessage::StreamInterrupted { stream_id: id },
            ConductorMessage::Message {
                conversation_id: ConversationId::from("C1"),
                message: Message::system("Backend did not confirm the interrupt: timeout"),
            },
        ]);
        assert_eq!(out, "Once\n");
        assert_eq!(
            err,
            "[Interrupted by user]\nBackend did not confirm the interrupt: timeout\n"
        );
        assert_eq!(end, Some(StreamEnd::Interrupted));
    }

    #[test]
    fn test_render_error_skips_duplicate_notify() {
        let id = StreamId::new();
        let (_, err, end) = render_all(&[
            ConductorMessage::StreamError {
                stream_id: id,
                error: "backend returned 500 Internal Server Error".into(),
            },
            ConductorMessage::Notify {
                level: NotifyLevel::Error,
                title: None,
                message: "backend returned 500 Internal Server Error".into(),
            },
        ]);
        assert_eq!(err, "[Error: backend returned 500 Internal Server Error]\n");
        assert_eq!(
            end,
            Some(StreamEnd::Errored(
                "backend returned 500 Internal Server Error".into()
            ))
        );
    }
}
