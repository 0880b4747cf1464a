//! Studio Core - Streamed Command Execution for npc-studio
//!
//! This crate holds the part of npc-studio that turns a command into a
//! streamed assistant answer: it opens the HTTP stream to `npc serve`,
//! decodes the chunks, folds them into the conversation and lets the user
//! stop a stream halfway. It has no UI dependencies; surfaces talk to it
//! through `SurfaceEvent`s and render the `ConductorMessage`s it sends back.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        UI Surfaces                              │
//! │   ┌──────────────┐   ┌────────────────┐   ┌─────────────────┐   │
//! │   │  chat line   │   │ socket client  │   │    headless     │   │
//! │   └──────┬───────┘   └───────┬────────┘   └────────┬────────┘   │
//! │          └───────────────────┼─────────────────────┘            │
//! │                  SurfaceEvent (up) / ConductorMessage (down)    │
//! └──────────────────────────────┼──────────────────────────────────┘
//!                                │
//! ┌──────────────────────────────┼──────────────────────────────────┐
//! │                         STUDIO CORE                             │
//! │  ┌───────────────────────────┴───────────────────────────────┐  │
//! │  │                        Conductor                          │  │
//! │  │  ┌──────────┐  ┌──────────┐  ┌────────────┐  ┌─────────┐  │  │
//! │  │  │ Stream   │  │  Chunk   │  │Conversation│  │Interrupt│  │  │
//! │  │  │ Registry │  │  Parser  │  │ Projection │  │  Ctrl   │  │  │
//! │  │  └──────────┘  └──────────┘  └────────────┘  └─────────┘  │  │
//! │  └───────────────────────────┬───────────────────────────────┘  │
//! │                              │ StudioBackend                    │
//! │                    ┌─────────▼─────────┐                        │
//! │                    │  NpcServeBackend  │  POST /api/stream      │
//! │                    └───────────────────┘                        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use studio_core::{
//!     backend::{CommandRequest, NpcServeBackend},
//!     events::SurfaceType,
//!     Conductor, ConductorConfig, ConversationId,
//! };
//!
//! let backend = NpcServeBackend::new("http://127.0.0.1:5337")?;
//! let mut conductor = Conductor::new(backend, ConductorConfig::default());
//! let (_subscription, mut rx) = conductor.subscribe(SurfaceType::Headless);
//! conductor.start().await?;
//!
//! conductor
//!     .submit(CommandRequest::new("hello", ConversationId::new()))
//!     .await?;
//!
//! loop {
//!     tokio::select! {
//!         wake = conductor.next_wake() => conductor.handle_wake(wake),
//!         Some(msg) = rx.recv() => { /* render */ }
//!     }
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: `StudioBackend` trait and the `npc serve` HTTP client
//! - [`conductor`]: Main Conductor struct
//! - [`config`]: Layered configuration (defaults, TOML, environment, CLI)
//! - [`conversation`]: Messages and the local conversation projection
//! - [`events`]: Events from UI surfaces to Conductor
//! - [`messages`]: Messages from Conductor to UI surfaces, identifiers
//! - [`streaming`]: Registry, chunk parser, projection, interrupt controller
//! - [`surface_registry`]: Fan-out to connected surfaces
//! - [`transport`]: Framing for the daemon's Unix socket

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod conductor;
pub mod config;
pub mod conversation;
pub mod events;
pub mod messages;
pub mod streaming;
pub mod surface_registry;
pub mod transport;

// Re-exports for convenience
pub use backend::{
    CommandRequest, NpcServeBackend, StreamRequest, StudioBackend, TransportEvent,
    TransportEventKind,
};
pub use conductor::{Conductor, ConductorConfig, StreamWake};
pub use conversation::{Attachment, Conversation, ConversationStore, Message};
pub use events::{SurfaceEvent, SurfaceType};
pub use messages::{
    ConductorMessage, ConductorState, ConversationId, EventId, MessageId, MessageRole,
    NotifyLevel, StreamId,
};

// Streaming exports
pub use streaming::{
    parse_chunk, ConflictError, Increment, InterruptController, InterruptOutcome, ProtocolError,
    RawChunk, StreamRegistry, StreamState, Termination,
};

// Surface registry exports
pub use surface_registry::{BroadcastResult, ConnectionId, Subscription, SurfaceRegistry};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, StudioConfig, StudioToml,
};

// Transport exports
pub use transport::{default_socket_path, TransportError};
