//! Streamed Command Execution
//!
//! Everything between "the backend produced some bytes" and "the assistant
//! message in the conversation grew", plus the rules that keep a cancelled or
//! stale stream from writing anything.
//!
//! # Architecture
//!
//! ```text
//!   backend::StudioBackend::send_streaming
//!          │  TransportEvent { stream_id, Chunk | Complete | Error }
//!          ▼
//!   ┌──────────────┐   is_current(stream_id)?   no ──► drop
//!   │   registry   │───────────────────────────────────────────┐
//!   └──────┬───────┘                                           │
//!          │ yes                                               │
//!          ▼                                                   │
//!   ┌──────────────┐   Sentinel / empty / malformed ──► drop   │
//!   │    parser    │                                           │
//!   └──────┬───────┘                                           │
//!          │ Increment                                         │
//!          ▼                                                   │
//!   ┌──────────────┐                                           │
//!   │  projection  │ append to placeholder MessageId(stream)   │
//!   └──────────────┘                                           │
//!                                                              │
//!   interrupt ─► registry.interrupt + projection.seal ─────────┘
//!              └► spawn backend.interrupt (best effort)
//! ```
//!
//! At most one stream is active across all conversations.

pub mod interrupt;
pub mod parser;
pub mod projection;
pub mod registry;

pub use interrupt::{InterruptController, InterruptOutcome, InterruptTicket};
pub use parser::{parse_chunk, DecodeError, DecodedChunk, Increment, RawChunk};
pub use projection::{ProtocolError, Termination};
pub use registry::{ConflictError, RegistryConfig, StreamRegistry, StreamSession, StreamState};
