//! Backend Integration
//!
//! Access to the `npc serve` inference server through the [`StudioBackend`]
//! trait, plus the body pump that cuts a streamed HTTP response into raw
//! chunks.
//!
//! # Usage
//!
//! ```ignore
//! use studio_core::backend::{NpcServeBackend, StudioBackend, StreamRequest, CommandRequest};
//!
//! let backend = NpcServeBackend::new("http://127.0.0.1:5337")?;
//! let request = StreamRequest { stream_id, command: CommandRequest::new("hello", conv_id) };
//! let mut rx = backend.send_streaming(&request).await?;
//! ```

mod npc_serve;
pub mod stream;
mod traits;

pub use npc_serve::NpcServeBackend;
pub use stream::{pump, ChunkFramer};
pub use traits::{
    CommandRequest, ConversationSummary, ExecuteResponse, ModelInfo, NpcInfo, NpcScope,
    StreamRequest, StudioBackend, TransportEvent, TransportEventKind,
};
