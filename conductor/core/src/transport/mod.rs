//! Transport Layer for Conductor-Surface IPC
//!
//! Surfaces running in another process reach the Conductor over a local
//! Unix socket. Every message in either direction is one frame (see
//! [`frame`]): `SurfaceEvent`s travel up, `ConductorMessage`s travel down.
//!
//! # Security
//!
//! - The daemon checks the peer UID with `SO_PEERCRED`
//! - The socket file is created with 0600 permissions
//! - No network exposure

pub mod frame;

use std::path::PathBuf;

use thiserror::Error;

pub use frame::{encode, read_frame, write_frame, FrameDecoder, MAX_FRAME_SIZE};

/// Socket file name inside the runtime directory
const SOCKET_FILE: &str = "studio.sock";

/// Errors that can occur during transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// Peer closed the connection
    #[error("Connection closed")]
    ConnectionClosed,

    /// Frame length is above [`MAX_FRAME_SIZE`]
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared or encoded payload size
        size: usize,
        /// Allowed maximum
        max: usize,
    },

    /// Frame checksum mismatch - data corruption detected
    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum carried in the header
        expected: u32,
        /// Checksum computed over the payload
        actual: u32,
    },

    /// Payload is not valid JSON for the expected type
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error from the underlying stream
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default socket location
///
/// `$XDG_RUNTIME_DIR/npc-studio/studio.sock`, falling back to a per-user
/// directory under the system temp dir.
#[must_use]
pub fn default_socket_path() -> PathBuf {
    let base = dirs::runtime_dir().unwrap_or_else(|| {
        let user = std::env::var("USER").unwrap_or_else(|_| "default".to_string());
        std::env::temp_dir().join(format!("npc-studio-{user}"))
    });
    base.join("npc-studio").join(SOCKET_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_socket_path_file_name() {
        let path = default_socket_path();
        assert!(path.ends_with("npc-studio/studio.sock"));
    }

    #[test]
    fn test_error_display() {
        let err = TransportError::ChecksumMismatch {
            expected: 0xdead_beef,
            actual: 1,
        };
        assert_eq!(
            err.to_string(),
            "Checksum mismatch: expected 0xdeadbeef, got 0x00000001"
        );
    }
}
