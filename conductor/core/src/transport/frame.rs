//! Frame Protocol
//!
//! Length-prefixed JSON with a CRC32 checksum.
//!
//! ```text
//! +----------------+----------------+------------------------------------+
//! | Length (4)     | Checksum (4)   | JSON payload                       |
//! | big-endian u32 | CRC32, BE      | SurfaceEvent or ConductorMessage   |
//! +----------------+----------------+------------------------------------+
//! ```
//!
//! Length covers the payload only. The length is checked against
//! [`MAX_FRAME_SIZE`] before any buffer is allocated.

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::TransportError;

/// Maximum payload size (10 MB)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Length + checksum
const HEADER_SIZE: usize = 8;

fn split_header(header: [u8; HEADER_SIZE]) -> (usize, u32) {
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let checksum = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    (len, checksum)
}

fn verify(payload: &[u8], expected: u32) -> Result<(), TransportError> {
    let actual = crc32fast::hash(payload);
    if actual == expected {
        Ok(())
    } else {
        Err(TransportError::ChecksumMismatch { expected, actual })
    }
}

/// Encode a message into one frame
///
/// # Errors
///
/// Fails if the message does not serialize or the payload is larger than
/// [`MAX_FRAME_SIZE`].
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, TransportError> {
    let json = serde_json::to_vec(msg)?;
    let len = u32::try_from(json.len())
        .ok()
        .filter(|_| json.len() <= MAX_FRAME_SIZE)
        .ok_or(TransportError::FrameTooLarge {
            size: json.len(),
            max: MAX_FRAME_SIZE,
        })?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&crc32fast::hash(&json).to_be_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

/// Incremental decoder for bytes that arrive in arbitrary pieces
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet decoded
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next complete frame
    ///
    /// Returns `Ok(None)` while the frame is still incomplete. A failed frame
    /// is consumed so the next call starts at the following frame; an
    /// oversized length clears the buffer since the stream can no longer be
    /// trusted.
    ///
    /// # Errors
    ///
    /// Oversized length, checksum mismatch, or a payload that is not the
    /// expected type.
    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        let Some(header) = self.buffer.get(..HEADER_SIZE) else {
            return Ok(None);
        };
        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(header);
        let (len, checksum) = split_header(raw);

        if len > MAX_FRAME_SIZE {
            self.buffer.clear();
            return Err(TransportError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }
        if self.buffer.len() < HEADER_SIZE + len {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buffer.drain(..HEADER_SIZE + len).collect();
        let payload = &frame[HEADER_SIZE..];
        verify(payload, checksum)?;
        Ok(Some(serde_json::from_slice(payload)?))
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Write one frame and flush
///
/// # Errors
///
/// Encoding failures and IO errors.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read exactly one frame
///
/// A clean end of stream before the header is reported as
/// [`TransportError::ConnectionClosed`].
///
/// # Errors
///
/// IO errors, oversized length, checksum mismatch, or a bad payload.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, TransportError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(TransportError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let (len, checksum) = split_header(header);
    if len > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    verify(&payload, checksum)?;
    Ok(serde_json::from_slice(&payload)?)
}
