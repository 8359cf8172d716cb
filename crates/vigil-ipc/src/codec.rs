// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Wire framing and primitive encoding.
//!
//! # Wire Format
//!
//! All integers are little-endian.
//!
//! ```text
//! +-----------------+-----------------+----------------------+
//! | length: u32     | message_id: u32 | payload              |
//! +-----------------+-----------------+----------------------+
//!   length = 4 + payload length
//!
//! string  := u32 byte_len | UTF-8 bytes
//! opt<T>  := u8 presence (0|1) [T]
//! list<T> := u32 count | T * count
//! ```
//!
//! A clean EOF before the first header byte is a normal close; an EOF
//! anywhere else is truncation.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{IpcError, IpcResult};

/// Default maximum frame size (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const HEADER_LEN: usize = 4;
const ID_LEN: usize = 4;

// =============================================================================
// Frame
// =============================================================================

/// One message on the wire: an id and its encoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message id.
    pub message_id: u32,
    /// Encoded payload.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a frame.
    pub fn new(message_id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            message_id,
            payload: payload.into(),
        }
    }

    /// Value of the length prefix: message id plus payload.
    pub fn wire_len(&self) -> usize {
        ID_LEN + self.payload.len()
    }

    /// Fails with `FrameTooLarge` if a peer reading with `max_frame_size`
    /// would reject this frame.
    pub fn ensure_within(&self, max_frame_size: usize) -> IpcResult<()> {
        let size = self.wire_len();
        if size > max_frame_size || u32::try_from(size).is_err() {
            return Err(IpcError::FrameTooLarge {
                size,
                max: max_frame_size,
            });
        }
        Ok(())
    }

    /// Encodes the frame with its length prefix.
    ///
    /// # Errors
    ///
    /// `FrameTooLarge` if the length does not fit the `u32` prefix.
    pub fn to_bytes(&self) -> IpcResult<Bytes> {
        let size = self.wire_len();
        let length = u32::try_from(size).map_err(|_| IpcError::FrameTooLarge {
            size,
            max: u32::MAX as usize,
        })?;
        let mut buf = BytesMut::with_capacity(HEADER_LEN + size);
        buf.put_u32_le(length);
        buf.put_u32_le(self.message_id);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }
}

/// Reads one frame.
///
/// Returns `Ok(None)` on a clean EOF before any header byte.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> IpcResult<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(IpcError::truncated(format!(
                "stream ended after {} of {} length bytes",
                filled, HEADER_LEN
            )));
        }
        filled += n;
    }

    let length = u32::from_le_bytes(header) as usize;
    if length < ID_LEN {
        return Err(IpcError::malformed(0, format!("frame length {} is shorter than the message id", length)));
    }
    if length > max_frame_size {
        return Err(IpcError::FrameTooLarge {
            size: length,
            max: max_frame_size,
        });
    }

    let mut body = vec![0u8; length];
    if let Err(e) = reader.read_exact(&mut body).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(IpcError::truncated(format!("stream ended inside a {} byte frame", length)));
        }
        return Err(e.into());
    }

    let mut body = Bytes::from(body);
    let message_id = body.get_u32_le();
    trace!(message_id, length, "Frame read");
    Ok(Some(Frame {
        message_id,
        payload: body,
    }))
}

/// Writes one frame and flushes.
///
/// Nothing is written if the frame cannot be length-prefixed.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> IpcResult<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = frame.to_bytes()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    trace!(message_id = frame.message_id, length = frame.wire_len(), "Frame written");
    Ok(())
}

// =============================================================================
// Encoder
// =============================================================================

/// Appends primitives to a payload buffer.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a `u8`.
    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    /// Writes a `bool` as a `u8`.
    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.u8(u8::from(value))
    }

    /// Writes a `u32`.
    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32_le(value);
        self
    }

    /// Writes an `i32`.
    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32_le(value);
        self
    }

    /// Writes a `u64`.
    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64_le(value);
        self
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn string(&mut self, value: &str) -> &mut Self {
        // Oversized values are caught by the frame size check before sending.
        self.buf.put_u32_le(u32::try_from(value.len()).unwrap_or(u32::MAX));
        self.buf.put_slice(value.as_bytes());
        self
    }

    /// Writes an optional string.
    pub fn opt_string(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            Some(s) => self.u8(1).string(s),
            None => self.u8(0),
        }
    }

    /// Writes a counted list, encoding each item with `item`.
    pub fn list<T>(&mut self, items: &[T], mut item: impl FnMut(&mut Self, &T)) -> &mut Self {
        self.buf.put_u32_le(u32::try_from(items.len()).unwrap_or(u32::MAX));
        for value in items {
            item(self, value);
        }
        self
    }

    /// Returns the encoded payload.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

// =============================================================================
// Decoder
// =============================================================================

/// Reads primitives from a payload, failing on short input.
#[derive(Debug)]
pub struct Decoder {
    message_id: u32,
    buf: Bytes,
}

impl Decoder {
    /// Creates a decoder over a frame's payload.
    pub fn new(message_id: u32, payload: Bytes) -> Self {
        Self {
            message_id,
            buf: payload,
        }
    }

    fn need(&self, n: usize, what: &str) -> IpcResult<()> {
        if self.buf.remaining() < n {
            return Err(IpcError::malformed(
                self.message_id,
                format!("{} needs {} bytes, {} remain", what, n, self.buf.remaining()),
            ));
        }
        Ok(())
    }

    /// Reads a `u8`.
    pub fn u8(&mut self) -> IpcResult<u8> {
        self.need(1, "u8")?;
        Ok(self.buf.get_u8())
    }

    /// Reads a `bool`; only 0 and 1 are valid.
    pub fn bool(&mut self) -> IpcResult<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(IpcError::malformed(self.message_id, format!("invalid bool byte {}", other))),
        }
    }

    /// Reads a `u32`.
    pub fn u32(&mut self) -> IpcResult<u32> {
        self.need(4, "u32")?;
        Ok(self.buf.get_u32_le())
    }

    /// Reads an `i32`.
    pub fn i32(&mut self) -> IpcResult<i32> {
        self.need(4, "i32")?;
        Ok(self.buf.get_i32_le())
    }

    /// Reads a `u64`.
    pub fn u64(&mut self) -> IpcResult<u64> {
        self.need(8, "u64")?;
        Ok(self.buf.get_u64_le())
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn string(&mut self) -> IpcResult<String> {
        let len = self.u32()? as usize;
        self.need(len, "string")?;
        let bytes = self.buf.split_to(len);
        String::from_utf8(bytes.to_vec())
            .map_err(|e| IpcError::malformed(self.message_id, format!("invalid UTF-8: {}", e)))
    }

    /// Reads an optional string.
    pub fn opt_string(&mut self) -> IpcResult<Option<String>> {
        if self.bool()? {
            Ok(Some(self.string()?))
        } else {
            Ok(None)
        }
    }

    /// Reads a counted list, decoding each item with `item`.
    pub fn list<T>(&mut self, mut item: impl FnMut(&mut Self) -> IpcResult<T>) -> IpcResult<Vec<T>> {
        let count = self.u32()? as usize;
        // Every item takes at least one byte, so a count beyond the remaining
        // input is malformed rather than a reason to allocate.
        if count > self.buf.remaining() {
            return Err(IpcError::malformed(
                self.message_id,
                format!("list of {} items exceeds the {} remaining bytes", count, self.buf.remaining()),
            ));
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(item(self)?);
        }
        Ok(items)
    }

    /// Fails if any payload bytes are left unread.
    pub fn finish(self) -> IpcResult<()> {
        if self.buf.has_remaining() {
            return Err(IpcError::malformed(
                self.message_id,
                format!("{} trailing bytes", self.buf.remaining()),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
