//! Tagged, length-prefixed frames.
//!
//! ```text
//! +-----+--------+--------+--------+--------+----...----+
//! | tag | length (u32 big-endian)           | payload   |
//! +-----+--------+--------+--------+--------+----...----+
//! ```

use crate::config::SessionConfig;
use crate::constants::{
    BUFFER_MAX_SIZE, DATA_MAX_SIZE, FRAME_HEADER_LEN, TAG_BYTES, TAG_HEARTBEAT, TAG_PACK, TAG_TEXT,
};
use crate::{ProtocolError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameTag {
    Heartbeat = TAG_HEARTBEAT,
    Bytes = TAG_BYTES,
    Text = TAG_TEXT,
    Pack = TAG_PACK,
}

impl FrameTag {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for FrameTag {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            TAG_HEARTBEAT => Ok(FrameTag::Heartbeat),
            TAG_BYTES => Ok(FrameTag::Bytes),
            TAG_TEXT => Ok(FrameTag::Text),
            TAG_PACK => Ok(FrameTag::Pack),
            other => Err(ProtocolError::UnknownFrameTag(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: FrameTag,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(tag: FrameTag, payload: impl Into<Bytes>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }

    pub fn heartbeat() -> Self {
        Self::new(FrameTag::Heartbeat, Bytes::new())
    }

    /// Bytes this frame occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }
}

/// Appends one frame to `dst`.
///
/// A payload over `max_size` is a caller error and leaves `dst` untouched.
pub fn encode_into(tag: FrameTag, payload: &[u8], max_size: usize, dst: &mut BytesMut) -> Result<()> {
    if payload.len() > max_size {
        return Err(ProtocolError::FrameTooLarge(payload.len(), max_size));
    }

    trace!("Encoding {:?} frame of {} bytes", tag, payload.len());

    dst.reserve(FRAME_HEADER_LEN + payload.len());
    dst.put_u8(tag.as_byte());
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);

    Ok(())
}

/// Encodes one frame into a fresh buffer.
pub fn encode(tag: FrameTag, payload: &[u8], max_size: usize) -> Result<Bytes> {
    let mut dst = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    encode_into(tag, payload, max_size, &mut dst)?;
    Ok(dst.freeze())
}

/// Takes one complete frame off the front of `src`.
///
/// Returns `Ok(None)` while the frame is still incomplete; nothing is
/// consumed in that case.
pub fn decode(src: &mut BytesMut, max_size: usize, max_buffer: u64) -> Result<Option<Frame>> {
    if src.len() as u64 > max_buffer {
        warn!("Receive buffer overflow: {} bytes (max: {})", src.len(), max_buffer);
        return Err(ProtocolError::BufferOverflow(src.len() as u64, max_buffer));
    }

    // The tag is validated before the length so a foreign stream fails fast.
    let Some(&tag_byte) = src.first() else {
        return Ok(None);
    };
    let tag = FrameTag::try_from(tag_byte).map_err(|e| {
        warn!("Received frame with unknown tag {:#04x}", tag_byte);
        e
    })?;

    if src.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }

    let length = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;

    if length > max_size {
        warn!("Received oversized frame: {} bytes (max: {})", length, max_size);
        return Err(ProtocolError::FrameTooLarge(length, max_size));
    }

    let frame_size = FRAME_HEADER_LEN + length;
    if src.len() < frame_size {
        src.reserve(frame_size - src.len());
        return Ok(None);
    }

    src.advance(FRAME_HEADER_LEN);
    let payload = src.split_to(length).freeze();

    debug!("Decoded {:?} frame of {} bytes", tag, length);

    Ok(Some(Frame { tag, payload }))
}

/// Codec for use with `tokio_util::codec::{FramedRead, FramedWrite}`
/// or a hand-driven read loop.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
    max_buffer_size: u64,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize, max_buffer_size: u64) -> Self {
        Self {
            max_frame_size,
            max_buffer_size,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.data_max_size, config.buffer_max_size)
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DATA_MAX_SIZE, BUFFER_MAX_SIZE)
    }
}

impl tokio_util::codec::Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        decode(src, self.max_frame_size, self.max_buffer_size)
    }
}

impl tokio_util::codec::Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        encode_into(item.tag, &item.payload, self.max_frame_size, dst)
    }
}
