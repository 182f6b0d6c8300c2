//! Length-prefixed frame codec for the engine connection.
//!
//! Wire format: a 4-byte big-endian length prefix followed by that many
//! payload bytes. The length is validated against the configured cap before
//! any allocation, so an oversized prefix can never trigger a large buffer.
//!
//! The codec starts in handshake mode with the stricter
//! [`MAX_HANDSHAKE_FRAME_SIZE`](crate::error::MAX_HANDSHAKE_FRAME_SIZE) cap
//! and is widened to the general cap once the handshake completes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ProtocolError, MAX_FRAME_SIZE, MAX_HANDSHAKE_FRAME_SIZE};

/// Number of bytes in the length prefix.
const LENGTH_PREFIX_SIZE: usize = 4;

/// Frame codec with a configurable size cap.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Codec with the general frame cap.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Codec with the stricter handshake cap.
    #[must_use]
    pub const fn handshake() -> Self {
        Self {
            max_frame_size: MAX_HANDSHAKE_FRAME_SIZE,
        }
    }

    /// Widens the cap to the general frame limit after handshake.
    pub fn widen(&mut self) {
        self.max_frame_size = MAX_FRAME_SIZE;
    }

    /// Current frame size cap.
    #[must_use]
    pub const fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        let length = u32::from_be_bytes(prefix) as usize;

        // Enforced before reserving room for the body.
        if length > self.max_frame_size {
            return Err(ProtocolError::frame_too_large(length, self.max_frame_size));
        }

        if src.len() < LENGTH_PREFIX_SIZE + length {
            src.reserve(LENGTH_PREFIX_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(src.split_to(length)))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = item.len();
        if length > self.max_frame_size {
            return Err(ProtocolError::frame_too_large(length, self.max_frame_size));
        }

        dst.reserve(LENGTH_PREFIX_SIZE + length);
        dst.put_u32(length as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}
