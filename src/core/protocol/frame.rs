// src/core/protocol/frame.rs

//! Implements frame boundary detection for raw connection bytes and the
//! corresponding `Encoder` and `Decoder` used by every transport.

use crate::core::NetError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

/// Size of the big-endian length header in length-prefixed framing.
pub const LENGTH_PREFIX_LEN: usize = 4;
/// Default delimiter for delimiter-based framing.
pub const DEFAULT_DELIMITER: u8 = b'\n';
/// Default upper bound on a single frame's payload (16 MB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;
/// The largest payload a 4-byte length header can describe.
pub const MAX_LENGTH_PREFIXED_FRAME: usize = u32::MAX as usize;

/// The wire policy used to find message boundaries.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FramingKind {
    /// Each payload is preceded by its length as a 4-byte big-endian integer.
    #[default]
    LengthPrefixed,
    /// Each payload is terminated by a single delimiter byte.
    Delimited,
}

/// A `tokio_util::codec` implementation turning a byte stream into discrete payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCodec {
    kind: FramingKind,
    delimiter: u8,
    max_frame_length: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::length_prefixed(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl FrameCodec {
    /// The limit is capped at `MAX_LENGTH_PREFIXED_FRAME` so every accepted payload
    /// fits its header.
    pub fn length_prefixed(max_frame_length: usize) -> Self {
        Self {
            kind: FramingKind::LengthPrefixed,
            delimiter: DEFAULT_DELIMITER,
            max_frame_length: max_frame_length.min(MAX_LENGTH_PREFIXED_FRAME),
        }
    }

    pub fn delimited(delimiter: u8, max_frame_length: usize) -> Self {
        Self {
            kind: FramingKind::Delimited,
            delimiter,
            max_frame_length,
        }
    }

    pub fn kind(&self) -> FramingKind {
        self.kind
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// A convenience method to frame a payload into a standalone buffer.
    pub fn encode_to_bytes(&mut self, payload: Bytes) -> Result<Bytes, NetError> {
        let mut buf = BytesMut::with_capacity(payload.len() + LENGTH_PREFIX_LEN);
        self.encode(payload, &mut buf)?;
        Ok(buf.freeze())
    }

    fn check_length(&self, length: usize) -> Result<(), NetError> {
        if length > self.max_frame_length {
            return Err(NetError::FrameTooLarge {
                length,
                limit: self.max_frame_length,
            });
        }
        Ok(())
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = NetError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.check_length(item.len())?;
        match self.kind {
            FramingKind::LengthPrefixed => {
                dst.reserve(LENGTH_PREFIX_LEN + item.len());
                dst.put_u32(item.len() as u32);
                dst.extend_from_slice(&item);
            }
            FramingKind::Delimited => {
                if find_delimiter(&item, self.delimiter).is_some() {
                    return Err(NetError::Codec(
                        "payload contains the frame delimiter".to_string(),
                    ));
                }
                dst.reserve(item.len() + 1);
                dst.extend_from_slice(&item);
                dst.put_u8(self.delimiter);
            }
        }
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = NetError;

    /// Extracts the next complete payload from `src`. Returns `Ok(None)` while the
    /// frame is still incomplete; the partial bytes stay in `src`.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        match self.kind {
            FramingKind::LengthPrefixed => {
                if src.len() < LENGTH_PREFIX_LEN {
                    return Ok(None);
                }
                let length = (&src[..LENGTH_PREFIX_LEN]).get_u32() as usize;
                self.check_length(length)?;

                let total = LENGTH_PREFIX_LEN + length;
                if src.len() < total {
                    src.reserve(total - src.len());
                    return Ok(None);
                }
                src.advance(LENGTH_PREFIX_LEN);
                Ok(Some(src.split_to(length).freeze()))
            }
            FramingKind::Delimited => match find_delimiter(src, self.delimiter) {
                Some(pos) => {
                    self.check_length(pos)?;
                    let frame = src.split_to(pos).freeze();
                    // Skip the delimiter itself.
                    src.advance(1);
                    Ok(Some(frame))
                }
                None => {
                    self.check_length(src.len())?;
                    Ok(None)
                }
            },
        }
    }
}

/// Helper function to find the next delimiter in a buffer.
fn find_delimiter(src: &[u8], delimiter: u8) -> Option<usize> {
    src.iter().position(|b| *b == delimiter)
}
