use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::opcode::Opcode;

/// Envelope header: one little-endian u32.
pub const HEADER_SIZE: usize = 4;

/// Largest payload the 11-bit length field can describe.
pub const MAX_PAYLOAD: usize = 0x7ff;

/// A message with its identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Identifier selecting the payload layout.
    pub opcode: Opcode,
    /// The message payload.
    pub payload: Bytes,
}

impl Envelope {
    /// Create a new envelope.
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    /// The total wire size of this envelope (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self) -> Result<Bytes> {
        let mut dst = BytesMut::with_capacity(self.wire_size());
        encode_envelope(self.opcode, &self.payload, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Decode exactly one envelope from `bytes`.
    ///
    /// The declared length must match the bytes that follow the header:
    /// short input is [`FrameError::Truncated`], surplus input is
    /// [`FrameError::TrailingBytes`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Truncated {
                available: bytes.len(),
                needed: HEADER_SIZE,
            });
        }

        let (opcode, declared) = read_header(bytes);
        let available = bytes.len() - HEADER_SIZE;
        if available < declared {
            return Err(FrameError::Truncated {
                available: bytes.len(),
                needed: HEADER_SIZE + declared,
            });
        }
        if available > declared {
            return Err(FrameError::TrailingBytes {
                declared,
                extra: available - declared,
            });
        }

        Ok(Self {
            opcode,
            payload: Bytes::copy_from_slice(&bytes[HEADER_SIZE..]),
        })
    }
}

/// Encode an envelope into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────────────┬──────────┬─────────┬──────────┬──────────────────┐
/// │ byte 0             │ byte 1   │ byte 2  │ byte 3   │ Payload          │
/// │ evt|tech|len[10:8] │ len[7:0] │ class   │ message  │ (len bytes)      │
/// └────────────────────┴──────────┴─────────┴──────────┴──────────────────┘
/// ```
pub fn encode_envelope(opcode: Opcode, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u32_le(opcode.to_header(payload.len()));
    dst.put_slice(payload);
    Ok(())
}

/// Decode an envelope from a stream buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete envelope yet.
/// On success, consumes exactly the envelope bytes from the buffer.
pub fn decode_envelope(src: &mut BytesMut, max_payload: usize) -> Result<Option<Envelope>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let (opcode, payload_len) = read_header(src);
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    if src.len() < HEADER_SIZE + payload_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Envelope { opcode, payload }))
}

fn read_header(bytes: &[u8]) -> (Opcode, usize) {
    let header = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    Opcode::from_header(header)
}

/// Configuration for envelope readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: [`MAX_PAYLOAD`].
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
