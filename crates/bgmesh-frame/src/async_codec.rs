//! `tokio_util` codec over the envelope wire format.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_envelope, encode_envelope, Envelope, MAX_PAYLOAD};
use crate::error::FrameError;

/// Envelope codec for `FramedRead` / `FramedWrite`.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeCodec {
    max_payload_size: usize,
}

impl EnvelopeCodec {
    /// Codec accepting payloads up to `max_payload_size` bytes.
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            max_payload_size: max_payload_size.min(MAX_PAYLOAD),
        }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD)
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_envelope(src, self.max_payload_size)
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: item.payload.len(),
                max: self.max_payload_size,
            });
        }
        encode_envelope(item.opcode, &item.payload, dst)
    }
}
