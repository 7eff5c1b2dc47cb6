//! BGAPI envelope codec.
//!
//! Every message exchanged with the NCP target is an envelope:
//! - a 4-byte little-endian header carrying the 32-bit message identifier
//!   with the 11-bit payload length folded into otherwise unused bits
//! - the payload, whose layout is selected by the identifier
//!
//! Readers and writers hide partial reads; callers always see whole envelopes.

#[cfg(feature = "async")]
pub mod async_codec;
pub mod codec;
pub mod error;
pub mod opcode;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub use async_codec::EnvelopeCodec;
pub use codec::{
    decode_envelope, encode_envelope, Envelope, FrameConfig, HEADER_SIZE, MAX_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use opcode::{MessageKind, Opcode, TECHNOLOGY_BLUETOOTH};
pub use reader::EnvelopeReader;
pub use writer::EnvelopeWriter;
