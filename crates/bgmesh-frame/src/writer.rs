use std::io::{ErrorKind, Write};

use bgmesh_transport::NcpStream;
use bytes::BytesMut;

use crate::codec::{encode_envelope, Envelope, FrameConfig, HEADER_SIZE, MAX_PAYLOAD};
use crate::error::{FrameError, Result};
use crate::opcode::Opcode;
use crate::reader::transport_to_frame_error;

/// Writes complete envelopes to any `Write` stream.
pub struct EnvelopeWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> EnvelopeWriter<T> {
    /// Create a new envelope writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new envelope writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(HEADER_SIZE + MAX_PAYLOAD),
            config,
        }
    }

    /// Write a complete envelope (blocking).
    pub fn write_envelope(&mut self, envelope: &Envelope) -> Result<()> {
        self.send(envelope.opcode, envelope.payload.as_ref())
    }

    /// Encode and send a payload under an identifier.
    pub fn send(&mut self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_envelope(opcode, payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl EnvelopeWriter<NcpStream> {
    /// Create a writer for an NCP link and apply the write timeout from config.
    pub fn with_config_ncp(inner: NcpStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::decode_envelope;

    const ADD_NETKEY: Opcode = Opcode::command(0x27, 0x04);

    #[test]
    fn write_single_envelope() {
        let mut writer = EnvelopeWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(ADD_NETKEY, &[0, 0, 0x12, 0, 1, 0]).unwrap();

        let wire = writer.into_inner().into_inner();
        assert_eq!(&wire[..4], &[0x20, 0x06, 0x27, 0x04]);

        let mut wire = BytesMut::from(wire.as_slice());
        let envelope = decode_envelope(&mut wire, MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(envelope.opcode, ADD_NETKEY);
        assert_eq!(envelope.payload.as_ref(), &[0, 0, 0x12, 0, 1, 0]);
    }

    #[test]
    fn write_rejects_payload_over_configured_limit() {
        let cfg = FrameConfig {
            max_payload_size: 4,
            ..FrameConfig::default()
        };
        let mut writer = EnvelopeWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);
        let err = writer.send(ADD_NETKEY, &[0u8; 5]).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 5, max: 4 }));
        assert!(writer.get_ref().get_ref().is_empty());
    }

    #[test]
    fn zero_length_write_is_connection_closed() {
        let mut writer = EnvelopeWriter::new(ZeroWriter);
        let err = writer.send(ADD_NETKEY, b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn short_writes_are_completed() {
        let mut writer = EnvelopeWriter::new(TwoBytesAtATime(Vec::new()));
        writer.send(ADD_NETKEY, &[1, 2, 3, 4, 5]).unwrap();

        let wire = writer.into_inner().0;
        let envelope = Envelope::decode(&wire).unwrap();
        assert_eq!(envelope.payload.as_ref(), &[1, 2, 3, 4, 5]);
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct TwoBytesAtATime(Vec<u8>);

    impl Write for TwoBytesAtATime {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let n = buf.len().min(2);
            self.0.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
