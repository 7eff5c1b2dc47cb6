use std::io::{ErrorKind, Read};

use bgmesh_transport::NcpStream;
use bytes::{Buf, BytesMut};
use tracing::{debug, trace, warn};

use crate::codec::{decode_envelope, Envelope, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;
const READ_CHUNK_SIZE: usize = 1024;

/// Reads complete envelopes from any `Read` stream.
///
/// Partial reads are buffered internally; callers always get whole envelopes.
/// Bytes already buffered survive a timed-out read. An envelope over the
/// payload limit is reported once and then skipped, so the next read starts
/// at the following header.
pub struct EnvelopeReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
    /// Bytes of a rejected envelope still to be dropped.
    skip: usize,
}

impl<T: Read> EnvelopeReader<T> {
    /// Create a new envelope reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new envelope reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            skip: 0,
        }
    }

    /// Read the next complete envelope (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_envelope(&mut self) -> Result<Envelope> {
        loop {
            self.drop_skipped();
            if self.skip == 0 {
                match decode_envelope(&mut self.buf, self.config.max_payload_size) {
                    Ok(Some(envelope)) => {
                        trace!(opcode = %envelope.opcode, len = envelope.payload.len(), "envelope read");
                        return Ok(envelope);
                    }
                    Ok(None) => {}
                    Err(FrameError::PayloadTooLarge { size, max }) => {
                        warn!(size, max, "skipping oversized envelope");
                        self.skip = HEADER_SIZE + size;
                        self.drop_skipped();
                        return Err(FrameError::PayloadTooLarge { size, max });
                    }
                    Err(err) => return Err(err),
                }
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                if self.buf.is_empty() && self.skip == 0 {
                    debug!("envelope stream closed");
                } else {
                    warn!(buffered = self.buf.len(), "envelope stream closed mid-envelope");
                }
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn drop_skipped(&mut self) {
        let n = self.skip.min(self.buf.len());
        self.buf.advance(n);
        self.skip -= n;
    }

    /// Bytes received but not yet returned as an envelope.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl EnvelopeReader<NcpStream> {
    /// Create a reader for an NCP link and apply the read timeout from config.
    pub fn with_config_ncp(inner: NcpStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: bgmesh_transport::TransportError) -> FrameError {
    match err {
        bgmesh_transport::TransportError::Io(io)
        | bgmesh_transport::TransportError::Accept(io) => FrameError::Io(io),
        bgmesh_transport::TransportError::Bind { source, .. }
        | bgmesh_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::encode_envelope;
    use crate::opcode::Opcode;

    const BOOT: Opcode = Opcode::event(0x01, 0x00);
    const NETKEY_LIST: Opcode = Opcode::event(0x27, 0x02);

    #[test]
    fn read_multiple_envelopes() {
        let mut wire = BytesMut::new();
        encode_envelope(BOOT, &[1, 0, 2, 0], &mut wire).unwrap();
        encode_envelope(NETKEY_LIST, &[3, 0, 0, 0, 2, 0, 0], &mut wire).unwrap();

        let mut reader = EnvelopeReader::new(Cursor::new(wire.to_vec()));

        let first = reader.read_envelope().unwrap();
        let second = reader.read_envelope().unwrap();
        assert_eq!(first.opcode, BOOT);
        assert_eq!(second.opcode, NETKEY_LIST);
        assert_eq!(second.payload.len(), 7);
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn partial_read_handling() {
        let mut wire = BytesMut::new();
        encode_envelope(BOOT, b"slow", &mut wire).unwrap();

        let mut reader = EnvelopeReader::new(ByteByByteReader {
            bytes: wire.to_vec(),
            pos: 0,
        });

        let envelope = reader.read_envelope().unwrap();
        assert_eq!(envelope.opcode, BOOT);
        assert_eq!(envelope.payload.as_ref(), b"slow");
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = EnvelopeReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_envelope().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_envelope() {
        let mut reader = EnvelopeReader::new(Cursor::new(vec![0xa0, 0x10, 0x01, 0x00, 0xaa]));
        let err = reader.read_envelope().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn oversized_envelope_in_stream() {
        let mut wire = BytesMut::new();
        encode_envelope(BOOT, &[0u8; 100], &mut wire).unwrap();

        let cfg = FrameConfig {
            max_payload_size: 16,
            ..FrameConfig::default()
        };
        let mut reader = EnvelopeReader::with_config(Cursor::new(wire.to_vec()), cfg);
        let err = reader.read_envelope().unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[test]
    fn oversized_envelope_is_skipped_once() {
        let mut wire = BytesMut::new();
        encode_envelope(BOOT, &[0xee; 100], &mut wire).unwrap();
        encode_envelope(NETKEY_LIST, &[3, 0, 0, 0, 0], &mut wire).unwrap();

        let cfg = FrameConfig {
            max_payload_size: 16,
            ..FrameConfig::default()
        };
        // Byte-at-a-time so the skip spans many reads.
        let mut reader = EnvelopeReader::with_config(
            ByteByByteReader {
                bytes: wire.to_vec(),
                pos: 0,
            },
            cfg,
        );

        let err = reader.read_envelope().unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 100, max: 16 }));

        let next = reader.read_envelope().unwrap();
        assert_eq!(next.opcode, NETKEY_LIST);
        assert_eq!(next.payload.as_ref(), &[3, 0, 0, 0, 0]);
        assert!(matches!(
            reader.read_envelope().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn interrupted_read_retries() {
        let mut wire = BytesMut::new();
        encode_envelope(BOOT, b"ok", &mut wire).unwrap();

        let mut reader = EnvelopeReader::new(FailOnceThenData {
            kind: ErrorKind::Interrupted,
            failed: false,
            bytes: wire.to_vec(),
            pos: 0,
        });
        let envelope = reader.read_envelope().unwrap();
        assert_eq!(envelope.payload.as_ref(), b"ok");
    }

    #[test]
    fn would_block_propagates_then_recovers() {
        let mut wire = BytesMut::new();
        encode_envelope(BOOT, b"later", &mut wire).unwrap();

        let mut reader = EnvelopeReader::new(FailOnceThenData {
            kind: ErrorKind::WouldBlock,
            failed: false,
            bytes: wire.to_vec(),
            pos: 0,
        });
        let err = reader.read_envelope().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));

        let envelope = reader.read_envelope().unwrap();
        assert_eq!(envelope.payload.as_ref(), b"later");
    }

    #[test]
    fn roundtrip_over_ncp_stream() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::EnvelopeWriter::new(NcpStream::from_unix(left));
        let cfg = FrameConfig {
            read_timeout: Some(std::time::Duration::from_secs(1)),
            ..FrameConfig::default()
        };
        let mut reader = EnvelopeReader::with_config_ncp(NcpStream::from_unix(right), cfg).unwrap();

        writer
            .write_envelope(&Envelope::new(BOOT, vec![9, 9]))
            .unwrap();
        let envelope = reader.read_envelope().unwrap();
        assert_eq!(envelope, Envelope::new(BOOT, vec![9, 9]));
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct FailOnceThenData {
        kind: ErrorKind,
        failed: bool,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for FailOnceThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.failed {
                self.failed = true;
                return Err(std::io::Error::from(self.kind));
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }
}
