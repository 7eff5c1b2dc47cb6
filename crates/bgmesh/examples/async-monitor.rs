//! Async event monitor built on the tokio envelope codec.
//!
//! Run with:
//!   cargo run --example async-monitor --features async

use bgmesh::frame::{Envelope, EnvelopeCodec, Opcode, MAX_PAYLOAD};
use bgmesh::registry::OpcodeRegistry;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio_util::codec::{Decoder, Encoder};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let registry = OpcodeRegistry::builtin();
    let (mut ncp, mut host) = UnixStream::pair()?;

    let writer = tokio::spawn(async move {
        let mut codec = EnvelopeCodec::default();
        let mut out = BytesMut::new();
        let events = [
            Envelope::new(Opcode::event(0x14, 0x00), vec![1, 0x02, 0x00, 0, 0, 0, 0]),
            Envelope::new(Opcode::event(0x23, 0x01), vec![0x10, 0x00]),
        ];
        for event in events {
            codec.encode(event, &mut out)?;
        }
        ncp.write_all(&out).await?;
        ncp.shutdown().await?;
        Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
    });

    let mut codec = EnvelopeCodec::new(MAX_PAYLOAD);
    let mut buf = BytesMut::new();
    loop {
        while let Some(envelope) = codec.decode(&mut buf)? {
            match registry.decode_incoming(&envelope) {
                Ok(record) => println!("{}", serde_json::to_string(&record)?),
                Err(err) => eprintln!("undecodable envelope {}: {err}", envelope.opcode),
            }
        }
        if host.read_buf(&mut buf).await? == 0 {
            break;
        }
    }

    writer.await??;
    Ok(())
}
