use std::net::ToSocketAddrs;
#[cfg(unix)]
use std::path::Path;
use std::sync::Arc;

use bgmesh_frame::{EnvelopeReader, EnvelopeWriter, FrameConfig};
use bgmesh_registry::OpcodeRegistry;
#[cfg(unix)]
use bgmesh_transport::UnixNcpSocket;
use bgmesh_transport::NcpStream;
use tracing::info;

use crate::client::MeshClient;
use crate::config::ClientConfig;
use crate::error::Result;

/// A client session over a Unix socket or TCP link.
pub type NcpClient = MeshClient<NcpStream, NcpStream>;

/// Open a session over a Unix domain socket.
#[cfg(unix)]
pub fn connect_unix(
    path: impl AsRef<Path>,
    registry: Arc<OpcodeRegistry>,
    config: ClientConfig,
) -> Result<NcpClient> {
    let stream = UnixNcpSocket::connect(path)?;
    from_stream(stream, registry, config)
}

/// Open a session over TCP.
pub fn connect_tcp(
    addr: impl ToSocketAddrs + std::fmt::Display,
    registry: Arc<OpcodeRegistry>,
    config: ClientConfig,
) -> Result<NcpClient> {
    let stream = bgmesh_transport::connect_tcp(addr)?;
    from_stream(stream, registry, config)
}

fn from_stream(
    stream: NcpStream,
    registry: Arc<OpcodeRegistry>,
    config: ClientConfig,
) -> Result<NcpClient> {
    let reader_stream = stream.try_clone()?;

    // Reads wake up every poll interval so timers run on an idle link.
    let frame_config = FrameConfig {
        read_timeout: Some(config.poll_interval),
        write_timeout: Some(config.response_timeout),
        ..FrameConfig::default()
    };

    let reader = EnvelopeReader::with_config_ncp(reader_stream, frame_config.clone())?;
    let writer = EnvelopeWriter::with_config_ncp(stream, frame_config)?;
    info!(link = writer.get_ref().link_name(), "ncp session opened");

    Ok(MeshClient::new(reader, writer, registry, config))
}
