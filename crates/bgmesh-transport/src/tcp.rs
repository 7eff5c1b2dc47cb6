use std::net::{TcpStream, ToSocketAddrs};

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::stream::NcpStream;

/// Port on which development kits expose the NCP serial link over TCP.
pub const DEFAULT_NCP_TCP_PORT: u16 = 4901;

/// Connect to an NCP target exposed over TCP (blocking).
///
/// Nagle is disabled: commands are small and latency bound.
pub fn connect_tcp(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<NcpStream> {
    let endpoint = addr.to_string();
    let stream = TcpStream::connect(&addr).map_err(|source| TransportError::Connect {
        endpoint: endpoint.clone(),
        source,
    })?;
    stream.set_nodelay(true)?;
    debug!(%endpoint, "connected to ncp over tcp");
    Ok(NcpStream::from_tcp(stream))
}
