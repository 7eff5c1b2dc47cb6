//! Byte-stream links to a BGAPI network co-processor (NCP).
//!
//! The mesh stack runs on the NCP target; the host reaches it over a FIFO
//! byte stream. Two links are supported:
//! - Unix domain sockets, as exposed by serial-to-socket bridges
//! - TCP, as exposed by development kits and simulators
//!
//! Framing integrity is assumed; everything above builds on [`NcpStream`].

pub mod error;
pub mod stream;
pub mod tcp;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use stream::NcpStream;
pub use tcp::{connect_tcp, DEFAULT_NCP_TCP_PORT};

#[cfg(unix)]
pub use uds::UnixNcpSocket;
