use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::error::Result;

/// A connected NCP link. Implements `Read` and `Write`.
///
/// Bytes arrive in FIFO order; the envelope layer above is responsible for
/// splitting them into messages.
pub struct NcpStream {
    inner: NcpStreamInner,
}

enum NcpStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    Tcp(TcpStream),
}

impl Read for NcpStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            NcpStreamInner::Unix(stream) => stream.read(buf),
            NcpStreamInner::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for NcpStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            NcpStreamInner::Unix(stream) => stream.write(buf),
            NcpStreamInner::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            NcpStreamInner::Unix(stream) => stream.flush(),
            NcpStreamInner::Tcp(stream) => stream.flush(),
        }
    }
}

impl NcpStream {
    /// Wrap a connected Unix domain socket stream.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: NcpStreamInner::Unix(stream),
        }
    }

    /// Wrap a connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: NcpStreamInner::Tcp(stream),
        }
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            NcpStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            NcpStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            NcpStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            NcpStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    ///
    /// Used to split one link into an independent reader and writer.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            NcpStreamInner::Unix(stream) => Ok(Self::from_unix(stream.try_clone()?)),
            NcpStreamInner::Tcp(stream) => Ok(Self::from_tcp(stream.try_clone()?)),
        }
    }

    /// Link name for diagnostics.
    pub fn link_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            NcpStreamInner::Unix(_) => "unix",
            NcpStreamInner::Tcp(_) => "tcp",
        }
    }
}

impl std::fmt::Debug for NcpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NcpStream")
            .field("link", &self.link_name())
            .finish()
    }
}
