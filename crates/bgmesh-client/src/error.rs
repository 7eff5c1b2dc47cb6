use std::time::Duration;

/// Errors raised by the client core.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] bgmesh_transport::TransportError),

    /// Envelope-level error.
    #[error("frame error: {0}")]
    Frame(#[from] bgmesh_frame::FrameError),

    /// Registry lookup or payload layout error.
    #[error("registry error: {0}")]
    Registry(#[from] bgmesh_registry::RegistryError),

    /// No outstanding request carries the handle.
    #[error("no outstanding request for handle {handle}")]
    NotFound { handle: u32 },

    /// A fragment or list event collided with an open buffer of a
    /// different message.
    #[error("interleaved fragments on {key}: open {open}, offending {offending}")]
    Interleaving {
        key: String,
        open: String,
        offending: String,
    },

    /// Reassembled data exceeds the configured limit.
    #[error("fragmented payload too large ({size} bytes, max {max})")]
    FragmentTooLarge { size: usize, max: usize },

    /// The stack answered with a non-zero result code.
    #[error("{command} failed with result {result:#06x}")]
    Stack { command: String, result: u16 },

    /// The command does not answer with a correlation handle.
    #[error("{0} is not a handle-returning request")]
    NotARequest(String),

    /// No response to a command within the response timeout.
    #[error("no response to {command} after {after:?}")]
    ResponseTimeout { command: String, after: Duration },

    /// The NCP link closed.
    #[error("NCP link disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, ClientError>;
