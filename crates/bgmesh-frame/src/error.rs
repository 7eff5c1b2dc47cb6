/// Errors that can occur during envelope encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Fewer bytes are available than the header declares.
    #[error("truncated envelope ({available} bytes, need {needed})")]
    Truncated { available: usize, needed: usize },

    /// More bytes are present than the header declares.
    #[error("envelope has {extra} trailing bytes beyond declared length {declared}")]
    TrailingBytes { declared: usize, extra: usize },

    /// The payload exceeds the configured or encodable maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing envelopes.
    #[error("envelope I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link was closed before a complete envelope was received.
    #[error("connection closed (incomplete envelope)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
