use bgmesh_frame::{MessageKind, Opcode};

/// Errors raised by registry lookups and the layout codec.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No descriptor registered for the identifier.
    #[error("unknown {kind} opcode {opcode}")]
    UnknownOpcode { kind: MessageKind, opcode: Opcode },

    /// No descriptor registered under the name.
    #[error("unknown {kind} name '{name}'")]
    UnknownName { kind: MessageKind, name: String },

    /// The payload does not match the registered layout.
    #[error("payload of {name} does not match its layout: {reason}")]
    PayloadMismatch { name: String, reason: String },

    /// A record lacks a field, or carries a value of the wrong type.
    #[error("field '{field}' of {name}: {reason}")]
    Field {
        name: String,
        field: String,
        reason: String,
    },

    /// A descriptor is internally inconsistent.
    #[error("invalid descriptor {name}: {reason}")]
    InvalidDescriptor { name: String, reason: String },

    /// Descriptor files could not be loaded.
    #[error("failed to load descriptors: {0}")]
    LoadFailed(String),

    /// Descriptor or record JSON is malformed.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Envelope encoding failed.
    #[error("envelope error: {0}")]
    Frame(#[from] bgmesh_frame::FrameError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
