use std::fmt;
use std::io;

use bgmesh_client::ClientError;
use bgmesh_frame::FrameError;
use bgmesh_registry::RegistryError;
use bgmesh_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn registry_error(context: &str, err: RegistryError) -> CliError {
    match err {
        RegistryError::UnknownName { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        RegistryError::Frame(err) => frame_error(context, err),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn client_error(context: &str, err: ClientError) -> CliError {
    match err {
        ClientError::Transport(err) => transport_error(context, err),
        ClientError::Frame(err) => frame_error(context, err),
        ClientError::Registry(err) => registry_error(context, err),
        ClientError::ResponseTimeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ClientError::NotARequest(_) => CliError::new(USAGE, format!("{context}: {err}")),
        ClientError::Stack { .. } | ClientError::Disconnected => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use bgmesh_frame::{MessageKind, Opcode};

    use super::*;

    #[test]
    fn maps_io_kinds_to_exit_codes() {
        let denied = io_error("x", io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(denied.code, PERMISSION_DENIED);
        let timed_out = io_error("x", io::Error::from(io::ErrorKind::WouldBlock));
        assert_eq!(timed_out.code, TIMEOUT);
        let missing = transport_error(
            "connect failed",
            TransportError::Connect {
                endpoint: "/tmp/none.sock".into(),
                source: io::Error::from(io::ErrorKind::NotFound),
            },
        );
        assert_eq!(missing.code, TRANSPORT_ERROR);
        assert!(missing.message.starts_with("connect failed: "));
    }

    #[test]
    fn maps_registry_and_client_errors() {
        let unknown = registry_error(
            "decode failed",
            RegistryError::UnknownOpcode {
                kind: MessageKind::Event,
                opcode: Opcode::event(0x7f, 0x01),
            },
        );
        assert_eq!(unknown.code, DATA_INVALID);

        let name = registry_error(
            "encode failed",
            RegistryError::UnknownName {
                kind: MessageKind::Command,
                name: "nope".into(),
            },
        );
        assert_eq!(name.code, USAGE);

        let stack = client_error(
            "request failed",
            ClientError::Stack {
                command: "mesh_config_client_add_netkey".into(),
                result: 0x0181,
            },
        );
        assert_eq!(stack.code, FAILURE);

        let timeout = client_error(
            "hello failed",
            ClientError::ResponseTimeout {
                command: "system_hello".into(),
                after: std::time::Duration::from_secs(2),
            },
        );
        assert_eq!(timeout.code, TIMEOUT);
    }
}
