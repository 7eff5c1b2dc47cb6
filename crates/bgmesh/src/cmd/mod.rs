use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use bgmesh_client::{ClientConfig, ClientError, NcpClient};
use bgmesh_frame::MessageKind;
use bgmesh_registry::{OpcodeRegistry, RegistryConfig};
use bgmesh_transport::{TransportError, DEFAULT_NCP_TCP_PORT};
use clap::{Args, Subcommand, ValueEnum};

use crate::exit::{client_error, registry_error, CliError, CliResult, DATA_INVALID, TIMEOUT, USAGE};
use crate::output::OutputFormat;

pub mod decode;
pub mod encode;
pub mod monitor;
pub mod opcodes;
pub mod request;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode a hex-encoded envelope into a record.
    Decode(DecodeArgs),
    /// Encode a record given as JSON into envelope hex.
    Encode(EncodeArgs),
    /// List known opcodes.
    Opcodes(OpcodesArgs),
    /// Connect to an NCP and print events as they arrive.
    Monitor(MonitorArgs),
    /// Issue a handle-returning request and wait for its conclusion.
    Request(RequestArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Decode(args) => decode::run(args, format),
        Command::Encode(args) => encode::run(args, format),
        Command::Opcodes(args) => opcodes::run(args, format),
        Command::Monitor(args) => monitor::run(args, format),
        Command::Request(args) => request::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    #[value(alias = "command")]
    Cmd,
    #[value(alias = "response")]
    Rsp,
    #[value(alias = "event")]
    Evt,
}

impl From<KindArg> for MessageKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Cmd => MessageKind::Command,
            KindArg::Rsp => MessageKind::Response,
            KindArg::Evt => MessageKind::Event,
        }
    }
}

/// Registry selection shared by every command.
#[derive(Args, Debug, Default)]
pub struct RegistryArgs {
    /// Directory of extra `*.opcode.json` descriptors.
    #[arg(long, value_name = "DIR")]
    pub descriptors: Option<PathBuf>,
    /// Ignore bytes after the last described field.
    #[arg(long)]
    pub lenient: bool,
}

impl RegistryArgs {
    pub fn load(&self) -> CliResult<OpcodeRegistry> {
        let config = RegistryConfig::default().with_strict_length(!self.lenient);
        match &self.descriptors {
            Some(dir) => OpcodeRegistry::from_directory_with_config(dir, config)
                .map_err(|err| registry_error("descriptor load failed", err)),
            None => Ok(OpcodeRegistry::builtin_with_config(config)),
        }
    }
}

/// Where the NCP is reachable.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct EndpointArgs {
    /// Unix socket path of the NCP.
    pub path: Option<PathBuf>,
    /// TCP endpoint of the NCP (host or host:port).
    #[arg(long, value_name = "ADDR")]
    pub tcp: Option<String>,
}

impl EndpointArgs {
    /// Connect, retrying while the endpoint is not up yet.
    pub fn connect(
        &self,
        registry: OpcodeRegistry,
        config: ClientConfig,
        timeout: Duration,
    ) -> CliResult<NcpClient> {
        let registry = std::sync::Arc::new(registry);
        let start = Instant::now();
        loop {
            let attempt = match (&self.path, &self.tcp) {
                (Some(path), _) => connect_unix(path, registry.clone(), config.clone()),
                (None, Some(addr)) => bgmesh_client::connect_tcp(
                    with_default_port(addr),
                    registry.clone(),
                    config.clone(),
                ),
                (None, None) => return Err(CliError::new(USAGE, "no NCP endpoint given")),
            };
            match attempt {
                Ok(client) => return Ok(client),
                Err(err) if is_retryable_connect_error(&err) => {
                    if start.elapsed() >= timeout {
                        return Err(CliError::new(
                            TIMEOUT,
                            format!("connect timed out after {timeout:?}: {err}"),
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(err) => return Err(client_error("connect failed", err)),
            }
        }
    }
}

#[cfg(unix)]
fn connect_unix(
    path: &Path,
    registry: std::sync::Arc<OpcodeRegistry>,
    config: ClientConfig,
) -> bgmesh_client::Result<NcpClient> {
    bgmesh_client::connect_unix(path, registry, config)
}

#[cfg(not(unix))]
fn connect_unix(
    path: &Path,
    _registry: std::sync::Arc<OpcodeRegistry>,
    _config: ClientConfig,
) -> bgmesh_client::Result<NcpClient> {
    Err(ClientError::Transport(TransportError::Connect {
        endpoint: path.display().to_string(),
        source: std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "unix sockets are not available on this platform",
        ),
    }))
}

fn with_default_port(addr: &str) -> String {
    if addr.contains(':') {
        addr.to_string()
    } else {
        format!("{addr}:{DEFAULT_NCP_TCP_PORT}")
    }
}

fn is_retryable_connect_error(err: &ClientError) -> bool {
    match err {
        ClientError::Transport(TransportError::Connect { source, .. }) => matches!(
            source.kind(),
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
        ),
        _ => false,
    }
}

/// Parse a JSON object argument; absent means no fields.
pub fn parse_json_arg(json: Option<&str>) -> CliResult<serde_json::Value> {
    match json {
        Some(text) => serde_json::from_str(text)
            .map_err(|err| CliError::new(DATA_INVALID, format!("invalid --json: {err}"))),
        None => Ok(serde_json::Value::Null),
    }
}

/// Parse a duration like `5s`, `500ms` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Envelope bytes as hex (header included; spaces and `0x` allowed).
    pub hex: String,
    /// Message kind; defaults to event or response from the header.
    #[arg(long, value_enum)]
    pub kind: Option<KindArg>,
    #[command(flatten)]
    pub registry: RegistryArgs,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Registry name of the message, e.g. `system_hello`.
    pub name: String,
    /// Message kind.
    #[arg(long, value_enum, default_value = "cmd")]
    pub kind: KindArg,
    /// Field values as a JSON object.
    #[arg(long)]
    pub json: Option<String>,
    #[command(flatten)]
    pub registry: RegistryArgs,
}

#[derive(Args, Debug)]
pub struct OpcodesArgs {
    /// Only list entries of this family.
    #[arg(long)]
    pub family: Option<String>,
    /// Only list entries of this kind.
    #[arg(long, value_enum)]
    pub kind: Option<KindArg>,
    #[command(flatten)]
    pub registry: RegistryArgs,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub endpoint: EndpointArgs,
    /// Exit after printing N deliveries.
    #[arg(long)]
    pub count: Option<usize>,
    /// Send `system_hello` after connecting and print the response.
    #[arg(long)]
    pub hello: bool,
    /// Stop after this long (e.g. 30s).
    #[arg(long)]
    pub duration: Option<String>,
    /// Connection timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Receive loop wake-up interval.
    #[arg(long, default_value = "100ms")]
    pub poll_interval: String,
    #[command(flatten)]
    pub registry: RegistryArgs,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Registry name of the request command.
    pub name: String,
    #[command(flatten)]
    pub endpoint: EndpointArgs,
    /// Field values as a JSON object.
    #[arg(long)]
    pub json: Option<String>,
    /// How long to wait for the conclusion.
    #[arg(long, default_value = "5s")]
    pub wait: String,
    /// Connection timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    #[command(flatten)]
    pub registry: RegistryArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
    }

    #[test]
    fn parse_duration_rejects_bad_input() {
        assert_eq!(parse_duration("").unwrap_err().code, USAGE);
        assert_eq!(parse_duration("0s").unwrap_err().code, USAGE);
        assert_eq!(parse_duration("fast").unwrap_err().code, USAGE);
    }

    #[test]
    fn tcp_address_gets_default_port() {
        assert_eq!(with_default_port("10.0.0.2"), "10.0.0.2:4901");
        assert_eq!(with_default_port("10.0.0.2:5000"), "10.0.0.2:5000");
    }

    #[test]
    fn json_arg_defaults_to_null() {
        assert!(parse_json_arg(None).unwrap().is_null());
        assert_eq!(parse_json_arg(Some("{")).unwrap_err().code, DATA_INVALID);
    }
}
