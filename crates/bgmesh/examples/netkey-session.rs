//! Netkey session: a scripted NCP thread and a client issuing requests.
//!
//! Run with:
//!   cargo run --example netkey-session

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bgmesh::client::{connect_unix, ClientConfig, Delivery, Route};
use bgmesh::frame::{EnvelopeReader, EnvelopeWriter, MessageKind, Opcode};
use bgmesh::registry::{OpcodeRegistry, Record, Value};
use bgmesh::transport::UnixNcpSocket;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_dir = std::env::temp_dir().join(format!("bgmesh-session-{}", std::process::id()));
    fs::create_dir_all(&sock_dir)?;
    let sock_path = sock_dir.join("ncp.sock");

    let registry = Arc::new(OpcodeRegistry::builtin());
    let socket = UnixNcpSocket::bind(&sock_path)?;

    let ncp_registry = Arc::clone(&registry);
    let ncp = thread::spawn(
        move || -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            let stream = socket.accept()?;
            let mut reader = EnvelopeReader::new(stream.try_clone()?);
            let mut writer = EnvelopeWriter::new(stream);
            let mut next_handle = 1u32;

            // Answer every request with a handle, then conclude it.
            while let Ok(command) = reader.read_envelope() {
                let request = ncp_registry.decode(MessageKind::Command, &command)?;
                eprintln!("[ncp] {} {}", request.name, command.opcode);

                let handle = next_handle;
                next_handle += 1;
                let response = Record::new(MessageKind::Response, command.opcode, &request.name)
                    .with("result", Value::U16(0))
                    .with("handle", Value::U32(handle));
                writer.write_envelope(&ncp_registry.encode(&response)?)?;

                let item = Record::new(
                    MessageKind::Event,
                    Opcode::event(0x27, 0x02),
                    "mesh_config_client_netkey_list",
                )
                .with("handle", Value::U32(handle))
                .with("netkey_indices", Value::Elements(vec![0, 1, 2]));
                let end = Record::new(
                    MessageKind::Event,
                    Opcode::event(0x27, 0x03),
                    "mesh_config_client_netkey_list_end",
                )
                .with("result", Value::U16(0))
                .with("handle", Value::U32(handle));
                writer.write_envelope(&ncp_registry.encode(&item)?)?;
                writer.write_envelope(&ncp_registry.encode(&end)?)?;
            }
            Ok(())
        },
    );

    let config = ClientConfig::default().with_poll_interval(Duration::from_millis(20));
    let mut client = connect_unix(&sock_path, registry, config)?;
    client.on(Route::Family("netkey".into()), |delivery| {
        if let Delivery::Concluded(conclusion) = delivery {
            match &conclusion.outcome {
                Ok(bgmesh::client::Completed::List(list)) => {
                    eprintln!("[client] handle {} netkeys {:?}", conclusion.handle, list.elements());
                }
                other => eprintln!("[client] handle {} {other:?}", conclusion.handle),
            }
        }
    });

    let handle = client.list_netkeys(0, 0x0002)?;
    eprintln!("[client] list_netkeys issued, handle {handle}");
    while !client.correlation().lock().map(|t| t.is_empty()).unwrap_or(true) {
        client.poll()?;
    }

    drop(client);
    let _ = ncp.join();
    let _ = fs::remove_dir_all(&sock_dir);
    Ok(())
}
