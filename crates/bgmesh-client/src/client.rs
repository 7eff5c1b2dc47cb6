//! Blocking client session over an envelope stream.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Instant;

use bgmesh_frame::{Envelope, EnvelopeReader, EnvelopeWriter, FrameError, MessageKind};
use bgmesh_registry::{OpcodeRegistry, Record, Role, Value, HANDLE_FIELD, RESULT_FIELD};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::correlation::{CorrelationTable, SharedCorrelation};
use crate::dispatch::{Delivery, Dispatcher, Route};
use crate::error::{ClientError, Result};
use crate::fragment::split_chunks;

const ADD_NETKEY: &str = "mesh_config_client_add_netkey";
const LIST_NETKEYS: &str = "mesh_config_client_list_netkeys";
const GET_DCD: &str = "mesh_config_client_get_dcd";
const CANCEL_REQUEST: &str = "mesh_config_client_cancel_request";
const VENDOR_SEND: &str = "mesh_vendor_model_send";

/// Addressing of an outgoing vendor model message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorTarget {
    pub elem_index: u16,
    pub vendor_id: u16,
    pub model_id: u16,
    pub destination_address: u16,
    /// Virtual address index, -1 when unused.
    pub va_index: i8,
    pub appkey_index: u16,
    pub nonrelayed: bool,
    /// Vendor message opcode.
    pub opcode: u8,
}

impl VendorTarget {
    fn fields(&self, chunk: &[u8], is_final: bool) -> Vec<(String, Value)> {
        vec![
            field("elem_index", Value::U16(self.elem_index)),
            field("vendor_id", Value::U16(self.vendor_id)),
            field("model_id", Value::U16(self.model_id)),
            field("destination_address", Value::U16(self.destination_address)),
            field("va_index", Value::I8(self.va_index)),
            field("appkey_index", Value::U16(self.appkey_index)),
            field("nonrelayed", Value::U8(self.nonrelayed.into())),
            field("opcode", Value::U8(self.opcode)),
            field("final", Value::U8(is_final.into())),
            field("payload", Value::Bytes(bytes::Bytes::copy_from_slice(chunk))),
        ]
    }
}

fn field(name: &str, value: Value) -> (String, Value) {
    (name.to_string(), value)
}

/// A session with one NCP target.
///
/// Commands are answered in order on the same stream that carries events;
/// events read while waiting for a response are dispatched before the
/// response is returned.
pub struct MeshClient<R, W> {
    reader: EnvelopeReader<R>,
    writer: EnvelopeWriter<W>,
    registry: Arc<OpcodeRegistry>,
    dispatcher: Dispatcher,
    config: ClientConfig,
}

impl<R: Read, W: Write> MeshClient<R, W> {
    pub fn new(
        reader: EnvelopeReader<R>,
        writer: EnvelopeWriter<W>,
        registry: Arc<OpcodeRegistry>,
        config: ClientConfig,
    ) -> Self {
        let correlation = CorrelationTable::shared(config.request_timeout);
        let dispatcher = Dispatcher::new(Arc::clone(&registry), correlation, config.clone());
        Self {
            reader,
            writer,
            registry,
            dispatcher,
            config,
        }
    }

    /// Register a delivery callback.
    pub fn on(&mut self, route: Route, handler: impl FnMut(&Delivery) + Send + 'static) {
        self.dispatcher.on(route, handler);
    }

    /// Receive every delivery on a channel.
    pub fn subscribe(&mut self) -> mpsc::Receiver<Delivery> {
        self.dispatcher.subscribe()
    }

    /// Shared handle to the correlation table, for inspection.
    ///
    /// Expire requests with [`MeshClient::tick`] rather than ticking the
    /// table directly; only the dispatcher turns expiries into timeout
    /// conclusions and drops their partial lists.
    pub fn correlation(&self) -> SharedCorrelation {
        Arc::clone(self.dispatcher.correlation())
    }

    pub fn registry(&self) -> &Arc<OpcodeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send a command and wait for its response.
    pub fn command(&mut self, record: &Record) -> Result<Record> {
        let envelope = self.registry.encode(record)?;
        self.writer.write_envelope(&envelope)?;
        debug!(command = %record.name, opcode = %envelope.opcode, "command sent");

        let deadline = Instant::now() + self.config.response_timeout;
        loop {
            if let Some(incoming) = self.read_next()? {
                if incoming.opcode == envelope.opcode {
                    return Ok(self.registry.decode(MessageKind::Response, &incoming)?);
                }
                self.dispatcher.dispatch(&incoming, Instant::now());
            }

            let now = Instant::now();
            self.dispatcher.tick(now);
            if now >= deadline {
                return Err(ClientError::ResponseTimeout {
                    command: record.name.clone(),
                    after: self.config.response_timeout,
                });
            }
        }
    }

    /// Send a command by name.
    pub fn command_named(&mut self, name: &str, fields: Vec<(String, Value)>) -> Result<Record> {
        let record = self.command_record(name, fields)?;
        self.command(&record)
    }

    /// Send a handle-returning command and track the request.
    ///
    /// A non-zero result in the response is returned as
    /// [`ClientError::Stack`] and nothing is tracked.
    pub fn request(&mut self, record: &Record) -> Result<u32> {
        let role = self.registry.role_of(MessageKind::Command, record.opcode)?;
        if *role != Role::Request {
            return Err(ClientError::NotARequest(record.name.clone()));
        }

        let response = self.command(record)?;
        check_result(&response)?;
        let handle = response.u32(HANDLE_FIELD)?;
        let server_address = record.u16("server_address").unwrap_or(0);
        CorrelationTable::lock(self.dispatcher.correlation()).register(
            handle,
            server_address,
            record.opcode,
            Instant::now(),
        );
        Ok(handle)
    }

    pub fn request_named(&mut self, name: &str, fields: Vec<(String, Value)>) -> Result<u32> {
        let record = self.command_record(name, fields)?;
        self.request(&record)
    }

    /// Add a network key to a remote node. Concludes with a netkey status.
    pub fn add_netkey(
        &mut self,
        enc_netkey_index: u16,
        server_address: u16,
        netkey_index: u16,
    ) -> Result<u32> {
        self.request_named(
            ADD_NETKEY,
            vec![
                field("enc_netkey_index", Value::U16(enc_netkey_index)),
                field("server_address", Value::U16(server_address)),
                field("netkey_index", Value::U16(netkey_index)),
            ],
        )
    }

    /// List the network keys of a remote node. Concludes with a list.
    pub fn list_netkeys(&mut self, enc_netkey_index: u16, server_address: u16) -> Result<u32> {
        self.request_named(
            LIST_NETKEYS,
            vec![
                field("enc_netkey_index", Value::U16(enc_netkey_index)),
                field("server_address", Value::U16(server_address)),
            ],
        )
    }

    /// Fetch one composition data page. Concludes with the page bytes.
    pub fn get_dcd(&mut self, enc_netkey_index: u16, server_address: u16, page: u8) -> Result<u32> {
        self.request_named(
            GET_DCD,
            vec![
                field("enc_netkey_index", Value::U16(enc_netkey_index)),
                field("server_address", Value::U16(server_address)),
                field("page", Value::U8(page)),
            ],
        )
    }

    /// Stop waiting for a request and ask the stack to cancel it.
    ///
    /// Local state is released even if the stack refuses.
    pub fn cancel_request(&mut self, handle: u32) -> Result<()> {
        if self.dispatcher.release(handle).is_none() {
            debug!(handle, "cancel for untracked handle");
        }
        let response =
            self.command_named(CANCEL_REQUEST, vec![field(HANDLE_FIELD, Value::U32(handle))])?;
        check_result(&response)
    }

    /// Send a vendor model message, split into sequential chunks.
    ///
    /// Chunks of one message are sent back to back; a failed chunk aborts
    /// the rest. Returns the number of chunks sent.
    pub fn send_vendor_message(&mut self, target: &VendorTarget, payload: &[u8]) -> Result<usize> {
        let chunk_size = self.config.vendor_chunk_size.clamp(1, u8::MAX as usize);
        let chunks = split_chunks(payload, chunk_size);
        let total = chunks.len();
        for (chunk, is_final) in chunks {
            let response = self.command_named(VENDOR_SEND, target.fields(chunk, is_final))?;
            check_result(&response)?;
        }
        debug!(bytes = payload.len(), chunks = total, "vendor message sent");
        Ok(total)
    }

    /// Read and dispatch at most one envelope, then run timers.
    ///
    /// Returns whether an envelope was processed.
    pub fn poll(&mut self) -> Result<bool> {
        let received = match self.read_next()? {
            Some(envelope) => {
                self.dispatcher.dispatch(&envelope, Instant::now());
                true
            }
            None => false,
        };
        self.dispatcher.tick(Instant::now());
        Ok(received)
    }

    /// Poll until `running` is cleared or the link fails.
    pub fn run(&mut self, running: &AtomicBool) -> Result<()> {
        info!("receive loop started");
        while running.load(Ordering::SeqCst) {
            self.poll()?;
        }
        info!("receive loop stopped");
        Ok(())
    }

    /// Run timers without reading.
    pub fn tick(&mut self, now: Instant) {
        self.dispatcher.tick(now);
    }

    fn command_record(&self, name: &str, fields: Vec<(String, Value)>) -> Result<Record> {
        let entry = self.registry.lookup(MessageKind::Command, name)?;
        Ok(Record {
            kind: MessageKind::Command,
            opcode: entry.opcode,
            name: entry.name.clone(),
            fields,
        })
    }

    fn read_next(&mut self) -> Result<Option<Envelope>> {
        match self.reader.read_envelope() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(FrameError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(None)
            }
            Err(FrameError::ConnectionClosed) => {
                warn!("NCP link closed");
                Err(ClientError::Disconnected)
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn check_result(response: &Record) -> Result<()> {
    match response.u16(RESULT_FIELD)? {
        0 => Ok(()),
        result => Err(ClientError::Stack {
            command: response.name.clone(),
            result,
        }),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::net::UnixStream;
    use std::thread;
    use std::time::Duration;

    use bgmesh_frame::Opcode;
    use serde_json::json;

    use super::*;
    use crate::dispatch::{Completed, RequestFailure};

    type TestClient = MeshClient<UnixStream, UnixStream>;

    /// Scripted stand-in for the NCP target.
    struct FakeStack {
        reader: EnvelopeReader<UnixStream>,
        writer: EnvelopeWriter<UnixStream>,
        registry: OpcodeRegistry,
    }

    impl FakeStack {
        fn expect_command(&mut self, name: &str) -> Record {
            let envelope = self.reader.read_envelope().unwrap();
            let record = self
                .registry
                .decode(MessageKind::Command, &envelope)
                .unwrap();
            assert_eq!(record.name, name);
            record
        }

        fn send(&mut self, kind: MessageKind, name: &str, fields: serde_json::Value) {
            let record = self.registry.record_from_json(kind, name, &fields).unwrap();
            let envelope = self.registry.encode(&record).unwrap();
            self.writer.write_envelope(&envelope).unwrap();
        }

        fn respond(&mut self, name: &str, fields: serde_json::Value) {
            self.send(MessageKind::Response, name, fields);
        }

        fn event(&mut self, name: &str, fields: serde_json::Value) {
            self.send(MessageKind::Event, name, fields);
        }
    }

    fn pair_with(config: ClientConfig) -> (TestClient, FakeStack) {
        let (host, ncp) = UnixStream::pair().unwrap();
        host.set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let client = MeshClient::new(
            EnvelopeReader::new(host.try_clone().unwrap()),
            EnvelopeWriter::new(host),
            Arc::new(OpcodeRegistry::builtin()),
            config,
        );
        let stack = FakeStack {
            reader: EnvelopeReader::new(ncp.try_clone().unwrap()),
            writer: EnvelopeWriter::new(ncp),
            registry: OpcodeRegistry::builtin(),
        };
        (client, stack)
    }

    fn pair() -> (TestClient, FakeStack) {
        pair_with(ClientConfig::default())
    }

    fn poll_until<F: Fn(&[Delivery]) -> bool>(
        client: &mut TestClient,
        rx: &mpsc::Receiver<Delivery>,
        done: F,
    ) -> Vec<Delivery> {
        let mut seen = Vec::new();
        for _ in 0..100 {
            client.poll().unwrap();
            seen.extend(rx.try_iter());
            if done(&seen) {
                break;
            }
        }
        seen
    }

    #[test]
    fn add_netkey_then_status_concludes() {
        let (mut client, mut stack) = pair();
        let rx = client.subscribe();

        let ncp = thread::spawn(move || {
            let command = stack.expect_command(ADD_NETKEY);
            assert_eq!(command.u16("server_address").unwrap(), 0x0002);
            stack.respond(ADD_NETKEY, json!({ "result": 0, "handle": 7 }));
            stack.event(
                "mesh_config_client_netkey_status",
                json!({ "result": 0, "handle": 7 }),
            );
            stack
        });

        let handle = client.add_netkey(0, 0x0002, 1).unwrap();
        assert_eq!(handle, 7);
        assert!(CorrelationTable::lock(&client.correlation()).contains(7));

        let seen = poll_until(&mut client, &rx, |seen| !seen.is_empty());
        match seen.as_slice() {
            [Delivery::Concluded(conclusion)] => {
                assert_eq!(conclusion.handle, 7);
                assert_eq!(conclusion.request.server_address, 0x0002);
                assert!(matches!(conclusion.outcome, Ok(Completed::Status(_))));
            }
            other => panic!("unexpected deliveries {other:?}"),
        }
        assert!(CorrelationTable::lock(&client.correlation()).is_empty());
        ncp.join().unwrap();
    }

    #[test]
    fn list_netkeys_collects_entries() {
        let (mut client, mut stack) = pair();
        let rx = client.subscribe();

        let ncp = thread::spawn(move || {
            stack.expect_command(LIST_NETKEYS);
            stack.respond(LIST_NETKEYS, json!({ "result": 0, "handle": 3 }));
            for index in [0, 1, 2] {
                stack.event(
                    "mesh_config_client_netkey_list",
                    json!({ "handle": 3, "netkey_indices": [index] }),
                );
            }
            stack.event(
                "mesh_config_client_netkey_list_end",
                json!({ "result": 0, "handle": 3 }),
            );
            stack
        });

        assert_eq!(client.list_netkeys(0, 0x0002).unwrap(), 3);
        let seen = poll_until(&mut client, &rx, |seen| !seen.is_empty());
        match seen.as_slice() {
            [Delivery::Concluded(conclusion)] => match &conclusion.outcome {
                Ok(Completed::List(list)) => assert_eq!(list.elements(), vec![0, 1, 2]),
                other => panic!("expected a list, got {other:?}"),
            },
            other => panic!("unexpected deliveries {other:?}"),
        }
        ncp.join().unwrap();
    }

    #[test]
    fn stack_error_result_is_surfaced() {
        let (mut client, mut stack) = pair();
        let ncp = thread::spawn(move || {
            stack.expect_command(GET_DCD);
            stack.respond(GET_DCD, json!({ "result": 0x0502, "handle": 0 }));
            stack
        });

        match client.get_dcd(0, 0x0002, 0) {
            Err(ClientError::Stack { command, result }) => {
                assert_eq!(command, GET_DCD);
                assert_eq!(result, 0x0502);
            }
            other => panic!("expected a stack error, got {other:?}"),
        }
        assert!(CorrelationTable::lock(&client.correlation()).is_empty());
        ncp.join().unwrap();
    }

    #[test]
    fn events_before_response_are_dispatched_first() {
        let (mut client, mut stack) = pair();
        let rx = client.subscribe();

        let ncp = thread::spawn(move || {
            stack.expect_command("system_hello");
            stack.event(
                "mesh_node_provisioned",
                json!({ "iv_index": 1, "address": 2 }),
            );
            stack.respond("system_hello", json!({ "result": 0 }));
            stack
        });

        let response = client.command_named("system_hello", Vec::new()).unwrap();
        assert_eq!(response.u16("result").unwrap(), 0);
        assert!(matches!(
            rx.try_iter().collect::<Vec<_>>().as_slice(),
            [Delivery::Event(record)] if record.name == "mesh_node_provisioned"
        ));
        ncp.join().unwrap();
    }

    #[test]
    fn non_request_commands_are_refused() {
        let (mut client, _stack) = pair();
        assert!(matches!(
            client.request_named("system_hello", Vec::new()),
            Err(ClientError::NotARequest(_))
        ));
    }

    #[test]
    fn vendor_message_is_chunked_in_order() {
        let config = ClientConfig {
            vendor_chunk_size: 2,
            ..ClientConfig::default()
        };
        let (mut client, mut stack) = pair_with(config);

        let ncp = thread::spawn(move || {
            let mut chunks = Vec::new();
            for _ in 0..3 {
                let chunk = stack.expect_command(VENDOR_SEND);
                chunks.push((
                    chunk.bytes("payload").unwrap().to_vec(),
                    chunk.uint("final").unwrap(),
                ));
                stack.respond(VENDOR_SEND, json!({ "result": 0 }));
            }
            chunks
        });

        let target = VendorTarget {
            elem_index: 0,
            vendor_id: 0x02ff,
            model_id: 0x0001,
            destination_address: 0x0003,
            va_index: -1,
            appkey_index: 0,
            nonrelayed: false,
            opcode: 5,
        };
        let sent = client
            .send_vendor_message(&target, &[0xaa, 0xbb, 0xcc, 0xdd, 0xee])
            .unwrap();
        assert_eq!(sent, 3);
        assert_eq!(
            ncp.join().unwrap(),
            vec![
                (vec![0xaa, 0xbb], 0),
                (vec![0xcc, 0xdd], 0),
                (vec![0xee], 1)
            ]
        );
    }

    #[test]
    fn cancel_releases_local_state() {
        let (mut client, mut stack) = pair();
        let rx = client.subscribe();
        CorrelationTable::lock(&client.correlation()).register(
            11,
            2,
            Opcode::command(0x27, 0x04),
            Instant::now(),
        );

        let ncp = thread::spawn(move || {
            let command = stack.expect_command(CANCEL_REQUEST);
            assert_eq!(command.u32("handle").unwrap(), 11);
            stack.respond(CANCEL_REQUEST, json!({ "result": 0 }));
            stack
        });

        client.cancel_request(11).unwrap();
        assert!(CorrelationTable::lock(&client.correlation()).is_empty());
        client.tick(Instant::now() + Duration::from_secs(60));
        assert!(rx.try_iter().next().is_none());
        ncp.join().unwrap();
    }

    #[test]
    fn request_times_out_through_poll() {
        let config = ClientConfig {
            request_timeout: Duration::from_millis(10),
            ..ClientConfig::default()
        };
        let (mut client, mut stack) = pair_with(config);
        let rx = client.subscribe();

        let ncp = thread::spawn(move || {
            stack.expect_command(ADD_NETKEY);
            stack.respond(ADD_NETKEY, json!({ "result": 0, "handle": 1 }));
            stack
        });
        client.add_netkey(0, 2, 0).unwrap();

        let seen = poll_until(&mut client, &rx, |seen| !seen.is_empty());
        match seen.as_slice() {
            [Delivery::Concluded(conclusion)] => {
                assert!(matches!(
                    conclusion.outcome,
                    Err(RequestFailure::Timeout { .. })
                ));
            }
            other => panic!("unexpected deliveries {other:?}"),
        }
        ncp.join().unwrap();
    }

    #[test]
    fn tick_delivers_timeouts_without_reading() {
        let (mut client, mut stack) = pair();
        let rx = client.subscribe();

        let ncp = thread::spawn(move || {
            stack.expect_command(LIST_NETKEYS);
            stack.respond(LIST_NETKEYS, json!({ "result": 0, "handle": 4 }));
            stack
        });
        client.list_netkeys(0, 2).unwrap();
        let stack = ncp.join().unwrap();

        let later = Instant::now() + client.config().request_timeout + Duration::from_secs(1);
        client.tick(later);
        match rx.try_iter().collect::<Vec<_>>().as_slice() {
            [Delivery::Concluded(conclusion)] => {
                assert_eq!(conclusion.handle, 4);
                assert_eq!(conclusion.family, "netkey");
                assert!(matches!(
                    conclusion.outcome,
                    Err(RequestFailure::Timeout { .. })
                ));
            }
            other => panic!("unexpected deliveries {other:?}"),
        }
        assert!(CorrelationTable::lock(&client.correlation()).is_empty());

        // Already concluded.
        client.tick(later + Duration::from_secs(1));
        assert!(rx.try_iter().next().is_none());
        drop(stack);
    }

    #[test]
    fn missing_response_times_out() {
        let config = ClientConfig {
            response_timeout: Duration::from_millis(50),
            ..ClientConfig::default()
        };
        let (mut client, _stack) = pair_with(config);
        assert!(matches!(
            client.command_named("system_hello", Vec::new()),
            Err(ClientError::ResponseTimeout { .. })
        ));
    }

    #[test]
    fn closed_link_is_disconnected() {
        let (mut client, stack) = pair();
        drop(stack);
        assert!(matches!(client.poll(), Err(ClientError::Disconnected)));
    }

    #[test]
    fn run_stops_when_flag_clears() {
        let (mut client, _stack) = pair();
        let running = AtomicBool::new(false);
        client.run(&running).unwrap();
    }
}
