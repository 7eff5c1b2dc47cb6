//! Routes decoded events to application callbacks.
//!
//! One-shot events are delivered as they arrive. Terminal status events,
//! list sequences and multi-part messages pass through the correlation
//! table and the reassemblers first and are delivered once complete.

use std::collections::HashMap;
use std::fmt;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use bgmesh_frame::{Envelope, MessageKind, Opcode};
use bgmesh_registry::{Entry, OpcodeRegistry, Record, Role, Value, HANDLE_FIELD, RESULT_FIELD};
use bytes::{Bytes, BytesMut};
use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::correlation::{CorrelationTable, PendingRequest, SharedCorrelation};
use crate::error::{ClientError, Result};
use crate::fragment::{ChunkOutcome, FragmentKey, FragmentReassembler};
use crate::list::ListReassembler;

/// Selects which deliveries a handler receives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    /// Events and messages with this identifier, and conclusions of
    /// requests issued with this command identifier.
    Opcode(Opcode),
    /// Everything belonging to a registry family, e.g. `netkey`.
    Family(String),
    /// Diagnostics only.
    Diagnostics,
    /// Every delivery.
    All,
}

/// A logical value handed to the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "delivery", rename_all = "snake_case")]
pub enum Delivery {
    /// A self-contained event.
    Event(Record),
    /// A reassembled multi-part message; its trailing array holds the
    /// whole payload.
    Message(Record),
    /// A tracked request finished, successfully or not.
    Concluded(Conclusion),
    /// Stale handle, interleaving or abandoned fragments.
    Diagnostic(Diagnostic),
}

/// End of a tracked request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conclusion {
    pub handle: u32,
    pub family: String,
    pub request: PendingRequest,
    #[serde(serialize_with = "serialize_outcome")]
    pub outcome: std::result::Result<Completed, RequestFailure>,
}

impl Conclusion {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Completed {
    /// Terminal status event with result 0.
    Status(Record),
    /// List items in arrival order plus the terminator.
    List(ListResult),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RequestFailure {
    /// The stack reported a non-zero result; partial list data is discarded.
    #[serde(rename = "stack_error")]
    Stack { result: u16, status: Record },
    /// No terminal event before the deadline.
    Timeout { after: Duration },
}

/// A list answer collected for one handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListResult {
    pub items: Vec<Record>,
    pub end: Record,
}

impl ListResult {
    /// Integer entries of all items, in order.
    pub fn elements(&self) -> Vec<u32> {
        self.tails()
            .filter_map(Value::as_elements)
            .flatten()
            .copied()
            .collect()
    }

    /// Byte data of all items, concatenated.
    pub fn data(&self) -> Bytes {
        let mut out = BytesMut::new();
        for bytes in self.tails().filter_map(Value::as_bytes) {
            out.extend_from_slice(bytes);
        }
        out.freeze()
    }

    fn tails(&self) -> impl Iterator<Item = &Value> {
        self.items
            .iter()
            .filter_map(|item| item.fields.last())
            .map(|(_, value)| value)
    }
}

/// Non-fatal protocol anomaly reported to the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "diagnostic", rename_all = "snake_case")]
pub enum Diagnostic {
    /// An event referenced a handle with no outstanding request.
    StaleHandle { handle: u32, event: String },
    /// An event collided with an open buffer of another message.
    Interleaving {
        event: String,
        key: String,
        open: String,
        offending: String,
    },
    /// An incomplete multi-part message went idle and was dropped.
    FragmentAbandoned {
        key: String,
        bytes: usize,
        chunks: usize,
    },
    /// A multi-part message outgrew the buffer limit and was dropped.
    FragmentTooLarge { event: String, size: usize, max: usize },
}

impl Diagnostic {
    fn from_error(err: ClientError, event: &str) -> std::result::Result<Self, ClientError> {
        let event = event.to_string();
        match err {
            ClientError::NotFound { handle } => Ok(Diagnostic::StaleHandle { handle, event }),
            ClientError::Interleaving {
                key,
                open,
                offending,
            } => Ok(Diagnostic::Interleaving {
                event,
                key,
                open,
                offending,
            }),
            ClientError::FragmentTooLarge { size, max } => {
                Ok(Diagnostic::FragmentTooLarge { event, size, max })
            }
            other => Err(other),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::StaleHandle { handle, event } => {
                write!(f, "{event} for unknown handle {handle}")
            }
            Diagnostic::Interleaving {
                event,
                key,
                open,
                offending,
            } => write!(f, "{event} interleaves {offending} into {key} (open: {open})"),
            Diagnostic::FragmentAbandoned { key, bytes, chunks } => {
                write!(f, "abandoned {key} after {chunks} chunks ({bytes} bytes)")
            }
            Diagnostic::FragmentTooLarge { event, size, max } => {
                write!(f, "{event} reassembly exceeds {max} bytes ({size})")
            }
        }
    }
}

pub(crate) fn serialize_opcode<S: Serializer>(
    opcode: &Opcode,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(opcode)
}

fn serialize_outcome<S: Serializer>(
    outcome: &std::result::Result<Completed, RequestFailure>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match outcome {
        Ok(completed) => completed.serialize(serializer),
        Err(failure) => failure.serialize(serializer),
    }
}

/// Callback invoked for every matching delivery.
pub type Handler = Box<dyn FnMut(&Delivery) + Send>;

/// Turns incoming events into deliveries.
pub struct Dispatcher {
    registry: Arc<OpcodeRegistry>,
    correlation: SharedCorrelation,
    lists: ListReassembler,
    fragments: FragmentReassembler,
    handlers: HashMap<Route, Vec<Handler>>,
    sink: Option<mpsc::Sender<Delivery>>,
    config: ClientConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<OpcodeRegistry>,
        correlation: SharedCorrelation,
        config: ClientConfig,
    ) -> Self {
        Self {
            registry,
            correlation,
            lists: ListReassembler::new(),
            fragments: FragmentReassembler::new(config.max_fragment_payload),
            handlers: HashMap::new(),
            sink: None,
            config,
        }
    }

    /// Register a callback for a route. Several callbacks may share a route.
    pub fn on(&mut self, route: Route, handler: impl FnMut(&Delivery) + Send + 'static) {
        self.handlers
            .entry(route)
            .or_default()
            .push(Box::new(handler));
    }

    /// Receive every delivery on a channel. Replaces an earlier channel.
    pub fn subscribe(&mut self) -> mpsc::Receiver<Delivery> {
        let (tx, rx) = mpsc::channel();
        self.sink = Some(tx);
        rx
    }

    pub fn correlation(&self) -> &SharedCorrelation {
        &self.correlation
    }

    /// Process one incoming event.
    ///
    /// Unknown identifiers and malformed payloads are logged and dropped.
    pub fn dispatch(&mut self, envelope: &Envelope, now: Instant) {
        let opcode = envelope.opcode;
        if !opcode.is_event() {
            warn!(%opcode, "response outside of a command exchange, dropping");
            return;
        }

        let registry = Arc::clone(&self.registry);
        let entry = match registry.entry(MessageKind::Event, opcode) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(%opcode, error = %err, "dropping event");
                return;
            }
        };
        let record = match registry.decode(MessageKind::Event, envelope) {
            Ok(record) => record,
            Err(err) => {
                warn!(%opcode, error = %err, "dropping malformed event");
                return;
            }
        };
        debug!(event = %record.name, role = entry.role.as_str(), "event received");

        let name = record.name.clone();
        let handled = match &entry.role {
            Role::Plain | Role::Request => {
                self.deliver(Delivery::Event(record));
                Ok(())
            }
            Role::Status => self.on_terminal(record, &entry.family, false),
            Role::ListEnd => self.on_terminal(record, &entry.family, true),
            Role::Modified => self.on_modified(record),
            Role::ListItem => self.on_list_item(record, &entry.family, now),
            Role::Chunk { .. } => self.on_chunk(record, entry, now),
        };

        if let Err(err) = handled {
            match Diagnostic::from_error(err, &name) {
                Ok(diagnostic) => {
                    warn!(event = %name, %diagnostic, "protocol anomaly");
                    self.deliver(Delivery::Diagnostic(diagnostic));
                }
                Err(err) => warn!(event = %name, error = %err, "dropping event"),
            }
        }
    }

    /// Conclude requests past their deadline and drop idle fragment buffers.
    pub fn tick(&mut self, now: Instant) {
        let expired = CorrelationTable::lock(&self.correlation).tick(now);
        for timed_out in expired {
            let request = timed_out.request;
            let dropped = self.lists.discard(request.handle);
            warn!(
                handle = request.handle,
                opcode = %request.opcode,
                dropped_items = dropped,
                "request timed out"
            );
            let conclusion = Conclusion {
                handle: request.handle,
                family: self.request_family(&request).unwrap_or_default(),
                outcome: Err(RequestFailure::Timeout {
                    after: request.timeout,
                }),
                request,
            };
            self.deliver(Delivery::Concluded(conclusion));
        }

        for abandoned in self
            .fragments
            .expire_idle(now, self.config.fragment_idle_timeout)
        {
            let diagnostic = Diagnostic::FragmentAbandoned {
                key: abandoned.key.to_string(),
                bytes: abandoned.bytes,
                chunks: abandoned.chunks,
            };
            warn!(%diagnostic, "fragment buffer abandoned");
            self.deliver(Delivery::Diagnostic(diagnostic));
        }
    }

    /// Stop tracking `handle` locally and drop its partial list data.
    pub fn release(&mut self, handle: u32) -> Option<PendingRequest> {
        self.lists.discard(handle);
        CorrelationTable::lock(&self.correlation).cancel(handle)
    }

    fn on_terminal(&mut self, record: Record, family: &str, is_list: bool) -> Result<()> {
        let handle = record.u32(HANDLE_FIELD)?;
        let result = record.u16(RESULT_FIELD)?;

        // A terminator of another family leaves the request and its items open.
        if is_list {
            self.lists.check_family(handle, family)?;
        }

        let concluded = CorrelationTable::lock(&self.correlation).on_status_event(handle, result);
        let request = match concluded {
            Ok(request) => request,
            Err(err) => {
                self.lists.discard(handle);
                return Err(err);
            }
        };
        let items = if is_list {
            self.lists.finish(handle, family)?
        } else {
            self.lists.discard(handle);
            Vec::new()
        };

        let outcome = if result != 0 {
            debug!(handle, result, discarded = items.len(), "request failed");
            Err(RequestFailure::Stack {
                result,
                status: record,
            })
        } else if is_list {
            Ok(Completed::List(ListResult { items, end: record }))
        } else {
            Ok(Completed::Status(record))
        };

        self.deliver(Delivery::Concluded(Conclusion {
            handle,
            family: self
                .request_family(&request)
                .unwrap_or_else(|| family.to_string()),
            request,
            outcome,
        }));
        Ok(())
    }

    fn on_modified(&mut self, record: Record) -> Result<()> {
        let handle = record.u32(HANDLE_FIELD)?;
        CorrelationTable::lock(&self.correlation).on_modified(handle, self.config.lpn_timeout)?;
        self.deliver(Delivery::Event(record));
        Ok(())
    }

    fn on_list_item(&mut self, record: Record, family: &str, now: Instant) -> Result<()> {
        let handle = record.u32(HANDLE_FIELD)?;
        if !CorrelationTable::lock(&self.correlation).contains(handle) {
            return Err(ClientError::NotFound { handle });
        }
        self.lists.push(handle, family, record, now)
    }

    fn on_chunk(&mut self, mut record: Record, entry: &Entry, now: Instant) -> Result<()> {
        let Role::Chunk {
            final_field,
            slot_fields,
            message_fields,
        } = &entry.role
        else {
            return Ok(());
        };
        let Some(tail) = &entry.descriptor.tail else {
            return Ok(());
        };

        let values = |names: &[String]| {
            names
                .iter()
                .map(|name| record.uint(name))
                .collect::<bgmesh_registry::Result<Vec<u64>>>()
        };
        let key = FragmentKey {
            opcode: record.opcode,
            slot: values(slot_fields.as_slice())?,
            message: values(message_fields.as_slice())?,
        };
        let is_final = record.uint(final_field)? != 0;
        let data = record.bytes(&tail.name)?.clone();

        match self.fragments.push_chunk(&key, is_final, &data, now)? {
            ChunkOutcome::Pending => {
                debug!(%key, bytes = data.len(), "chunk buffered");
            }
            ChunkOutcome::Complete { payload, .. } => {
                if let Some((_, value)) = record.fields.iter_mut().find(|(n, _)| *n == tail.name) {
                    *value = Value::Bytes(payload);
                }
                self.deliver(Delivery::Message(record));
            }
        }
        Ok(())
    }

    fn request_family(&self, request: &PendingRequest) -> Option<String> {
        self.registry
            .entry(MessageKind::Command, request.opcode)
            .ok()
            .map(|entry| entry.family.clone())
    }

    fn deliver(&mut self, delivery: Delivery) {
        let mut routes = Vec::with_capacity(3);
        match &delivery {
            Delivery::Event(record) | Delivery::Message(record) => {
                routes.push(Route::Opcode(record.opcode));
                if let Ok(entry) = self.registry.entry(record.kind, record.opcode) {
                    routes.push(Route::Family(entry.family.clone()));
                }
            }
            Delivery::Concluded(conclusion) => {
                routes.push(Route::Opcode(conclusion.request.opcode));
                routes.push(Route::Family(conclusion.family.clone()));
            }
            Delivery::Diagnostic(_) => routes.push(Route::Diagnostics),
        }
        routes.push(Route::All);

        for route in &routes {
            if let Some(handlers) = self.handlers.get_mut(route) {
                for handler in handlers.iter_mut() {
                    handler(&delivery);
                }
            }
        }

        let closed = self
            .sink
            .as_ref()
            .is_some_and(|tx| tx.send(delivery).is_err());
        if closed {
            debug!("delivery channel closed, dropping sink");
            self.sink = None;
        }
    }
}
