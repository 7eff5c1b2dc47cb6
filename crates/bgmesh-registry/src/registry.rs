use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use bgmesh_frame::{Envelope, FrameError, MessageKind, Opcode, MAX_PAYLOAD};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::RegistryConfig;
use crate::descriptor::{Entry, Field, PayloadDescriptor, Role, Tail};
use crate::error::{RegistryError, Result};
use crate::layout::{decode_payload, encode_payload};
use crate::table::builtin_entries;
use crate::value::{Record, Value};

const DESCRIPTOR_SUFFIX: &str = ".opcode.json";

/// Identifier-keyed table of payload layouts and dispatch roles.
///
/// Built once, then shared read-only by the codec and the dispatcher.
#[derive(Debug, Clone)]
pub struct OpcodeRegistry {
    entries: HashMap<(MessageKind, Opcode), Entry>,
    names: HashMap<(MessageKind, String), Opcode>,
    config: RegistryConfig,
}

impl OpcodeRegistry {
    /// Create an empty registry with default config.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create an empty registry with explicit config.
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            entries: HashMap::new(),
            names: HashMap::new(),
            config,
        }
    }

    /// Registry holding the builtin table.
    pub fn builtin() -> Self {
        Self::builtin_with_config(RegistryConfig::default())
    }

    pub fn builtin_with_config(config: RegistryConfig) -> Self {
        let mut registry = Self::with_config(config);
        for entry in builtin_entries() {
            registry.insert(entry);
        }
        registry
    }

    /// Validate and add an entry.
    ///
    /// An entry for an identifier already present replaces it. Names must
    /// stay unique per kind.
    pub fn register(&mut self, entry: Entry) -> Result<()> {
        entry.validate()?;
        let name_key = (entry.kind, entry.name.clone());
        if let Some(existing) = self.names.get(&name_key) {
            if *existing != entry.opcode {
                return Err(RegistryError::InvalidDescriptor {
                    name: entry.name,
                    reason: format!("name already registered for {existing}"),
                });
            }
        }
        self.insert(entry);
        Ok(())
    }

    fn insert(&mut self, entry: Entry) {
        let key = (entry.kind, entry.opcode);
        if let Some(old) = self.entries.get(&key) {
            warn!(
                kind = %entry.kind,
                opcode = %entry.opcode,
                old = %old.name,
                new = %entry.name,
                "replacing registered descriptor"
            );
            self.names.remove(&(old.kind, old.name.clone()));
        }
        self.names.insert((entry.kind, entry.name.clone()), entry.opcode);
        self.entries.insert(key, entry);
    }

    /// Entry for an identifier.
    pub fn entry(&self, kind: MessageKind, opcode: Opcode) -> Result<&Entry> {
        self.entries
            .get(&(kind, opcode))
            .ok_or(RegistryError::UnknownOpcode { kind, opcode })
    }

    /// Payload layout for an identifier.
    pub fn shape_of(&self, kind: MessageKind, opcode: Opcode) -> Result<&PayloadDescriptor> {
        self.entry(kind, opcode).map(|entry| &entry.descriptor)
    }

    /// Dispatch role for an identifier.
    pub fn role_of(&self, kind: MessageKind, opcode: Opcode) -> Result<&Role> {
        self.entry(kind, opcode).map(|entry| &entry.role)
    }

    /// Entry registered under `name`.
    pub fn lookup(&self, kind: MessageKind, name: &str) -> Result<&Entry> {
        self.names
            .get(&(kind, name.to_string()))
            .and_then(|opcode| self.entries.get(&(kind, *opcode)))
            .ok_or_else(|| RegistryError::UnknownName {
                kind,
                name: name.to_string(),
            })
    }

    /// Decode an envelope of a known kind.
    pub fn decode(&self, kind: MessageKind, envelope: &Envelope) -> Result<Record> {
        let entry = self.entry(kind, envelope.opcode)?;
        let fields = decode_payload(
            &entry.name,
            &entry.descriptor,
            &envelope.payload,
            self.config.strict_length,
        )?;
        Ok(Record {
            kind,
            opcode: envelope.opcode,
            name: entry.name.clone(),
            fields,
        })
    }

    /// Decode an envelope received from the stack (event or response).
    pub fn decode_incoming(&self, envelope: &Envelope) -> Result<Record> {
        self.decode(envelope.opcode.incoming_kind(), envelope)
    }

    /// Encode a record into an envelope.
    pub fn encode(&self, record: &Record) -> Result<Envelope> {
        let entry = self.entry(record.kind, record.opcode)?;
        if entry.name != record.name {
            return Err(RegistryError::UnknownName {
                kind: record.kind,
                name: record.name.clone(),
            });
        }
        let payload = encode_payload(&entry.name, &entry.descriptor, &record.fields)?;
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD,
            }
            .into());
        }
        Ok(Envelope::new(record.opcode, payload))
    }

    /// Build a record for `name` from a JSON object of field values.
    ///
    /// Integers are JSON numbers, byte blocks and raw arrays are hex
    /// strings, integer arrays are JSON arrays.
    pub fn record_from_json(
        &self,
        kind: MessageKind,
        name: &str,
        json: &serde_json::Value,
    ) -> Result<Record> {
        let entry = self.lookup(kind, name)?;
        let field_err = |field: &str, reason: String| RegistryError::Field {
            name: entry.name.clone(),
            field: field.to_string(),
            reason,
        };
        let empty = serde_json::Map::new();
        let object = match json {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => &empty,
            other => return Err(field_err("", format!("expected an object, got {other}"))),
        };

        for key in object.keys() {
            let known = entry.descriptor.field(key).is_some()
                || entry.descriptor.tail.as_ref().is_some_and(|t| &t.name == key);
            if !known {
                return Err(field_err(key, "not part of the layout".to_string()));
            }
        }

        let mut record = Record::new(kind, entry.opcode, entry.name.clone());
        for field in &entry.descriptor.fields {
            let json = object
                .get(&field.name)
                .ok_or_else(|| field_err(&field.name, "missing".to_string()))?;
            let value =
                Value::from_json_field(field.ty, json).map_err(|reason| field_err(&field.name, reason))?;
            record.fields.push((field.name.clone(), value));
        }
        if let Some(tail) = &entry.descriptor.tail {
            let value = match object.get(&tail.name) {
                Some(json) => {
                    Value::from_json_tail(tail, json).map_err(|reason| field_err(&tail.name, reason))?
                }
                None => return Err(field_err(&tail.name, "missing".to_string())),
            };
            record.fields.push((tail.name.clone(), value));
        }
        Ok(record)
    }

    /// All entries ordered by kind, then identifier.
    pub fn entries(&self) -> Vec<&Entry> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|entry| (entry.kind, entry.opcode));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register descriptors from JSON text: one document or an array.
    ///
    /// Returns the number of entries registered.
    pub fn load_json(&mut self, json: &str) -> Result<usize> {
        let docs: Vec<DescriptorDoc> = match serde_json::from_str::<serde_json::Value>(json)? {
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(serde_json::from_value)
                .collect::<std::result::Result<_, _>>()?,
            single => vec![serde_json::from_value(single)?],
        };
        let count = docs.len();
        for doc in docs {
            self.register(doc.into_entry())?;
        }
        Ok(count)
    }

    /// Builtin table extended with descriptors from a directory.
    pub fn from_directory(path: &Path) -> Result<Self> {
        Self::from_directory_with_config(path, RegistryConfig::default())
    }

    pub fn from_directory_with_config(path: &Path, config: RegistryConfig) -> Result<Self> {
        let mut registry = Self::builtin_with_config(config);
        registry.load_directory(path)?;
        Ok(registry)
    }

    /// Register every `*.opcode.json` file in `path`.
    ///
    /// Symlinked descriptor files are refused. Other files are ignored.
    /// Returns the number of entries registered.
    pub fn load_directory(&mut self, path: &Path) -> Result<usize> {
        let mut file_count = 0usize;
        let mut entry_count = 0usize;

        let mut dir_entries = std::fs::read_dir(path)
            .map_err(|err| RegistryError::LoadFailed(format!("{}: {err}", path.display())))?
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|err| RegistryError::LoadFailed(err.to_string()))?;
        // Later files override earlier ones; keep that deterministic.
        dir_entries.sort_by_key(|entry| entry.file_name());

        for entry in dir_entries {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            let is_descriptor_file = file_name.to_ascii_lowercase().ends_with(DESCRIPTOR_SUFFIX);
            let entry_path = entry.path();
            let path_metadata = std::fs::symlink_metadata(&entry_path)
                .map_err(|err| RegistryError::LoadFailed(err.to_string()))?;
            let file_type = path_metadata.file_type();

            if file_type.is_symlink() {
                if is_descriptor_file {
                    return Err(RegistryError::LoadFailed(format!(
                        "refusing to load descriptor symlink: {file_name}"
                    )));
                }
                continue;
            }
            if !file_type.is_file() || !is_descriptor_file {
                continue;
            }

            file_count = file_count.saturating_add(1);
            if file_count > self.config.max_descriptor_files {
                return Err(RegistryError::LoadFailed(format!(
                    "descriptor file count exceeds configured max ({}): {}",
                    self.config.max_descriptor_files, file_count
                )));
            }

            let file = std::fs::File::open(&entry_path).map_err(|err| {
                RegistryError::LoadFailed(format!(
                    "failed opening descriptor {}: {err}",
                    entry_path.display()
                ))
            })?;
            let opened_metadata = file
                .metadata()
                .map_err(|err| RegistryError::LoadFailed(err.to_string()))?;

            #[cfg(unix)]
            {
                if !same_file_identity(&path_metadata, &opened_metadata) {
                    return Err(RegistryError::LoadFailed(format!(
                        "descriptor file changed during load: {file_name}"
                    )));
                }
            }

            let max_bytes = self.config.max_descriptor_file_size;
            if opened_metadata.len() > max_bytes as u64 {
                return Err(RegistryError::LoadFailed(format!(
                    "descriptor file too large ({} bytes): {file_name}",
                    opened_metadata.len()
                )));
            }

            let read_limit = u64::try_from(max_bytes.saturating_add(1)).unwrap_or(u64::MAX);
            let mut content = String::new();
            file.take(read_limit)
                .read_to_string(&mut content)
                .map_err(|err| {
                    RegistryError::LoadFailed(format!(
                        "failed reading descriptor {}: {err}",
                        entry_path.display()
                    ))
                })?;
            if content.len() > max_bytes {
                return Err(RegistryError::LoadFailed(format!(
                    "descriptor file too large while reading: {file_name}"
                )));
            }

            let loaded = self.load_json(&content).map_err(|err| {
                RegistryError::LoadFailed(format!("{file_name}: {err}"))
            })?;
            debug!(file = %file_name, entries = loaded, "loaded opcode descriptors");
            entry_count += loaded;
        }

        Ok(entry_count)
    }
}

impl Default for OpcodeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum KindDoc {
    Command,
    Response,
    Event,
}

/// On-disk form of one descriptor.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DescriptorDoc {
    kind: KindDoc,
    class: u8,
    message: u8,
    name: String,
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    role: Role,
    #[serde(default)]
    fields: Vec<Field>,
    #[serde(default)]
    tail: Option<Tail>,
}

impl DescriptorDoc {
    fn into_entry(self) -> Entry {
        let (kind, opcode) = match self.kind {
            KindDoc::Command => (MessageKind::Command, Opcode::command(self.class, self.message)),
            KindDoc::Response => (MessageKind::Response, Opcode::command(self.class, self.message)),
            KindDoc::Event => (MessageKind::Event, Opcode::event(self.class, self.message)),
        };
        Entry {
            kind,
            opcode,
            family: self.family.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            descriptor: PayloadDescriptor {
                fields: self.fields,
                tail: self.tail,
            },
            role: self.role,
        }
    }
}

#[cfg(unix)]
fn same_file_identity(
    path_metadata: &std::fs::Metadata,
    opened_metadata: &std::fs::Metadata,
) -> bool {
    use std::os::unix::fs::MetadataExt;
    path_metadata.dev() == opened_metadata.dev() && path_metadata.ino() == opened_metadata.ino()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use bytes::Bytes;
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::table::CLASS_MESH_CONFIG_CLIENT;

    const CUSTOM_EVENT: &str = r#"{
        "kind": "event",
        "class": 200,
        "message": 1,
        "name": "acme_sensor_reading",
        "family": "acme",
        "fields": [
            { "name": "sensor", "type": "u8" },
            { "name": "celsius", "type": "i16" }
        ]
    }"#;

    /// Record for `entry` with every integer derived from `seed` and the
    /// trailing array cut from `raw`.
    fn record_for(entry: &Entry, seed: u32, raw: &[u8]) -> Record {
        let mut record = Record::new(entry.kind, entry.opcode, entry.name.clone());
        for field in &entry.descriptor.fields {
            let value = match field.ty {
                crate::FieldType::U8 => Value::U8(seed as u8),
                crate::FieldType::I8 => Value::I8(seed as i8),
                crate::FieldType::U16 => Value::U16(seed as u16),
                crate::FieldType::I16 => Value::I16(seed as i16),
                crate::FieldType::U32 => Value::U32(seed),
                crate::FieldType::I32 => Value::I32(seed as i32),
                crate::FieldType::Fixed(n) => Value::Fixed(Bytes::from(
                    seed.to_le_bytes().iter().copied().cycle().take(n).collect::<Vec<_>>(),
                )),
            };
            record.fields.push((field.name.clone(), value));
        }
        if let Some(tail) = &entry.descriptor.tail {
            let value = match tail.element {
                crate::Element::Byte => Value::Bytes(Bytes::copy_from_slice(raw)),
                crate::Element::Uint(size) => Value::Elements(
                    raw.chunks_exact(size)
                        .map(|c| c.iter().rev().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
                        .collect(),
                ),
            };
            record.fields.push((tail.name.clone(), value));
        }
        record
    }

    #[test]
    fn builtin_round_trips_every_entry() {
        let registry = OpcodeRegistry::builtin();
        let full: Vec<u8> = (0..=254u8).collect();
        // (seed, tail): zero, i8::MIN and u32::MAX, empty and 255-byte tails
        let cases: [(u32, &[u8]); 5] = [
            (0, &[]),
            (0x0000_0080, &[0xaa]),
            (0x8000_0000, &[0xaa, 0xbb]),
            (u32::MAX, &[]),
            (u32::MAX, full.as_slice()),
        ];
        for entry in registry.entries() {
            for (seed, raw) in cases {
                let record = record_for(entry, seed, raw);
                let envelope = registry.encode(&record).unwrap();
                assert_eq!(
                    registry.decode(entry.kind, &envelope).unwrap(),
                    record,
                    "{} seed {seed:#x} tail {}",
                    entry.name,
                    raw.len()
                );
            }
        }
    }

    #[test]
    fn builtin_byte_tails_stop_at_prefix_limit() {
        let registry = OpcodeRegistry::builtin();
        let over = vec![0x11u8; 256];
        let mut checked = 0;
        for entry in registry.entries() {
            let Some(tail) = &entry.descriptor.tail else { continue };
            if tail.element != crate::Element::Byte || tail.prefix.max_len() != 255 {
                continue;
            }
            let record = record_for(entry, 1, &over);
            assert!(
                matches!(registry.encode(&record), Err(RegistryError::Field { .. })),
                "{} accepted a 256-byte tail",
                entry.name
            );
            checked += 1;
        }
        assert!(checked > 0);
    }

    proptest! {
        #[test]
        fn builtin_round_trips_generated_values(
            seed in any::<u32>(),
            raw in prop::collection::vec(any::<u8>(), 0..=255),
        ) {
            let registry = OpcodeRegistry::builtin();
            for entry in registry.entries() {
                let record = record_for(entry, seed, &raw);
                let envelope = registry.encode(&record).unwrap();
                prop_assert_eq!(registry.decode(entry.kind, &envelope).unwrap(), record);
            }
        }
    }

    #[test]
    fn add_netkey_response_decodes_handle() {
        let registry = OpcodeRegistry::builtin();
        let opcode = Opcode::command(CLASS_MESH_CONFIG_CLIENT, 0x04);
        let envelope = Envelope::new(opcode, vec![0x00, 0x00, 0x07, 0x00, 0x00, 0x00]);

        let record = registry.decode_incoming(&envelope).unwrap();
        assert_eq!(record.kind, MessageKind::Response);
        assert_eq!(record.name, "mesh_config_client_add_netkey");
        assert_eq!(record.u16("result").unwrap(), 0);
        assert_eq!(record.u32("handle").unwrap(), 7);
        assert_eq!(
            registry.role_of(MessageKind::Command, opcode).unwrap(),
            &Role::Request
        );
    }

    #[test]
    fn unknown_opcode_is_recoverable() {
        let registry = OpcodeRegistry::builtin();
        let envelope = Envelope::new(Opcode::event(0xee, 0x01), Vec::new());
        assert!(matches!(
            registry.decode_incoming(&envelope),
            Err(RegistryError::UnknownOpcode { .. })
        ));
        // Registry still usable.
        assert!(registry
            .lookup(MessageKind::Command, "system_hello")
            .is_ok());
    }

    #[test]
    fn malformed_payload_is_a_mismatch() {
        let registry = OpcodeRegistry::builtin();
        let opcode = Opcode::event(CLASS_MESH_CONFIG_CLIENT, 0x01);
        let envelope = Envelope::new(opcode, vec![0x00]);
        assert!(matches!(
            registry.decode_incoming(&envelope),
            Err(RegistryError::PayloadMismatch { .. })
        ));
    }

    #[test]
    fn lenient_registry_ignores_appended_fields() {
        let registry = OpcodeRegistry::builtin_with_config(RegistryConfig {
            strict_length: false,
            ..RegistryConfig::default()
        });
        let opcode = Opcode::event(CLASS_MESH_CONFIG_CLIENT, 0x01);
        let envelope = Envelope::new(opcode, vec![0, 0, 9, 0, 0, 0, 0xff, 0xff]);
        let record = registry.decode_incoming(&envelope).unwrap();
        assert_eq!(record.u32("handle").unwrap(), 9);
    }

    #[test]
    fn record_from_json_builds_commands() {
        let registry = OpcodeRegistry::builtin();
        let record = registry
            .record_from_json(
                MessageKind::Command,
                "mesh_config_client_add_netkey",
                &json!({ "enc_netkey_index": 0, "server_address": 0x0002, "netkey_index": 1 }),
            )
            .unwrap();
        let envelope = registry.encode(&record).unwrap();
        assert_eq!(&envelope.payload[..], &[0x00, 0x00, 0x02, 0x00, 0x01, 0x00]);

        assert!(matches!(
            registry.record_from_json(
                MessageKind::Command,
                "mesh_config_client_add_netkey",
                &json!({ "server_address": 2, "netkey_index": 1 }),
            ),
            Err(RegistryError::Field { .. })
        ));
        assert!(registry
            .record_from_json(MessageKind::Command, "system_hello", &serde_json::Value::Null)
            .is_ok());
        assert!(matches!(
            registry.record_from_json(MessageKind::Command, "nope", &json!({})),
            Err(RegistryError::UnknownName { .. })
        ));
    }

    #[test]
    fn encode_checks_name_and_payload_limit() {
        let mut registry = OpcodeRegistry::builtin();
        let record = registry
            .record_from_json(
                MessageKind::Event,
                "mesh_config_client_dcd_data",
                &json!({ "handle": 1, "page": 0, "data": "00" }),
            )
            .unwrap();
        assert!(registry.encode(&record).is_ok());

        let mut named_wrong = record.clone();
        named_wrong.name = "other".to_string();
        assert!(registry.encode(&named_wrong).is_err());

        registry
            .load_json(
                r#"{"kind":"event","class":200,"message":9,"name":"acme_dump",
                    "tail":{"name":"data","prefix":"u16"}}"#,
            )
            .unwrap();
        let oversized = Record::new(MessageKind::Event, Opcode::event(200, 9), "acme_dump")
            .with("data", Value::Bytes(Bytes::from(vec![0u8; MAX_PAYLOAD])));
        assert!(matches!(
            registry.encode(&oversized),
            Err(RegistryError::Frame(FrameError::PayloadTooLarge { .. }))
        ));
    }

    #[test]
    fn load_json_registers_single_and_array() {
        let mut registry = OpcodeRegistry::new();
        assert_eq!(registry.load_json(CUSTOM_EVENT).unwrap(), 1);
        assert_eq!(
            registry
                .load_json(
                    r#"[
                        {"kind":"command","class":200,"message":0,"name":"acme_ping"},
                        {"kind":"response","class":200,"message":0,"name":"acme_ping",
                         "fields":[{"name":"result","type":"u16"}]}
                    ]"#
                )
                .unwrap(),
            2
        );
        assert_eq!(registry.len(), 3);

        let entry = registry
            .lookup(MessageKind::Event, "acme_sensor_reading")
            .unwrap();
        assert_eq!(entry.opcode, Opcode::event(200, 1));
        assert_eq!(entry.family, "acme");

        let ping = registry.lookup(MessageKind::Command, "acme_ping").unwrap();
        assert_eq!(ping.family, "acme_ping");
    }

    #[test]
    fn load_json_rejects_invalid_documents() {
        let mut registry = OpcodeRegistry::new();
        assert!(matches!(
            registry.load_json(r#"{"kind":"event","class":1}"#),
            Err(RegistryError::InvalidJson(_))
        ));
        assert!(matches!(
            registry.load_json(
                r#"{"kind":"event","class":1,"message":1,"name":"x","role":"status"}"#
            ),
            Err(RegistryError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn chunk_roles_load_from_json() {
        let mut registry = OpcodeRegistry::new();
        registry
            .load_json(
                r#"{
                    "kind": "event", "class": 201, "message": 0, "name": "acme_blob",
                    "role": { "chunk": {
                        "final_field": "final",
                        "slot_fields": ["stream"],
                        "message_fields": ["seq"]
                    } },
                    "fields": [
                        { "name": "stream", "type": "u8" },
                        { "name": "seq", "type": "u16" },
                        { "name": "final", "type": "u8" }
                    ],
                    "tail": { "name": "data", "prefix": "u16" }
                }"#,
            )
            .unwrap();
        let entry = registry.lookup(MessageKind::Event, "acme_blob").unwrap();
        assert_eq!(entry.role.as_str(), "chunk");
    }

    #[test]
    fn replacement_keeps_names_consistent() {
        let mut registry = OpcodeRegistry::new();
        registry.load_json(CUSTOM_EVENT).unwrap();
        registry
            .load_json(
                r#"{"kind":"event","class":200,"message":1,"name":"acme_sensor_v2","fields":[]}"#,
            )
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry
            .lookup(MessageKind::Event, "acme_sensor_reading")
            .is_err());
        assert!(registry.lookup(MessageKind::Event, "acme_sensor_v2").is_ok());

        // Same name on a different identifier is refused.
        assert!(registry
            .load_json(
                r#"{"kind":"event","class":200,"message":2,"name":"acme_sensor_v2"}"#
            )
            .is_err());
    }

    fn make_temp_descriptor_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "bgmesh-registry-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_descriptor(dir: &Path, file_name: &str, contents: &str) {
        std::fs::write(dir.join(file_name), contents.as_bytes()).unwrap();
    }

    #[test]
    fn from_directory_extends_builtin() {
        let dir = make_temp_descriptor_dir("from-directory");
        write_descriptor(&dir, "acme.opcode.json", CUSTOM_EVENT);
        write_descriptor(&dir, "notes.json", "not json at all");

        let registry = OpcodeRegistry::from_directory(&dir).unwrap();
        assert_eq!(registry.len(), OpcodeRegistry::builtin().len() + 1);

        let envelope = Envelope::new(Opcode::event(200, 1), vec![0x03, 0xfe, 0xff]);
        let record = registry.decode_incoming(&envelope).unwrap();
        assert_eq!(record.get("celsius"), Some(&Value::I16(-2)));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn broken_descriptor_file_fails_load() {
        let dir = make_temp_descriptor_dir("broken");
        write_descriptor(&dir, "bad.opcode.json", "{");
        assert!(matches!(
            OpcodeRegistry::from_directory(&dir),
            Err(RegistryError::LoadFailed(_))
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_descriptor_is_rejected() {
        let dir = make_temp_descriptor_dir("symlink");
        let target = dir.join("target.json");
        std::fs::write(&target, CUSTOM_EVENT.as_bytes()).unwrap();
        std::os::unix::fs::symlink(&target, dir.join("acme.opcode.json")).unwrap();

        assert!(matches!(
            OpcodeRegistry::from_directory(&dir),
            Err(RegistryError::LoadFailed(_))
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn descriptor_limits_are_enforced() {
        let dir = make_temp_descriptor_dir("limits");
        write_descriptor(&dir, "a.opcode.json", CUSTOM_EVENT);
        write_descriptor(
            &dir,
            "b.opcode.json",
            r#"{"kind":"event","class":200,"message":2,"name":"acme_other"}"#,
        );

        let count = RegistryConfig {
            max_descriptor_files: 1,
            ..RegistryConfig::default()
        };
        assert!(matches!(
            OpcodeRegistry::from_directory_with_config(&dir, count),
            Err(RegistryError::LoadFailed(_))
        ));

        let size = RegistryConfig {
            max_descriptor_file_size: 8,
            ..RegistryConfig::default()
        };
        assert!(matches!(
            OpcodeRegistry::from_directory_with_config(&dir, size),
            Err(RegistryError::LoadFailed(_))
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn same_file_identity_distinguishes_replaced_file() {
        let dir = make_temp_descriptor_dir("identity-check");
        let first = dir.join("first.json");
        let second = dir.join("second.json");
        std::fs::write(&first, CUSTOM_EVENT).unwrap();
        std::fs::write(&second, CUSTOM_EVENT).unwrap();

        let first_meta = std::fs::symlink_metadata(&first).unwrap();
        let opened_first = std::fs::File::open(&first).unwrap().metadata().unwrap();
        let opened_second = std::fs::File::open(&second).unwrap().metadata().unwrap();

        assert!(same_file_identity(&first_meta, &opened_first));
        assert!(!same_file_identity(&first_meta, &opened_second));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
