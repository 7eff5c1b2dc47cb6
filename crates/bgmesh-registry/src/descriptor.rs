//! Payload layouts and dispatch roles.

use bgmesh_frame::{MessageKind, Opcode};
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

/// Field carrying the correlation handle in requests and their events.
pub const HANDLE_FIELD: &str = "handle";

/// Field carrying the stack result code (0 = success).
pub const RESULT_FIELD: &str = "result";

/// Fixed-width field types. All integers are little endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    /// Opaque block of a fixed size (addresses, UUIDs, keys).
    Fixed(usize),
}

impl FieldType {
    /// Encoded width in bytes.
    pub fn width(self) -> usize {
        match self {
            FieldType::U8 | FieldType::I8 => 1,
            FieldType::U16 | FieldType::I16 => 2,
            FieldType::U32 | FieldType::I32 => 4,
            FieldType::Fixed(n) => n,
        }
    }
}

/// A named fixed-width field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Width of the byte count preceding a trailing array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthPrefix {
    #[default]
    U8,
    U16,
}

impl LengthPrefix {
    pub fn width(self) -> usize {
        match self {
            LengthPrefix::U8 => 1,
            LengthPrefix::U16 => 2,
        }
    }

    /// Largest byte count the prefix can express.
    pub fn max_len(self) -> usize {
        match self {
            LengthPrefix::U8 => u8::MAX as usize,
            LengthPrefix::U16 => u16::MAX as usize,
        }
    }
}

/// Interpretation of the bytes of a trailing array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Element {
    /// Raw opaque bytes.
    #[default]
    Byte,
    /// Unsigned little-endian integers of 1, 2 or 4 bytes each.
    Uint(usize),
}

/// Variable-length array that ends a payload.
///
/// The prefix counts bytes, not elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tail {
    pub name: String,
    #[serde(default)]
    pub prefix: LengthPrefix,
    #[serde(default)]
    pub element: Element,
}

impl Tail {
    /// Raw byte array with a one-byte count.
    pub fn bytes(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: LengthPrefix::U8,
            element: Element::Byte,
        }
    }

    /// Array of `size`-byte integers with a one-byte count.
    pub fn elements(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            prefix: LengthPrefix::U8,
            element: Element::Uint(size),
        }
    }
}

/// Fixed fields followed by an optional trailing array.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadDescriptor {
    pub fields: Vec<Field>,
    pub tail: Option<Tail>,
}

impl PayloadDescriptor {
    /// Smallest valid payload size.
    pub fn min_len(&self) -> usize {
        let fixed: usize = self.fields.iter().map(|f| f.ty.width()).sum();
        fixed + self.tail.as_ref().map_or(0, |t| t.prefix.width())
    }

    /// Look up a fixed field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn has_field(&self, name: &str, ty: FieldType) -> bool {
        self.field(name).is_some_and(|f| f.ty == ty)
    }
}

/// What a message means to the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Self-contained; delivered as is.
    #[default]
    Plain,
    /// Command whose successful response carries a correlation handle.
    Request,
    /// Terminal status for a handle (`result`, `handle`).
    Status,
    /// The request for a handle was acknowledged by a Friend on behalf of
    /// a sleeping LPN; its timeout is extended.
    Modified,
    /// One chunk of a list answer for a handle; entries live in the tail.
    ListItem,
    /// Terminator of a list answer (`result`, `handle`).
    ListEnd,
    /// One chunk of a multi-part message marked by a final flag.
    Chunk {
        /// u8 field set to 1 on the last chunk.
        final_field: String,
        /// Fields identifying the reassembly buffer.
        slot_fields: Vec<String>,
        /// Fields identifying the message within the buffer.
        message_fields: Vec<String>,
    },
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Plain => "plain",
            Role::Request => "request",
            Role::Status => "status",
            Role::Modified => "modified",
            Role::ListItem => "list_item",
            Role::ListEnd => "list_end",
            Role::Chunk { .. } => "chunk",
        }
    }
}

/// A registered message: identity, layout and role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub kind: MessageKind,
    pub opcode: Opcode,
    /// Unique name within `kind`, e.g. `mesh_config_client_netkey_status`.
    pub name: String,
    /// Routing group shared by related messages, e.g. `netkey`.
    pub family: String,
    pub descriptor: PayloadDescriptor,
    pub role: Role,
}

impl Entry {
    /// Check that the layout carries the fields its role relies on.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| RegistryError::InvalidDescriptor {
            name: self.name.clone(),
            reason,
        };

        if self.opcode.is_event() != (self.kind == MessageKind::Event) {
            return Err(invalid(format!(
                "opcode {} does not match kind {}",
                self.opcode, self.kind
            )));
        }

        let desc = &self.descriptor;
        let mut seen = std::collections::HashSet::new();
        for name in desc.fields.iter().map(|f| &f.name).chain(desc.tail.iter().map(|t| &t.name)) {
            if !seen.insert(name.as_str()) {
                return Err(invalid(format!("duplicate field '{name}'")));
            }
        }
        if let Some(Element::Uint(size)) = desc.tail.as_ref().map(|t| t.element) {
            if !matches!(size, 1 | 2 | 4) {
                return Err(invalid(format!("unsupported element size {size}")));
            }
        }

        let needs_event = !matches!(self.role, Role::Plain | Role::Request);
        if needs_event && self.kind != MessageKind::Event {
            return Err(invalid(format!("role {} requires an event", self.role.as_str())));
        }
        if matches!(self.role, Role::Request) && self.kind != MessageKind::Command {
            return Err(invalid("role request requires a command".to_string()));
        }

        let handle = desc.has_field(HANDLE_FIELD, FieldType::U32);
        let result = desc.has_field(RESULT_FIELD, FieldType::U16);
        match &self.role {
            Role::Plain | Role::Request => {}
            Role::Status | Role::ListEnd if !(handle && result) => {
                return Err(invalid("missing u16 result or u32 handle".to_string()));
            }
            Role::Modified if !handle => {
                return Err(invalid("missing u32 handle".to_string()));
            }
            Role::ListItem if !handle || desc.tail.is_none() => {
                return Err(invalid("missing u32 handle or trailing array".to_string()));
            }
            Role::Chunk {
                final_field,
                slot_fields,
                message_fields,
            } => {
                if !desc.has_field(final_field, FieldType::U8) {
                    return Err(invalid(format!("missing u8 final field '{final_field}'")));
                }
                if desc.tail.as_ref().map(|t| t.element) != Some(Element::Byte) {
                    return Err(invalid("chunk payload must be a byte array".to_string()));
                }
                for name in slot_fields.iter().chain(message_fields) {
                    match desc.field(name) {
                        Some(f) if !matches!(f.ty, FieldType::Fixed(_)) => {}
                        _ => return Err(invalid(format!("missing integer key field '{name}'"))),
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}
