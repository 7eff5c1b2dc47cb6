//! Opcode registry for BGAPI mesh messages.
//!
//! Maps every known identifier to its payload layout and to the role it
//! plays in a request/response exchange. One generic codec driven by the
//! layout table replaces a hand-written wrapper per message.
//!
//! The builtin table covers the system, node, LPN, configuration client and
//! vendor model classes. Descriptors for newer firmware can be loaded from
//! `*.opcode.json` files without rebuilding.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod layout;
pub mod registry;
pub mod table;
pub mod value;

pub use config::RegistryConfig;
pub use descriptor::{
    Element, Entry, Field, FieldType, LengthPrefix, PayloadDescriptor, Role, Tail, HANDLE_FIELD,
    RESULT_FIELD,
};
pub use error::{RegistryError, Result};
pub use registry::OpcodeRegistry;
pub use value::{Record, Value};
