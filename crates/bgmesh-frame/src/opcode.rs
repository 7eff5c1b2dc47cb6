//! Message identifiers.
//!
//! The identifier is the envelope header with its length bits cleared.
//! Commands and their responses share one identifier; events set the
//! message-type bit. Everything else is an opaque registry key.

use std::fmt;

/// Message-type bit: set for events, clear for commands and responses.
pub const EVENT_FLAG: u32 = 0x80;

/// Technology-type bits of the first header byte.
pub const TECHNOLOGY_MASK: u32 = 0x78;

/// Technology type of the Bluetooth (and Bluetooth mesh) API.
pub const TECHNOLOGY_BLUETOOTH: u8 = 0x20;

/// Header bits that carry the payload length (3 high bits + low byte).
pub const LENGTH_MASK: u32 = 0x0000_ff07;

/// Header bits that form the identifier.
pub const ID_MASK: u32 = !LENGTH_MASK;

/// A 32-bit message identifier with the length bits cleared.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opcode(u32);

impl Opcode {
    /// Build an identifier from a raw 32-bit value, dropping length bits.
    pub const fn new(raw: u32) -> Self {
        Self(raw & ID_MASK)
    }

    /// Identifier shared by a Bluetooth command and its response.
    pub const fn command(class: u8, message: u8) -> Self {
        Self((TECHNOLOGY_BLUETOOTH as u32) | ((class as u32) << 16) | ((message as u32) << 24))
    }

    /// Identifier of a Bluetooth event.
    pub const fn event(class: u8, message: u8) -> Self {
        Self(Self::command(class, message).0 | EVENT_FLAG)
    }

    /// Split a raw header into identifier and payload length.
    pub const fn from_header(header: u32) -> (Self, usize) {
        let len = ((header & 0x07) << 8) | ((header >> 8) & 0xff);
        (Self::new(header), len as usize)
    }

    /// Fold a payload length into this identifier to form a header.
    ///
    /// `len` must already be checked against [`crate::MAX_PAYLOAD`].
    pub const fn to_header(self, len: usize) -> u32 {
        let len = len as u32;
        self.0 | ((len >> 8) & 0x07) | ((len & 0xff) << 8)
    }

    /// The raw identifier value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// True for event identifiers.
    pub const fn is_event(self) -> bool {
        self.0 & EVENT_FLAG != 0
    }

    /// Technology-type bits of the identifier.
    pub const fn technology(self) -> u8 {
        (self.0 & TECHNOLOGY_MASK) as u8
    }

    /// Class id (third header byte).
    pub const fn class_id(self) -> u8 {
        (self.0 >> 16) as u8
    }

    /// Message id within the class (fourth header byte).
    pub const fn message_id(self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Kind of an identifier read from the stack.
    ///
    /// Hosts never receive commands, so a non-event is a response.
    pub const fn incoming_kind(self) -> MessageKind {
        if self.is_event() {
            MessageKind::Event
        } else {
            MessageKind::Response
        }
    }
}

impl fmt::Debug for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opcode({:#010x})", self.0)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl From<u32> for Opcode {
    fn from(raw: u32) -> Self {
        Self::new(raw)
    }
}

/// Message class of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    /// Host → stack.
    Command,
    /// Stack → host, immediate answer to a command with the same identifier.
    Response,
    /// Stack → host, asynchronous.
    Event,
}

impl MessageKind {
    /// Short name used in logs and listings.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Command => "cmd",
            MessageKind::Response => "rsp",
            MessageKind::Event => "evt",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
