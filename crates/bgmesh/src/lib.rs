//! Host-side client for Bluetooth mesh network co-processors.
//!
//! The mesh stack runs on an NCP target and talks BGAPI: a flat stream of
//! commands, responses and events, each a small binary envelope. bgmesh
//! turns that stream into typed records and completed logical results.
//!
//! # Crate Structure
//!
//! - [`transport`]: Unix socket and TCP links to the NCP
//! - [`frame`]: envelope codec, blocking reader/writer, async codec
//! - [`registry`]: opcode table with payload layouts and dispatch roles
//! - [`client`]: request correlation, reassembly and event dispatch
//!   (behind the `client` feature)

/// Re-export transport types.
pub mod transport {
    pub use bgmesh_transport::*;
}

/// Re-export envelope types.
pub mod frame {
    pub use bgmesh_frame::*;
}

/// Re-export registry types.
pub mod registry {
    pub use bgmesh_registry::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use bgmesh_client::*;
}
