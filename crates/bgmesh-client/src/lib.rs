//! Client core for a BGAPI Bluetooth mesh NCP target.
//!
//! Turns the stack's flat envelope stream into logical results:
//! - requests that answer with a handle are tracked until a terminal status
//!   event arrives or their deadline passes
//! - list answers spread over several events are collected per handle
//! - multi-part vendor messages are reassembled on their final chunk
//!
//! Everything completed is handed to callbacks registered per route and to
//! an optional channel.

pub mod client;
pub mod config;
pub mod connector;
pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod fragment;
pub mod list;

pub use client::{MeshClient, VendorTarget};
pub use config::ClientConfig;
#[cfg(unix)]
pub use connector::connect_unix;
pub use connector::{connect_tcp, NcpClient};
pub use correlation::{CorrelationTable, PendingRequest, SharedCorrelation, TimedOutRequest};
pub use dispatch::{
    Completed, Conclusion, Delivery, Diagnostic, Dispatcher, ListResult, RequestFailure, Route,
};
pub use error::{ClientError, Result};
pub use fragment::{split_chunks, ChunkOutcome, FragmentKey, FragmentReassembler};
pub use list::ListReassembler;
