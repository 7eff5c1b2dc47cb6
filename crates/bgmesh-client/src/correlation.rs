//! Outstanding requests keyed by stack-assigned handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bgmesh_frame::Opcode;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// A request whose response carried a handle and whose terminal status has
/// not arrived yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRequest {
    pub handle: u32,
    pub server_address: u16,
    /// Identifier of the command that was issued.
    #[serde(serialize_with = "crate::dispatch::serialize_opcode")]
    pub opcode: Opcode,
    #[serde(skip)]
    pub issued_at: Instant,
    pub timeout: Duration,
    /// Set once a Friend acknowledged on behalf of a low power node.
    pub friend_acked: bool,
}

impl PendingRequest {
    pub fn deadline(&self) -> Instant {
        self.issued_at + self.timeout
    }
}

/// A request removed by [`CorrelationTable::tick`] after its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedOutRequest {
    pub request: PendingRequest,
    /// How far past the deadline the scan ran.
    pub overdue: Duration,
}

/// Handle-keyed table of outstanding requests.
#[derive(Debug)]
pub struct CorrelationTable {
    pending: HashMap<u32, PendingRequest>,
    default_timeout: Duration,
}

/// Correlation table shared between the receive loop and command issuers.
pub type SharedCorrelation = Arc<Mutex<CorrelationTable>>;

impl CorrelationTable {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            default_timeout,
        }
    }

    /// Wrap a new table for sharing.
    pub fn shared(default_timeout: Duration) -> SharedCorrelation {
        Arc::new(Mutex::new(Self::new(default_timeout)))
    }

    /// Lock a shared table. A panic while holding the lock leaves the map
    /// consistent, so poisoning is ignored.
    pub fn lock(shared: &SharedCorrelation) -> MutexGuard<'_, CorrelationTable> {
        shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a request issued at `now` with the default timeout.
    pub fn register(&mut self, handle: u32, server_address: u16, opcode: Opcode, now: Instant) {
        let request = PendingRequest {
            handle,
            server_address,
            opcode,
            issued_at: now,
            timeout: self.default_timeout,
            friend_acked: false,
        };
        if let Some(old) = self.pending.insert(handle, request) {
            // Handles are unique per stack instance; reuse means the old entry is stale.
            warn!(handle, old_opcode = %old.opcode, "handle reused, replacing stale request");
        }
        debug!(handle, server_address, %opcode, "request registered");
    }

    /// Remove and return the request concluded by a terminal status event.
    pub fn on_status_event(&mut self, handle: u32, result: u16) -> Result<PendingRequest> {
        let request = self
            .pending
            .remove(&handle)
            .ok_or(ClientError::NotFound { handle })?;
        debug!(handle, result, "request concluded");
        Ok(request)
    }

    /// Replace the timeout of a live request; its deadline moves to
    /// `issued_at + new_timeout`.
    pub fn on_modified(&mut self, handle: u32, new_timeout: Duration) -> Result<()> {
        let request = self
            .pending
            .get_mut(&handle)
            .ok_or(ClientError::NotFound { handle })?;
        request.timeout = new_timeout;
        request.friend_acked = true;
        debug!(handle, timeout_ms = new_timeout.as_millis() as u64, "request timeout extended");
        Ok(())
    }

    /// Remove and report every request whose deadline is at or before `now`.
    ///
    /// The caller owns the reports; `Dispatcher::tick` is the caller that
    /// turns them into timeout conclusions.
    pub fn tick(&mut self, now: Instant) -> Vec<TimedOutRequest> {
        let expired: Vec<u32> = self
            .pending
            .values()
            .filter(|request| request.deadline() <= now)
            .map(|request| request.handle)
            .collect();

        let mut timed_out: Vec<TimedOutRequest> = expired
            .into_iter()
            .filter_map(|handle| self.pending.remove(&handle))
            .map(|request| TimedOutRequest {
                overdue: now.saturating_duration_since(request.deadline()),
                request,
            })
            .collect();
        timed_out.sort_by_key(|t| (t.request.deadline(), t.request.handle));
        timed_out
    }

    /// Stop tracking a request. Remote effects are not retracted.
    pub fn cancel(&mut self, handle: u32) -> Option<PendingRequest> {
        self.pending.remove(&handle)
    }

    pub fn contains(&self, handle: u32) -> bool {
        self.pending.contains_key(&handle)
    }

    pub fn get(&self, handle: u32) -> Option<&PendingRequest> {
        self.pending.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
