//! Collects list answers spread over several events sharing a handle.

use std::collections::HashMap;
use std::time::Instant;

use bgmesh_registry::Record;
use tracing::debug;

use crate::error::{ClientError, Result};

#[derive(Debug)]
struct ListAccumulator {
    family: String,
    items: Vec<Record>,
    opened_at: Instant,
}

/// Per-handle list accumulators, in arrival order.
#[derive(Debug, Default)]
pub struct ListReassembler {
    open: HashMap<u32, ListAccumulator>,
}

impl ListReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one list event for `handle`.
    ///
    /// An accumulator already open under another family is left untouched
    /// and the event is rejected.
    pub fn push(&mut self, handle: u32, family: &str, item: Record, now: Instant) -> Result<()> {
        let acc = self.open.entry(handle).or_insert_with(|| ListAccumulator {
            family: family.to_string(),
            items: Vec::new(),
            opened_at: now,
        });
        if acc.family != family {
            return Err(ClientError::Interleaving {
                key: format!("handle {handle}"),
                open: acc.family.clone(),
                offending: family.to_string(),
            });
        }
        acc.items.push(item);
        Ok(())
    }

    /// Fail if `handle` is open under a family other than `family`.
    pub fn check_family(&self, handle: u32, family: &str) -> Result<()> {
        match self.open.get(&handle) {
            Some(acc) if acc.family != family => Err(ClientError::Interleaving {
                key: format!("handle {handle}"),
                open: acc.family.clone(),
                offending: family.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Close the accumulator for `handle` and return its items.
    ///
    /// A handle that never received items yields an empty list. On a family
    /// mismatch the accumulator stays open.
    pub fn finish(&mut self, handle: u32, family: &str) -> Result<Vec<Record>> {
        self.check_family(handle, family)?;
        let Some(acc) = self.open.remove(&handle) else {
            return Ok(Vec::new());
        };
        debug!(
            handle,
            items = acc.items.len(),
            open_ms = acc.opened_at.elapsed().as_millis() as u64,
            "list closed"
        );
        Ok(acc.items)
    }

    /// Drop any partial data for `handle`. Returns the number of items dropped.
    pub fn discard(&mut self, handle: u32) -> usize {
        self.open.remove(&handle).map_or(0, |acc| acc.items.len())
    }

    pub fn is_open(&self, handle: u32) -> bool {
        self.open.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}
