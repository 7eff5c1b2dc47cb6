//! Reassembly of multi-part messages marked by a final flag.
//!
//! A buffer is identified by the slot part of the key (opcode plus slot
//! values). Only one message may be open per slot; its identity is the
//! message part of the key.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use bgmesh_frame::Opcode;
use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::error::{ClientError, Result};

/// Identity of one multi-part message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FragmentKey {
    pub opcode: Opcode,
    /// Values selecting the reassembly buffer.
    pub slot: Vec<u64>,
    /// Values identifying the message within the buffer.
    pub message: Vec<u64>,
}

impl fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}/{:?}", self.opcode, self.slot, self.message)
    }
}

/// Result of feeding one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// More chunks expected.
    Pending,
    /// The final chunk arrived; `payload` is the concatenation.
    Complete { payload: Bytes, chunks: usize },
}

/// An open buffer dropped for inactivity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbandonedFragment {
    pub key: FragmentKey,
    pub bytes: usize,
    pub chunks: usize,
}

#[derive(Debug)]
struct FragmentBuffer {
    message: Vec<u64>,
    data: BytesMut,
    chunks: usize,
    last_activity: Instant,
}

/// Open multi-part buffers.
#[derive(Debug)]
pub struct FragmentReassembler {
    buffers: HashMap<(Opcode, Vec<u64>), FragmentBuffer>,
    max_payload: usize,
}

impl FragmentReassembler {
    pub fn new(max_payload: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            max_payload,
        }
    }

    /// Feed one chunk.
    ///
    /// A chunk for a slot held by a different message is rejected and the
    /// open buffer is left as it was. Exceeding the size limit drops the
    /// buffer.
    pub fn push_chunk(
        &mut self,
        key: &FragmentKey,
        is_final: bool,
        data: &[u8],
        now: Instant,
    ) -> Result<ChunkOutcome> {
        let slot = (key.opcode, key.slot.clone());

        let (size, chunks) = match self.buffers.get_mut(&slot) {
            Some(buffer) if buffer.message != key.message => {
                return Err(ClientError::Interleaving {
                    key: format!("{}{:?}", key.opcode, key.slot),
                    open: format!("{:?}", buffer.message),
                    offending: format!("{:?}", key.message),
                });
            }
            Some(buffer) => (buffer.data.len() + data.len(), buffer.chunks + 1),
            None => (data.len(), 1),
        };

        if size > self.max_payload {
            self.buffers.remove(&slot);
            return Err(ClientError::FragmentTooLarge {
                size,
                max: self.max_payload,
            });
        }

        if is_final {
            let payload = match self.buffers.remove(&slot) {
                Some(mut buffer) => {
                    buffer.data.extend_from_slice(data);
                    buffer.data.freeze()
                }
                None => Bytes::copy_from_slice(data),
            };
            debug!(%key, chunks, bytes = payload.len(), "multi-part message complete");
            return Ok(ChunkOutcome::Complete { payload, chunks });
        }

        let buffer = self.buffers.entry(slot).or_insert_with(|| FragmentBuffer {
            message: key.message.clone(),
            data: BytesMut::new(),
            chunks: 0,
            last_activity: now,
        });
        buffer.data.extend_from_slice(data);
        buffer.chunks = chunks;
        buffer.last_activity = now;
        Ok(ChunkOutcome::Pending)
    }

    /// Drop buffers with no chunk for longer than `idle`.
    pub fn expire_idle(&mut self, now: Instant, idle: Duration) -> Vec<AbandonedFragment> {
        let stale: Vec<(Opcode, Vec<u64>)> = self
            .buffers
            .iter()
            .filter(|(_, buffer)| now.saturating_duration_since(buffer.last_activity) > idle)
            .map(|(slot, _)| slot.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|slot| {
                let buffer = self.buffers.remove(&slot)?;
                Some(AbandonedFragment {
                    key: FragmentKey {
                        opcode: slot.0,
                        slot: slot.1,
                        message: buffer.message,
                    },
                    bytes: buffer.data.len(),
                    chunks: buffer.chunks,
                })
            })
            .collect()
    }

    pub fn is_open(&self, opcode: Opcode, slot: &[u64]) -> bool {
        self.buffers.contains_key(&(opcode, slot.to_vec()))
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// Split an outgoing payload into sequential chunks of at most `max` bytes,
/// each paired with its final flag. An empty payload is one final chunk.
pub fn split_chunks(payload: &[u8], max: usize) -> Vec<(&[u8], bool)> {
    if payload.is_empty() {
        return vec![(payload, true)];
    }
    let chunks: Vec<&[u8]> = payload.chunks(max.max(1)).collect();
    let last = chunks.len() - 1;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| (chunk, i == last))
        .collect()
}
