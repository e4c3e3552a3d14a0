//! Commit log entries and their on-disk frame.
//!
//! ```text
//! | magic "OBXL" (4) | version u16 (2) | len u32 (4) | CBOR LogEntry (len) | crc32 (4) |
//! ```
//!
//! One frame is one commit. Every op inside it is applied on recovery, or
//! none are.

use crate::error::{CoreError, CoreResult};
use crate::types::{ConflictReason, MutationId, QueuedMutation, Timestamp};
use serde::{Deserialize, Serialize};

/// Magic bytes identifying a log frame.
pub const LOG_MAGIC: [u8; 4] = *b"OBXL";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + length (4)
pub const HEADER_SIZE: usize = 10;

/// Trailing checksum size.
pub const CRC_SIZE: usize = 4;

/// A single table operation inside a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogOp {
    /// Insert or replace a queued mutation.
    Put(QueuedMutation),
    /// Remove a queued mutation.
    Delete(MutationId),
    /// Overwrite the retry counter of a queued mutation.
    SetRetry {
        /// Mutation id.
        id: MutationId,
        /// New retry count.
        retry_count: u32,
    },
    /// Record a conflict. Also removes the id from the queue.
    PutConflict {
        /// The mutation as it was when escalated.
        mutation: QueuedMutation,
        /// Reason code.
        reason: ConflictReason,
        /// Escalation time.
        moved_at: Timestamp,
    },
    /// Remove a conflict.
    DeleteConflict(MutationId),
    /// Drop every queued mutation.
    ClearQueue,
    /// Drop every conflict.
    ClearConflicts,
}

/// One commit: a sequence number and the ops it applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonic commit sequence.
    pub sequence: u64,
    /// Ops applied atomically.
    pub ops: Vec<LogOp>,
}

impl LogEntry {
    /// Encodes the entry into a complete frame.
    pub fn encode_frame(&self) -> CoreResult<Vec<u8>> {
        let mut payload = Vec::new();
        ciborium::into_writer(self, &mut payload).map_err(|e| CoreError::codec(e.to_string()))?;

        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_argument("log entry exceeds 4 GiB"))?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&LOG_MAGIC);
        frame.extend_from_slice(&LOG_VERSION.to_le_bytes());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);

        let crc = compute_crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }

    /// Decodes the CBOR payload of a frame.
    pub fn decode_payload(payload: &[u8]) -> CoreResult<Self> {
        ciborium::from_reader(payload).map_err(|e| CoreError::codec(e.to_string()))
    }
}

/// Parses a frame header, returning the payload length.
pub fn parse_header(header: &[u8], offset: u64) -> CoreResult<usize> {
    if header.len() < HEADER_SIZE {
        return Err(CoreError::log_corruption(offset, "short header"));
    }
    if header[0..4] != LOG_MAGIC {
        return Err(CoreError::log_corruption(offset, "bad magic"));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != LOG_VERSION {
        return Err(CoreError::log_corruption(
            offset,
            format!("unsupported log version {version}"),
        ));
    }
    Ok(u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize)
}

const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Computes the IEEE CRC32 of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
