//! Log recovery scan.

use crate::error::{CoreError, CoreResult};
use crate::log::record::{compute_crc32, parse_header, LogEntry, CRC_SIZE, HEADER_SIZE};
use outbox_storage::StorageBackend;

/// The first unreadable frame found while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TornTail {
    /// Offset where the bad frame starts.
    pub offset: u64,
    /// Number of bytes from `offset` to the end of the log.
    pub dropped_bytes: u64,
    /// Why the frame was rejected.
    pub reason: String,
}

/// Result of scanning a log from the start.
#[derive(Debug, Default)]
pub struct LogScan {
    /// Valid entries in log order, with their frame offsets.
    pub entries: Vec<(u64, LogEntry)>,
    /// Length of the valid prefix.
    pub valid_len: u64,
    /// Set when the log ends in a frame that cannot be read.
    pub torn: Option<TornTail>,
}

impl LogScan {
    /// Returns the sequence number following the last valid entry.
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.entries
            .last()
            .map(|(_, entry)| entry.sequence + 1)
            .unwrap_or(1)
    }
}

/// Reads every valid frame in `backend`.
///
/// Scanning stops at the first frame that is incomplete, fails its
/// checksum, or does not decode. A crash during `append` leaves exactly such
/// a frame at the end of the log; every commit before it is intact.
///
/// # Errors
///
/// Returns an error only if the backend itself cannot be read.
pub fn scan(backend: &dyn StorageBackend) -> CoreResult<LogScan> {
    let size = backend.size()?;
    let mut result = LogScan::default();
    let mut offset = 0u64;

    while offset < size {
        match read_frame(backend, offset, size)? {
            Ok((entry, frame_len)) => {
                result.entries.push((offset, entry));
                offset += frame_len;
            }
            Err(reason) => {
                result.torn = Some(TornTail {
                    offset,
                    dropped_bytes: size - offset,
                    reason,
                });
                break;
            }
        }
    }

    result.valid_len = offset;
    Ok(result)
}

/// Reads one frame. The outer error is a backend failure; the inner error
/// describes a frame that cannot be used.
fn read_frame(
    backend: &dyn StorageBackend,
    offset: u64,
    size: u64,
) -> CoreResult<Result<(LogEntry, u64), String>> {
    if size - offset < (HEADER_SIZE + CRC_SIZE) as u64 {
        return Ok(Err("incomplete frame header".into()));
    }

    let header = backend.read_at(offset, HEADER_SIZE)?;
    let len = match parse_header(&header, offset) {
        Ok(len) => len,
        Err(CoreError::LogCorruption { message, .. }) => return Ok(Err(message)),
        Err(e) => return Err(e),
    };

    let frame_len = (HEADER_SIZE + len + CRC_SIZE) as u64;
    if size - offset < frame_len {
        return Ok(Err(format!(
            "incomplete frame: need {frame_len} bytes, {} available",
            size - offset
        )));
    }

    let frame = backend.read_at(offset, frame_len as usize)?;
    let body_end = HEADER_SIZE + len;
    let stored = u32::from_le_bytes([
        frame[body_end],
        frame[body_end + 1],
        frame[body_end + 2],
        frame[body_end + 3],
    ]);
    let actual = compute_crc32(&frame[..body_end]);
    if stored != actual {
        return Ok(Err(CoreError::ChecksumMismatch {
            expected: stored,
            actual,
        }
        .to_string()));
    }

    match LogEntry::decode_payload(&frame[HEADER_SIZE..body_end]) {
        Ok(entry) => Ok(Ok((entry, frame_len))),
        Err(e) => Ok(Err(e.to_string())),
    }
}
