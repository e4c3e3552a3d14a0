//! Append-only commit log.
//!
//! Every change to the queue or conflict tables is written here before it
//! is applied in memory. Opening a store replays the log to rebuild both
//! tables.

mod reader;
mod record;
mod writer;

pub use reader::{scan, LogScan, TornTail};
pub use record::{compute_crc32, LogEntry, LogOp, CRC_SIZE, HEADER_SIZE, LOG_MAGIC, LOG_VERSION};
pub use writer::LogWriter;
