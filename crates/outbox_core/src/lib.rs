//! # Outbox Core
//!
//! Durable storage for mutations issued while a client is offline.
//!
//! This crate provides:
//! - An append-only commit log with checksummed frames and torn-tail recovery
//! - [`DurableStore`], the keyed queue and conflict tables rebuilt from that log
//! - [`MutationQueue`], a capacity-bounded FIFO ordered by creation time
//! - [`ConflictStore`], the dead-letter table for mutations that ran out of retries
//!
//! ```rust
//! use outbox_core::{ConflictReason, ConflictStore, DurableStore, MutationQueue, NewMutation};
//! use std::sync::Arc;
//!
//! let store = Arc::new(DurableStore::open_in_memory().unwrap());
//! let queue = MutationQueue::new(Arc::clone(&store), 500).unwrap();
//! let conflicts = ConflictStore::new(store);
//!
//! queue.enqueue(NewMutation::new("a", "CreateNote", "mutation { n }", 1000)).unwrap();
//! conflicts.escalate("a", ConflictReason::MaxRetriesExceeded, 2000).unwrap();
//! assert_eq!(queue.queue_size().unwrap(), 0);
//! assert_eq!(conflicts.conflict_count().unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflict;
mod dir;
mod error;
pub mod log;
mod queue;
mod store;
mod tables;
mod types;

pub use config::{StoreConfig, DEFAULT_COMPACT_THRESHOLD};
pub use conflict::ConflictStore;
pub use dir::StoreDir;
pub use error::{CoreError, CoreResult};
pub use queue::{EnqueueOutcome, FailureOutcome, MutationQueue, DEFAULT_MAX_QUEUE_SIZE};
pub use store::{DurableStore, StoreStats, WriteTxn};
pub use types::{
    now_millis, ConflictReason, ConflictedMutation, MutationId, NewMutation, QueuedMutation,
    Timestamp, Variables,
};
