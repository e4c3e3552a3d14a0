//! # Outbox Storage
//!
//! Byte-level storage backends for the outbox commit log.
//!
//! Backends are **opaque append-only byte stores**: they know nothing about
//! mutations, conflicts, or log frames. The core crate owns the log format
//! and rebuilds its tables from these bytes on open.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - Ephemeral storage for tests and previews
//! - [`FileBackend`] - Persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use outbox_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
