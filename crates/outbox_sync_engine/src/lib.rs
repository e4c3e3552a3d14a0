//! # Outbox Sync Engine
//!
//! Replays queued offline mutations against a remote endpoint.
//!
//! This crate provides:
//! - [`SyncEngine`], the timer-driven replay loop with retry accounting and
//!   escalation of exhausted mutations into the conflict store
//! - [`StatusChannel`], which broadcasts `idle` / `syncing` / `error` plus the
//!   pending count to any number of listeners
//! - The [`ReplayTransport`] and [`ConnectivityProbe`] seams, a
//!   GraphQL-over-HTTP transport, and mocks for tests
//!
//! ## Key Invariants
//!
//! - At most one replay cycle is in flight per engine
//! - Mutations are replayed oldest first, one at a time
//! - Every failure counts against the same retry budget
//! - After `dispose()` the queue and conflict store are never touched by
//!   the engine again

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod engine;
mod error;
mod http;
mod status;
mod transport;

pub use config::{
    RetryPolicy, SyncConfig, DEFAULT_BATCH_SIZE, DEFAULT_MAX_RETRIES, DEFAULT_POLL_INTERVAL,
};
pub use connectivity::{Connectivity, ConnectivityProbe, MockConnectivity};
pub use engine::{CycleOutcome, CycleReport, EngineState, SkipReason, SyncEngine, SyncStats};
pub use error::{SyncError, SyncResult};
pub use http::{
    GraphqlTransport, HttpClient, HttpResponse, StaticToken, TokenProvider, TENANT_HEADER,
    USER_HEADER,
};
pub use outbox_core::DEFAULT_MAX_QUEUE_SIZE;
pub use status::{StatusChannel, StatusUpdate, Subscription, SubscriptionId, SyncStatus};
pub use transport::{MockOutcome, MockTransport, ReplayRequest, ReplayTransport};
