//! Transport layer abstraction for replaying mutations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use outbox_core::{MutationId, QueuedMutation, Variables};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// What the transport needs to replay one mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRequest {
    /// Id of the queued mutation.
    #[serde(skip)]
    pub mutation_id: MutationId,
    /// Name of the remote operation.
    pub operation_name: String,
    /// Operation definition.
    pub query: String,
    /// Operation variables.
    pub variables: Variables,
    /// Tenant context.
    #[serde(skip)]
    pub tenant_id: String,
    /// User context.
    #[serde(skip)]
    pub user_id: String,
}

impl From<&QueuedMutation> for ReplayRequest {
    fn from(mutation: &QueuedMutation) -> Self {
        Self {
            mutation_id: mutation.id.clone(),
            operation_name: mutation.operation_name.clone(),
            query: mutation.query.clone(),
            variables: mutation.variables.clone(),
            tenant_id: mutation.tenant_id.clone(),
            user_id: mutation.user_id.clone(),
        }
    }
}

/// Executes a queued mutation against the remote endpoint.
///
/// `Ok(())` means the endpoint applied the mutation. Any error counts as a
/// failed attempt.
#[async_trait]
pub trait ReplayTransport: Send + Sync {
    /// Replays one mutation.
    async fn execute(&self, request: &ReplayRequest) -> SyncResult<()>;
}

/// Scripted result for [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    /// The call succeeds.
    Success,
    /// The call fails with a transport error.
    Failure,
    /// The endpoint answers with this status.
    Http(u16),
    /// The endpoint reports an application error.
    Graphql(String),
}

impl MockOutcome {
    fn into_result(self) -> SyncResult<()> {
        match self {
            MockOutcome::Success => Ok(()),
            MockOutcome::Failure => Err(SyncError::transport_retryable("mock failure")),
            MockOutcome::Http(status) => Err(SyncError::Http { status }),
            MockOutcome::Graphql(message) => Err(SyncError::Graphql {
                messages: vec![message],
            }),
        }
    }
}

/// A mock transport for testing.
///
/// Each call takes the next scripted outcome for its mutation id, falling
/// back to the default outcome.
#[derive(Debug)]
pub struct MockTransport {
    default: Mutex<MockOutcome>,
    scripted: Mutex<HashMap<MutationId, VecDeque<MockOutcome>>>,
    calls: Mutex<Vec<ReplayRequest>>,
    latency: Mutex<Option<Duration>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a transport where every call succeeds.
    pub fn new() -> Self {
        Self::with_default(MockOutcome::Success)
    }

    /// Creates a transport where every call fails.
    pub fn failing() -> Self {
        Self::with_default(MockOutcome::Failure)
    }

    /// Creates a transport with the given default outcome.
    pub fn with_default(outcome: MockOutcome) -> Self {
        Self {
            default: Mutex::new(outcome),
            scripted: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            latency: Mutex::new(None),
        }
    }

    /// Sets the outcome for calls without a script.
    pub fn set_default(&self, outcome: MockOutcome) {
        *self.default.lock() = outcome;
    }

    /// Queues outcomes for the next calls for `id`.
    pub fn script(&self, id: impl Into<MutationId>, outcomes: impl IntoIterator<Item = MockOutcome>) {
        self.scripted
            .lock()
            .entry(id.into())
            .or_default()
            .extend(outcomes);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Requests received so far, in call order.
    pub fn calls(&self) -> Vec<ReplayRequest> {
        self.calls.lock().clone()
    }

    /// Ids of the mutations replayed so far, in call order.
    pub fn call_ids(&self) -> Vec<MutationId> {
        self.calls
            .lock()
            .iter()
            .map(|r| r.mutation_id.clone())
            .collect()
    }

    /// Number of calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn next_outcome(&self, id: &MutationId) -> MockOutcome {
        self.scripted
            .lock()
            .get_mut(id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default.lock().clone())
    }
}

#[async_trait]
impl ReplayTransport for MockTransport {
    async fn execute(&self, request: &ReplayRequest) -> SyncResult<()> {
        self.calls.lock().push(request.clone());
        let outcome = self.next_outcome(&request.mutation_id);

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        outcome.into_result()
    }
}
