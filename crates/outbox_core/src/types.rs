//! Data model for queued and conflicted mutations.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Epoch timestamp in milliseconds.
pub type Timestamp = u64;

/// Operation variables, opaque to the queue.
pub type Variables = serde_json::Map<String, serde_json::Value>;

/// Returns the current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}

/// Caller-assigned identifier of a mutation.
///
/// Unique among entries in the queue; re-enqueueing an id replaces the
/// previous entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationId(String);

impl MutationId {
    /// Creates a mutation id from any string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random-suffixed timestamp id, e.g. `1706745600000-3f2a9c41d0be`.
    #[must_use]
    pub fn generate(created_at: Timestamp) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{created_at}-{}", &suffix[..12]))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MutationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MutationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for MutationId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A mutation as submitted by the caller, before it enters the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMutation {
    /// Unique identifier.
    pub id: MutationId,
    /// Human-readable name of the remote operation.
    pub operation_name: String,
    /// Operation definition, opaque to the queue.
    pub query: String,
    /// Operation variables.
    pub variables: Variables,
    /// Tenant context forwarded on replay.
    pub tenant_id: String,
    /// User context forwarded on replay.
    pub user_id: String,
    /// Creation time; defines replay and eviction order.
    pub created_at: Timestamp,
}

impl NewMutation {
    /// Creates a mutation with empty variables and routing context.
    pub fn new(
        id: impl Into<MutationId>,
        operation_name: impl Into<String>,
        query: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            operation_name: operation_name.into(),
            query: query.into(),
            variables: Variables::new(),
            tenant_id: String::new(),
            user_id: String::new(),
            created_at,
        }
    }

    /// Sets the operation variables.
    #[must_use]
    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    /// Sets the tenant id.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    /// Sets the user id.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub(crate) fn into_queued(self) -> QueuedMutation {
        QueuedMutation {
            id: self.id,
            operation_name: self.operation_name,
            query: self.query,
            variables: self.variables,
            tenant_id: self.tenant_id,
            user_id: self.user_id,
            created_at: self.created_at,
            retry_count: 0,
        }
    }
}

impl From<NewMutation> for QueuedMutation {
    fn from(mutation: NewMutation) -> Self {
        mutation.into_queued()
    }
}

/// A pending mutation in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMutation {
    /// Unique identifier.
    pub id: MutationId,
    /// Human-readable name of the remote operation.
    pub operation_name: String,
    /// Operation definition, opaque to the queue.
    pub query: String,
    /// Operation variables.
    pub variables: Variables,
    /// Tenant context forwarded on replay.
    pub tenant_id: String,
    /// User context forwarded on replay.
    pub user_id: String,
    /// Creation time; defines replay and eviction order.
    pub created_at: Timestamp,
    /// Number of failed replay attempts so far.
    pub retry_count: u32,
}

/// Why the engine stopped retrying a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// The retry budget was used up.
    MaxRetriesExceeded,
}

impl ConflictReason {
    /// Returns the stable reason code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MaxRetriesExceeded => "max_retries_exceeded",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation the engine has permanently given up on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictedMutation {
    /// The mutation as it was when escalated.
    #[serde(flatten)]
    pub mutation: QueuedMutation,
    /// Reason code.
    pub reason: ConflictReason,
    /// Escalation time.
    pub moved_at: Timestamp,
}

impl ConflictedMutation {
    /// Returns the mutation id.
    #[must_use]
    pub fn id(&self) -> &MutationId {
        &self.mutation.id
    }
}
