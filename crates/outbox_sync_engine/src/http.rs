//! GraphQL-over-HTTP replay transport.
//!
//! The HTTP client and the auth token source are abstracted via traits so
//! hosts can plug in their own HTTP stack and auth layer.

use crate::error::{SyncError, SyncResult};
use crate::transport::{ReplayRequest, ReplayTransport};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

/// Header carrying the tenant context.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Header carrying the user context.
pub const USER_HEADER: &str = "x-user-id";

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request. `Err` means no response was received.
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<HttpResponse, String>;
}

/// Source of bearer tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns the current token, or `None` to send the request without one.
    async fn token(&self) -> Option<String>;
}

/// A token provider that always returns the same value.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    /// Uses `token` for every request.
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// Sends requests without an `Authorization` header.
    pub fn none() -> Self {
        Self(None)
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    errors: Option<Vec<GraphqlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    #[serde(default)]
    message: String,
}

/// Replays mutations as GraphQL POST requests.
///
/// A call succeeds only if the client returns a 2xx response whose JSON
/// body carries no `errors`.
pub struct GraphqlTransport<C: HttpClient, P: TokenProvider> {
    endpoint: String,
    client: C,
    tokens: P,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient, P: TokenProvider> GraphqlTransport<C, P> {
    /// Creates a transport posting to `endpoint`.
    pub fn new(endpoint: impl Into<String>, client: C, tokens: P) -> Self {
        Self {
            endpoint: endpoint.into(),
            client,
            tokens,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    async fn headers(&self, request: &ReplayRequest) -> Vec<(String, String)> {
        let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
        if let Some(token) = self.tokens.token().await {
            headers.push(("authorization".to_string(), format!("Bearer {token}")));
        }
        headers.push((TENANT_HEADER.to_string(), request.tenant_id.clone()));
        headers.push((USER_HEADER.to_string(), request.user_id.clone()));
        headers
    }

    async fn send(&self, request: &ReplayRequest) -> SyncResult<()> {
        let body = serde_json::to_vec(request)
            .map_err(|e| SyncError::transport_fatal(format!("failed to encode request: {e}")))?;
        let headers = self.headers(request).await;

        let response = self
            .client
            .post(&self.endpoint, &headers, body)
            .await
            .map_err(SyncError::transport_retryable)?;

        if !response.is_success() {
            return Err(SyncError::Http {
                status: response.status,
            });
        }

        let parsed: GraphqlResponse = serde_json::from_slice(&response.body)
            .map_err(|e| SyncError::InvalidResponse(e.to_string()))?;

        match parsed.errors {
            Some(errors) if !errors.is_empty() => Err(SyncError::Graphql {
                messages: errors.into_iter().map(|e| e.message).collect(),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<C: HttpClient, P: TokenProvider> ReplayTransport for GraphqlTransport<C, P> {
    async fn execute(&self, request: &ReplayRequest) -> SyncResult<()> {
        let result = self.send(request).await;
        match &result {
            Ok(()) => *self.last_error.write() = None,
            Err(e) => {
                debug!(
                    mutation_id = %request.mutation_id,
                    operation = %request.operation_name,
                    error = %e,
                    "graphql replay failed"
                );
                *self.last_error.write() = Some(e.to_string());
            }
        }
        result
    }
}
