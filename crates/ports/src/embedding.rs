//! Embedding provider boundary contract.

use crate::BoxFuture;
use kb_sync_domain::Embedding;
use kb_sync_shared::{RequestContext, Result};

/// Provider descriptor used in logs and error metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingProviderInfo {
    /// Stable provider identifier (`openai`, ...).
    pub id: Box<str>,
    /// Model name requested from the provider.
    pub model: Box<str>,
}

/// Owned request to embed a single text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedRequest {
    /// Text to embed, already truncated by the caller.
    pub text: Box<str>,
}

impl From<String> for EmbedRequest {
    fn from(text: String) -> Self {
        Self {
            text: text.into_boxed_str(),
        }
    }
}

impl From<&str> for EmbedRequest {
    fn from(text: &str) -> Self {
        Self { text: text.into() }
    }
}

/// Boundary contract for a remote embedding provider.
///
/// Implementations perform exactly one provider call per `embed`. Retry,
/// truncation, and blank handling live in the caller.
///
/// Errors must be classified: throttling, timeouts, and 5xx responses are
/// `Retriable`; auth failures and malformed requests are `NonRetriable`. An
/// OK response that carries no vector yields an empty [`Embedding`].
pub trait EmbeddingPort: Send + Sync {
    /// Provider info for this implementation.
    fn provider(&self) -> &EmbeddingProviderInfo;

    /// Embed a single text.
    fn embed(&self, ctx: &RequestContext, request: EmbedRequest)
    -> BoxFuture<'_, Result<Embedding>>;
}
