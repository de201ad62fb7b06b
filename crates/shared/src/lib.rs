//! # kb-sync-shared
//!
//! Foundational types shared by every kb-sync crate.
//!
//! - [`ErrorEnvelope`] and the workspace [`Result`] alias
//! - request-scoped context with cancellation ([`RequestContext`])
//! - bounded concurrent mapping ([`bounded_map`])
//! - retry with linear or exponential backoff ([`retry_async`])
//! - secret redaction helpers
//!
//! This crate has no workspace dependencies.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod concurrency;
pub mod errors;
pub mod redaction;
pub mod result;
pub mod retry;

pub use concurrency::{CancellationToken, CorrelationId, RequestContext, bounded_map};
pub use errors::{
    ErrorClass, ErrorCode, ErrorEnvelope, ErrorKind, ErrorMetadata, REDACTED_VALUE,
    UnexpectedError, normalize_unexpected_error, redact_metadata,
};
pub use redaction::{REDACTED, SecretString, is_secret_key, redact_if_secret};
pub use result::{Result, ResultExt};
pub use retry::{Backoff, RetryPolicy, retry_async, retry_async_with_observer};

/// Returns the shared crate version.
#[must_use]
pub const fn shared_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
