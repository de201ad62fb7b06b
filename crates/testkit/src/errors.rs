//! Test fixtures for shared error codes and envelopes.

use kb_sync_shared::{ErrorClass, ErrorCode, ErrorEnvelope};

/// Return a list of common error codes used in tests.
pub fn common_error_codes() -> Vec<ErrorCode> {
    vec![
        ErrorCode::cancelled(),
        ErrorCode::invalid_input(),
        ErrorCode::not_found(),
        ErrorCode::timeout(),
        ErrorCode::rate_limited(),
        ErrorCode::dependency_unavailable(),
        ErrorCode::io(),
        ErrorCode::internal(),
    ]
}

/// A cancellation error fixture.
pub fn cancelled_error() -> ErrorEnvelope {
    ErrorEnvelope::cancelled("cancelled")
}

/// An invalid input error fixture.
pub fn invalid_input_error() -> ErrorEnvelope {
    ErrorEnvelope::expected(ErrorCode::invalid_input(), "invalid input")
}

/// A retriable timeout error fixture.
pub fn timeout_error() -> ErrorEnvelope {
    ErrorEnvelope::unexpected(ErrorCode::timeout(), "timeout", ErrorClass::Retriable)
}

/// A transient provider error (HTTP 429).
pub fn transient_error() -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::rate_limited(),
        "rate limited",
        ErrorClass::Retriable,
    )
}

/// A permanent provider error (HTTP 401).
pub fn permanent_error() -> ErrorEnvelope {
    ErrorEnvelope::expected(ErrorCode::permission_denied(), "invalid api key")
}

/// A vector store connection failure.
pub fn connection_error() -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::new("vector", "vdb_connection"),
        "connection refused",
        ErrorClass::Retriable,
    )
}
