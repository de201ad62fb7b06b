//! Qdrant error mapping helpers.

use kb_sync_shared::{ErrorClass, ErrorCode, ErrorEnvelope};

/// Provider identifier written into error metadata.
pub const QDRANT_PROVIDER_ID: &str = "qdrant_rest";

#[derive(Debug, Clone)]
/// Context payload attached to Qdrant error envelopes.
pub struct QdrantErrorContext {
    /// Operation label for tracing failures.
    pub operation: &'static str,
    /// Collection name, when the request is collection-scoped.
    pub collection_name: Option<String>,
    /// REST endpoint path, when available.
    pub endpoint: Option<String>,
}

impl QdrantErrorContext {
    pub(crate) fn new(operation: &'static str, collection: &str, endpoint: &str) -> Self {
        Self {
            operation,
            collection_name: Some(collection.to_owned()),
            endpoint: Some(endpoint.to_owned()),
        }
    }

    fn decorate(&self, envelope: ErrorEnvelope) -> ErrorEnvelope {
        let mut envelope = envelope
            .with_metadata("provider", QDRANT_PROVIDER_ID)
            .with_metadata("operation", self.operation);
        if let Some(collection) = self.collection_name.as_ref() {
            envelope = envelope.with_metadata("collection", collection.to_owned());
        }
        if let Some(endpoint) = self.endpoint.as_ref() {
            envelope = envelope.with_metadata("endpoint", endpoint.to_owned());
        }
        envelope
    }
}

/// Maps a non-success HTTP status and its message into a shared envelope.
pub fn map_rest_error(
    message: impl Into<String>,
    http_status: u16,
    ctx: &QdrantErrorContext,
) -> ErrorEnvelope {
    let code = choose_code(http_status);
    let class = match code.code() {
        "vdb_timeout" | "vdb_connection" | "vdb_rate_limited" => ErrorClass::Retriable,
        _ => ErrorClass::NonRetriable,
    };
    let envelope = ErrorEnvelope::unexpected(code, message, class)
        .with_metadata("http_status", http_status.to_string());
    ctx.decorate(envelope)
}

/// Maps reqwest transport errors into shared error envelopes.
pub fn map_rest_transport_error(error: &reqwest::Error, ctx: &QdrantErrorContext) -> ErrorEnvelope {
    let envelope = if error.is_timeout() {
        ErrorEnvelope::unexpected(
            vdb_timeout_code(),
            format!("Qdrant request timed out: {error}"),
            ErrorClass::Retriable,
        )
    } else if error.is_connect() {
        ErrorEnvelope::unexpected(
            vdb_connection_code(),
            format!("Qdrant connection failed: {error}"),
            ErrorClass::Retriable,
        )
    } else {
        ErrorEnvelope::unexpected(
            vdb_unknown_code(),
            format!("Qdrant request failed: {error}"),
            ErrorClass::NonRetriable,
        )
    };
    ctx.decorate(envelope)
}

/// Builds an envelope for a 2xx response whose body could not be used.
pub fn invalid_response(message: impl Into<String>, ctx: &QdrantErrorContext) -> ErrorEnvelope {
    ctx.decorate(ErrorEnvelope::unexpected(
        vdb_invalid_response_code(),
        message,
        ErrorClass::NonRetriable,
    ))
}

/// Builds an envelope for a request rejected before it was sent.
pub fn rejected(code: ErrorCode, message: impl Into<String>, ctx: &QdrantErrorContext) -> ErrorEnvelope {
    ctx.decorate(ErrorEnvelope::invariant(code, message))
}

/// Builds a non-retriable envelope for a well-formed negative acknowledgement.
pub fn not_acknowledged(
    code: ErrorCode,
    message: impl Into<String>,
    ctx: &QdrantErrorContext,
) -> ErrorEnvelope {
    ctx.decorate(ErrorEnvelope::unexpected(code, message, ErrorClass::NonRetriable))
}

fn choose_code(http_status: u16) -> ErrorCode {
    match http_status {
        401 | 403 => vdb_auth_code(),
        404 => vdb_not_found_code(),
        408 | 504 => vdb_timeout_code(),
        429 => vdb_rate_limited_code(),
        400 | 422 => vdb_bad_request_code(),
        500..=599 => vdb_connection_code(),
        _ => vdb_http_error_code(),
    }
}

fn vdb_auth_code() -> ErrorCode {
    ErrorCode::new("vector", "vdb_auth")
}

fn vdb_not_found_code() -> ErrorCode {
    ErrorCode::new("vector", "vdb_not_found")
}

fn vdb_timeout_code() -> ErrorCode {
    ErrorCode::new("vector", "vdb_timeout")
}

fn vdb_rate_limited_code() -> ErrorCode {
    ErrorCode::new("vector", "vdb_rate_limited")
}

fn vdb_connection_code() -> ErrorCode {
    ErrorCode::new("vector", "vdb_connection")
}

fn vdb_bad_request_code() -> ErrorCode {
    ErrorCode::new("vector", "vdb_bad_request")
}

fn vdb_http_error_code() -> ErrorCode {
    ErrorCode::new("vector", "vdb_http_error")
}

fn vdb_unknown_code() -> ErrorCode {
    ErrorCode::new("vector", "vdb_unknown")
}

fn vdb_invalid_response_code() -> ErrorCode {
    ErrorCode::new("vector", "vdb_invalid_response")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> QdrantErrorContext {
        QdrantErrorContext::new("qdrant.upsert", "docs", "/collections/docs/points")
    }

    #[test]
    fn auth_failures_are_permanent() {
        let error = map_rest_error("forbidden", 403, &ctx());
        assert_eq!(error.code, ErrorCode::new("vector", "vdb_auth"));
        assert_eq!(error.class, ErrorClass::NonRetriable);
        assert_eq!(error.metadata.get("http_status").map(String::as_str), Some("403"));
        assert_eq!(error.metadata.get("collection").map(String::as_str), Some("docs"));
    }

    #[test]
    fn gateway_failures_are_retriable() {
        for status in [429, 500, 502, 503, 504] {
            let error = map_rest_error("busy", status, &ctx());
            assert_eq!(error.class, ErrorClass::Retriable, "status {status}");
        }
    }

    #[test]
    fn unknown_status_maps_to_http_error() {
        let error = map_rest_error("teapot", 418, &ctx());
        assert_eq!(error.code, ErrorCode::new("vector", "vdb_http_error"));
        assert_eq!(
            error.metadata.get("provider").map(String::as_str),
            Some(QDRANT_PROVIDER_ID)
        );
    }
}
