//! OpenAI embedding adapter.

use kb_sync_config::EmbeddingConfig;
use kb_sync_domain::Embedding;
use kb_sync_ports::{BoxFuture, EmbedRequest, EmbeddingPort, EmbeddingProviderInfo};
use kb_sync_shared::{ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// OpenAI embedding adapter configuration.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingConfig {
    /// API key used for authentication.
    pub api_key: Box<str>,
    /// Embedding model name (defaults to `text-embedding-3-small`).
    pub model: Option<Box<str>>,
    /// Base URL override (defaults to `https://api.openai.com/v1`).
    pub base_url: Option<Box<str>>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl OpenAiEmbeddingConfig {
    /// Build from the validated embedding config. The API key is required.
    pub fn from_embedding_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config.api_key.as_ref().ok_or_else(|| {
            ErrorEnvelope::expected(
                ErrorCode::new("config", "missing_api_key"),
                "embedding.apiKey is required (set OPENAI_API_KEY)",
            )
            .with_metadata("field", "embedding.apiKey")
        })?;
        Ok(Self {
            api_key: api_key.expose().into(),
            model: Some(config.model.clone()),
            base_url: Some(config.base_url.clone()),
            timeout_ms: config.timeout_ms,
        })
    }
}

/// OpenAI embedding adapter implementation.
pub struct OpenAiEmbedding {
    provider: EmbeddingProviderInfo,
    client: reqwest::Client,
    endpoint: Box<str>,
}

impl OpenAiEmbedding {
    /// Create a new OpenAI embedding adapter.
    pub fn new(config: &OpenAiEmbeddingConfig) -> Result<Self> {
        let api_key = normalize_required("api key", config.api_key.as_ref())?;
        let model = normalize_optional_required("model", config.model.as_deref())?
            .unwrap_or_else(|| DEFAULT_MODEL.into());
        let base_url = normalize_optional_required("base url", config.base_url.as_deref())?
            .unwrap_or_else(|| DEFAULT_BASE_URL.into());
        let base_url = base_url.trim_end_matches('/');
        if base_url.is_empty() {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "base url must be non-empty",
            ));
        }
        if config.timeout_ms == 0 {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "timeout must be greater than zero",
            ));
        }

        let mut headers = HeaderMap::new();
        let mut auth_header =
            HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| {
                ErrorEnvelope::expected(
                    ErrorCode::invalid_input(),
                    "api key contains invalid header characters",
                )
            })?;
        auth_header.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth_header);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .default_headers(headers)
            .build()
            .map_err(|error| {
                ErrorEnvelope::unexpected(
                    ErrorCode::new("embedding", "openai_client_init_failed"),
                    format!("failed to build OpenAI client: {error}"),
                    ErrorClass::NonRetriable,
                )
            })?;

        Ok(Self {
            provider: EmbeddingProviderInfo {
                id: "openai".into(),
                model,
            },
            client,
            endpoint: format!("{base_url}/embeddings").into_boxed_str(),
        })
    }

    async fn send_request(
        &self,
        ctx: &RequestContext,
        request: OpenAiEmbeddingRequest<'_>,
    ) -> Result<OpenAiEmbeddingResponse> {
        const OPERATION: &str = "openai_embedding.embed";
        ctx.ensure_not_cancelled(OPERATION)?;

        let response = tokio::select! {
            () = ctx.cancelled() => return Err(cancelled_error(OPERATION)),
            result = self.client.post(self.endpoint.as_ref()).json(&request).send() => {
                result.map_err(|error| map_reqwest_error(&error))?
            }
        };

        let status = response.status();
        let payload = tokio::select! {
            () = ctx.cancelled() => return Err(cancelled_error(OPERATION)),
            result = response.bytes() => result.map_err(|error| map_reqwest_error(&error))?,
        };

        if !status.is_success() {
            return Err(map_openai_http_error(status, &payload));
        }

        serde_json::from_slice(&payload).map_err(|error| {
            ErrorEnvelope::unexpected(
                ErrorCode::new("embedding", "openai_invalid_response"),
                format!("failed to decode OpenAI response: {error}"),
                ErrorClass::NonRetriable,
            )
        })
    }
}

impl EmbeddingPort for OpenAiEmbedding {
    fn provider(&self) -> &EmbeddingProviderInfo {
        &self.provider
    }

    fn embed(&self, ctx: &RequestContext, request: EmbedRequest) -> BoxFuture<'_, Result<Embedding>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let body = OpenAiEmbeddingRequest {
                model: &self.provider.model,
                input: &request.text,
            };
            let response = self.send_request(&ctx, body).await?;
            Ok(first_embedding(response))
        })
    }
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    #[serde(default)]
    data: Vec<OpenAiEmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<String>,
}

/// An OK response without data is a valid "no vector" result.
fn first_embedding(response: OpenAiEmbeddingResponse) -> Embedding {
    response
        .data
        .into_iter()
        .min_by_key(|datum| datum.index)
        .map_or_else(Embedding::empty, |datum| Embedding::from(datum.embedding))
}

fn normalize_required(label: &str, value: &str) -> Result<Box<str>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ErrorEnvelope::expected(
            ErrorCode::invalid_input(),
            format!("{label} must be set"),
        ));
    }
    Ok(trimmed.into())
}

fn normalize_optional_required(label: &str, value: Option<&str>) -> Result<Option<Box<str>>> {
    value.map(|value| normalize_required(label, value)).transpose()
}

fn cancelled_error(operation: &'static str) -> ErrorEnvelope {
    ErrorEnvelope::cancelled("operation cancelled").with_metadata("operation", operation)
}

fn map_reqwest_error(error: &reqwest::Error) -> ErrorEnvelope {
    if error.is_timeout() {
        return ErrorEnvelope::unexpected(
            ErrorCode::timeout(),
            "OpenAI request timed out",
            ErrorClass::Retriable,
        );
    }
    if error.is_connect() {
        return ErrorEnvelope::unexpected(
            ErrorCode::io(),
            format!("OpenAI connection failed: {error}"),
            ErrorClass::Retriable,
        );
    }
    ErrorEnvelope::unexpected(
        ErrorCode::new("embedding", "openai_request_failed"),
        format!("OpenAI request failed: {error}"),
        ErrorClass::NonRetriable,
    )
}

fn map_openai_http_error(status: StatusCode, payload: &[u8]) -> ErrorEnvelope {
    let parsed = serde_json::from_slice::<OpenAiErrorResponse>(payload).ok();
    let message = parsed.as_ref().map_or_else(
        || format!("OpenAI request failed with HTTP {}", status.as_u16()),
        |parsed| parsed.error.message.clone(),
    );

    let mut envelope = match status.as_u16() {
        400 | 404 | 422 => ErrorEnvelope::expected(ErrorCode::invalid_input(), message),
        401 | 403 => ErrorEnvelope::expected(ErrorCode::permission_denied(), message),
        408 => ErrorEnvelope::unexpected(ErrorCode::timeout(), message, ErrorClass::Retriable),
        429 => ErrorEnvelope::unexpected(ErrorCode::rate_limited(), message, ErrorClass::Retriable),
        _ if status.is_server_error() => ErrorEnvelope::unexpected(
            ErrorCode::dependency_unavailable(),
            message,
            ErrorClass::Retriable,
        ),
        _ => ErrorEnvelope::unexpected(
            ErrorCode::new("embedding", "openai_http_error"),
            message,
            ErrorClass::NonRetriable,
        ),
    };

    if let Some(detail) = parsed.map(|parsed| parsed.error) {
        if let Some(error_type) = detail.error_type {
            envelope = envelope.with_metadata("error_type", error_type);
        }
        if let Some(error_code) = detail.code {
            envelope = envelope.with_metadata("error_code", error_code);
        }
    }

    envelope.with_metadata("status", status.as_u16().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn openai_request_serializes_single_input() -> std::result::Result<(), serde_json::Error> {
        let request = OpenAiEmbeddingRequest {
            model: "text-embedding-3-small",
            input: "hello",
        };
        let value = serde_json::to_value(&request)?;
        assert_eq!(
            value,
            json!({
                "model": "text-embedding-3-small",
                "input": "hello"
            })
        );
        Ok(())
    }

    #[test]
    fn empty_data_yields_empty_embedding() {
        let response = OpenAiEmbeddingResponse { data: Vec::new() };
        assert!(first_embedding(response).is_empty());
    }

    #[test]
    fn lowest_index_wins() {
        let response = OpenAiEmbeddingResponse {
            data: vec![
                OpenAiEmbeddingDatum {
                    embedding: vec![0.9],
                    index: 1,
                },
                OpenAiEmbeddingDatum {
                    embedding: vec![0.1, 0.2],
                    index: 0,
                },
            ],
        };
        assert_eq!(first_embedding(response).as_slice(), &[0.1, 0.2]);
    }

    #[test]
    fn rate_limited_is_retriable() -> std::result::Result<(), serde_json::Error> {
        let payload = serde_json::to_vec(&json!({
            "error": {
                "message": "rate limited"
            }
        }))?;
        let envelope = map_openai_http_error(StatusCode::TOO_MANY_REQUESTS, &payload);
        assert_eq!(envelope.class, ErrorClass::Retriable);
        assert_eq!(envelope.code, ErrorCode::rate_limited());
        assert_eq!(envelope.message, "rate limited");
        Ok(())
    }

    #[test]
    fn auth_failure_is_permanent_even_without_json() {
        let envelope = map_openai_http_error(StatusCode::UNAUTHORIZED, b"nope");
        assert_eq!(envelope.class, ErrorClass::NonRetriable);
        assert_eq!(envelope.code, ErrorCode::permission_denied());
        assert_eq!(envelope.metadata.get("status").map(String::as_str), Some("401"));
    }

    #[test]
    fn server_error_is_retriable_without_json() {
        let envelope = map_openai_http_error(StatusCode::BAD_GATEWAY, b"<html>");
        assert_eq!(envelope.class, ErrorClass::Retriable);
        assert_eq!(envelope.code, ErrorCode::dependency_unavailable());
    }

    #[test]
    fn config_requires_api_key() {
        let config = EmbeddingConfig::default();
        let error = OpenAiEmbeddingConfig::from_embedding_config(&config).err();
        assert_eq!(
            error.map(|error| error.code),
            Some(ErrorCode::new("config", "missing_api_key"))
        );
    }
}
