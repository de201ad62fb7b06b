//! Qdrant REST adapter.

use super::error::{
    QDRANT_PROVIDER_ID, QdrantErrorContext, invalid_response, map_rest_error, map_rest_transport_error,
    not_acknowledged, rejected,
};
use kb_sync_config::RemoteIndexConfig;
use kb_sync_domain::{CollectionName, Document, DocumentId, SourcePath};
use kb_sync_ports::{BoxFuture, RemoteIndexPort, RemoteIndexProviderInfo, RemoteRecord};
use kb_sync_shared::{ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;
use url::Url;

const API_KEY_HEADER: HeaderName = HeaderName::from_static("api-key");
const ERROR_BODY_PREVIEW_CHARS: usize = 512;

/// Qdrant REST adapter configuration.
#[derive(Debug, Clone)]
pub struct QdrantRestConfig {
    /// Base URL of the Qdrant HTTP API.
    pub url: Box<str>,
    /// Optional API key sent as the `api-key` header.
    pub api_key: Option<Box<str>>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Payload key that carries the document body.
    pub content_field: Box<str>,
}

impl QdrantRestConfig {
    /// Build from the validated remote index config.
    #[must_use]
    pub fn from_remote_index_config(config: &RemoteIndexConfig) -> Self {
        Self {
            url: config.url.clone(),
            api_key: config
                .api_key
                .as_ref()
                .filter(|secret| !secret.is_blank())
                .map(|secret| secret.expose().into()),
            timeout_ms: config.timeout_ms,
            content_field: config.content_field.clone(),
        }
    }

    /// Validates configuration invariants for the REST adapter.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "Qdrant URL is required",
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "Qdrant timeout must be greater than zero",
            ));
        }
        if self.content_field.trim().is_empty() {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "Qdrant content field must be non-empty",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct QdrantResponse<T> {
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct QdrantErrorBody {
    status: Option<QdrantErrorStatus>,
}

#[derive(Debug, Deserialize)]
struct QdrantErrorStatus {
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrollResult {
    #[serde(default)]
    points: Vec<ScrolledPoint>,
}

#[derive(Debug, Deserialize)]
struct ScrolledPoint {
    id: Value,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct UpdateResult {
    status: Option<String>,
}

#[derive(Debug, Serialize)]
struct UpsertBody<'a> {
    points: Vec<QdrantPoint<'a>>,
}

#[derive(Debug, Serialize)]
struct QdrantPoint<'a> {
    id: Value,
    vector: &'a [f32],
    payload: Map<String, Value>,
}

struct RawResponse {
    status: StatusCode,
    body: Vec<u8>,
}

/// Qdrant REST remote index adapter.
#[derive(Clone)]
pub struct QdrantRestIndex {
    provider: RemoteIndexProviderInfo,
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    content_field: Box<str>,
}

impl QdrantRestIndex {
    /// Creates a Qdrant REST adapter instance from configuration.
    pub fn new(config: QdrantRestConfig) -> Result<Self> {
        config.validate()?;
        let base_url = Url::parse(config.url.trim().trim_end_matches('/')).map_err(|error| {
            ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                format!("Qdrant URL is invalid: {error}"),
            )
        })?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "Qdrant URL must be an http(s) URL",
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = config.api_key.as_deref() {
            let mut value = HeaderValue::from_str(api_key.trim()).map_err(|_| {
                ErrorEnvelope::expected(
                    ErrorCode::invalid_input(),
                    "Qdrant API key contains invalid header characters",
                )
            })?;
            value.set_sensitive(true);
            headers.insert(API_KEY_HEADER, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .default_headers(headers)
            .build()
            .map_err(|error| {
                ErrorEnvelope::unexpected(
                    ErrorCode::new("vector", "vdb_client_init_failed"),
                    format!("failed to build Qdrant REST client: {error}"),
                    ErrorClass::NonRetriable,
                )
            })?;

        let provider = RemoteIndexProviderInfo {
            id: QDRANT_PROVIDER_ID.into(),
            endpoint: display_endpoint(&base_url),
        };

        Ok(Self {
            provider,
            client,
            base_url,
            timeout: Duration::from_millis(config.timeout_ms),
            content_field: config.content_field,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ErrorEnvelope::invariant(
                    ErrorCode::internal(),
                    "Qdrant base URL cannot carry path segments",
                )
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        request: reqwest::RequestBuilder,
        error_ctx: &QdrantErrorContext,
    ) -> Result<RawResponse> {
        ctx.ensure_not_cancelled(error_ctx.operation)?;

        let response = tokio::select! {
            () = ctx.cancelled() => return Err(cancelled_error(error_ctx.operation)),
            res = tokio::time::timeout(self.timeout, request.send()) => res,
        };
        let response = match response {
            Ok(result) => result.map_err(|error| map_rest_transport_error(&error, error_ctx))?,
            Err(_) => return Err(timeout_error(error_ctx)),
        };

        let status = response.status();
        let body = tokio::select! {
            () = ctx.cancelled() => return Err(cancelled_error(error_ctx.operation)),
            res = response.bytes() => {
                res.map_err(|error| map_rest_transport_error(&error, error_ctx))?
            }
        };

        Ok(RawResponse {
            status,
            body: body.to_vec(),
        })
    }

    fn decode<T: for<'de> Deserialize<'de>>(
        raw: &RawResponse,
        error_ctx: &QdrantErrorContext,
    ) -> Result<T> {
        let decoded: QdrantResponse<T> = serde_json::from_slice(&raw.body).map_err(|error| {
            invalid_response(format!("invalid Qdrant response: {error}"), error_ctx)
        })?;
        decoded
            .result
            .ok_or_else(|| invalid_response("Qdrant response has no result", error_ctx))
    }

    fn build_point<'a>(&self, document: &'a Document) -> QdrantPoint<'a> {
        let mut payload = Map::new();
        payload.insert("title".to_owned(), Value::String(document.title.clone()));
        payload.insert(
            self.content_field.to_string(),
            Value::String(document.content.to_string()),
        );
        payload.insert(
            "sourcePath".to_owned(),
            Value::String(document.source_path.as_str().to_owned()),
        );
        payload.insert(
            "contentHash".to_owned(),
            Value::String(document.content_hash.as_str().to_owned()),
        );
        payload.insert(
            "lastModified".to_owned(),
            Value::String(document.last_modified.to_rfc3339()),
        );

        QdrantPoint {
            id: point_id_value(&document.id),
            vector: document.embedding.as_slice(),
            payload,
        }
    }
}

impl RemoteIndexPort for QdrantRestIndex {
    fn provider(&self) -> &RemoteIndexProviderInfo {
        &self.provider
    }

    fn collection_exists(
        &self,
        ctx: &RequestContext,
        collection: CollectionName,
    ) -> BoxFuture<'_, Result<bool>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let url = self.endpoint(&["collections", collection.as_str()])?;
            let error_ctx =
                QdrantErrorContext::new("qdrant.collection_exists", collection.as_str(), url.path());
            let raw = self
                .execute(&ctx, self.client.get(url.clone()), &error_ctx)
                .await?;
            match raw.status {
                StatusCode::OK => Ok(true),
                StatusCode::NOT_FOUND => Ok(false),
                status => Err(http_error(status, &raw.body, &error_ctx)),
            }
        })
    }

    fn create_collection(
        &self,
        ctx: &RequestContext,
        collection: CollectionName,
        vector_size: u32,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let url = self.endpoint(&["collections", collection.as_str()])?;
            let error_ctx =
                QdrantErrorContext::new("qdrant.create_collection", collection.as_str(), url.path());
            if vector_size == 0 {
                return Err(rejected(
                    ErrorCode::invalid_input(),
                    "vector size must be greater than zero",
                    &error_ctx,
                ));
            }
            let body = json!({
                "vectors": {
                    "size": vector_size,
                    "distance": "Cosine",
                }
            });
            let raw = self
                .execute(&ctx, self.client.put(url.clone()).json(&body), &error_ctx)
                .await?;

            if raw.status == StatusCode::CONFLICT {
                return Ok(());
            }
            if !raw.status.is_success() {
                let message = error_message(raw.status, &raw.body);
                if raw.status == StatusCode::BAD_REQUEST && is_already_exists(&message) {
                    return Ok(());
                }
                return Err(map_rest_error(message, raw.status.as_u16(), &error_ctx));
            }

            let created: Value = Self::decode(&raw, &error_ctx)?;
            if created == Value::Bool(false) {
                return Err(not_acknowledged(
                    ErrorCode::new("vector", "collection_ensure_failed"),
                    "Qdrant did not acknowledge collection creation",
                    &error_ctx,
                ));
            }
            Ok(())
        })
    }

    fn find_by_source_path(
        &self,
        ctx: &RequestContext,
        collection: CollectionName,
        path: SourcePath,
    ) -> BoxFuture<'_, Result<Option<RemoteRecord>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let url = self.endpoint(&["collections", collection.as_str(), "points", "scroll"])?;
            let error_ctx = QdrantErrorContext::new(
                "qdrant.find_by_source_path",
                collection.as_str(),
                url.path(),
            );
            let body = json!({
                "filter": {
                    "must": [
                        { "key": "sourcePath", "match": { "value": path.as_str() } }
                    ]
                },
                "limit": 1,
                "with_payload": true,
                "with_vector": false,
            });
            let raw = self
                .execute(&ctx, self.client.post(url.clone()).json(&body), &error_ctx)
                .await?;
            if !raw.status.is_success() {
                return Err(http_error(raw.status, &raw.body, &error_ctx));
            }

            let scrolled: ScrollResult = Self::decode(&raw, &error_ctx)?;
            let Some(point) = scrolled.points.into_iter().next() else {
                return Ok(None);
            };
            let id = parse_point_id(&point.id).ok_or_else(|| {
                invalid_response(
                    format!("Qdrant returned an unusable point id: {}", point.id),
                    &error_ctx,
                )
            })?;
            let content_hash = point
                .payload
                .as_ref()
                .and_then(|payload| payload.get("contentHash"))
                .and_then(Value::as_str)
                .map(Into::into);

            Ok(Some(RemoteRecord { id, content_hash }))
        })
    }

    fn upsert(
        &self,
        ctx: &RequestContext,
        collection: CollectionName,
        documents: Vec<Document>,
    ) -> BoxFuture<'_, Result<usize>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let mut url = self.endpoint(&["collections", collection.as_str(), "points"])?;
            let error_ctx =
                QdrantErrorContext::new("qdrant.upsert", collection.as_str(), url.path());
            if documents.is_empty() {
                return Err(rejected(
                    ErrorCode::new("vector", "empty_upsert"),
                    "upsert called with no documents",
                    &error_ctx,
                ));
            }
            if let Some(unembedded) = documents.iter().find(|doc| !doc.is_embedded()) {
                return Err(rejected(
                    ErrorCode::new("vector", "unembedded_document"),
                    "upsert called with a document that has no embedding",
                    &error_ctx,
                )
                .with_metadata("source_path", unembedded.source_path.as_str()));
            }
            url.set_query(Some("wait=true"));

            let body = UpsertBody {
                points: documents.iter().map(|doc| self.build_point(doc)).collect(),
            };
            let raw = self
                .execute(&ctx, self.client.put(url.clone()).json(&body), &error_ctx)
                .await?;
            if !raw.status.is_success() {
                return Err(http_error(raw.status, &raw.body, &error_ctx));
            }

            let update: UpdateResult = Self::decode(&raw, &error_ctx)?;
            match update.status.as_deref() {
                Some("completed" | "acknowledged") => Ok(documents.len()),
                other => Err(not_acknowledged(
                    ErrorCode::new("vector", "upsert_failed"),
                    format!(
                        "Qdrant upsert finished with status {}",
                        other.unwrap_or("<missing>")
                    ),
                    &error_ctx,
                )),
            }
        })
    }

    fn point_exists(
        &self,
        ctx: &RequestContext,
        collection: CollectionName,
        id: DocumentId,
    ) -> BoxFuture<'_, Result<bool>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let url = self.endpoint(&["collections", collection.as_str(), "points", id.as_str()])?;
            let error_ctx =
                QdrantErrorContext::new("qdrant.point_exists", collection.as_str(), url.path());
            let raw = self
                .execute(&ctx, self.client.get(url.clone()), &error_ctx)
                .await?;
            match raw.status {
                StatusCode::OK => Ok(true),
                StatusCode::NOT_FOUND => Ok(false),
                status => Err(http_error(status, &raw.body, &error_ctx)),
            }
        })
    }
}

/// Integer-looking ids go out as JSON numbers; Qdrant rejects numeric strings.
fn point_id_value(id: &DocumentId) -> Value {
    id.as_str()
        .parse::<u64>()
        .map_or_else(|_| Value::String(id.as_str().to_owned()), Value::from)
}

fn parse_point_id(value: &Value) -> Option<DocumentId> {
    let raw = match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    DocumentId::parse(raw).ok()
}

fn display_endpoint(url: &Url) -> Box<str> {
    let mut display = url.clone();
    let _ = display.set_username("");
    let _ = display.set_password(None);
    display.set_query(None);
    display.as_str().trim_end_matches('/').into()
}

fn http_error(status: StatusCode, body: &[u8], error_ctx: &QdrantErrorContext) -> ErrorEnvelope {
    map_rest_error(error_message(status, body), status.as_u16(), error_ctx)
}

fn error_message(status: StatusCode, body: &[u8]) -> String {
    let parsed = serde_json::from_slice::<QdrantErrorBody>(body)
        .ok()
        .and_then(|body| body.status)
        .and_then(|status| status.error);
    if let Some(message) = parsed {
        return message;
    }
    let text = String::from_utf8_lossy(body);
    let preview: String = text.chars().take(ERROR_BODY_PREVIEW_CHARS).collect();
    if preview.trim().is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), preview.trim())
    }
}

fn is_already_exists(message: &str) -> bool {
    message.to_ascii_lowercase().contains("already exists")
}

fn cancelled_error(operation: &'static str) -> ErrorEnvelope {
    ErrorEnvelope::cancelled("operation cancelled").with_metadata("operation", operation)
}

fn timeout_error(error_ctx: &QdrantErrorContext) -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::new("vector", "vdb_timeout"),
        "Qdrant request timed out",
        ErrorClass::Retriable,
    )
    .with_metadata("operation", error_ctx.operation)
}
