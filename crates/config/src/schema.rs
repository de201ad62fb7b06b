//! Configuration schema, defaults, validation, and normalization.
//!
//! - Deserialization uses `serde` (JSON or TOML, camelCase keys, unknown keys
//!   rejected).
//! - Validation is manual and returns typed errors mapped to `ErrorEnvelope`.
//! - Normalization makes list fields deterministic (lowercase, sorted, deduped).

use kb_sync_domain::CollectionName;
use kb_sync_shared::{ErrorCode, ErrorEnvelope, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use url::Url;

/// Current supported configuration schema version.
pub const CURRENT_CONFIG_VERSION: u32 = 1;

const REMOTE_TIMEOUT_MIN_MS: u64 = 1_000;
const REMOTE_TIMEOUT_MAX_MS: u64 = 600_000;
const VECTOR_SIZE_MIN: u64 = 1;
const VECTOR_SIZE_MAX: u64 = 65_536;

const EMBEDDING_TIMEOUT_MIN_MS: u64 = 1_000;
const EMBEDDING_TIMEOUT_MAX_MS: u64 = 1_200_000;
const EMBEDDING_MAX_INPUT_CHARS_MIN: u64 = 1;
const EMBEDDING_MAX_INPUT_CHARS_MAX: u64 = 1_000_000;
const EMBEDDING_MAX_ATTEMPTS_MIN: u64 = 1;
const EMBEDDING_MAX_ATTEMPTS_MAX: u64 = 10;
const EMBEDDING_RETRY_DELAY_MAX_MS: u64 = 60_000;
const EMBEDDING_CONCURRENCY_MIN: u64 = 1;
const EMBEDDING_CONCURRENCY_MAX: u64 = 64;

const SYNC_BATCH_SIZE_MIN: u64 = 1;
const SYNC_BATCH_SIZE_MAX: u64 = 10_000;
const SYNC_MAX_LOOKUP_FAILURES_MAX: u64 = 1_000_000;

const SCHEDULE_INTERVAL_MIN_SECS: u64 = 1;
const SCHEDULE_INTERVAL_MAX_SECS: u64 = 604_800;

pub(crate) const EXTENSIONS_MAX: usize = 128;

/// Payload keys the remote index always writes; the content key may not
/// collide with them.
const RESERVED_PAYLOAD_KEYS: [&str; 4] = ["title", "sourcePath", "contentHash", "lastModified"];

/// Strip credentials from a URL before it is echoed in an error.
pub(crate) fn sanitize_url_for_error(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            if (parsed.password().is_some() || !parsed.username().is_empty())
                && (parsed.set_username("").is_err() || parsed.set_password(None).is_err())
            {
                return "[invalid url: credentials]".to_owned();
            }
            parsed.to_string()
        },
        Err(error) => format!("[invalid url: {error}]"),
    }
}

/// Top-level kb-sync configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct SyncConfig {
    /// Schema version for forward-compatible migrations.
    pub version: u32,
    /// Vector store connection and collection settings.
    pub remote_index: RemoteIndexConfig,
    /// Embedding provider settings.
    pub embedding: EmbeddingConfig,
    /// Local corpus settings.
    pub knowledge_base: KnowledgeBaseConfig,
    /// Per-pass behavior.
    pub sync: SyncPassConfig,
    /// Daemon cadence.
    pub schedule: ScheduleConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            version: CURRENT_CONFIG_VERSION,
            remote_index: RemoteIndexConfig::default(),
            embedding: EmbeddingConfig::default(),
            knowledge_base: KnowledgeBaseConfig::default(),
            sync: SyncPassConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Validate and normalize the config.
    pub fn validate_and_normalize(mut self) -> Result<ValidatedSyncConfig, ConfigSchemaError> {
        if self.version != CURRENT_CONFIG_VERSION {
            return Err(ConfigSchemaError::UnsupportedVersion {
                found: self.version,
                supported: CURRENT_CONFIG_VERSION,
            });
        }

        let collection = self.remote_index.normalize_and_validate()?;
        self.embedding.normalize_and_validate()?;
        self.knowledge_base.normalize_and_validate()?;
        self.sync.validate()?;
        self.schedule.validate()?;

        Ok(ValidatedSyncConfig {
            raw: self,
            collection,
        })
    }
}

/// Config that passed validation, with parsed domain values attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSyncConfig {
    raw: SyncConfig,
    collection: CollectionName,
}

impl ValidatedSyncConfig {
    /// Parsed collection name.
    #[must_use]
    pub const fn collection_name(&self) -> &CollectionName {
        &self.collection
    }

    /// Borrow the raw config.
    #[must_use]
    pub const fn as_raw(&self) -> &SyncConfig {
        &self.raw
    }

    /// Consume the wrapper and return the raw config.
    #[must_use]
    pub fn into_inner(self) -> SyncConfig {
        self.raw
    }
}

impl std::ops::Deref for ValidatedSyncConfig {
    type Target = SyncConfig;

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}

/// Vector store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct RemoteIndexConfig {
    /// Base URL of the Qdrant REST API.
    pub url: Box<str>,
    /// Optional `api-key` header value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<SecretString>,
    /// Target collection.
    pub collection_name: Box<str>,
    /// Vector width used when creating the collection.
    pub vector_size: u32,
    /// Per-request timeout.
    pub timeout_ms: u64,
    /// Payload key that carries the document text.
    pub content_field: Box<str>,
}

impl Default for RemoteIndexConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".into(),
            api_key: None,
            collection_name: "knowledge_base".into(),
            vector_size: 1536,
            timeout_ms: 30_000,
            content_field: "doc_content".into(),
        }
    }
}

impl RemoteIndexConfig {
    fn normalize_and_validate(&mut self) -> Result<CollectionName, ConfigSchemaError> {
        self.url = validate_http_url("remoteIndex", "url", &self.url)?;
        validate_secret("remoteIndex", "apiKey", self.api_key.as_ref())?;

        let collection = CollectionName::parse(self.collection_name.as_ref()).map_err(|error| {
            ConfigSchemaError::InvalidValue {
                section: "remoteIndex",
                field: "collectionName",
                reason: error.to_string(),
            }
        })?;
        self.collection_name = collection.as_str().into();

        validate_range(
            "remoteIndex",
            "vectorSize",
            u64::from(self.vector_size),
            VECTOR_SIZE_MIN,
            VECTOR_SIZE_MAX,
        )?;
        validate_timeout_ms(
            "remoteIndex",
            "timeoutMs",
            self.timeout_ms,
            REMOTE_TIMEOUT_MIN_MS,
            REMOTE_TIMEOUT_MAX_MS,
        )?;

        let field = self.content_field.trim();
        if field.is_empty() || RESERVED_PAYLOAD_KEYS.contains(&field) {
            return Err(ConfigSchemaError::InvalidValue {
                section: "remoteIndex",
                field: "contentField",
                reason: format!("must be non-empty and not one of {RESERVED_PAYLOAD_KEYS:?}"),
            });
        }
        self.content_field = field.into();

        Ok(collection)
    }
}

/// Embedding provider settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct EmbeddingConfig {
    /// Provider API key; required to build the adapter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<SecretString>,
    /// Model identifier.
    pub model: Box<str>,
    /// Base URL of the OpenAI-compatible API.
    pub base_url: Box<str>,
    /// Per-request timeout.
    pub timeout_ms: u64,
    /// Longer inputs are truncated to this many characters.
    pub max_input_chars: u32,
    /// Attempts per document, including the first.
    pub max_attempts: u32,
    /// Linear backoff base: attempt `k` waits `k * retryBaseDelayMs`.
    pub retry_base_delay_ms: u64,
    /// Concurrent embedding requests within a batch.
    pub concurrency: u32,
    /// Stop retrying on auth and malformed-request errors.
    pub fail_fast_on_permanent: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "text-embedding-3-small".into(),
            base_url: "https://api.openai.com/v1".into(),
            timeout_ms: 60_000,
            max_input_chars: 30_000,
            max_attempts: 3,
            retry_base_delay_ms: 1_000,
            concurrency: 1,
            fail_fast_on_permanent: false,
        }
    }
}

impl EmbeddingConfig {
    fn normalize_and_validate(&mut self) -> Result<(), ConfigSchemaError> {
        let model = self.model.trim();
        if model.is_empty() {
            return Err(ConfigSchemaError::InvalidValue {
                section: "embedding",
                field: "model",
                reason: "must be non-empty".to_owned(),
            });
        }
        self.model = model.into();

        self.base_url = validate_http_url("embedding", "baseUrl", &self.base_url)?;
        validate_secret("embedding", "apiKey", self.api_key.as_ref())?;
        validate_timeout_ms(
            "embedding",
            "timeoutMs",
            self.timeout_ms,
            EMBEDDING_TIMEOUT_MIN_MS,
            EMBEDDING_TIMEOUT_MAX_MS,
        )?;
        validate_range(
            "embedding",
            "maxInputChars",
            u64::from(self.max_input_chars),
            EMBEDDING_MAX_INPUT_CHARS_MIN,
            EMBEDDING_MAX_INPUT_CHARS_MAX,
        )?;
        validate_range(
            "embedding",
            "maxAttempts",
            u64::from(self.max_attempts),
            EMBEDDING_MAX_ATTEMPTS_MIN,
            EMBEDDING_MAX_ATTEMPTS_MAX,
        )?;
        validate_range(
            "embedding",
            "retryBaseDelayMs",
            self.retry_base_delay_ms,
            0,
            EMBEDDING_RETRY_DELAY_MAX_MS,
        )?;
        validate_range(
            "embedding",
            "concurrency",
            u64::from(self.concurrency),
            EMBEDDING_CONCURRENCY_MIN,
            EMBEDDING_CONCURRENCY_MAX,
        )
    }
}

/// Local corpus settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct KnowledgeBaseConfig {
    /// Root directory scanned on every pass.
    pub directory: PathBuf,
    /// Allowed file extensions.
    pub extensions: Vec<Box<str>>,
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./knowledge_base"),
            extensions: vec!["md".into(), "txt".into()],
        }
    }
}

impl KnowledgeBaseConfig {
    fn normalize_and_validate(&mut self) -> Result<(), ConfigSchemaError> {
        if self.directory.as_os_str().is_empty() {
            return Err(ConfigSchemaError::InvalidValue {
                section: "knowledgeBase",
                field: "directory",
                reason: "must be non-empty".to_owned(),
            });
        }

        let mut normalized = Vec::with_capacity(self.extensions.len());
        for raw in &self.extensions {
            let Some(extension) = normalize_extension(raw) else {
                return Err(ConfigSchemaError::InvalidExtension {
                    extension: raw.to_string(),
                });
            };
            normalized.push(extension);
        }
        normalized.sort_unstable();
        normalized.dedup();

        if normalized.is_empty() {
            return Err(ConfigSchemaError::InvalidValue {
                section: "knowledgeBase",
                field: "extensions",
                reason: "at least one extension is required".to_owned(),
            });
        }
        if normalized.len() > EXTENSIONS_MAX {
            return Err(ConfigSchemaError::ListTooLarge {
                section: "knowledgeBase",
                field: "extensions",
                len: normalized.len(),
                max: EXTENSIONS_MAX,
            });
        }

        self.extensions = normalized;
        Ok(())
    }
}

/// Normalize `.MD`, `*.md`, ` md ` to `md`. Returns `None` for invalid entries.
pub(crate) fn normalize_extension(raw: &str) -> Option<Box<str>> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("*.").unwrap_or(trimmed);
    let trimmed = trimmed.strip_prefix('.').unwrap_or(trimmed);
    let candidate = trimmed.to_ascii_lowercase();
    let valid = !candidate.is_empty()
        && candidate
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '+' | '-'));
    valid.then(|| candidate.into_boxed_str())
}

/// Per-pass behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct SyncPassConfig {
    /// Changed documents per embed+upsert batch.
    pub batch_size: u32,
    /// Check one random point after each upsert.
    pub verify_writes: bool,
    /// Seed for the verification sampler; entropy when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_seed: Option<u64>,
    /// Abort the pass once more lookups than this have failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_lookup_failures: Option<u32>,
}

impl Default for SyncPassConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            verify_writes: true,
            verify_seed: None,
            max_lookup_failures: None,
        }
    }
}

impl SyncPassConfig {
    fn validate(&self) -> Result<(), ConfigSchemaError> {
        validate_range(
            "sync",
            "batchSize",
            u64::from(self.batch_size),
            SYNC_BATCH_SIZE_MIN,
            SYNC_BATCH_SIZE_MAX,
        )?;
        if let Some(limit) = self.max_lookup_failures {
            validate_range(
                "sync",
                "maxLookupFailures",
                u64::from(limit),
                0,
                SYNC_MAX_LOOKUP_FAILURES_MAX,
            )?;
        }
        Ok(())
    }
}

/// Daemon cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ScheduleConfig {
    /// Seconds between pass triggers.
    pub interval_secs: u64,
    /// Run one pass immediately when the daemon starts.
    pub run_on_start: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3_600,
            run_on_start: true,
        }
    }
}

impl ScheduleConfig {
    fn validate(&self) -> Result<(), ConfigSchemaError> {
        validate_range(
            "schedule",
            "intervalSecs",
            self.interval_secs,
            SCHEDULE_INTERVAL_MIN_SECS,
            SCHEDULE_INTERVAL_MAX_SECS,
        )
    }
}

/// Typed validation errors for the configuration schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSchemaError {
    /// The config version is not supported by this binary.
    UnsupportedVersion {
        /// Version found in the config.
        found: u32,
        /// Version supported by this crate.
        supported: u32,
    },
    /// A timeout value is out of bounds.
    TimeoutOutOfRange {
        /// Schema section (e.g. `embedding`).
        section: &'static str,
        /// Field name in the config file (e.g. `timeoutMs`).
        field: &'static str,
        /// Value provided (ms).
        value_ms: u64,
        /// Minimum allowed value (ms).
        min_ms: u64,
        /// Maximum allowed value (ms).
        max_ms: u64,
    },
    /// A numeric limit is out of bounds.
    LimitOutOfRange {
        /// Schema section (e.g. `sync`).
        section: &'static str,
        /// Field name in the config file (e.g. `batchSize`).
        field: &'static str,
        /// Value provided.
        value: u64,
        /// Minimum allowed value.
        min: u64,
        /// Maximum allowed value.
        max: u64,
    },
    /// A list field exceeds the maximum allowed size.
    ListTooLarge {
        /// Schema section.
        section: &'static str,
        /// Field name in the config file.
        field: &'static str,
        /// Number of entries after normalization/deduplication.
        len: usize,
        /// Maximum allowed number of entries.
        max: usize,
    },
    /// A file extension entry is invalid.
    InvalidExtension {
        /// Invalid extension value.
        extension: String,
    },
    /// A URL entry is invalid.
    InvalidUrl {
        /// Schema section (e.g. `remoteIndex`).
        section: &'static str,
        /// Field name in the config file (e.g. `url`).
        field: &'static str,
        /// Invalid URL value.
        url: String,
    },
    /// A field has an invalid value.
    InvalidValue {
        /// Schema section.
        section: &'static str,
        /// Field name in the config file.
        field: &'static str,
        /// Human readable reason.
        reason: String,
    },
}

impl ConfigSchemaError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedVersion { .. } => ErrorCode::new("config", "unsupported_version"),
            Self::TimeoutOutOfRange { .. } => ErrorCode::new("config", "invalid_timeout"),
            Self::LimitOutOfRange { .. } => ErrorCode::new("config", "invalid_limit"),
            Self::ListTooLarge { .. } => ErrorCode::new("config", "list_too_large"),
            Self::InvalidExtension { .. } => ErrorCode::new("config", "invalid_extension"),
            Self::InvalidUrl { .. } => ErrorCode::new("config", "invalid_url"),
            Self::InvalidValue { .. } => ErrorCode::new("config", "invalid_value"),
        }
    }
}

impl fmt::Display for ConfigSchemaError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion { found, supported } => write!(
                formatter,
                "unsupported config version: {found} (supported: {supported})"
            ),
            Self::TimeoutOutOfRange {
                section,
                field,
                value_ms,
                min_ms,
                max_ms,
            } => write!(
                formatter,
                "{section}.{field} must be within [{min_ms}, {max_ms}] ms (got {value_ms})"
            ),
            Self::LimitOutOfRange {
                section,
                field,
                value,
                min,
                max,
            } => write!(
                formatter,
                "{section}.{field} must be within [{min}, {max}] (got {value})"
            ),
            Self::ListTooLarge {
                section,
                field,
                len,
                max,
            } => write!(
                formatter,
                "{section}.{field} must have at most {max} entries (got {len})"
            ),
            Self::InvalidExtension { extension } => {
                write!(formatter, "invalid extension entry: {extension}")
            },
            Self::InvalidUrl { section, field, .. } => {
                write!(formatter, "invalid URL for {section}.{field}")
            },
            Self::InvalidValue {
                section,
                field,
                reason,
            } => write!(formatter, "invalid {section}.{field}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigSchemaError {}

impl From<ConfigSchemaError> for ErrorEnvelope {
    fn from(error: ConfigSchemaError) -> Self {
        let envelope = Self::expected(error.error_code(), error.to_string());

        match error {
            ConfigSchemaError::UnsupportedVersion { found, supported } => envelope
                .with_metadata("found", found.to_string())
                .with_metadata("supported", supported.to_string()),
            ConfigSchemaError::TimeoutOutOfRange {
                section,
                field,
                value_ms,
                min_ms,
                max_ms,
            } => envelope
                .with_metadata("section", section)
                .with_metadata("field", field)
                .with_metadata("value_ms", value_ms.to_string())
                .with_metadata("min_ms", min_ms.to_string())
                .with_metadata("max_ms", max_ms.to_string()),
            ConfigSchemaError::LimitOutOfRange {
                section,
                field,
                value,
                min,
                max,
            } => envelope
                .with_metadata("section", section)
                .with_metadata("field", field)
                .with_metadata("value", value.to_string())
                .with_metadata("min", min.to_string())
                .with_metadata("max", max.to_string()),
            ConfigSchemaError::ListTooLarge {
                section,
                field,
                len,
                max,
            } => envelope
                .with_metadata("section", section)
                .with_metadata("field", field)
                .with_metadata("len", len.to_string())
                .with_metadata("max", max.to_string()),
            ConfigSchemaError::InvalidExtension { extension } => {
                envelope.with_metadata("extension", extension)
            },
            ConfigSchemaError::InvalidUrl {
                section,
                field,
                url,
            } => envelope
                .with_metadata("section", section)
                .with_metadata("field", field)
                .with_metadata("url", sanitize_url_for_error(&url)),
            ConfigSchemaError::InvalidValue {
                section,
                field,
                reason,
            } => envelope
                .with_metadata("section", section)
                .with_metadata("field", field)
                .with_metadata("reason", reason),
        }
    }
}

/// Parse and validate a config from JSON.
pub fn parse_sync_config_json(input: &str) -> Result<ValidatedSyncConfig, ErrorEnvelope> {
    let config: SyncConfig = serde_json::from_str(input).map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::new("config", "invalid_json"),
            format!("invalid config JSON: {error}"),
        )
    })?;
    config.validate_and_normalize().map_err(Into::into)
}

/// Parse and validate a config from TOML.
pub fn parse_sync_config_toml(input: &str) -> Result<ValidatedSyncConfig, ErrorEnvelope> {
    let config: SyncConfig = toml::from_str(input).map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::new("config", "invalid_toml"),
            format!("invalid config TOML: {error}"),
        )
    })?;
    config.validate_and_normalize().map_err(Into::into)
}

fn validate_http_url(
    section: &'static str,
    field: &'static str,
    value: &str,
) -> Result<Box<str>, ConfigSchemaError> {
    let trimmed = value.trim();
    let invalid = || ConfigSchemaError::InvalidUrl {
        section,
        field,
        url: trimmed.to_owned(),
    };
    let parsed = Url::parse(trimmed).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(invalid());
    }
    Ok(trimmed.trim_end_matches('/').into())
}

fn validate_secret(
    section: &'static str,
    field: &'static str,
    value: Option<&SecretString>,
) -> Result<(), ConfigSchemaError> {
    if value.is_some_and(SecretString::is_blank) {
        return Err(ConfigSchemaError::InvalidValue {
            section,
            field,
            reason: "must be non-empty when set".to_owned(),
        });
    }
    Ok(())
}

const fn validate_timeout_ms(
    section: &'static str,
    field: &'static str,
    value_ms: u64,
    min_ms: u64,
    max_ms: u64,
) -> Result<(), ConfigSchemaError> {
    if value_ms < min_ms || value_ms > max_ms {
        return Err(ConfigSchemaError::TimeoutOutOfRange {
            section,
            field,
            value_ms,
            min_ms,
            max_ms,
        });
    }
    Ok(())
}

const fn validate_range(
    section: &'static str,
    field: &'static str,
    value: u64,
    min: u64,
    max: u64,
) -> Result<(), ConfigSchemaError> {
    if value < min || value > max {
        return Err(ConfigSchemaError::LimitOutOfRange {
            section,
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}
