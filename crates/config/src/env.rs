//! Environment variable parsing and env-to-config merging.
//!
//! This module keeps env parsing:
//! - strict (invalid values fail fast)
//! - deterministic (CSV lists normalize to sorted/deduped values)
//! - safe (secret values are redacted in error metadata)

use crate::schema::{EXTENSIONS_MAX, SyncConfig, ValidatedSyncConfig, normalize_extension};
use kb_sync_shared::{ErrorCode, ErrorEnvelope, REDACTED_VALUE, SecretString, is_secret_key};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use url::Url;

/// Env var: Qdrant base URL.
pub const ENV_QDRANT_URL: &str = "KB_SYNC_QDRANT_URL";
/// Env var: Qdrant base URL (alias).
pub const ENV_QDRANT_URL_ALIAS: &str = "QDRANT_URL";
/// Env var: Qdrant API key (secret).
pub const ENV_QDRANT_API_AUTH: &str = "KB_SYNC_QDRANT_API_KEY";
/// Env var: Qdrant API key (alias).
pub const ENV_QDRANT_API_AUTH_ALIAS: &str = "QDRANT_API_KEY";
/// Env var: collection name.
pub const ENV_COLLECTION: &str = "KB_SYNC_COLLECTION";
/// Env var: collection name (alias).
pub const ENV_COLLECTION_ALIAS: &str = "QDRANT_COLLECTION_NAME";
/// Env var: vector size used when creating the collection.
pub const ENV_VECTOR_SIZE: &str = "KB_SYNC_VECTOR_SIZE";
/// Env var: payload key for document text.
pub const ENV_CONTENT_FIELD: &str = "KB_SYNC_CONTENT_FIELD";
/// Env var: Qdrant request timeout in milliseconds.
pub const ENV_QDRANT_TIMEOUT_MS: &str = "KB_SYNC_QDRANT_TIMEOUT_MS";

/// Env var: embedding API key (secret).
pub const ENV_OPENAI_API_AUTH: &str = "KB_SYNC_OPENAI_API_KEY";
/// Env var: embedding API key (alias).
pub const ENV_OPENAI_API_AUTH_ALIAS: &str = "OPENAI_API_KEY";
/// Env var: embedding model.
pub const ENV_EMBEDDING_MODEL: &str = "KB_SYNC_EMBEDDING_MODEL";
/// Env var: embedding model (alias).
pub const ENV_EMBEDDING_MODEL_ALIAS: &str = "OPENAI_EMBEDDING_MODEL";
/// Env var: embedding base URL.
pub const ENV_EMBEDDING_BASE_URL: &str = "KB_SYNC_EMBEDDING_BASE_URL";
/// Env var: embedding timeout in milliseconds.
pub const ENV_EMBEDDING_TIMEOUT_MS: &str = "KB_SYNC_EMBEDDING_TIMEOUT_MS";
/// Env var: embedding input truncation length.
pub const ENV_EMBEDDING_MAX_INPUT_CHARS: &str = "KB_SYNC_EMBEDDING_MAX_INPUT_CHARS";
/// Env var: embedding attempts per document.
pub const ENV_EMBEDDING_MAX_ATTEMPTS: &str = "KB_SYNC_EMBEDDING_MAX_ATTEMPTS";
/// Env var: embedding retry base delay in milliseconds.
pub const ENV_EMBEDDING_RETRY_BASE_DELAY_MS: &str = "KB_SYNC_EMBEDDING_RETRY_BASE_DELAY_MS";
/// Env var: concurrent embedding requests.
pub const ENV_EMBEDDING_CONCURRENCY: &str = "KB_SYNC_EMBEDDING_CONCURRENCY";
/// Env var: stop retrying permanent embedding failures.
pub const ENV_EMBEDDING_FAIL_FAST: &str = "KB_SYNC_EMBEDDING_FAIL_FAST";

/// Env var: knowledge base root directory.
pub const ENV_DIRECTORY: &str = "KB_SYNC_DIRECTORY";
/// Env var: allowed extensions (CSV).
pub const ENV_EXTENSIONS: &str = "KB_SYNC_EXTENSIONS";

/// Env var: sync batch size.
pub const ENV_BATCH_SIZE: &str = "KB_SYNC_BATCH_SIZE";
/// Env var: verify one point per uploaded batch.
pub const ENV_VERIFY_WRITES: &str = "KB_SYNC_VERIFY_WRITES";
/// Env var: seed for the verification sampler.
pub const ENV_VERIFY_SEED: &str = "KB_SYNC_VERIFY_SEED";
/// Env var: lookup failures tolerated per pass.
pub const ENV_MAX_LOOKUP_FAILURES: &str = "KB_SYNC_MAX_LOOKUP_FAILURES";

/// Env var: daemon interval in seconds.
pub const ENV_INTERVAL_SECS: &str = "KB_SYNC_INTERVAL_SECS";
/// Env var: run a pass when the daemon starts.
pub const ENV_RUN_ON_START: &str = "KB_SYNC_RUN_ON_START";

const ALL_ENV_VARS: [&str; 28] = [
    ENV_QDRANT_URL,
    ENV_QDRANT_URL_ALIAS,
    ENV_QDRANT_API_AUTH,
    ENV_QDRANT_API_AUTH_ALIAS,
    ENV_COLLECTION,
    ENV_COLLECTION_ALIAS,
    ENV_VECTOR_SIZE,
    ENV_CONTENT_FIELD,
    ENV_QDRANT_TIMEOUT_MS,
    ENV_OPENAI_API_AUTH,
    ENV_OPENAI_API_AUTH_ALIAS,
    ENV_EMBEDDING_MODEL,
    ENV_EMBEDDING_MODEL_ALIAS,
    ENV_EMBEDDING_BASE_URL,
    ENV_EMBEDDING_TIMEOUT_MS,
    ENV_EMBEDDING_MAX_INPUT_CHARS,
    ENV_EMBEDDING_MAX_ATTEMPTS,
    ENV_EMBEDDING_RETRY_BASE_DELAY_MS,
    ENV_EMBEDDING_CONCURRENCY,
    ENV_EMBEDDING_FAIL_FAST,
    ENV_DIRECTORY,
    ENV_EXTENSIONS,
    ENV_BATCH_SIZE,
    ENV_VERIFY_WRITES,
    ENV_VERIFY_SEED,
    ENV_MAX_LOOKUP_FAILURES,
    ENV_INTERVAL_SECS,
    ENV_RUN_ON_START,
];

/// Typed env-derived overrides for `SyncConfig`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncEnv {
    /// Override for `remoteIndex.url`.
    pub qdrant_url: Option<Box<str>>,
    /// Override for `remoteIndex.apiKey`.
    pub qdrant_api_key: Option<SecretString>,
    /// Override for `remoteIndex.collectionName`.
    pub collection_name: Option<Box<str>>,
    /// Override for `remoteIndex.vectorSize`.
    pub vector_size: Option<u32>,
    /// Override for `remoteIndex.contentField`.
    pub content_field: Option<Box<str>>,
    /// Override for `remoteIndex.timeoutMs`.
    pub qdrant_timeout_ms: Option<u64>,

    /// Override for `embedding.apiKey`.
    pub embedding_api_key: Option<SecretString>,
    /// Override for `embedding.model`.
    pub embedding_model: Option<Box<str>>,
    /// Override for `embedding.baseUrl`.
    pub embedding_base_url: Option<Box<str>>,
    /// Override for `embedding.timeoutMs`.
    pub embedding_timeout_ms: Option<u64>,
    /// Override for `embedding.maxInputChars`.
    pub embedding_max_input_chars: Option<u32>,
    /// Override for `embedding.maxAttempts`.
    pub embedding_max_attempts: Option<u32>,
    /// Override for `embedding.retryBaseDelayMs`.
    pub embedding_retry_base_delay_ms: Option<u64>,
    /// Override for `embedding.concurrency`.
    pub embedding_concurrency: Option<u32>,
    /// Override for `embedding.failFastOnPermanent`.
    pub embedding_fail_fast: Option<bool>,

    /// Override for `knowledgeBase.directory`.
    pub directory: Option<PathBuf>,
    /// Override for `knowledgeBase.extensions`.
    pub extensions: Option<Vec<Box<str>>>,

    /// Override for `sync.batchSize`.
    pub batch_size: Option<u32>,
    /// Override for `sync.verifyWrites`.
    pub verify_writes: Option<bool>,
    /// Override for `sync.verifySeed`.
    pub verify_seed: Option<u64>,
    /// Override for `sync.maxLookupFailures`.
    pub max_lookup_failures: Option<u32>,

    /// Override for `schedule.intervalSecs`.
    pub interval_secs: Option<u64>,
    /// Override for `schedule.runOnStart`.
    pub run_on_start: Option<bool>,
}

impl SyncEnv {
    /// Parse env overrides from a key/value map (useful for tests and fixtures).
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, EnvParseError> {
        Ok(Self {
            qdrant_url: parse_optional_url_string_any(map, &[ENV_QDRANT_URL, ENV_QDRANT_URL_ALIAS])?,
            qdrant_api_key: parse_optional_secret_any(
                map,
                &[ENV_QDRANT_API_AUTH, ENV_QDRANT_API_AUTH_ALIAS],
            )?,
            collection_name: parse_optional_trimmed_string_any(
                map,
                &[ENV_COLLECTION, ENV_COLLECTION_ALIAS],
            )?,
            vector_size: parse_optional_u32(map, ENV_VECTOR_SIZE)?,
            content_field: parse_optional_trimmed_string(map, ENV_CONTENT_FIELD)?,
            qdrant_timeout_ms: parse_optional_u64(map, ENV_QDRANT_TIMEOUT_MS)?,

            embedding_api_key: parse_optional_secret_any(
                map,
                &[ENV_OPENAI_API_AUTH, ENV_OPENAI_API_AUTH_ALIAS],
            )?,
            embedding_model: parse_optional_trimmed_string_any(
                map,
                &[ENV_EMBEDDING_MODEL, ENV_EMBEDDING_MODEL_ALIAS],
            )?,
            embedding_base_url: parse_optional_url_string(map, ENV_EMBEDDING_BASE_URL)?,
            embedding_timeout_ms: parse_optional_u64(map, ENV_EMBEDDING_TIMEOUT_MS)?,
            embedding_max_input_chars: parse_optional_u32(map, ENV_EMBEDDING_MAX_INPUT_CHARS)?,
            embedding_max_attempts: parse_optional_u32(map, ENV_EMBEDDING_MAX_ATTEMPTS)?,
            embedding_retry_base_delay_ms: parse_optional_u64(
                map,
                ENV_EMBEDDING_RETRY_BASE_DELAY_MS,
            )?,
            embedding_concurrency: parse_optional_u32(map, ENV_EMBEDDING_CONCURRENCY)?,
            embedding_fail_fast: parse_optional_bool(map, ENV_EMBEDDING_FAIL_FAST)?,

            directory: parse_optional_trimmed_string(map, ENV_DIRECTORY)?
                .map(|value| PathBuf::from(value.as_ref())),
            extensions: parse_optional_csv_extensions(map, ENV_EXTENSIONS)?,

            batch_size: parse_optional_u32(map, ENV_BATCH_SIZE)?,
            verify_writes: parse_optional_bool(map, ENV_VERIFY_WRITES)?,
            verify_seed: parse_optional_u64(map, ENV_VERIFY_SEED)?,
            max_lookup_failures: parse_optional_u32(map, ENV_MAX_LOOKUP_FAILURES)?,

            interval_secs: parse_optional_u64(map, ENV_INTERVAL_SECS)?,
            run_on_start: parse_optional_bool(map, ENV_RUN_ON_START)?,
        })
    }

    /// Parse env overrides from the current process environment.
    pub fn from_std_env() -> Result<Self, EnvParseError> {
        let mut map = BTreeMap::new();
        for name in ALL_ENV_VARS {
            if let Ok(value) = std::env::var(name) {
                map.insert(name.to_string(), value);
            }
        }

        Self::from_map(&map)
    }

    /// Whether no variable was set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Apply env overrides to a base config (env wins over file/default values).
pub fn apply_env_overrides(
    base: SyncConfig,
    env: &SyncEnv,
) -> Result<ValidatedSyncConfig, ErrorEnvelope> {
    let mut config = base;
    merge_env_into(&mut config, env);
    config.validate_and_normalize().map_err(Into::into)
}

pub(crate) fn merge_env_into(config: &mut SyncConfig, env: &SyncEnv) {
    let remote = &mut config.remote_index;
    set_clone(&mut remote.url, env.qdrant_url.as_ref());
    set_opt_clone(&mut remote.api_key, env.qdrant_api_key.as_ref());
    set_clone(&mut remote.collection_name, env.collection_name.as_ref());
    set_copy(&mut remote.vector_size, env.vector_size);
    set_clone(&mut remote.content_field, env.content_field.as_ref());
    set_copy(&mut remote.timeout_ms, env.qdrant_timeout_ms);

    let embedding = &mut config.embedding;
    set_opt_clone(&mut embedding.api_key, env.embedding_api_key.as_ref());
    set_clone(&mut embedding.model, env.embedding_model.as_ref());
    set_clone(&mut embedding.base_url, env.embedding_base_url.as_ref());
    set_copy(&mut embedding.timeout_ms, env.embedding_timeout_ms);
    set_copy(&mut embedding.max_input_chars, env.embedding_max_input_chars);
    set_copy(&mut embedding.max_attempts, env.embedding_max_attempts);
    set_copy(
        &mut embedding.retry_base_delay_ms,
        env.embedding_retry_base_delay_ms,
    );
    set_copy(&mut embedding.concurrency, env.embedding_concurrency);
    set_copy(
        &mut embedding.fail_fast_on_permanent,
        env.embedding_fail_fast,
    );

    let knowledge_base = &mut config.knowledge_base;
    set_clone(&mut knowledge_base.directory, env.directory.as_ref());
    set_clone(&mut knowledge_base.extensions, env.extensions.as_ref());

    let sync = &mut config.sync;
    set_copy(&mut sync.batch_size, env.batch_size);
    set_copy(&mut sync.verify_writes, env.verify_writes);
    if env.verify_seed.is_some() {
        sync.verify_seed = env.verify_seed;
    }
    if env.max_lookup_failures.is_some() {
        sync.max_lookup_failures = env.max_lookup_failures;
    }

    set_copy(&mut config.schedule.interval_secs, env.interval_secs);
    set_copy(&mut config.schedule.run_on_start, env.run_on_start);
}

fn set_copy<T: Copy>(field: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *field = value;
    }
}

fn set_clone<T: Clone>(field: &mut T, value: Option<&T>) {
    if let Some(value) = value {
        *field = value.clone();
    }
}

fn set_opt_clone<T: Clone>(field: &mut Option<T>, value: Option<&T>) {
    if let Some(value) = value {
        *field = Some(value.clone());
    }
}

/// Validation failures when parsing env variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvParseError {
    /// An env var was present but empty after trimming.
    EmptyValue {
        /// Env var name.
        var: &'static str,
    },
    /// A secret env var was present but empty after trimming.
    EmptySecret {
        /// Env var name.
        var: &'static str,
    },
    /// Boolean env var had an invalid value.
    InvalidBool {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
    /// Integer env var had an invalid value.
    InvalidInt {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
    /// URL env var had an invalid value.
    InvalidUrl {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
    /// CSV list exceeds a safety limit.
    CsvTooLarge {
        /// Env var name.
        var: &'static str,
        /// Number of parsed items.
        len: usize,
        /// Maximum allowed.
        max: usize,
    },
    /// CSV contained an invalid extension entry.
    InvalidExtensionEntry {
        /// Env var name.
        var: &'static str,
        /// Invalid entry.
        entry: String,
    },
}

impl EnvParseError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::EmptyValue { .. } | Self::EmptySecret { .. } => {
                ErrorCode::new("config", "empty_env_var")
            },
            Self::InvalidBool { .. } => ErrorCode::new("config", "invalid_env_bool"),
            Self::InvalidInt { .. } => ErrorCode::new("config", "invalid_env_int"),
            Self::InvalidUrl { .. } => ErrorCode::new("config", "invalid_env_url"),
            Self::CsvTooLarge { .. } | Self::InvalidExtensionEntry { .. } => {
                ErrorCode::new("config", "invalid_env_csv")
            },
        }
    }
}

impl fmt::Display for EnvParseError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyValue { var } | Self::EmptySecret { var } => {
                write!(formatter, "{var} must be non-empty")
            },
            Self::InvalidBool { var, .. } => write!(formatter, "{var} must be a boolean"),
            Self::InvalidInt { var, .. } => write!(formatter, "{var} must be an integer"),
            Self::InvalidUrl { var, .. } => write!(formatter, "{var} must be a valid URL"),
            Self::CsvTooLarge { var, len, max } => {
                write!(formatter, "{var} is too large ({len} items, max {max})")
            },
            Self::InvalidExtensionEntry { var, entry } => {
                write!(formatter, "{var} contains invalid extension entry: {entry}")
            },
        }
    }
}

impl std::error::Error for EnvParseError {}

impl From<EnvParseError> for ErrorEnvelope {
    fn from(error: EnvParseError) -> Self {
        let code = error.error_code();
        let message = error.to_string();
        let mut envelope = Self::expected(code, message);

        match error {
            EnvParseError::EmptyValue { var } | EnvParseError::EmptySecret { var } => {
                envelope = envelope.with_metadata("env_var", var);
            },
            EnvParseError::InvalidBool { var, value }
            | EnvParseError::InvalidInt { var, value }
            | EnvParseError::InvalidUrl { var, value } => {
                envelope = envelope
                    .with_metadata("env_var", var)
                    .with_metadata("value", redact_value(var, &value));
            },
            EnvParseError::CsvTooLarge { var, len, max } => {
                envelope = envelope
                    .with_metadata("env_var", var)
                    .with_metadata("len", len.to_string())
                    .with_metadata("max", max.to_string());
            },
            EnvParseError::InvalidExtensionEntry { var, entry } => {
                envelope = envelope
                    .with_metadata("env_var", var)
                    .with_metadata("entry", entry);
            },
        }

        envelope
    }
}

fn parse_optional_trimmed_string(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<Box<str>>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }

    Ok(Some(trimmed.to_owned().into_boxed_str()))
}

fn parse_optional_trimmed_string_any(
    map: &BTreeMap<String, String>,
    vars: &[&'static str],
) -> Result<Option<Box<str>>, EnvParseError> {
    for var in vars {
        if map.contains_key(*var) {
            return parse_optional_trimmed_string(map, var);
        }
    }
    Ok(None)
}

fn parse_optional_secret(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<SecretString>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptySecret { var });
    }

    Ok(Some(SecretString::new(trimmed.to_owned())))
}

fn parse_optional_secret_any(
    map: &BTreeMap<String, String>,
    vars: &[&'static str],
) -> Result<Option<SecretString>, EnvParseError> {
    for var in vars {
        if map.contains_key(*var) {
            return parse_optional_secret(map, var);
        }
    }
    Ok(None)
}

fn parse_optional_u64(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<u64>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }

    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| EnvParseError::InvalidInt {
            var,
            value: raw.clone(),
        })
}

fn parse_optional_u32(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<u32>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }

    trimmed
        .parse::<u32>()
        .map(Some)
        .map_err(|_| EnvParseError::InvalidInt {
            var,
            value: raw.clone(),
        })
}

fn parse_optional_bool(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<bool>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(Some(true)),
        "false" | "0" | "no" | "off" => Ok(Some(false)),
        _ => Err(EnvParseError::InvalidBool {
            var,
            value: raw.clone(),
        }),
    }
}

fn parse_optional_url_string(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<Box<str>>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }

    let parsed = Url::parse(trimmed).map_err(|_| EnvParseError::InvalidUrl {
        var,
        value: raw.clone(),
    })?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(EnvParseError::InvalidUrl {
            var,
            value: raw.clone(),
        });
    }

    Ok(Some(trimmed.trim_end_matches('/').into()))
}

fn parse_optional_url_string_any(
    map: &BTreeMap<String, String>,
    vars: &[&'static str],
) -> Result<Option<Box<str>>, EnvParseError> {
    for var in vars {
        if map.contains_key(*var) {
            return parse_optional_url_string(map, var);
        }
    }
    Ok(None)
}

fn parse_optional_csv_extensions(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<Vec<Box<str>>>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }

    let items = parse_csv(trimmed);
    if items.len() > EXTENSIONS_MAX {
        return Err(EnvParseError::CsvTooLarge {
            var,
            len: items.len(),
            max: EXTENSIONS_MAX,
        });
    }

    let mut normalized = Vec::with_capacity(items.len());
    for item in items {
        let Some(extension) = normalize_extension(&item) else {
            return Err(EnvParseError::InvalidExtensionEntry { var, entry: item });
        };
        normalized.push(extension);
    }

    normalized.sort_unstable();
    normalized.dedup();
    Ok(Some(normalized))
}

fn parse_csv(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn redact_value(var: &str, value: &str) -> String {
    if is_secret_key(var) {
        REDACTED_VALUE.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn env_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect()
    }

    #[test]
    fn int_parsing_with_missing_defaults_to_none() -> Result<(), Box<dyn Error>> {
        let map = BTreeMap::new();
        assert_eq!(parse_optional_u32(&map, "MISSING")?, None);
        assert_eq!(parse_optional_u64(&map, "MISSING")?, None);
        Ok(())
    }

    #[test]
    fn csv_extensions_are_normalized_deterministically() -> Result<(), Box<dyn Error>> {
        let map = env_map(&[(ENV_EXTENSIONS, " TXT , .md,markdown,*.MD,txt")]);
        let env = SyncEnv::from_map(&map)?;

        let values = env
            .extensions
            .as_ref()
            .ok_or_else(|| std::io::Error::other("missing extensions"))?;
        let as_str: Vec<&str> = values.iter().map(AsRef::as_ref).collect();
        assert_eq!(as_str, vec!["markdown", "md", "txt"]);
        Ok(())
    }

    #[test]
    fn primary_var_wins_over_alias() -> Result<(), Box<dyn Error>> {
        let map = env_map(&[
            (ENV_QDRANT_URL, "http://primary:6333/"),
            (ENV_QDRANT_URL_ALIAS, "http://alias:6333"),
        ]);
        let env = SyncEnv::from_map(&map)?;
        assert_eq!(env.qdrant_url.as_deref(), Some("http://primary:6333"));
        Ok(())
    }

    #[test]
    fn url_validation_accepts_http_and_https() -> Result<(), Box<dyn Error>> {
        let mut map = env_map(&[(ENV_EMBEDDING_BASE_URL, "https://example.com/v1")]);
        let env = SyncEnv::from_map(&map)?;
        assert_eq!(
            env.embedding_base_url.as_deref(),
            Some("https://example.com/v1")
        );

        map.insert(
            ENV_EMBEDDING_BASE_URL.to_string(),
            "ftp://example.com".to_string(),
        );
        let error = SyncEnv::from_map(&map).err();
        assert!(matches!(error, Some(EnvParseError::InvalidUrl { .. })));
        Ok(())
    }

    #[test]
    fn bools_accept_common_spellings() -> Result<(), Box<dyn Error>> {
        for (raw, expected) in [("yes", true), ("0", false), ("ON", true), ("False", false)] {
            let env = SyncEnv::from_map(&env_map(&[(ENV_VERIFY_WRITES, raw)]))?;
            assert_eq!(env.verify_writes, Some(expected), "input {raw}");
        }
        let error = SyncEnv::from_map(&env_map(&[(ENV_VERIFY_WRITES, "maybe")])).err();
        assert!(matches!(error, Some(EnvParseError::InvalidBool { .. })));
        Ok(())
    }

    #[test]
    fn secret_values_are_redacted_in_error_metadata() -> Result<(), Box<dyn Error>> {
        let map = env_map(&[(ENV_OPENAI_API_AUTH, "   ")]);

        let error = SyncEnv::from_map(&map).err();
        let envelope: ErrorEnvelope = error
            .ok_or_else(|| std::io::Error::other("expected secret error"))?
            .into();

        assert_eq!(envelope.code, ErrorCode::new("config", "empty_env_var"));
        assert_eq!(
            envelope.metadata.get("env_var").map(String::as_str),
            Some(ENV_OPENAI_API_AUTH)
        );
        assert!(
            !envelope.metadata.contains_key("value"),
            "empty secrets should not echo value"
        );
        Ok(())
    }

    #[test]
    fn env_overrides_win_and_are_validated() -> Result<(), Box<dyn Error>> {
        let env = SyncEnv::from_map(&env_map(&[
            (ENV_BATCH_SIZE, "25"),
            (ENV_COLLECTION_ALIAS, "docs"),
            (ENV_DIRECTORY, "/srv/kb"),
        ]))?;
        let config = apply_env_overrides(SyncConfig::default(), &env)?;
        assert_eq!(config.sync.batch_size, 25);
        assert_eq!(config.collection_name().as_str(), "docs");
        assert_eq!(config.knowledge_base.directory, PathBuf::from("/srv/kb"));

        let env = SyncEnv::from_map(&env_map(&[(ENV_BATCH_SIZE, "0")]))?;
        let error = apply_env_overrides(SyncConfig::default(), &env).err();
        assert_eq!(
            error.map(|error| error.code),
            Some(ErrorCode::new("config", "invalid_limit"))
        );
        Ok(())
    }
}
