//! Config loading helpers (env + file + overrides).
//!
//! The loader is responsible for deterministic merge order and surfacing
//! user-facing errors as typed `ErrorEnvelope`s.

use crate::{SyncConfig, SyncEnv, ValidatedSyncConfig, apply_env_overrides};
use kb_sync_shared::{ErrorClass, ErrorCode, ErrorEnvelope, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Toml,
}

/// Load the sync config from sources using a deterministic precedence order.
///
/// Precedence (highest wins):
/// - env overrides (`SyncEnv`)
/// - overrides JSON (partial config)
/// - config JSON (file content)
/// - defaults (`SyncConfig::default()`)
pub fn load_config_from_sources(
    config_json: Option<&str>,
    overrides_json: Option<&str>,
    env: &SyncEnv,
) -> Result<ValidatedSyncConfig, ErrorEnvelope> {
    let config = match config_json {
        None => SyncConfig::default(),
        Some(input) => parse_config_unvalidated(input, ConfigFormat::Json)?,
    };
    finish_load(config, overrides_json, env)
}

/// Load the sync config from an optional file path (`.json` or `.toml`).
pub fn load_config_from_path(
    config_path: Option<&Path>,
    overrides_json: Option<&str>,
    env: &SyncEnv,
) -> Result<ValidatedSyncConfig, ErrorEnvelope> {
    let config = match config_path {
        None => SyncConfig::default(),
        Some(path) => {
            let format = detect_config_format(path)?;
            let config_text = read_config_file(path)?;
            parse_config_unvalidated(&config_text, format)?
        },
    };
    finish_load(config, overrides_json, env)
}

/// Load the sync config from std env and an optional file path.
pub fn load_config_std_env(
    config_path: Option<&Path>,
    overrides_json: Option<&str>,
) -> Result<ValidatedSyncConfig, ErrorEnvelope> {
    let env = SyncEnv::from_std_env().map_err(ErrorEnvelope::from)?;
    load_config_from_path(config_path, overrides_json, &env)
}

fn finish_load(
    mut config: SyncConfig,
    overrides_json: Option<&str>,
    env: &SyncEnv,
) -> Result<ValidatedSyncConfig, ErrorEnvelope> {
    if let Some(input) = overrides_json {
        let overrides = parse_overrides_json(input)?;
        apply_overrides(&mut config, overrides);
    }

    // env is applied last and also validates/normalizes the resulting config.
    apply_env_overrides(config, env)
}

/// Serialize the config as deterministic pretty JSON (with trailing newline).
///
/// Secrets serialize as a redaction marker.
pub fn to_pretty_json(config: &SyncConfig) -> Result<String, ErrorEnvelope> {
    let mut output = serde_json::to_string_pretty(config).map_err(|error| {
        ErrorEnvelope::unexpected(
            ErrorCode::internal(),
            format!("failed to serialize config: {error}"),
            ErrorClass::NonRetriable,
        )
    })?;
    output.push('\n');
    Ok(output)
}

/// Serialize the config as deterministic pretty TOML (with trailing newline).
pub fn to_pretty_toml(config: &SyncConfig) -> Result<String, ErrorEnvelope> {
    let mut output = toml::to_string_pretty(config).map_err(|error| {
        ErrorEnvelope::unexpected(
            ErrorCode::new("config", "serialize_toml"),
            format!("failed to serialize config TOML: {error}"),
            ErrorClass::NonRetriable,
        )
    })?;
    output.push('\n');
    Ok(output)
}

fn parse_config_unvalidated(input: &str, format: ConfigFormat) -> Result<SyncConfig, ErrorEnvelope> {
    match format {
        ConfigFormat::Json => serde_json::from_str(input).map_err(|error| {
            ErrorEnvelope::expected(
                ErrorCode::new("config", "invalid_json"),
                format!("invalid config JSON: {error}"),
            )
            .with_metadata("source", "config")
        }),
        ConfigFormat::Toml => toml::from_str(input).map_err(|error| {
            ErrorEnvelope::expected(
                ErrorCode::new("config", "invalid_toml"),
                format!("invalid config TOML: {error}"),
            )
            .with_metadata("source", "config")
        }),
    }
}

fn parse_overrides_json(input: &str) -> Result<SyncConfigOverrides, ErrorEnvelope> {
    serde_json::from_str(input).map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::new("config", "invalid_json"),
            format!("invalid overrides JSON: {error}"),
        )
        .with_metadata("source", "overrides")
    })
}

fn read_config_file(path: &Path) -> Result<String, ErrorEnvelope> {
    std::fs::read_to_string(path).map_err(|error| {
        let code = match error.kind() {
            std::io::ErrorKind::NotFound => ErrorCode::new("config", "config_file_not_found"),
            std::io::ErrorKind::PermissionDenied => {
                ErrorCode::new("config", "config_file_permission_denied")
            },
            _ => ErrorCode::new("config", "config_file_io"),
        };

        ErrorEnvelope::expected(code, format!("failed to read config file: {error}"))
            .with_metadata("path", path.to_string_lossy().to_string())
    })
}

fn detect_config_format(path: &Path) -> Result<ConfigFormat, ErrorEnvelope> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        None | Some("json") => Ok(ConfigFormat::Json),
        Some("toml") => Ok(ConfigFormat::Toml),
        Some(other) => Err(ErrorEnvelope::expected(
            ErrorCode::new("config", "unsupported_format"),
            "unsupported config format; use .json or .toml",
        )
        .with_metadata("extension", other.to_string())),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
struct SyncConfigOverrides {
    version: Option<u32>,
    remote_index: RemoteIndexOverrides,
    embedding: EmbeddingOverrides,
    knowledge_base: KnowledgeBaseOverrides,
    sync: SyncPassOverrides,
    schedule: ScheduleOverrides,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
struct RemoteIndexOverrides {
    url: Option<Box<str>>,
    api_key: Option<SecretString>,
    collection_name: Option<Box<str>>,
    vector_size: Option<u32>,
    timeout_ms: Option<u64>,
    content_field: Option<Box<str>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
struct EmbeddingOverrides {
    api_key: Option<SecretString>,
    model: Option<Box<str>>,
    base_url: Option<Box<str>>,
    timeout_ms: Option<u64>,
    max_input_chars: Option<u32>,
    max_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    concurrency: Option<u32>,
    fail_fast_on_permanent: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
struct KnowledgeBaseOverrides {
    directory: Option<PathBuf>,
    extensions: Option<Vec<Box<str>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
struct SyncPassOverrides {
    batch_size: Option<u32>,
    verify_writes: Option<bool>,
    verify_seed: Option<u64>,
    max_lookup_failures: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
struct ScheduleOverrides {
    interval_secs: Option<u64>,
    run_on_start: Option<bool>,
}

fn apply_overrides(config: &mut SyncConfig, overrides: SyncConfigOverrides) {
    set(&mut config.version, overrides.version);

    let remote = &mut config.remote_index;
    let remote_overrides = overrides.remote_index;
    set(&mut remote.url, remote_overrides.url);
    if remote_overrides.api_key.is_some() {
        remote.api_key = remote_overrides.api_key;
    }
    set(&mut remote.collection_name, remote_overrides.collection_name);
    set(&mut remote.vector_size, remote_overrides.vector_size);
    set(&mut remote.timeout_ms, remote_overrides.timeout_ms);
    set(&mut remote.content_field, remote_overrides.content_field);

    let embedding = &mut config.embedding;
    let embedding_overrides = overrides.embedding;
    if embedding_overrides.api_key.is_some() {
        embedding.api_key = embedding_overrides.api_key;
    }
    set(&mut embedding.model, embedding_overrides.model);
    set(&mut embedding.base_url, embedding_overrides.base_url);
    set(&mut embedding.timeout_ms, embedding_overrides.timeout_ms);
    set(
        &mut embedding.max_input_chars,
        embedding_overrides.max_input_chars,
    );
    set(&mut embedding.max_attempts, embedding_overrides.max_attempts);
    set(
        &mut embedding.retry_base_delay_ms,
        embedding_overrides.retry_base_delay_ms,
    );
    set(&mut embedding.concurrency, embedding_overrides.concurrency);
    set(
        &mut embedding.fail_fast_on_permanent,
        embedding_overrides.fail_fast_on_permanent,
    );

    set(
        &mut config.knowledge_base.directory,
        overrides.knowledge_base.directory,
    );
    set(
        &mut config.knowledge_base.extensions,
        overrides.knowledge_base.extensions,
    );

    let sync = &mut config.sync;
    set(&mut sync.batch_size, overrides.sync.batch_size);
    set(&mut sync.verify_writes, overrides.sync.verify_writes);
    if overrides.sync.verify_seed.is_some() {
        sync.verify_seed = overrides.sync.verify_seed;
    }
    if overrides.sync.max_lookup_failures.is_some() {
        sync.max_lookup_failures = overrides.sync.max_lookup_failures;
    }

    set(
        &mut config.schedule.interval_secs,
        overrides.schedule.interval_secs,
    );
    set(
        &mut config.schedule.run_on_start,
        overrides.schedule.run_on_start,
    );
}

fn set<T>(field: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *field = value;
    }
}
