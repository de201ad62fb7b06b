//! Environment validation helpers for CLI surfaces.

use kb_sync_config::{SyncConfig, SyncEnv, apply_env_overrides};
use kb_sync_shared::ErrorEnvelope;
use std::collections::BTreeMap;

/// Infra-level error type (shared error envelope).
pub type InfraError = ErrorEnvelope;

/// Infra-level result type.
pub type InfraResult<T> = Result<T, InfraError>;

/// Check that `env` parses and merges cleanly over the default config.
pub fn validate_env_parsing(env: &BTreeMap<String, String>) -> InfraResult<()> {
    let parsed = SyncEnv::from_map(env).map_err(ErrorEnvelope::from)?;
    apply_env_overrides(SyncConfig::default(), &parsed)?;
    Ok(())
}
