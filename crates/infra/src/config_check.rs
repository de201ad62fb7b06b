//! Config loading helpers for CLI surfaces.

use crate::InfraResult;
use kb_sync_config::{
    SyncEnv, ValidatedSyncConfig, load_config_from_path, to_pretty_json, to_pretty_toml,
};
use kb_sync_shared::ErrorEnvelope;
use std::collections::BTreeMap;
use std::path::Path;

/// Output format for `config show`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// Pretty JSON.
    Json,
    /// Pretty TOML.
    Toml,
}

/// Load and validate the effective config from `env`, an optional file, and
/// optional overrides JSON.
pub fn load_effective_config(
    env: &BTreeMap<String, String>,
    config_path: Option<&Path>,
    overrides_json: Option<&str>,
) -> InfraResult<ValidatedSyncConfig> {
    let env = SyncEnv::from_map(env).map_err(ErrorEnvelope::from)?;
    load_config_from_path(config_path, overrides_json, &env)
}

/// Render the effective config. Secrets come out redacted.
pub fn render_effective_config(
    config: &ValidatedSyncConfig,
    format: ConfigFormat,
) -> InfraResult<String> {
    match format {
        ConfigFormat::Json => to_pretty_json(config.as_raw()),
        ConfigFormat::Toml => to_pretty_toml(config.as_raw()),
    }
}

/// Load and validate the effective config, returning deterministic pretty JSON.
pub fn load_effective_config_json(
    env: &BTreeMap<String, String>,
    config_path: Option<&Path>,
    overrides_json: Option<&str>,
) -> InfraResult<String> {
    let config = load_effective_config(env, config_path, overrides_json)?;
    render_effective_config(&config, ConfigFormat::Json)
}
