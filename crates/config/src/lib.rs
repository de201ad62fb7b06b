//! # kb-sync-config
//!
//! Configuration schema, validation, env parsing, and layered loading for
//! the knowledge-base sync service.
//! This crate depends on `domain` and `shared` only.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

/// Environment variable parsing and merging.
pub mod env;
/// Config loading helpers (env + file + overrides).
pub mod load;
/// Configuration schema types and helpers.
pub mod schema;

pub use env::{EnvParseError, SyncEnv, apply_env_overrides};
pub use load::{
    load_config_from_path, load_config_from_sources, load_config_std_env, to_pretty_json,
    to_pretty_toml,
};
pub use schema::{
    CURRENT_CONFIG_VERSION, ConfigSchemaError, EmbeddingConfig, KnowledgeBaseConfig,
    RemoteIndexConfig, ScheduleConfig, SyncConfig, SyncPassConfig, ValidatedSyncConfig,
    parse_sync_config_json, parse_sync_config_toml,
};

/// Returns the config crate version.
#[must_use]
pub const fn config_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
