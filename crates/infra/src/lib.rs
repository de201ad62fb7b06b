//! # kb-sync-infra
//!
//! Infrastructure wiring and runtime composition.
//! This crate depends on `app`, `adapters`, `config`, and `shared`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

/// Config loading helpers used by CLI surfaces.
pub mod config_check;
/// Environment validation helpers used by CLI surfaces.
pub mod env_check;
/// Engine and adapter construction from config.
pub mod factory;
/// Interval scheduling of sync passes.
pub mod scheduler;

pub use config_check::{
    ConfigFormat, load_effective_config, load_effective_config_json, render_effective_config,
};
pub use env_check::{InfraError, InfraResult, validate_env_parsing};
pub use factory::{
    SyncPorts, build_embedding_port, build_ports, build_remote_index_port, build_sync_engine,
    build_sync_engine_with_ports, embedding_client_options, engine_options,
};
pub use scheduler::{SchedulerReport, SyncScheduler, TriggerOutcome};

// Re-export redaction utilities for CLI boundary sanitization
pub use kb_sync_shared::{is_secret_key, redact_if_secret};

/// Returns the infra crate version.
#[must_use]
pub const fn infra_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
