//! # kb-sync-app
//!
//! Sync use cases built on the port traits.
//!
//! - [`EmbeddingClient`]: truncation, blank short-circuit, bounded retry
//! - [`RemoteIndex`]: collection setup, fail-open lookups, best-effort checks
//! - [`ChangeDetector`]: new / updated / unchanged by content fingerprint
//! - [`SyncEngine`]: one batched, verified pass over the knowledge base
//!
//! This crate depends on `ports`, `domain`, and `shared`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod change_detector;
pub mod embedding_client;
pub mod remote_index;
pub mod sync_engine;

pub use change_detector::{ChangeDetector, Classification, classify_lookup};
pub use embedding_client::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_INPUT_CHARS, DEFAULT_RETRY_BASE_DELAY_MS, EmbedManyReport,
    EmbedOutcome, EmbeddingClient, EmbeddingClientOptions, truncate_chars,
};
pub use remote_index::{EnsureCollectionOutcome, LookupOutcome, RemoteIndex};
pub use sync_engine::{
    FirstVerifySelector, RandomVerifySelector, SYNC_PHASE_TRANSITIONS, SyncEngine, SyncEngineDeps,
    SyncEngineOptions, SyncPassRunner, SyncPhase, SyncSummary, VerifySelector,
};

/// Returns the app crate version.
#[must_use]
pub const fn app_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace_deps() -> Vec<String> {
        let cargo_toml = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml"));
        let mut deps = Vec::new();
        let mut in_deps = false;

        for raw_line in cargo_toml.lines() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('[') {
                in_deps = line == "[dependencies]";
                continue;
            }
            if in_deps && line.starts_with("kb-sync-") {
                let key = line.split('=').next().unwrap_or("").trim();
                deps.push(key.split('.').next().unwrap_or("").trim().to_owned());
            }
        }

        deps
    }

    #[test]
    fn app_depends_only_on_inner_layers() {
        let allowed = ["kb-sync-ports", "kb-sync-domain", "kb-sync-shared"];
        for dep in workspace_deps() {
            assert!(
                allowed.contains(&dep.as_str()),
                "unexpected dependency found: {dep}"
            );
        }
    }

    #[test]
    fn app_crate_compiles() {
        assert!(!app_crate_version().is_empty());
    }
}
