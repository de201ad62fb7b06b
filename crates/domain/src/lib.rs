//! # kb-sync-domain
//!
//! Domain model for knowledge-base synchronization.
//!
//! - **Primitives** - `DocumentId`, `CollectionName`, `SourcePath`
//! - **Fingerprint** - `ContentHash` and the `fingerprint` function
//! - **Document** - the unit of synchronization, plus `Embedding` and `Timestamp`
//!
//! ## Dependency Rules
//!
//! - Depends only on `shared` crate
//! - No infrastructure or adapter dependencies
//! - No I/O beyond reading the wall clock for `Timestamp::now`

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub use kb_sync_shared::shared_crate_version;

pub mod document;
pub mod fingerprint;
pub mod primitives;

pub use document::{Document, Embedding, Timestamp, title_from_path};
pub use fingerprint::{ContentHash, fingerprint};
pub use primitives::{CollectionName, DocumentId, PrimitiveError, SourcePath};

/// Returns the domain crate version.
#[must_use]
pub const fn domain_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
