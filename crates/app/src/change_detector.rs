//! Classify a file as new, updated, or unchanged against remote state.

use crate::remote_index::{LookupOutcome, RemoteIndex};
use kb_sync_domain::{ContentHash, DocumentId, SourcePath};
use kb_sync_ports::{LogLevel, LoggerPort, log_fields};
use kb_sync_shared::RequestContext;
use std::sync::Arc;

/// Change classification for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// No usable remote record; the document gets a fresh id.
    New {
        /// The lookup failed and the file is processed anyway.
        lookup_failed: bool,
    },
    /// A remote record exists with a different or missing hash.
    Updated {
        /// Id to reuse for the upsert.
        id: DocumentId,
    },
    /// The stored hash matches; nothing to do.
    Unchanged {
        /// Id of the matching record.
        id: DocumentId,
    },
}

impl Classification {
    /// Whether the file must be embedded and upserted.
    pub const fn needs_upload(&self) -> bool {
        !matches!(self, Self::Unchanged { .. })
    }

    /// Id to reuse, if a record exists.
    pub const fn existing_id(&self) -> Option<&DocumentId> {
        match self {
            Self::Updated { id } | Self::Unchanged { id } => Some(id),
            Self::New { .. } => None,
        }
    }
}

/// Pure classification of a lookup outcome.
pub fn classify_lookup(outcome: LookupOutcome, hash: &ContentHash) -> Classification {
    match outcome {
        LookupOutcome::Missing => Classification::New {
            lookup_failed: false,
        },
        LookupOutcome::Unavailable(_) => Classification::New {
            lookup_failed: true,
        },
        LookupOutcome::Found(record) => match record.content_hash.as_deref() {
            Some(stored) if hash.matches_stored(stored) => {
                Classification::Unchanged { id: record.id }
            },
            _ => Classification::Updated { id: record.id },
        },
    }
}

/// Change detector backed by a [`RemoteIndex`].
#[derive(Clone)]
pub struct ChangeDetector {
    remote: RemoteIndex,
    logger: Option<Arc<dyn LoggerPort>>,
}

impl ChangeDetector {
    /// Build a detector over `remote`.
    #[must_use]
    pub const fn new(remote: RemoteIndex, logger: Option<Arc<dyn LoggerPort>>) -> Self {
        Self { remote, logger }
    }

    /// Classify `path` with content fingerprint `hash`.
    ///
    /// Lookup failures are logged and fail open to [`Classification::New`].
    pub async fn classify(
        &self,
        ctx: &RequestContext,
        path: &SourcePath,
        hash: &ContentHash,
    ) -> Classification {
        let outcome = self.remote.find_by_source_path(ctx, path).await;
        if let (LookupOutcome::Unavailable(error), Some(logger)) = (&outcome, self.logger.as_ref())
        {
            logger.log_error(
                LogLevel::Warn,
                "change.lookup_failed",
                "Remote lookup failed; treating file as new",
                error,
                Some(log_fields([("sourcePath", path.as_str())])),
            );
        }
        classify_lookup(outcome, hash)
    }
}
