//! Vector store facade with the sync engine's failure policies.
//!
//! The port reports every transport problem as an error. This layer decides
//! which of those are fatal (collection setup, upsert) and which degrade
//! (lookup fails open, existence check counts as missing).

use kb_sync_domain::{CollectionName, Document, DocumentId, SourcePath};
use kb_sync_ports::{LogLevel, LoggerPort, RemoteIndexPort, RemoteRecord, log_fields};
use kb_sync_shared::{ErrorEnvelope, RequestContext, Result, ResultExt};
use std::sync::Arc;

/// What `ensure_collection` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureCollectionOutcome {
    /// The collection was already there.
    Existed,
    /// The collection was created.
    Created,
}

/// Result of a lookup by source path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// A record exists for the path.
    Found(RemoteRecord),
    /// No record exists for the path.
    Missing,
    /// The lookup failed; treat the path as needing processing.
    Unavailable(ErrorEnvelope),
}

/// Collection-scoped view of a [`RemoteIndexPort`].
#[derive(Clone)]
pub struct RemoteIndex {
    port: Arc<dyn RemoteIndexPort>,
    collection: CollectionName,
    logger: Option<Arc<dyn LoggerPort>>,
}

impl RemoteIndex {
    /// Bind `port` to `collection`.
    #[must_use]
    pub fn new(port: Arc<dyn RemoteIndexPort>, collection: CollectionName) -> Self {
        Self {
            port,
            collection,
            logger: None,
        }
    }

    /// Attach a logger.
    #[must_use]
    pub fn with_logger(mut self, logger: Option<Arc<dyn LoggerPort>>) -> Self {
        self.logger = logger;
        self
    }

    /// Target collection.
    pub const fn collection(&self) -> &CollectionName {
        &self.collection
    }

    /// Create the collection with cosine distance unless it exists.
    ///
    /// Any failure other than "already exists" is returned to the caller.
    pub async fn ensure_collection(
        &self,
        ctx: &RequestContext,
        vector_size: u32,
    ) -> Result<EnsureCollectionOutcome> {
        let exists = self
            .port
            .collection_exists(ctx, self.collection.clone())
            .await
            .with_field("collection", self.collection.as_str())?;
        if exists {
            return Ok(EnsureCollectionOutcome::Existed);
        }

        self.port
            .create_collection(ctx, self.collection.clone(), vector_size)
            .await
            .with_field("collection", self.collection.as_str())?;
        if let Some(logger) = self.logger.as_ref() {
            logger.info(
                "sync.collection_created",
                "Created vector collection",
                Some(log_fields([
                    ("collection", serde_json::Value::from(self.collection.as_str())),
                    ("vectorSize", serde_json::Value::from(vector_size)),
                    ("distance", serde_json::Value::from("Cosine")),
                ])),
            );
        }
        Ok(EnsureCollectionOutcome::Created)
    }

    /// Look up the record for `path`. Transport failures become
    /// [`LookupOutcome::Unavailable`] instead of errors.
    pub async fn find_by_source_path(&self, ctx: &RequestContext, path: &SourcePath) -> LookupOutcome {
        match self
            .port
            .find_by_source_path(ctx, self.collection.clone(), path.clone())
            .await
        {
            Ok(Some(record)) => LookupOutcome::Found(record),
            Ok(None) => LookupOutcome::Missing,
            Err(error) => LookupOutcome::Unavailable(error),
        }
    }

    /// Write `documents`. An empty batch is a no-op returning zero.
    pub async fn upsert(&self, ctx: &RequestContext, documents: Vec<Document>) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }
        self.port
            .upsert(ctx, self.collection.clone(), documents)
            .await
    }

    /// Best-effort existence check; a failed check reads as `false`.
    pub async fn exists(&self, ctx: &RequestContext, id: &DocumentId) -> bool {
        match self
            .port
            .point_exists(ctx, self.collection.clone(), id.clone())
            .await
        {
            Ok(found) => found,
            Err(error) => {
                if let Some(logger) = self.logger.as_ref() {
                    logger.log_error(
                        LogLevel::Debug,
                        "sync.verify_unavailable",
                        "Point existence check failed",
                        &error,
                        Some(log_fields([("id", id.as_str())])),
                    );
                }
                false
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kb_sync_shared::ErrorCode;
    use kb_sync_testkit::errors::{connection_error, permanent_error};
    use kb_sync_testkit::in_memory::InMemoryRemoteIndex;

    fn index(port: &InMemoryRemoteIndex) -> Result<RemoteIndex> {
        let collection = CollectionName::parse("handbook")?;
        Ok(RemoteIndex::new(Arc::new(port.clone()), collection))
    }

    #[tokio::test]
    async fn ensure_collection_creates_once() -> Result<()> {
        let port = InMemoryRemoteIndex::new();
        let remote = index(&port)?;
        let ctx = RequestContext::new_request();

        assert_eq!(
            remote.ensure_collection(&ctx, 1536).await?,
            EnsureCollectionOutcome::Created
        );
        assert_eq!(
            remote.ensure_collection(&ctx, 1536).await?,
            EnsureCollectionOutcome::Existed
        );
        assert_eq!(port.created_collections(), vec![("handbook".to_owned(), 1536)]);
        Ok(())
    }

    #[tokio::test]
    async fn ensure_collection_failure_is_fatal() -> Result<()> {
        let port = InMemoryRemoteIndex::new();
        port.fail_create(permanent_error());
        let remote = index(&port)?;

        let error = remote
            .ensure_collection(&RequestContext::new_request(), 8)
            .await
            .err();

        assert_eq!(
            error.as_ref().map(|error| &error.code),
            Some(&ErrorCode::permission_denied())
        );
        assert_eq!(
            error.and_then(|error| error.metadata.get("collection").cloned()),
            Some("handbook".to_owned())
        );
        Ok(())
    }

    #[tokio::test]
    async fn lookup_failure_is_unavailable_not_error() -> Result<()> {
        let port = InMemoryRemoteIndex::new();
        port.seed_collection("handbook", 8);
        port.fail_all_lookups(connection_error());
        let remote = index(&port)?;
        let path = SourcePath::parse("/kb/a.md")?;

        let outcome = remote
            .find_by_source_path(&RequestContext::new_request(), &path)
            .await;

        assert!(matches!(outcome, LookupOutcome::Unavailable(ref e) if e.code == connection_error().code));
        Ok(())
    }

    #[tokio::test]
    async fn empty_upsert_skips_the_network() -> Result<()> {
        let port = InMemoryRemoteIndex::new();
        let remote = index(&port)?;

        let written = remote.upsert(&RequestContext::new_request(), Vec::new()).await?;

        assert_eq!(written, 0);
        assert!(port.upsert_sizes().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn exists_failure_reads_as_missing() -> Result<()> {
        let port = InMemoryRemoteIndex::new();
        port.seed_collection("handbook", 8);
        let id = DocumentId::generate();
        port.seed_point("handbook", id.clone(), "/kb/a.md", Some("abc"));
        let remote = index(&port)?;
        let ctx = RequestContext::new_request();

        assert!(remote.exists(&ctx, &id).await);
        port.fail_point_exists(connection_error());
        assert!(!remote.exists(&ctx, &id).await);
        Ok(())
    }
}
