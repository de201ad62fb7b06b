//! Remote vector index boundary contract.

use crate::BoxFuture;
use kb_sync_domain::{CollectionName, Document, DocumentId, SourcePath};
use kb_sync_shared::{RequestContext, Result};

/// Provider descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIndexProviderInfo {
    /// Stable provider identifier (`qdrant`, ...).
    pub id: Box<str>,
    /// Base endpoint, without credentials.
    pub endpoint: Box<str>,
}

/// The remote record currently stored for a source path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRecord {
    /// Record id to reuse on update.
    pub id: DocumentId,
    /// Stored `contentHash` payload, if the record has one.
    pub content_hash: Option<Box<str>>,
}

/// Boundary contract for the vector store.
///
/// Every call is a single network round trip with a finite timeout. None of
/// them retry internally.
pub trait RemoteIndexPort: Send + Sync {
    /// Provider info for this implementation.
    fn provider(&self) -> &RemoteIndexProviderInfo;

    /// Whether the collection exists.
    fn collection_exists(
        &self,
        ctx: &RequestContext,
        collection: CollectionName,
    ) -> BoxFuture<'_, Result<bool>>;

    /// Create the collection with cosine distance and `vector_size` dimensions.
    ///
    /// "Already exists" is reported as success.
    fn create_collection(
        &self,
        ctx: &RequestContext,
        collection: CollectionName,
        vector_size: u32,
    ) -> BoxFuture<'_, Result<()>>;

    /// Look up at most one record whose `sourcePath` equals `path`.
    fn find_by_source_path(
        &self,
        ctx: &RequestContext,
        collection: CollectionName,
        path: SourcePath,
    ) -> BoxFuture<'_, Result<Option<RemoteRecord>>>;

    /// Insert or overwrite `documents` keyed by id. Returns the number written.
    ///
    /// Callers must only pass embedded documents; an empty vector is rejected
    /// as an invariant violation before any network call.
    fn upsert(
        &self,
        ctx: &RequestContext,
        collection: CollectionName,
        documents: Vec<Document>,
    ) -> BoxFuture<'_, Result<usize>>;

    /// Whether a point with `id` exists.
    fn point_exists(
        &self,
        ctx: &RequestContext,
        collection: CollectionName,
        id: DocumentId,
    ) -> BoxFuture<'_, Result<bool>>;
}
