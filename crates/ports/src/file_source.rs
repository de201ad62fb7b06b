//! Local corpus boundary contract.

use crate::BoxFuture;
use kb_sync_shared::{RequestContext, Result};
use std::path::PathBuf;

/// Owned request to enumerate candidate files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFilesRequest {
    /// Root directory of the knowledge base.
    pub root: PathBuf,
    /// Allowed extensions: lowercase, without the leading dot.
    pub extensions: Vec<Box<str>>,
}

/// Enumerated corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedFiles {
    /// Canonicalized root.
    pub root: PathBuf,
    /// Regular files under `root`, sorted lexicographically.
    pub files: Vec<PathBuf>,
}

/// Boundary contract for reading the local knowledge base.
pub trait FileSourcePort: Send + Sync {
    /// List regular files whose lowercase extension is allowed.
    ///
    /// A missing root, or a root that is not a directory, fails with
    /// `sync:root_not_found`. Unreadable subdirectories are skipped.
    fn list_files(
        &self,
        ctx: &RequestContext,
        request: ListFilesRequest,
    ) -> BoxFuture<'_, Result<ListedFiles>>;

    /// Read a file as UTF-8 text.
    fn read_text(&self, ctx: &RequestContext, path: PathBuf) -> BoxFuture<'_, Result<Box<str>>>;
}
