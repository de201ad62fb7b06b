//! Local knowledge-base file source.

use kb_sync_ports::{BoxFuture, FileSourcePort, ListFilesRequest, ListedFiles};
use kb_sync_shared::{ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Local filesystem source: blocking directory walk on the blocking pool,
/// async reads on the runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSource;

impl LocalFileSource {
    /// Build a local file source.
    pub const fn new() -> Self {
        Self
    }
}

impl FileSourcePort for LocalFileSource {
    fn list_files(
        &self,
        ctx: &RequestContext,
        request: ListFilesRequest,
    ) -> BoxFuture<'_, Result<ListedFiles>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("file_source.list_files")?;
            let walk_ctx = ctx.clone();
            tokio::task::spawn_blocking(move || walk_knowledge_base(&walk_ctx, request))
                .await
                .map_err(|error| {
                    ErrorEnvelope::unexpected(
                        ErrorCode::internal(),
                        format!("file listing task failed: {error}"),
                        ErrorClass::NonRetriable,
                    )
                })?
        })
    }

    fn read_text(&self, ctx: &RequestContext, path: PathBuf) -> BoxFuture<'_, Result<Box<str>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("file_source.read_text")?;
            let contents = tokio::fs::read_to_string(&path).await.map_err(|error| {
                let code = if error.kind() == std::io::ErrorKind::InvalidData {
                    ErrorCode::new("sync", "invalid_utf8")
                } else {
                    ErrorCode::io()
                };
                ErrorEnvelope::expected(code, format!("failed to read file: {error}"))
                    .with_metadata("path", path.display().to_string())
            })?;
            Ok(contents.into_boxed_str())
        })
    }
}

fn walk_knowledge_base(ctx: &RequestContext, request: ListFilesRequest) -> Result<ListedFiles> {
    let root = canonical_root(&request.root)?;
    let mut files = Vec::new();

    // Unreadable entries are skipped, not fatal.
    for entry in WalkDir::new(&root)
        .follow_links(false)
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        ctx.ensure_not_cancelled("file_source.list_files")?;
        if !entry.file_type().is_file() {
            continue;
        }
        if has_allowed_extension(entry.path(), &request.extensions) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(ListedFiles { root, files })
}

fn canonical_root(root: &Path) -> Result<PathBuf> {
    let not_found = |reason: &str| {
        ErrorEnvelope::expected(
            ErrorCode::new("sync", "root_not_found"),
            format!("knowledge base directory {reason}"),
        )
        .with_metadata("path", root.display().to_string())
    };

    let canonical = std::fs::canonicalize(root).map_err(|_| not_found("does not exist"))?;
    if !canonical.is_dir() {
        return Err(not_found("is not a directory"));
    }
    Ok(canonical)
}

fn has_allowed_extension(path: &Path, allowed: &[Box<str>]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .is_some_and(|ext| allowed.iter().any(|allowed| allowed.as_ref() == ext))
}
