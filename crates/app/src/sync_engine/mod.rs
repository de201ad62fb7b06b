//! One incremental sync pass: scan, classify, batch, embed, upsert, verify.

mod batch;
mod phase;
mod summary;
mod verify;

pub use phase::{SYNC_PHASE_TRANSITIONS, SyncPhase};
pub use summary::SyncSummary;
pub use verify::{FirstVerifySelector, RandomVerifySelector, VerifySelector};

use crate::change_detector::{ChangeDetector, Classification};
use crate::embedding_client::{EmbeddingClient, EmbeddingClientOptions};
use crate::remote_index::{EnsureCollectionOutcome, RemoteIndex};
use batch::{PendingBatch, flush_batch};
use kb_sync_domain::{CollectionName, Document, DocumentId, SourcePath, fingerprint, title_from_path};
use kb_sync_ports::{
    BoxFuture, EmbeddingPort, FileSourcePort, ListFilesRequest, LogLevel, LoggerPort,
    RemoteIndexPort, log_fields,
};
use kb_sync_shared::{CorrelationId, ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result};
use phase::SyncPhaseFsm;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

const PROGRESS_EVERY: usize = 10;
const DISCOVERED_EXAMPLES: usize = 5;

/// Ports the engine runs against.
#[derive(Clone)]
pub struct SyncEngineDeps {
    /// Embedding provider.
    pub embedding: Arc<dyn EmbeddingPort>,
    /// Vector store.
    pub remote_index: Arc<dyn RemoteIndexPort>,
    /// Knowledge-base files.
    pub file_source: Arc<dyn FileSourcePort>,
    /// Optional structured logger.
    pub logger: Option<Arc<dyn LoggerPort>>,
    /// Chooses the point verified after each upsert.
    pub verify_selector: Arc<dyn VerifySelector>,
}

/// Engine settings, already validated.
#[derive(Debug, Clone)]
pub struct SyncEngineOptions {
    /// Knowledge-base root directory.
    pub root: PathBuf,
    /// Allowed lowercase extensions, without dots.
    pub extensions: Vec<Box<str>>,
    /// Target collection.
    pub collection: CollectionName,
    /// Vector width used when creating the collection.
    pub vector_size: u32,
    /// Documents per flush.
    pub batch_size: NonZeroUsize,
    /// Spot-check one point after each upsert.
    pub verify_writes: bool,
    /// Abort the pass once more lookups than this have failed.
    pub max_lookup_failures: Option<usize>,
    /// Embedding client tuning.
    pub embedding: EmbeddingClientOptions,
}

/// Entry point invoked by the scheduler for each pass.
pub trait SyncPassRunner: Send + Sync {
    /// Run one pass.
    fn run_pass<'a>(&'a self, ctx: &'a RequestContext) -> BoxFuture<'a, Result<SyncSummary>>;
}

/// Incremental sync engine. Cheap to share behind an `Arc`.
pub struct SyncEngine {
    file_source: Arc<dyn FileSourcePort>,
    embedding: EmbeddingClient,
    remote: RemoteIndex,
    logger: Option<Arc<dyn LoggerPort>>,
    verify_selector: Arc<dyn VerifySelector>,
    options: SyncEngineOptions,
}

impl SyncEngine {
    /// Wire the engine. An unset expected embedding width defaults to
    /// `options.vector_size`.
    #[must_use]
    pub fn new(deps: SyncEngineDeps, mut options: SyncEngineOptions) -> Self {
        if options.embedding.expected_dimension.is_none() {
            options.embedding.expected_dimension = usize::try_from(options.vector_size).ok();
        }
        let embedding = EmbeddingClient::new(deps.embedding, options.embedding)
            .with_logger(deps.logger.clone());
        let remote = RemoteIndex::new(deps.remote_index, options.collection.clone())
            .with_logger(deps.logger.clone());
        Self {
            file_source: deps.file_source,
            embedding,
            remote,
            logger: deps.logger,
            verify_selector: deps.verify_selector,
            options,
        }
    }

    /// Effective options.
    pub const fn options(&self) -> &SyncEngineOptions {
        &self.options
    }

    /// Create the collection if it is missing.
    pub async fn ensure_collection(&self, ctx: &RequestContext) -> Result<EnsureCollectionOutcome> {
        self.remote
            .ensure_collection(ctx, self.options.vector_size)
            .await
    }

    /// Run one pass and return its counters.
    ///
    /// Per-file problems are counted, never returned. The pass fails only when
    /// the collection cannot be ensured, the root is missing, an upsert fails,
    /// or lookups fail more often than `max_lookup_failures` allows.
    /// Cancelling `ctx` stops the pass between files; the pending batch is
    /// still flushed and the summary comes back with `cancelled` set.
    pub async fn run_sync_pass(&self, ctx: &RequestContext) -> Result<SyncSummary> {
        let started = Instant::now();
        let pass_id = CorrelationId::new_pass_id();
        let logger: Option<Arc<dyn LoggerPort>> = self
            .logger
            .as_ref()
            .map(|logger| Arc::from(logger.child(log_fields([("passId", pass_id.as_str())]))));
        let run = PassRun {
            engine: self,
            net: ctx.detached(),
            embedding: self.embedding.clone().with_logger(logger.clone()),
            remote: self.remote.clone().with_logger(logger.clone()),
            logger,
        };

        let mut summary = SyncSummary::new(pass_id.as_str());
        let result = run.execute(ctx, &mut summary).await;
        summary.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(()) => {
                if let Some(logger) = run.logger.as_ref() {
                    logger.info(
                        "sync.pass_completed",
                        "Sync pass completed",
                        Some(summary.to_log_fields()),
                    );
                }
                Ok(summary)
            },
            Err(error) => {
                if let Some(logger) = run.logger.as_ref() {
                    logger.log_error(
                        LogLevel::Error,
                        "sync.pass_failed",
                        "Sync pass aborted",
                        &error,
                        Some(summary.to_log_fields()),
                    );
                }
                Err(error.with_metadata("pass_id", pass_id.as_str()))
            },
        }
    }
}

impl SyncPassRunner for SyncEngine {
    fn run_pass<'a>(&'a self, ctx: &'a RequestContext) -> BoxFuture<'a, Result<SyncSummary>> {
        Box::pin(self.run_sync_pass(ctx))
    }
}

/// Pass-scoped view of the engine. Network calls use `net`, which the
/// caller's cancellation does not reach.
pub(crate) struct PassRun<'a> {
    engine: &'a SyncEngine,
    net: RequestContext,
    embedding: EmbeddingClient,
    remote: RemoteIndex,
    logger: Option<Arc<dyn LoggerPort>>,
}

impl PassRun<'_> {
    async fn execute(&self, ctx: &RequestContext, summary: &mut SyncSummary) -> Result<()> {
        let options = &self.engine.options;
        let mut fsm = SyncPhaseFsm::new();
        if let Some(logger) = self.logger.as_ref() {
            logger.info(
                "sync.pass_started",
                "Sync pass started",
                Some(log_fields([
                    ("root", Value::from(options.root.display().to_string())),
                    ("collection", Value::from(options.collection.as_str())),
                    ("batchSize", Value::from(options.batch_size.get())),
                ])),
            );
        }

        self.remote
            .ensure_collection(&self.net, options.vector_size)
            .await?;

        let listed = self
            .engine
            .file_source
            .list_files(
                &self.net,
                ListFilesRequest {
                    root: options.root.clone(),
                    extensions: options.extensions.clone(),
                },
            )
            .await?;
        summary.discovered = listed.files.len();
        self.log_discovered(&listed.root, &listed.files);

        if listed.files.is_empty() {
            return fsm.transition(SyncPhase::Done);
        }
        fsm.transition(SyncPhase::Classifying)?;

        let detector = ChangeDetector::new(self.remote.clone(), self.logger.clone());
        let mut pending = PendingBatch::new(options.batch_size);
        let total = listed.files.len();

        for path in listed.files {
            if ctx.is_cancelled() {
                summary.cancelled = true;
                self.log_cancelled(summary);
                break;
            }
            summary.processed += 1;

            if let Some(document) = self.classify_file(&detector, summary, &path).await? {
                fsm.transition(SyncPhase::Batching)?;
                if pending.push(document) {
                    flush_batch(self, &mut fsm, summary, pending.take()).await?;
                }
                fsm.transition(SyncPhase::Classifying)?;
            }

            if summary.processed % PROGRESS_EVERY == 0 {
                self.log_progress(summary, total);
            }
        }

        if !pending.is_empty() {
            flush_batch(self, &mut fsm, summary, pending.take()).await?;
        }
        fsm.transition(SyncPhase::Done)
    }

    /// Read, fingerprint, and classify one file.
    ///
    /// Returns the document to upload, or `None` when the file is unchanged
    /// or unreadable.
    async fn classify_file(
        &self,
        detector: &ChangeDetector,
        summary: &mut SyncSummary,
        path: &Path,
    ) -> Result<Option<Document>> {
        let (source_path, content) = match self.read_file(path).await {
            Ok(read) => read,
            Err(error) => {
                summary.errored += 1;
                if let Some(logger) = self.logger.as_ref() {
                    logger.log_error(
                        LogLevel::Warn,
                        "sync.read_failed",
                        "Failed to read file; skipping",
                        &error,
                        Some(log_fields([("path", path.display().to_string())])),
                    );
                }
                return Ok(None);
            },
        };

        let hash = fingerprint(content.as_bytes());
        let classification = detector.classify(&self.net, &source_path, &hash).await;
        if matches!(
            classification,
            Classification::New {
                lookup_failed: true
            }
        ) {
            summary.lookup_failures += 1;
            self.check_lookup_budget(summary.lookup_failures)?;
        }

        let id = match classification {
            Classification::Unchanged { .. } => {
                summary.skipped += 1;
                return Ok(None);
            },
            Classification::Updated { id } => {
                summary.updated += 1;
                id
            },
            Classification::New { .. } => {
                summary.created += 1;
                DocumentId::generate()
            },
        };
        Ok(Some(Document::with_hash(
            id,
            source_path,
            title_from_path(path),
            content,
            hash,
        )))
    }

    async fn read_file(&self, path: &Path) -> Result<(SourcePath, Box<str>)> {
        let source_path = SourcePath::from_path(path)?;
        let content = self
            .engine
            .file_source
            .read_text(&self.net, path.to_path_buf())
            .await?;
        Ok((source_path, content))
    }

    fn check_lookup_budget(&self, failures: usize) -> Result<()> {
        match self.engine.options.max_lookup_failures {
            Some(max) if failures > max => Err(ErrorEnvelope::unexpected(
                ErrorCode::new("sync", "lookup_failures_exceeded"),
                "too many remote lookups failed in this pass",
                ErrorClass::Retriable,
            )
            .with_metadata("failures", failures.to_string())
            .with_metadata("max", max.to_string())),
            _ => Ok(()),
        }
    }

    fn log_discovered(&self, root: &Path, files: &[PathBuf]) {
        let Some(logger) = self.logger.as_ref() else {
            return;
        };
        let examples: Vec<Value> = files
            .iter()
            .take(DISCOVERED_EXAMPLES)
            .map(|file| {
                let shown = file.strip_prefix(root).unwrap_or(file);
                Value::from(shown.display().to_string())
            })
            .collect();
        logger.info(
            "sync.files_discovered",
            "Discovered knowledge-base files",
            Some(log_fields([
                ("count", Value::from(files.len())),
                ("examples", Value::Array(examples)),
            ])),
        );
    }

    fn log_progress(&self, summary: &SyncSummary, total: usize) {
        if let Some(logger) = self.logger.as_ref() {
            logger.info(
                "sync.progress",
                "Sync progress",
                Some(log_fields([
                    ("processed", summary.processed),
                    ("total", total),
                    ("skipped", summary.skipped),
                    ("uploaded", summary.uploaded),
                ])),
            );
        }
    }

    fn log_cancelled(&self, summary: &SyncSummary) {
        if let Some(logger) = self.logger.as_ref() {
            logger.warn(
                "sync.pass_cancelled",
                "Shutdown requested; flushing pending batch and stopping",
                Some(log_fields([("processed", summary.processed)])),
            );
        }
    }

    pub(crate) fn log_debug(&self, event: &str, message: &str, batch: usize) {
        if let Some(logger) = self.logger.as_ref() {
            logger.debug(event, message, Some(log_fields([("batch", batch)])));
        }
    }
}
