//! Pending batch and the flush step (embed, upsert, verify).

use super::PassRun;
use super::phase::{SyncPhase, SyncPhaseFsm};
use super::summary::SyncSummary;
use kb_sync_domain::{Document, DocumentId};
use kb_sync_ports::{LogLevel, log_fields};
use kb_sync_shared::Result;
use std::num::NonZeroUsize;

/// Classified documents waiting for a flush.
#[derive(Debug)]
pub(crate) struct PendingBatch {
    documents: Vec<Document>,
    limit: NonZeroUsize,
}

impl PendingBatch {
    pub(crate) fn new(limit: NonZeroUsize) -> Self {
        Self {
            documents: Vec::with_capacity(limit.get()),
            limit,
        }
    }

    /// Add `document`; returns true once the batch is full.
    pub(crate) fn push(&mut self, document: Document) -> bool {
        self.documents.push(document);
        self.documents.len() >= self.limit.get()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub(crate) fn take(&mut self) -> Vec<Document> {
        std::mem::replace(&mut self.documents, Vec::with_capacity(self.limit.get()))
    }
}

/// Embed `documents`, upload the embedded ones, and spot-check one write.
///
/// Embedding failures are counted and dropped. An upsert failure is returned
/// with the batch number and the count uploaded by earlier batches.
pub(crate) async fn flush_batch(
    run: &PassRun<'_>,
    fsm: &mut SyncPhaseFsm,
    summary: &mut SyncSummary,
    documents: Vec<Document>,
) -> Result<()> {
    fsm.transition(SyncPhase::Embedding)?;
    let size = documents.len();
    let report = run.embedding.embed_many(&run.net, documents).await?;
    summary.errored += report.failed;
    summary.blank += report.blank;
    let ready = report.into_embedded();

    fsm.transition(SyncPhase::Upserting)?;
    summary.batches += 1;
    let batch = summary.batches;
    if ready.is_empty() {
        run.log_debug(
            "sync.batch_empty",
            "No embedded documents in batch; nothing to upload",
            batch,
        );
        return Ok(());
    }

    let ids: Vec<DocumentId> = ready.iter().map(|doc| doc.id.clone()).collect();
    let written = match run.remote.upsert(&run.net, ready).await {
        Ok(written) => written,
        Err(error) => {
            let error = error
                .with_metadata("batch", batch.to_string())
                .with_metadata("uploaded_before", summary.uploaded.to_string());
            if let Some(logger) = run.logger.as_ref() {
                logger.log_error(
                    LogLevel::Error,
                    "sync.upsert_failed",
                    "Batch upload failed; aborting pass",
                    &error,
                    Some(log_fields([("batch", batch), ("points", ids.len())])),
                );
            }
            return Err(error);
        },
    };
    summary.uploaded += written;
    if let Some(logger) = run.logger.as_ref() {
        logger.info(
            "sync.batch_uploaded",
            "Uploaded batch",
            Some(log_fields([
                ("batch", batch),
                ("batchSize", size),
                ("points", written),
                ("uploadedTotal", summary.uploaded),
            ])),
        );
    }

    if run.engine.options.verify_writes {
        fsm.transition(SyncPhase::Verifying)?;
        verify_one(run, summary, &ids).await;
    }
    Ok(())
}

async fn verify_one(run: &PassRun<'_>, summary: &mut SyncSummary, ids: &[DocumentId]) {
    let Some(id) = run
        .engine
        .verify_selector
        .pick(ids.len())
        .and_then(|index| ids.get(index))
    else {
        return;
    };

    if run.remote.exists(&run.net, id).await {
        summary.verified += 1;
        return;
    }
    summary.verify_failed += 1;
    if let Some(logger) = run.logger.as_ref() {
        logger.warn(
            "sync.verify_failed",
            "Written point not found on re-read",
            Some(log_fields([("id", id.as_str())])),
        );
    }
}
