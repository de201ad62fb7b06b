//! Embedding with truncation, blank short-circuit, retry, and batch isolation.

use kb_sync_domain::{Document, Embedding, SourcePath};
use kb_sync_ports::{EmbedRequest, EmbeddingPort, LogLevel, LoggerPort, log_fields};
use kb_sync_shared::{
    ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result, RetryPolicy, bounded_map,
    retry_async_with_observer,
};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default maximum input length, in characters.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 30_000;
/// Default attempt budget per text.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default linear backoff step in milliseconds.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;

const PROGRESS_EVERY: usize = 10;
const OPERATION: &str = "embedding.embed";

/// Tuning for [`EmbeddingClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddingClientOptions {
    /// Texts longer than this are cut to their first `max_input_chars` chars.
    pub max_input_chars: NonZeroUsize,
    /// Attempt budget and backoff.
    pub retry: RetryPolicy,
    /// Expected vector width; other widths are per-document failures.
    pub expected_dimension: Option<usize>,
    /// Documents embedded concurrently inside one batch.
    pub concurrency: NonZeroUsize,
}

impl Default for EmbeddingClientOptions {
    fn default() -> Self {
        let mut retry = RetryPolicy::linear(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY_MS);
        retry.retry_non_retriable = true;
        Self {
            max_input_chars: NonZeroUsize::new(DEFAULT_MAX_INPUT_CHARS).unwrap_or(NonZeroUsize::MIN),
            retry,
            expected_dimension: None,
            concurrency: NonZeroUsize::MIN,
        }
    }
}

/// Per-document outcome of [`EmbeddingClient::embed_many`].
#[derive(Debug, Clone, PartialEq)]
pub enum EmbedOutcome {
    /// A vector was attached.
    Embedded,
    /// Content was blank; the provider was not called.
    Blank,
    /// Embedding failed; the document keeps an empty vector.
    Failed(ErrorEnvelope),
}

/// Result of embedding a batch of documents.
#[derive(Debug, Clone, Default)]
pub struct EmbedManyReport {
    /// Input documents in input order, embedded where possible.
    pub documents: Vec<Document>,
    /// Documents that received a vector.
    pub embedded: usize,
    /// Documents skipped because their content was blank.
    pub blank: usize,
    /// Documents whose embedding failed.
    pub failed: usize,
}

impl EmbedManyReport {
    /// Documents ready for upload.
    pub fn into_embedded(self) -> Vec<Document> {
        self.documents
            .into_iter()
            .filter(Document::is_embedded)
            .collect()
    }
}

/// Embedding client wrapped around an [`EmbeddingPort`].
#[derive(Clone)]
pub struct EmbeddingClient {
    port: Arc<dyn EmbeddingPort>,
    logger: Option<Arc<dyn LoggerPort>>,
    options: EmbeddingClientOptions,
}

impl EmbeddingClient {
    /// Build a client.
    #[must_use]
    pub fn new(port: Arc<dyn EmbeddingPort>, options: EmbeddingClientOptions) -> Self {
        Self {
            port,
            logger: None,
            options,
        }
    }

    /// Attach a logger.
    #[must_use]
    pub fn with_logger(mut self, logger: Option<Arc<dyn LoggerPort>>) -> Self {
        self.logger = logger;
        self
    }

    /// Effective options.
    pub const fn options(&self) -> &EmbeddingClientOptions {
        &self.options
    }

    /// Embed one text.
    ///
    /// Blank input returns an empty vector without a provider call. An OK
    /// provider response without data also yields an empty vector.
    pub async fn embed(&self, ctx: &RequestContext, text: &str) -> Result<Embedding> {
        if text.trim().is_empty() {
            return Ok(Embedding::empty());
        }

        let (input, truncated) = truncate_chars(text, self.options.max_input_chars.get());
        if truncated && let Some(logger) = self.logger.as_ref() {
            logger.warn(
                "embedding.truncated",
                "Input exceeds the embedding limit; embedding a truncated prefix",
                Some(log_fields([
                    ("originalChars", text.chars().count()),
                    ("maxChars", self.options.max_input_chars.get()),
                ])),
            );
        }

        let request = EmbedRequest::from(input);
        let port = Arc::clone(&self.port);
        let mut attempts = 0u32;
        let mut op = || {
            attempts = attempts.saturating_add(1);
            port.embed(ctx, request.clone())
        };
        let logger = self.logger.clone();
        let result = retry_async_with_observer(
            ctx,
            self.options.retry,
            OPERATION,
            &mut op,
            |attempt, error, delay| {
                if let Some(logger) = logger.as_ref() {
                    logger.log_error(
                        LogLevel::Warn,
                        "embedding.retry",
                        "Embedding attempt failed; retrying",
                        error,
                        Some(log_fields([
                            ("attempt", u64::from(attempt)),
                            ("delayMs", u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)),
                        ])),
                    );
                }
            },
        )
        .await;

        match result {
            Ok(embedding) => {
                self.check_dimension(&embedding)?;
                Ok(embedding)
            },
            Err(error) if error.is_cancelled() => Err(error),
            Err(error) if attempts >= self.options.retry.max_attempts => {
                Err(retries_exhausted(&error, attempts))
            },
            Err(error) => Err(error.with_class(ErrorClass::NonRetriable)),
        }
    }

    /// Embed every document, isolating failures.
    ///
    /// Failed documents keep an empty vector. Output order matches input
    /// order. Per-document failures never surface as an `Err`.
    pub async fn embed_many(
        &self,
        ctx: &RequestContext,
        documents: Vec<Document>,
    ) -> Result<EmbedManyReport> {
        let total = documents.len();
        let completed = AtomicUsize::new(0);
        let outcomes = bounded_map(
            self.options.concurrency.get(),
            documents,
            |mut document, _index| {
                let completed = &completed;
                async move {
                    let outcome = self.embed_document(ctx, &mut document).await;
                    let done = completed.fetch_add(1, Ordering::Relaxed).saturating_add(1);
                    if done % PROGRESS_EVERY == 0 || done == total {
                        self.log_progress(done, total);
                    }
                    (document, outcome)
                }
            },
        )
        .await?;

        let mut report = EmbedManyReport {
            documents: Vec::with_capacity(outcomes.len()),
            ..EmbedManyReport::default()
        };
        for (document, outcome) in outcomes {
            match outcome {
                EmbedOutcome::Embedded => report.embedded += 1,
                EmbedOutcome::Blank => report.blank += 1,
                EmbedOutcome::Failed(error) => {
                    report.failed += 1;
                    self.log_failure(&document.source_path, &error);
                },
            }
            report.documents.push(document);
        }
        Ok(report)
    }

    async fn embed_document(&self, ctx: &RequestContext, document: &mut Document) -> EmbedOutcome {
        if document.is_blank() {
            document.embedding = Embedding::empty();
            return EmbedOutcome::Blank;
        }
        match self.embed(ctx, &document.content).await {
            Ok(embedding) if embedding.is_empty() => EmbedOutcome::Failed(ErrorEnvelope::unexpected(
                ErrorCode::new("embedding", "empty_response"),
                "provider returned no embedding",
                ErrorClass::NonRetriable,
            )),
            Ok(embedding) => {
                document.embedding = embedding;
                EmbedOutcome::Embedded
            },
            Err(error) => EmbedOutcome::Failed(error),
        }
    }

    fn check_dimension(&self, embedding: &Embedding) -> Result<()> {
        let Some(expected) = self.options.expected_dimension else {
            return Ok(());
        };
        if embedding.is_empty() || embedding.dimension() == expected {
            return Ok(());
        }
        Err(ErrorEnvelope::unexpected(
            ErrorCode::new("embedding", "dimension_mismatch"),
            "embedding width does not match the collection vector size",
            ErrorClass::NonRetriable,
        )
        .with_metadata("expected", expected.to_string())
        .with_metadata("actual", embedding.dimension().to_string()))
    }

    fn log_progress(&self, done: usize, total: usize) {
        if let Some(logger) = self.logger.as_ref() {
            logger.info(
                "embedding.progress",
                "Embedding progress",
                Some(log_fields([("done", done), ("total", total)])),
            );
        }
    }

    fn log_failure(&self, source_path: &SourcePath, error: &ErrorEnvelope) {
        if let Some(logger) = self.logger.as_ref() {
            logger.log_error(
                LogLevel::Warn,
                "embedding.document_failed",
                "Embedding failed; document excluded from upload",
                error,
                Some(log_fields([("sourcePath", source_path.as_str())])),
            );
        }
    }
}

/// Keep the first `max_chars` Unicode scalar values of `text`.
///
/// Returns the prefix and whether anything was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => (text.get(..cut).unwrap_or(text), true),
        None => (text, false),
    }
}

fn retries_exhausted(last: &ErrorEnvelope, attempts: u32) -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::new("embedding", "retries_exhausted"),
        format!("embedding failed after {attempts} attempts: {}", last.message),
        ErrorClass::NonRetriable,
    )
    .with_metadata("attempts", attempts.to_string())
    .with_metadata("last_code", last.code.to_string())
    .with_metadata("last_message", last.message.clone())
}
