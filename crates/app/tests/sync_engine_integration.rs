//! Integration tests for the sync engine against in-memory ports.

use kb_sync_app::{
    EmbeddingClientOptions, FirstVerifySelector, RandomVerifySelector, SyncEngine, SyncEngineDeps,
    SyncEngineOptions, SyncSummary, VerifySelector,
};
use kb_sync_domain::{CollectionName, DocumentId, fingerprint};
use kb_sync_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use kb_sync_testkit::errors::{connection_error, permanent_error};
use kb_sync_testkit::in_memory::{
    InMemoryEmbedding, InMemoryFileSource, InMemoryRemoteIndex, RecordingLogger, StoredPoint,
};
use std::num::NonZeroUsize;
use std::sync::Arc;

const COLLECTION: &str = "knowledge_base";

struct Harness {
    files: InMemoryFileSource,
    index: InMemoryRemoteIndex,
    embedding: InMemoryEmbedding,
    logger: RecordingLogger,
    dimension: usize,
}

impl Harness {
    fn new(dimension: usize) -> Self {
        Self {
            files: InMemoryFileSource::new("/kb"),
            index: InMemoryRemoteIndex::new(),
            embedding: InMemoryEmbedding::new(dimension),
            logger: RecordingLogger::default(),
            dimension,
        }
    }

    fn options(&self) -> Result<SyncEngineOptions> {
        let mut embedding = EmbeddingClientOptions::default();
        embedding.retry.base_delay_ms = 0;
        Ok(SyncEngineOptions {
            root: "/kb".into(),
            extensions: vec!["md".into(), "txt".into()],
            collection: CollectionName::parse(COLLECTION)?,
            vector_size: u32::try_from(self.dimension).unwrap_or(u32::MAX),
            batch_size: NonZeroUsize::new(100).unwrap_or(NonZeroUsize::MIN),
            verify_writes: true,
            max_lookup_failures: None,
            embedding,
        })
    }

    fn engine(&self, tweak: impl FnOnce(&mut SyncEngineOptions)) -> Result<SyncEngine> {
        self.engine_with_selector(Arc::new(FirstVerifySelector), tweak)
    }

    fn engine_with_selector(
        &self,
        verify_selector: Arc<dyn VerifySelector>,
        tweak: impl FnOnce(&mut SyncEngineOptions),
    ) -> Result<SyncEngine> {
        let mut options = self.options()?;
        tweak(&mut options);
        let deps = SyncEngineDeps {
            embedding: Arc::new(self.embedding.clone()),
            remote_index: Arc::new(self.index.clone()),
            file_source: Arc::new(self.files.clone()),
            logger: Some(Arc::new(self.logger.clone())),
            verify_selector,
        };
        Ok(SyncEngine::new(deps, options))
    }

    fn only_point(&self, source_path: &str) -> Result<StoredPoint> {
        let mut points = self.index.points_for(COLLECTION, source_path);
        assert_eq!(points.len(), 1, "expected one record for {source_path}");
        points
            .pop()
            .ok_or_else(|| ErrorEnvelope::expected(ErrorCode::not_found(), "no point"))
    }
}

fn batch_size(size: usize) -> impl FnOnce(&mut SyncEngineOptions) {
    move |options| options.batch_size = NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)
}

async fn run(engine: &SyncEngine) -> Result<SyncSummary> {
    engine.run_sync_pass(&RequestContext::new_request()).await
}

#[tokio::test]
async fn first_pass_creates_collection_and_rerun_is_a_noop() -> Result<()> {
    let harness = Harness::new(1536);
    harness.files.write("a.md", "# Onboarding\nWelcome aboard.");
    let engine = harness.engine(|_| {})?;

    let first = run(&engine).await?;

    assert_eq!(
        harness.index.created_collections(),
        vec![(COLLECTION.to_owned(), 1536)]
    );
    assert_eq!((first.created, first.uploaded, first.errored), (1, 1, 0));
    let point = harness.only_point("/kb/a.md")?;
    let id = point.id.as_str();
    assert_eq!(id.len(), 36);
    assert_eq!(id.matches('-').count(), 4);
    assert_eq!(point.vector.len(), 1536);
    assert_eq!(point.title, "a.md");

    let second = run(&engine).await?;

    assert_eq!((second.skipped, second.created, second.uploaded), (1, 0, 0));
    assert_eq!(harness.index.upsert_sizes(), vec![1]);
    assert_eq!(harness.index.created_collections().len(), 1);
    Ok(())
}

#[tokio::test]
async fn repeated_passes_without_changes_upload_nothing() -> Result<()> {
    let harness = Harness::new(8);
    for name in ["a.md", "b.txt", "c.md", "notes/d.md"] {
        harness.files.write(name, &format!("content of {name}"));
    }
    let engine = harness.engine(|_| {})?;

    run(&engine).await?;
    let records = harness.index.point_count(COLLECTION);
    let calls = harness.embedding.call_count();
    let second = run(&engine).await?;

    assert_eq!(records, 4);
    assert_eq!(second.uploaded, 0);
    assert_eq!(second.skipped, 4);
    assert_eq!(harness.index.point_count(COLLECTION), records);
    assert_eq!(harness.embedding.call_count(), calls);
    Ok(())
}

#[tokio::test]
async fn changed_file_keeps_its_id() -> Result<()> {
    let harness = Harness::new(8);
    harness.files.write("a.md", "version one");
    let engine = harness.engine(|_| {})?;
    run(&engine).await?;
    let original = harness.only_point("/kb/a.md")?;

    harness.files.write("a.md", "version two");
    let summary = run(&engine).await?;

    assert_eq!((summary.updated, summary.created, summary.uploaded), (1, 0, 1));
    let updated = harness.only_point("/kb/a.md")?;
    assert_eq!(updated.id, original.id);
    assert_eq!(updated.content, "version two");
    assert_eq!(
        updated.content_hash.as_deref(),
        Some(fingerprint(b"version two").as_str())
    );
    Ok(())
}

#[tokio::test]
async fn matching_stored_hash_is_never_embedded() -> Result<()> {
    let harness = Harness::new(8);
    harness.index.seed_collection(COLLECTION, 8);
    let id = DocumentId::generate();
    harness.index.seed_point(
        COLLECTION,
        id,
        "/kb/stable.md",
        Some(fingerprint(b"stable text").as_str()),
    );
    harness.files.write("stable.md", "stable text");
    harness.files.write("fresh.md", "fresh text");
    let engine = harness.engine(|_| {})?;

    for _ in 0..3 {
        run(&engine).await?;
    }

    assert_eq!(harness.embedding.calls_for("stable text"), 0);
    assert_eq!(harness.embedding.calls_for("fresh text"), 1);
    Ok(())
}

#[tokio::test]
async fn legacy_record_without_hash_is_reembedded_in_place() -> Result<()> {
    let harness = Harness::new(8);
    harness.index.seed_collection(COLLECTION, 8);
    let id = DocumentId::generate();
    harness
        .index
        .seed_point(COLLECTION, id.clone(), "/kb/old.md", None);
    harness.files.write("old.md", "old text");
    let engine = harness.engine(|_| {})?;

    let summary = run(&engine).await?;

    assert_eq!(summary.updated, 1);
    assert_eq!(harness.only_point("/kb/old.md")?.id, id);
    Ok(())
}

#[tokio::test]
async fn one_failed_embedding_does_not_sink_the_batch() -> Result<()> {
    let harness = Harness::new(8);
    for (name, body) in [
        ("1.md", "one"),
        ("2.md", "two"),
        ("3.md", "three"),
        ("4.md", "four"),
        ("5.md", "five"),
    ] {
        harness.files.write(name, body);
    }
    harness.embedding.fail_always("three", permanent_error());
    let engine = harness.engine(batch_size(5))?;

    let summary = run(&engine).await?;

    assert_eq!(harness.index.upsert_sizes(), vec![4]);
    assert_eq!((summary.errored, summary.uploaded), (1, 4));
    assert!(harness.index.points_for(COLLECTION, "/kb/3.md").is_empty());
    assert_eq!(harness.logger.count("embedding.document_failed"), 1);
    Ok(())
}

#[tokio::test]
async fn failed_document_is_retried_on_the_next_pass() -> Result<()> {
    let harness = Harness::new(8);
    harness.files.write("a.md", "flaky");
    harness.embedding.fail_next(
        "flaky",
        vec![permanent_error(), permanent_error(), permanent_error()],
    );
    let engine = harness.engine(|_| {})?;

    let first = run(&engine).await?;
    let second = run(&engine).await?;

    assert_eq!((first.errored, first.uploaded), (1, 0));
    assert_eq!((second.created, second.uploaded), (1, 1));
    Ok(())
}

#[tokio::test]
async fn long_content_is_embedded_truncated_but_stored_whole() -> Result<()> {
    let harness = Harness::new(8);
    let body = "abcdefghij".repeat(5);
    harness.files.write("long.md", &body);
    let engine = harness.engine(|options| {
        options.embedding.max_input_chars = NonZeroUsize::new(12).unwrap_or(NonZeroUsize::MIN);
    })?;

    run(&engine).await?;

    assert_eq!(harness.embedding.inputs(), vec!["abcdefghijab".to_owned()]);
    assert_eq!(harness.only_point("/kb/long.md")?.content, body);
    assert_eq!(harness.logger.count("embedding.truncated"), 1);
    Ok(())
}

#[tokio::test]
async fn batches_split_at_the_configured_size() -> Result<()> {
    let harness = Harness::new(8);
    for index in 0..8 {
        harness
            .files
            .write(&format!("doc{index}.md"), &format!("body {index}"));
    }
    let engine = harness.engine(batch_size(3))?;

    let summary = run(&engine).await?;

    assert_eq!(harness.index.upsert_sizes(), vec![3, 3, 2]);
    assert_eq!((summary.batches, summary.uploaded), (3, 8));
    assert_eq!(summary.verified, 3);
    Ok(())
}

#[tokio::test]
async fn missing_root_fails_before_any_lookup() -> Result<()> {
    let harness = Harness::new(8);
    harness.files.set_root_missing(true);
    let engine = harness.engine(|_| {})?;

    let error = run(&engine).await.err();

    assert_eq!(
        error.map(|error| error.code),
        Some(ErrorCode::new("sync", "root_not_found"))
    );
    assert_eq!(harness.index.exists_checks(), 1);
    assert!(harness.index.lookups().is_empty());
    assert!(harness.index.upsert_sizes().is_empty());
    assert_eq!(harness.logger.count("sync.pass_failed"), 1);
    Ok(())
}

#[tokio::test]
async fn uncreatable_collection_aborts_the_pass() -> Result<()> {
    let harness = Harness::new(8);
    harness.files.write("a.md", "alpha");
    harness.index.fail_create(connection_error());
    let engine = harness.engine(|_| {})?;

    let error = run(&engine).await.err();

    assert_eq!(error.map(|error| error.code), Some(connection_error().code));
    assert!(harness.index.lookups().is_empty());
    assert_eq!(harness.embedding.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn upsert_failure_in_second_batch_keeps_the_first() -> Result<()> {
    let harness = Harness::new(8);
    for name in ["a.md", "b.md", "c.md", "d.md", "e.md"] {
        harness.files.write(name, name);
    }
    harness.index.fail_upsert_call(2, connection_error());
    let engine = harness.engine(batch_size(2))?;

    let error = run(&engine)
        .await
        .err()
        .ok_or_else(|| ErrorEnvelope::expected(ErrorCode::internal(), "pass should fail"))?;

    assert_eq!(error.code, connection_error().code);
    assert_eq!(error.metadata.get("batch").map(String::as_str), Some("2"));
    assert_eq!(
        error.metadata.get("uploaded_before").map(String::as_str),
        Some("2")
    );
    assert_eq!(harness.index.point_count(COLLECTION), 2);
    assert_eq!(harness.index.upsert_sizes(), vec![2, 2]);
    Ok(())
}

#[tokio::test]
async fn lookup_outage_fails_open_and_counts() -> Result<()> {
    let harness = Harness::new(8);
    harness.files.write("a.md", "alpha");
    harness.files.write("b.md", "beta");
    harness.index.seed_collection(COLLECTION, 8);
    harness
        .index
        .fail_lookup_for("/kb/a.md", connection_error());
    let engine = harness.engine(|_| {})?;

    let summary = run(&engine).await?;

    assert_eq!(
        (summary.lookup_failures, summary.created, summary.uploaded),
        (1, 2, 2)
    );
    assert_eq!(harness.logger.count("change.lookup_failed"), 1);
    Ok(())
}

#[tokio::test]
async fn lookup_failures_past_threshold_abort() -> Result<()> {
    let harness = Harness::new(8);
    for name in ["a.md", "b.md", "c.md"] {
        harness.files.write(name, name);
    }
    harness.index.fail_all_lookups(connection_error());
    let engine = harness.engine(|options| options.max_lookup_failures = Some(1))?;

    let error = run(&engine).await.err();

    assert_eq!(
        error.map(|error| error.code),
        Some(ErrorCode::new("sync", "lookup_failures_exceeded"))
    );
    assert!(harness.index.upsert_sizes().is_empty());
    Ok(())
}

#[tokio::test]
async fn blank_and_unreadable_files_are_isolated() -> Result<()> {
    let harness = Harness::new(8);
    harness.files.write("blank.md", "  \n\t ");
    harness.files.write_unreadable(
        "broken.md",
        ErrorEnvelope::expected(ErrorCode::new("sync", "invalid_utf8"), "not utf-8"),
    );
    harness.files.write("good.md", "good");
    harness.files.write("skip.png", "binary");
    let engine = harness.engine(|_| {})?;

    let summary = run(&engine).await?;

    assert_eq!(summary.discovered, 3);
    assert_eq!(summary.processed, 3);
    assert_eq!((summary.blank, summary.errored, summary.uploaded), (1, 1, 1));
    assert_eq!(harness.embedding.inputs(), vec!["good".to_owned()]);
    assert_eq!(harness.logger.count("sync.read_failed"), 1);
    Ok(())
}

#[tokio::test]
async fn wrong_width_vector_is_a_document_failure() -> Result<()> {
    let harness = Harness::new(8);
    harness.files.write("a.md", "alpha");
    harness.files.write("b.md", "beta");
    harness.embedding.return_dimension_for("beta", 4);
    let engine = harness.engine(|_| {})?;

    let summary = run(&engine).await?;

    assert_eq!((summary.errored, summary.uploaded), (1, 1));
    assert_eq!(harness.index.upsert_sizes(), vec![1]);
    Ok(())
}

#[tokio::test]
async fn verification_miss_is_reported_not_fatal() -> Result<()> {
    let harness = Harness::new(8);
    harness.files.write("a.md", "alpha");
    harness.index.lose_writes_for("/kb/a.md");
    let engine = harness.engine(|_| {})?;

    let summary = run(&engine).await?;

    assert_eq!((summary.uploaded, summary.verified, summary.verify_failed), (1, 0, 1));
    assert_eq!(harness.logger.count("sync.verify_failed"), 1);
    Ok(())
}

#[tokio::test]
async fn verification_can_be_disabled() -> Result<()> {
    let harness = Harness::new(8);
    harness.files.write("a.md", "alpha");
    let engine = harness.engine(|options| options.verify_writes = false)?;

    let summary = run(&engine).await?;

    assert_eq!((summary.verified, summary.verify_failed), (0, 0));
    assert!(harness.index.point_checks().is_empty());
    Ok(())
}

async fn verified_paths(seed: u64) -> Result<Vec<String>> {
    let harness = Harness::new(8);
    for index in 0..12 {
        harness
            .files
            .write(&format!("doc{index:02}.md"), &format!("body {index}"));
    }
    let selector = Arc::new(RandomVerifySelector::from_seed(Some(seed)));
    let engine = harness.engine_with_selector(selector, batch_size(4))?;
    run(&engine).await?;

    let points = harness.index.points(COLLECTION);
    Ok(harness
        .index
        .point_checks()
        .into_iter()
        .filter_map(|id| {
            points
                .iter()
                .find(|point| point.id.as_str() == id)
                .map(|point| point.source_path.clone())
        })
        .collect())
}

#[tokio::test]
async fn seeded_verification_is_reproducible() -> Result<()> {
    let first = verified_paths(7).await?;
    let second = verified_paths(7).await?;

    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn shutdown_flushes_pending_batch_and_stops() -> Result<()> {
    let harness = Harness::new(8);
    for name in ["a.md", "b.md", "c.md", "d.md", "e.md"] {
        harness.files.write(name, name);
    }
    let ctx = RequestContext::new_request();
    harness.files.cancel_on_read("c.md", ctx.clone());
    let engine = harness.engine(batch_size(10))?;

    let summary = engine.run_sync_pass(&ctx).await?;

    assert!(summary.cancelled);
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.uploaded, 3);
    assert_eq!(harness.index.upsert_sizes(), vec![3]);
    assert_eq!(harness.logger.count("sync.pass_cancelled"), 1);
    Ok(())
}

#[tokio::test]
async fn pass_logs_discovery_progress_and_completion() -> Result<()> {
    let harness = Harness::new(8);
    for index in 0..12 {
        harness
            .files
            .write(&format!("doc{index:02}.md"), &format!("body {index}"));
    }
    let engine = harness.engine(|_| {})?;

    let summary = run(&engine).await?;

    let discovered = harness
        .logger
        .find("sync.files_discovered")
        .and_then(|event| event.fields)
        .ok_or_else(|| ErrorEnvelope::expected(ErrorCode::not_found(), "missing event"))?;
    assert_eq!(discovered.get("count"), Some(&serde_json::json!(12)));
    assert_eq!(
        discovered
            .get("examples")
            .and_then(serde_json::Value::as_array)
            .map(Vec::len),
        Some(5)
    );
    assert_eq!(
        discovered.get("passId"),
        Some(&serde_json::json!(summary.pass_id))
    );
    assert_eq!(harness.logger.count("sync.progress"), 1);
    assert_eq!(harness.logger.count("sync.pass_completed"), 1);
    Ok(())
}
