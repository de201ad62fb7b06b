//! In-memory adapter implementations for port contracts.
//!
//! These implementations are intended for:
//! - Unit/integration tests of the sync engine
//! - Deterministic contract tests for the ports layer
//! - Failure injection (scripted provider errors, lookup and upsert outages)
//!
//! State lives behind `Arc<Mutex<..>>` so tests can inspect call logs while
//! the engine holds its own handle.

use kb_sync_domain::{CollectionName, Document, DocumentId, Embedding, SourcePath};
use kb_sync_ports::{
    BoxFuture, EmbedRequest, EmbeddingPort, EmbeddingProviderInfo, FileSourcePort, ListFilesRequest,
    ListedFiles, LogEvent, LogFields, LogLevel, LoggerPort, RemoteIndexPort,
    RemoteIndexProviderInfo, RemoteRecord,
};
use kb_sync_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Loggers
// ─────────────────────────────────────────────────────────────────────────────

/// A no-op logger implementation.
#[derive(Debug, Default)]
pub struct NoopLogger;

impl LoggerPort for NoopLogger {
    fn log(&self, _event: LogEvent) {}

    fn child(&self, _fields: LogFields) -> Box<dyn LoggerPort> {
        Box::new(Self)
    }
}

/// Logger that keeps every event for later assertions.
///
/// Children share the same event store and merge their base fields into each
/// recorded event.
#[derive(Debug, Clone, Default)]
pub struct RecordingLogger {
    events: Arc<Mutex<Vec<LogEvent>>>,
    base_fields: LogFields,
}

impl RecordingLogger {
    /// Snapshot of all recorded events.
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().expect("logger lock").clone()
    }

    /// Number of events with the given name.
    pub fn count(&self, event: &str) -> usize {
        self.events
            .lock()
            .expect("logger lock")
            .iter()
            .filter(|entry| entry.event.as_ref() == event)
            .count()
    }

    /// First event with the given name.
    pub fn find(&self, event: &str) -> Option<LogEvent> {
        self.events
            .lock()
            .expect("logger lock")
            .iter()
            .find(|entry| entry.event.as_ref() == event)
            .cloned()
    }

    /// Number of events at `level`.
    pub fn count_level(&self, level: LogLevel) -> usize {
        self.events
            .lock()
            .expect("logger lock")
            .iter()
            .filter(|entry| entry.level == level)
            .count()
    }
}

impl LoggerPort for RecordingLogger {
    fn log(&self, mut event: LogEvent) {
        if !self.base_fields.is_empty() {
            let mut fields = self.base_fields.clone();
            fields.extend(event.fields.take().unwrap_or_default());
            event.fields = Some(fields);
        }
        self.events.lock().expect("logger lock").push(event);
    }

    fn child(&self, fields: LogFields) -> Box<dyn LoggerPort> {
        let mut base_fields = self.base_fields.clone();
        base_fields.extend(fields);
        Box::new(Self {
            events: Arc::clone(&self.events),
            base_fields,
        })
    }
}

/// Helper to build a log event.
pub fn log_event(level: LogLevel, event: &str, message: &str) -> LogEvent {
    LogEvent {
        event: event.into(),
        level,
        message: message.into(),
        fields: None,
        error: None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding
// ─────────────────────────────────────────────────────────────────────────────

fn embed_text_with_dimension(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut buckets = vec![0u32; dim];
    for (idx, byte) in text.as_bytes().iter().enumerate() {
        let slot = idx % dim;
        buckets[slot] = buckets[slot].wrapping_add(u32::from(*byte));
    }

    buckets
        .into_iter()
        .map(|value| (value as f32) / 255.0)
        .collect()
}

#[derive(Debug, Default)]
struct EmbeddingScript {
    inputs: Vec<String>,
    next_failures: HashMap<String, VecDeque<ErrorEnvelope>>,
    always_fail: HashMap<String, ErrorEnvelope>,
    empty_for: HashSet<String>,
    dimension_for: HashMap<String, usize>,
}

/// Deterministic in-memory embedding provider with scripted failures.
///
/// Failures and overrides are keyed by the exact text sent to the provider.
#[derive(Debug, Clone)]
pub struct InMemoryEmbedding {
    provider: EmbeddingProviderInfo,
    dimension: usize,
    delay: Option<Duration>,
    script: Arc<Mutex<EmbeddingScript>>,
}

impl InMemoryEmbedding {
    /// Create a deterministic embedder producing `dimension`-wide vectors.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            provider: EmbeddingProviderInfo {
                id: "in_memory".into(),
                model: "deterministic".into(),
            },
            dimension,
            delay: None,
            script: Arc::new(Mutex::new(EmbeddingScript::default())),
        }
    }

    /// Sleep before answering each call.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next calls for `text` with `errors`, in order, then succeed.
    pub fn fail_next(&self, text: &str, errors: Vec<ErrorEnvelope>) {
        self.script
            .lock()
            .expect("embedding lock")
            .next_failures
            .entry(text.to_owned())
            .or_default()
            .extend(errors);
    }

    /// Fail every call for `text`.
    pub fn fail_always(&self, text: &str, error: ErrorEnvelope) {
        self.script
            .lock()
            .expect("embedding lock")
            .always_fail
            .insert(text.to_owned(), error);
    }

    /// Answer OK with no data for `text`.
    pub fn return_empty_for(&self, text: &str) {
        self.script
            .lock()
            .expect("embedding lock")
            .empty_for
            .insert(text.to_owned());
    }

    /// Answer with a vector of a different width for `text`.
    pub fn return_dimension_for(&self, text: &str, dimension: usize) {
        self.script
            .lock()
            .expect("embedding lock")
            .dimension_for
            .insert(text.to_owned(), dimension);
    }

    /// Every text the provider received, in call order.
    pub fn inputs(&self) -> Vec<String> {
        self.script.lock().expect("embedding lock").inputs.clone()
    }

    /// Total provider calls.
    pub fn call_count(&self) -> usize {
        self.script.lock().expect("embedding lock").inputs.len()
    }

    /// Provider calls whose text was exactly `text`.
    pub fn calls_for(&self, text: &str) -> usize {
        self.script
            .lock()
            .expect("embedding lock")
            .inputs
            .iter()
            .filter(|input| input.as_str() == text)
            .count()
    }

    fn answer(&self, text: &str) -> Result<Embedding> {
        let mut script = self.script.lock().expect("embedding lock");
        script.inputs.push(text.to_owned());

        if let Some(error) = script
            .next_failures
            .get_mut(text)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        if let Some(error) = script.always_fail.get(text) {
            return Err(error.clone());
        }
        if script.empty_for.contains(text) {
            return Ok(Embedding::empty());
        }
        let dimension = script
            .dimension_for
            .get(text)
            .copied()
            .unwrap_or(self.dimension);
        Ok(Embedding::from(embed_text_with_dimension(text, dimension)))
    }
}

impl EmbeddingPort for InMemoryEmbedding {
    fn provider(&self) -> &EmbeddingProviderInfo {
        &self.provider
    }

    fn embed(
        &self,
        ctx: &RequestContext,
        request: EmbedRequest,
    ) -> BoxFuture<'_, Result<Embedding>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("in_memory_embedding.embed")?;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.answer(request.text.as_ref())
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Remote index
// ─────────────────────────────────────────────────────────────────────────────

/// A point as stored by [`InMemoryRemoteIndex`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPoint {
    /// Point id.
    pub id: DocumentId,
    /// `sourcePath` payload.
    pub source_path: String,
    /// `contentHash` payload, absent for legacy points.
    pub content_hash: Option<String>,
    /// `title` payload.
    pub title: String,
    /// Content payload.
    pub content: String,
    /// Stored vector.
    pub vector: Vec<f32>,
    /// `lastModified` payload.
    pub last_modified: String,
}

#[derive(Debug, Default)]
struct CollectionState {
    vector_size: u32,
    points: BTreeMap<String, StoredPoint>,
}

#[derive(Debug, Default)]
struct IndexState {
    collections: BTreeMap<String, CollectionState>,
    upsert_batches: Vec<Vec<String>>,
    lookups: Vec<String>,
    created: Vec<(String, u32)>,
    exists_checks: usize,
    point_checks: Vec<String>,
    lookup_failures: HashMap<String, ErrorEnvelope>,
    fail_all_lookups: Option<ErrorEnvelope>,
    upsert_failures: HashMap<usize, ErrorEnvelope>,
    exists_failure: Option<ErrorEnvelope>,
    create_failure: Option<ErrorEnvelope>,
    point_exists_failure: Option<ErrorEnvelope>,
    lost_writes: HashSet<String>,
}

/// In-memory vector index keyed by point id, with failure injection.
#[derive(Debug, Clone)]
pub struct InMemoryRemoteIndex {
    provider: RemoteIndexProviderInfo,
    state: Arc<Mutex<IndexState>>,
}

impl Default for InMemoryRemoteIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemoteIndex {
    /// Create an empty index with no collections.
    #[must_use]
    pub fn new() -> Self {
        Self {
            provider: RemoteIndexProviderInfo {
                id: "in_memory".into(),
                endpoint: "memory://".into(),
            },
            state: Arc::new(Mutex::new(IndexState::default())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexState> {
        self.state.lock().expect("index lock")
    }

    /// Create a collection directly.
    pub fn seed_collection(&self, collection: &str, vector_size: u32) {
        self.lock()
            .collections
            .entry(collection.to_owned())
            .or_default()
            .vector_size = vector_size;
    }

    /// Store a point directly, as a previous run would have.
    pub fn seed_point(
        &self,
        collection: &str,
        id: DocumentId,
        source_path: &str,
        content_hash: Option<&str>,
    ) {
        let point = StoredPoint {
            id: id.clone(),
            source_path: source_path.to_owned(),
            content_hash: content_hash.map(str::to_owned),
            title: String::new(),
            content: String::new(),
            vector: vec![0.5],
            last_modified: String::new(),
        };
        self.lock()
            .collections
            .entry(collection.to_owned())
            .or_default()
            .points
            .insert(id.as_str().to_owned(), point);
    }

    /// Fail lookups for `source_path` with `error`.
    pub fn fail_lookup_for(&self, source_path: &str, error: ErrorEnvelope) {
        self.lock()
            .lookup_failures
            .insert(source_path.to_owned(), error);
    }

    /// Fail every lookup with `error`.
    pub fn fail_all_lookups(&self, error: ErrorEnvelope) {
        self.lock().fail_all_lookups = Some(error);
    }

    /// Fail the `call`-th upsert (1-based) with `error`.
    pub fn fail_upsert_call(&self, call: usize, error: ErrorEnvelope) {
        self.lock().upsert_failures.insert(call, error);
    }

    /// Fail collection existence checks with `error`.
    pub fn fail_exists(&self, error: ErrorEnvelope) {
        self.lock().exists_failure = Some(error);
    }

    /// Fail collection creation with `error`.
    pub fn fail_create(&self, error: ErrorEnvelope) {
        self.lock().create_failure = Some(error);
    }

    /// Fail point existence checks with `error`.
    pub fn fail_point_exists(&self, error: ErrorEnvelope) {
        self.lock().point_exists_failure = Some(error);
    }

    /// Acknowledge upserts for `source_path` without storing them.
    pub fn lose_writes_for(&self, source_path: &str) {
        self.lock().lost_writes.insert(source_path.to_owned());
    }

    /// Whether `collection` exists.
    pub fn has_collection(&self, collection: &str) -> bool {
        self.lock().collections.contains_key(collection)
    }

    /// Vector size of `collection`, if it exists.
    pub fn vector_size(&self, collection: &str) -> Option<u32> {
        self.lock()
            .collections
            .get(collection)
            .map(|state| state.vector_size)
    }

    /// Collections created through the port, with their sizes.
    pub fn created_collections(&self) -> Vec<(String, u32)> {
        self.lock().created.clone()
    }

    /// Number of collection existence checks.
    pub fn exists_checks(&self) -> usize {
        self.lock().exists_checks
    }

    /// Stored points in `collection`.
    pub fn points(&self, collection: &str) -> Vec<StoredPoint> {
        self.lock()
            .collections
            .get(collection)
            .map(|state| state.points.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of stored points in `collection`.
    pub fn point_count(&self, collection: &str) -> usize {
        self.lock()
            .collections
            .get(collection)
            .map_or(0, |state| state.points.len())
    }

    /// Stored points whose `sourcePath` is `source_path`.
    pub fn points_for(&self, collection: &str, source_path: &str) -> Vec<StoredPoint> {
        self.points(collection)
            .into_iter()
            .filter(|point| point.source_path == source_path)
            .collect()
    }

    /// Source paths of every upsert call, one entry per call.
    pub fn upsert_batches(&self) -> Vec<Vec<String>> {
        self.lock().upsert_batches.clone()
    }

    /// Point count of every upsert call.
    pub fn upsert_sizes(&self) -> Vec<usize> {
        self.lock().upsert_batches.iter().map(Vec::len).collect()
    }

    /// Source paths looked up, in call order.
    pub fn lookups(&self) -> Vec<String> {
        self.lock().lookups.clone()
    }

    /// Point ids checked for existence, in call order.
    pub fn point_checks(&self) -> Vec<String> {
        self.lock().point_checks.clone()
    }
}

fn missing_collection(collection: &CollectionName) -> ErrorEnvelope {
    ErrorEnvelope::expected(
        ErrorCode::new("vector", "vdb_not_found"),
        format!("collection {} does not exist", collection.as_str()),
    )
}

impl RemoteIndexPort for InMemoryRemoteIndex {
    fn provider(&self) -> &RemoteIndexProviderInfo {
        &self.provider
    }

    fn collection_exists(
        &self,
        ctx: &RequestContext,
        collection: CollectionName,
    ) -> BoxFuture<'_, Result<bool>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("in_memory_index.collection_exists")?;
            let mut state = self.lock();
            state.exists_checks += 1;
            if let Some(error) = state.exists_failure.clone() {
                return Err(error);
            }
            Ok(state.collections.contains_key(collection.as_str()))
        })
    }

    fn create_collection(
        &self,
        ctx: &RequestContext,
        collection: CollectionName,
        vector_size: u32,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("in_memory_index.create_collection")?;
            let mut state = self.lock();
            if let Some(error) = state.create_failure.clone() {
                return Err(error);
            }
            let name = collection.as_str().to_owned();
            state.created.push((name.clone(), vector_size));
            state.collections.entry(name).or_default().vector_size = vector_size;
            Ok(())
        })
    }

    fn find_by_source_path(
        &self,
        ctx: &RequestContext,
        collection: CollectionName,
        path: SourcePath,
    ) -> BoxFuture<'_, Result<Option<RemoteRecord>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("in_memory_index.find_by_source_path")?;
            let mut state = self.lock();
            state.lookups.push(path.as_str().to_owned());
            if let Some(error) = state.fail_all_lookups.clone() {
                return Err(error);
            }
            if let Some(error) = state.lookup_failures.get(path.as_str()) {
                return Err(error.clone());
            }
            let collection_state = state
                .collections
                .get(collection.as_str())
                .ok_or_else(|| missing_collection(&collection))?;
            Ok(collection_state
                .points
                .values()
                .find(|point| point.source_path == path.as_str())
                .map(|point| RemoteRecord {
                    id: point.id.clone(),
                    content_hash: point.content_hash.as_deref().map(Into::into),
                }))
        })
    }

    fn upsert(
        &self,
        ctx: &RequestContext,
        collection: CollectionName,
        documents: Vec<Document>,
    ) -> BoxFuture<'_, Result<usize>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("in_memory_index.upsert")?;
            if documents.is_empty() {
                return Err(ErrorEnvelope::invariant(
                    ErrorCode::new("vector", "empty_upsert"),
                    "upsert called with no documents",
                ));
            }
            if let Some(document) = documents.iter().find(|doc| !doc.is_embedded()) {
                return Err(ErrorEnvelope::invariant(
                    ErrorCode::new("vector", "unembedded_document"),
                    "document without embedding passed to upsert",
                )
                .with_metadata("source_path", document.source_path.as_str()));
            }

            let mut state = self.lock();
            state.upsert_batches.push(
                documents
                    .iter()
                    .map(|doc| doc.source_path.as_str().to_owned())
                    .collect(),
            );
            let call = state.upsert_batches.len();
            if let Some(error) = state.upsert_failures.get(&call) {
                return Err(error.clone());
            }

            let lost = state.lost_writes.clone();
            let collection_state = state
                .collections
                .get_mut(collection.as_str())
                .ok_or_else(|| missing_collection(&collection))?;
            let written = documents.len();
            for document in documents {
                if lost.contains(document.source_path.as_str()) {
                    continue;
                }
                let point = StoredPoint {
                    id: document.id.clone(),
                    source_path: document.source_path.as_str().to_owned(),
                    content_hash: Some(document.content_hash.as_str().to_owned()),
                    title: document.title.clone(),
                    content: document.content.as_ref().to_owned(),
                    vector: document.embedding.as_slice().to_vec(),
                    last_modified: document.last_modified.to_rfc3339(),
                };
                collection_state
                    .points
                    .insert(document.id.as_str().to_owned(), point);
            }
            Ok(written)
        })
    }

    fn point_exists(
        &self,
        ctx: &RequestContext,
        collection: CollectionName,
        id: DocumentId,
    ) -> BoxFuture<'_, Result<bool>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("in_memory_index.point_exists")?;
            let mut state = self.lock();
            state.point_checks.push(id.as_str().to_owned());
            if let Some(error) = state.point_exists_failure.clone() {
                return Err(error);
            }
            Ok(state
                .collections
                .get(collection.as_str())
                .is_some_and(|coll| coll.points.contains_key(id.as_str())))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File source
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct FileState {
    files: BTreeMap<PathBuf, Result<String>>,
    reads: Vec<PathBuf>,
    cancel_on_read: HashMap<PathBuf, RequestContext>,
    root_missing: bool,
}

/// In-memory knowledge base rooted at a virtual directory.
///
/// Listing mirrors the local source: extension filter (case-insensitive) and
/// lexicographic order.
#[derive(Debug, Clone)]
pub struct InMemoryFileSource {
    root: PathBuf,
    state: Arc<Mutex<FileState>>,
}

impl InMemoryFileSource {
    /// Create an empty source rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Arc::new(Mutex::new(FileState::default())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FileState> {
        self.state.lock().expect("file source lock")
    }

    /// Absolute path of `relative` under the root.
    pub fn path_of(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Create or replace a file.
    pub fn write(&self, relative: &str, content: &str) {
        let path = self.path_of(relative);
        self.lock().files.insert(path, Ok(content.to_owned()));
    }

    /// Register a file whose reads fail with `error`.
    pub fn write_unreadable(&self, relative: &str, error: ErrorEnvelope) {
        let path = self.path_of(relative);
        self.lock().files.insert(path, Err(error));
    }

    /// Delete a file.
    pub fn remove(&self, relative: &str) {
        let path = self.path_of(relative);
        self.lock().files.remove(&path);
    }

    /// Make the root disappear.
    pub fn set_root_missing(&self, missing: bool) {
        self.lock().root_missing = missing;
    }

    /// Cancel `ctx` when `relative` is read.
    pub fn cancel_on_read(&self, relative: &str, ctx: RequestContext) {
        let path = self.path_of(relative);
        self.lock().cancel_on_read.insert(path, ctx);
    }

    /// Paths read, in call order.
    pub fn reads(&self) -> Vec<PathBuf> {
        self.lock().reads.clone()
    }
}

fn has_extension(path: &Path, extensions: &[Box<str>]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .is_some_and(|ext| extensions.iter().any(|allowed| allowed.as_ref() == ext))
}

impl FileSourcePort for InMemoryFileSource {
    fn list_files(
        &self,
        ctx: &RequestContext,
        request: ListFilesRequest,
    ) -> BoxFuture<'_, Result<ListedFiles>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("in_memory_files.list_files")?;
            let state = self.lock();
            if state.root_missing || request.root != self.root {
                return Err(ErrorEnvelope::expected(
                    ErrorCode::new("sync", "root_not_found"),
                    "knowledge base directory does not exist",
                )
                .with_metadata("path", request.root.display().to_string()));
            }
            let files = state
                .files
                .keys()
                .filter(|path| has_extension(path, &request.extensions))
                .cloned()
                .collect();
            Ok(ListedFiles {
                root: self.root.clone(),
                files,
            })
        })
    }

    fn read_text(&self, ctx: &RequestContext, path: PathBuf) -> BoxFuture<'_, Result<Box<str>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("in_memory_files.read_text")?;
            let mut state = self.lock();
            state.reads.push(path.clone());
            if let Some(target) = state.cancel_on_read.get(&path) {
                target.cancel();
            }
            match state.files.get(&path) {
                Some(Ok(content)) => Ok(content.clone().into_boxed_str()),
                Some(Err(error)) => Err(error.clone()),
                None => Err(ErrorEnvelope::expected(
                    ErrorCode::io(),
                    "failed to read file: not found",
                )
                .with_metadata("path", path.display().to_string())),
            }
        })
    }
}
