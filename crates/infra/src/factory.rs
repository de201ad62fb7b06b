//! Build the sync engine and its adapters from validated config.

use crate::InfraResult;
use kb_sync_adapters::LocalFileSource;
use kb_sync_adapters::embedding::openai::{OpenAiEmbedding, OpenAiEmbeddingConfig};
use kb_sync_adapters::remote_index::qdrant::{QdrantRestConfig, QdrantRestIndex};
use kb_sync_app::{
    EmbeddingClientOptions, RandomVerifySelector, SyncEngine, SyncEngineDeps, SyncEngineOptions,
};
use kb_sync_config::{EmbeddingConfig, ValidatedSyncConfig};
use kb_sync_ports::{EmbeddingPort, FileSourcePort, LoggerPort, RemoteIndexPort};
use kb_sync_shared::{ErrorCode, ErrorEnvelope, RetryPolicy};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Ports an engine is assembled from. Tests swap in doubles here.
#[derive(Clone)]
pub struct SyncPorts {
    /// Embedding provider.
    pub embedding: Arc<dyn EmbeddingPort>,
    /// Vector store.
    pub remote_index: Arc<dyn RemoteIndexPort>,
    /// Knowledge-base files.
    pub file_source: Arc<dyn FileSourcePort>,
}

/// Build the OpenAI embedding port.
pub fn build_embedding_port(config: &ValidatedSyncConfig) -> InfraResult<Arc<dyn EmbeddingPort>> {
    let adapter_config = OpenAiEmbeddingConfig::from_embedding_config(&config.embedding)?;
    let adapter = OpenAiEmbedding::new(&adapter_config)?;
    Ok(Arc::new(adapter))
}

/// Build the Qdrant REST index port.
pub fn build_remote_index_port(
    config: &ValidatedSyncConfig,
) -> InfraResult<Arc<dyn RemoteIndexPort>> {
    let adapter_config = QdrantRestConfig::from_remote_index_config(&config.remote_index);
    adapter_config.validate()?;
    let adapter = QdrantRestIndex::new(adapter_config)?;
    Ok(Arc::new(adapter))
}

/// Build the production ports: OpenAI, Qdrant REST, and the local filesystem.
pub fn build_ports(config: &ValidatedSyncConfig) -> InfraResult<SyncPorts> {
    Ok(SyncPorts {
        embedding: build_embedding_port(config)?,
        remote_index: build_remote_index_port(config)?,
        file_source: Arc::new(LocalFileSource::new()),
    })
}

/// Translate validated config into engine options.
pub fn engine_options(config: &ValidatedSyncConfig) -> InfraResult<SyncEngineOptions> {
    let sync = &config.sync;
    let max_lookup_failures = sync
        .max_lookup_failures
        .map(|limit| to_usize(u64::from(limit), "sync.maxLookupFailures"))
        .transpose()?;

    Ok(SyncEngineOptions {
        root: config.knowledge_base.directory.clone(),
        extensions: config.knowledge_base.extensions.clone(),
        collection: config.collection_name().clone(),
        vector_size: config.remote_index.vector_size,
        batch_size: to_non_zero(u64::from(sync.batch_size), "sync.batchSize")?,
        verify_writes: sync.verify_writes,
        max_lookup_failures,
        embedding: embedding_client_options(&config.embedding)?,
    })
}

/// Translate the embedding section into client options.
///
/// With `failFastOnPermanent` set, permanent provider errors end the retry
/// loop after the first attempt.
pub fn embedding_client_options(config: &EmbeddingConfig) -> InfraResult<EmbeddingClientOptions> {
    let mut retry = RetryPolicy::linear(config.max_attempts, config.retry_base_delay_ms);
    retry.retry_non_retriable = !config.fail_fast_on_permanent;
    Ok(EmbeddingClientOptions {
        max_input_chars: to_non_zero(
            u64::from(config.max_input_chars),
            "embedding.maxInputChars",
        )?,
        retry,
        expected_dimension: None,
        concurrency: to_non_zero(u64::from(config.concurrency), "embedding.concurrency")?,
    })
}

/// Assemble an engine over `ports`.
#[tracing::instrument(
    name = "infra.build_sync_engine",
    skip_all,
    fields(collection = %config.collection_name().as_str())
)]
pub fn build_sync_engine_with_ports(
    config: &ValidatedSyncConfig,
    ports: SyncPorts,
    logger: Option<Arc<dyn LoggerPort>>,
) -> InfraResult<SyncEngine> {
    let options = engine_options(config)?;
    let deps = SyncEngineDeps {
        embedding: ports.embedding,
        remote_index: ports.remote_index,
        file_source: ports.file_source,
        logger,
        verify_selector: Arc::new(RandomVerifySelector::from_seed(config.sync.verify_seed)),
    };
    tracing::debug!(
        root = %options.root.display(),
        batch_size = options.batch_size.get(),
        verify_writes = options.verify_writes,
        "sync engine assembled"
    );
    Ok(SyncEngine::new(deps, options))
}

/// Assemble an engine over the production adapters.
pub fn build_sync_engine(
    config: &ValidatedSyncConfig,
    logger: Option<Arc<dyn LoggerPort>>,
) -> InfraResult<SyncEngine> {
    let ports = build_ports(config)?;
    build_sync_engine_with_ports(config, ports, logger)
}

fn to_usize(value: u64, field: &'static str) -> InfraResult<usize> {
    usize::try_from(value).map_err(|_| {
        ErrorEnvelope::expected(
            ErrorCode::invalid_input(),
            format!("{field} does not fit this platform"),
        )
        .with_metadata("field", field)
    })
}

fn to_non_zero(value: u64, field: &'static str) -> InfraResult<NonZeroUsize> {
    NonZeroUsize::new(to_usize(value, field)?).ok_or_else(|| {
        ErrorEnvelope::expected(ErrorCode::invalid_input(), format!("{field} must be > 0"))
            .with_metadata("field", field)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kb_sync_adapters::remote_index::qdrant::QDRANT_PROVIDER_ID;
    use kb_sync_config::{SyncEnv, load_config_from_sources};
    use kb_sync_shared::{RequestContext, Result};
    use kb_sync_testkit::in_memory::{InMemoryEmbedding, InMemoryFileSource, InMemoryRemoteIndex};

    fn config(json: &str) -> Result<ValidatedSyncConfig> {
        load_config_from_sources(Some(json), None, &SyncEnv::default())
    }

    const BASE: &str = r#"{
        "version": 1,
        "remoteIndex": { "collectionName": "handbook", "vectorSize": 8 },
        "embedding": { "apiKey": "sk-test", "maxAttempts": 4, "retryBaseDelayMs": 250 },
        "knowledgeBase": { "directory": "/kb", "extensions": ["md"] },
        "sync": { "batchSize": 2, "maxLookupFailures": 3 }
    }"#;

    #[test]
    fn options_follow_config() -> Result<()> {
        let options = engine_options(&config(BASE)?)?;

        assert_eq!(options.collection.as_str(), "handbook");
        assert_eq!(options.vector_size, 8);
        assert_eq!(options.batch_size.get(), 2);
        assert_eq!(options.max_lookup_failures, Some(3));
        assert_eq!(options.embedding.retry.max_attempts, 4);
        assert_eq!(options.embedding.retry.base_delay_ms, 250);
        assert!(options.embedding.retry.retry_non_retriable);
        assert_eq!(options.embedding.expected_dimension, None);
        Ok(())
    }

    #[test]
    fn fail_fast_stops_retrying_permanent_errors() -> Result<()> {
        let mut embedding = config(BASE)?.into_inner().embedding;
        embedding.fail_fast_on_permanent = true;

        let options = embedding_client_options(&embedding)?;

        assert!(!options.retry.retry_non_retriable);
        Ok(())
    }

    #[test]
    fn production_ports_build_without_network() -> Result<()> {
        let ports = build_ports(&config(BASE)?)?;

        assert_eq!(ports.embedding.provider().id.as_ref(), "openai");
        assert_eq!(ports.remote_index.provider().id.as_ref(), QDRANT_PROVIDER_ID);
        Ok(())
    }

    #[tokio::test]
    async fn engine_over_doubles_runs_a_pass() -> Result<()> {
        let files = InMemoryFileSource::new("/kb");
        files.write("a.md", "alpha");
        files.write("b.md", "beta");
        files.write("c.txt", "ignored");
        let index = InMemoryRemoteIndex::new();
        let ports = SyncPorts {
            embedding: Arc::new(InMemoryEmbedding::new(8)),
            remote_index: Arc::new(index.clone()),
            file_source: Arc::new(files),
        };
        let engine = build_sync_engine_with_ports(&config(BASE)?, ports, None)?;

        let summary = engine.run_sync_pass(&RequestContext::new_request()).await?;

        assert_eq!(summary.discovered, 2);
        assert_eq!(summary.uploaded, 2);
        assert_eq!(index.vector_size("handbook"), Some(8));
        Ok(())
    }
}
