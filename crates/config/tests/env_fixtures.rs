//! Integration tests for env parsing and env-to-config merging.

use kb_sync_config::{EnvParseError, SyncConfig, SyncEnv, apply_env_overrides};
use kb_sync_shared::{ErrorCode, ErrorEnvelope, SecretString};
use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

fn read_env_map(relative: &str) -> Result<BTreeMap<String, String>, Box<dyn Error>> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(relative);
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[test]
fn env_fixtures_merge_into_effective_config() -> Result<(), Box<dyn Error>> {
    let env_map = read_env_map("sync-env.valid.json")?;
    let env = SyncEnv::from_map(&env_map)?;

    let config = apply_env_overrides(SyncConfig::default(), &env)?;

    assert_eq!(
        config.remote_index.url.as_ref(),
        "https://qdrant.example.com:6333"
    );
    assert_eq!(
        config.remote_index.api_key.as_ref().map(SecretString::expose),
        Some("qdrant-secret")
    );
    assert_eq!(config.collection_name().as_str(), "handbook");
    assert_eq!(
        config.embedding.api_key.as_ref().map(SecretString::expose),
        Some("sk-test")
    );
    assert_eq!(config.embedding.base_url.as_ref(), "https://example.com/v1");
    assert_eq!(config.knowledge_base.directory, PathBuf::from("/srv/handbook"));
    assert_eq!(config.sync.batch_size, 25);
    assert!(!config.sync.verify_writes);
    assert_eq!(config.schedule.interval_secs, 900);

    let extensions: Vec<&str> = config
        .knowledge_base
        .extensions
        .iter()
        .map(AsRef::as_ref)
        .collect();
    assert_eq!(extensions, vec!["md", "txt"]);

    Ok(())
}

#[test]
fn invalid_env_fixture_is_rejected() -> Result<(), Box<dyn Error>> {
    let env_map = read_env_map("sync-env.invalid.json")?;
    let error = SyncEnv::from_map(&env_map).err();
    assert!(matches!(error, Some(EnvParseError::InvalidUrl { .. })));

    let envelope: ErrorEnvelope = error
        .ok_or_else(|| std::io::Error::other("expected invalid env error"))?
        .into();
    assert_eq!(envelope.code, ErrorCode::new("config", "invalid_env_url"));
    assert_eq!(
        envelope.metadata.get("env_var").map(String::as_str),
        Some("KB_SYNC_QDRANT_URL")
    );

    Ok(())
}
