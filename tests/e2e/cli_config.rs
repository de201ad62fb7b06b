//! End-to-end `kb-sync config` runs.

use serde_json::Value;
use std::io;
use std::process::{Command, Output};

fn run_cli(args: &[&str], env: &[(&str, &str)]) -> io::Result<Output> {
    let mut command = Command::new(env!("CARGO_BIN_EXE_kb-sync"));
    command.args(args).env_clear();
    for (key, value) in env {
        command.env(key, value);
    }
    command.output()
}

fn stdout_json(output: &Output) -> io::Result<Value> {
    serde_json::from_slice(&output.stdout).map_err(io::Error::other)
}

#[test]
fn show_redacts_api_keys() -> io::Result<()> {
    let output = run_cli(
        &["config", "show", "--output", "json"],
        &[
            ("OPENAI_API_KEY", "sk-live-secret"), // pragma: allowlist secret
            ("QDRANT_API_KEY", "qdrant-live-secret"), // pragma: allowlist secret
            ("KB_SYNC_COLLECTION", "handbook"),
        ],
    )?;

    assert_eq!(output.status.code(), Some(0), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("sk-live-secret"));
    assert!(!stdout.contains("qdrant-live-secret"));

    let body = stdout_json(&output)?;
    assert_eq!(
        body["effectiveConfig"]["remoteIndex"]["collectionName"],
        "handbook"
    );
    assert_eq!(body["configPath"], Value::Null);
    Ok(())
}

#[test]
fn show_renders_toml_in_text_mode() -> io::Result<()> {
    let output = run_cli(&["config", "show", "--format", "toml"], &[])?;

    assert_eq!(output.status.code(), Some(0), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("status: ok\nconfig:\n"));
    assert!(stdout.contains("[remoteIndex]"));
    assert!(stdout.contains("[knowledgeBase]"));
    Ok(())
}

#[test]
fn check_reads_a_toml_file_and_overrides() -> io::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = dir.path().join("kb-sync.toml");
    std::fs::write(
        &config,
        "version = 1\n\n[remoteIndex]\ncollectionName = \"from_file\"\n\n[sync]\nbatchSize = 25\n",
    )?;
    let config_arg = config.to_string_lossy().into_owned();

    let output = run_cli(
        &[
            "config",
            "check",
            "--config",
            &config_arg,
            "--overrides-json",
            r#"{ "remoteIndex": { "collectionName": "from_overrides" } }"#,
            "--output",
            "ndjson",
        ],
        &[],
    )?;

    assert_eq!(output.status.code(), Some(0), "{output:?}");
    let line = stdout_json(&output)?;
    assert_eq!(line["type"], "summary");
    assert_eq!(line["collection"], "from_overrides");
    assert_eq!(line["configPath"], config_arg.as_str());
    Ok(())
}

#[test]
fn invalid_overrides_exit_with_invalid_input() -> io::Result<()> {
    let output = run_cli(
        &[
            "config",
            "check",
            "--overrides-json",
            "{ not json",
            "--output",
            "json",
        ],
        &[],
    )?;

    assert_eq!(output.status.code(), Some(2), "{output:?}");
    let body = stdout_json(&output)?;
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"]["code"], "config:invalid_json");
    Ok(())
}

#[test]
fn bad_env_value_exits_with_invalid_input() -> io::Result<()> {
    let output = run_cli(&["config", "check"], &[("KB_SYNC_BATCH_SIZE", "lots")])?;

    assert_eq!(output.status.code(), Some(2), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("code: config:invalid_env_int"));
    assert!(stdout.contains("env_var: KB_SYNC_BATCH_SIZE"));
    Ok(())
}

#[test]
fn missing_config_file_exits_with_io_failure() -> io::Result<()> {
    let output = run_cli(
        &["config", "check", "--config", "/definitely/not/here.toml"],
        &[],
    )?;

    assert_eq!(output.status.code(), Some(3), "{output:?}");
    Ok(())
}
