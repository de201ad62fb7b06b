//! End-to-end sync runs of the `kb-sync` binary against mock Qdrant and
//! OpenAI servers.

use kb_sync_domain::fingerprint;
use serde_json::{Value, json};
use std::io;
use std::path::Path;
use std::process::Output;
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const COLLECTION: &str = "handbook";
const DIMENSION: usize = 4;

struct Servers {
    qdrant: MockServer,
    openai: MockServer,
}

impl Servers {
    async fn start() -> Self {
        Self {
            qdrant: MockServer::start().await,
            openai: MockServer::start().await,
        }
    }
}

fn knowledge_base(files: &[(&str, &str)]) -> io::Result<TempDir> {
    let dir = tempfile::tempdir()?;
    for (relative, content) in files {
        let file = dir.path().join(relative);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(file, content)?;
    }
    Ok(dir)
}

async fn run_cli(servers: &Servers, root: &Path, args: &[&str]) -> io::Result<Output> {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_kb-sync"))
        .args(args)
        .env_clear()
        .env("KB_SYNC_QDRANT_URL", servers.qdrant.uri())
        .env("KB_SYNC_COLLECTION", COLLECTION)
        .env("KB_SYNC_VECTOR_SIZE", DIMENSION.to_string())
        .env("OPENAI_API_KEY", "sk-e2e") // pragma: allowlist secret
        .env(
            "KB_SYNC_EMBEDDING_BASE_URL",
            format!("{}/v1", servers.openai.uri()),
        )
        .env("KB_SYNC_EMBEDDING_RETRY_BASE_DELAY_MS", "1")
        .env("KB_SYNC_DIRECTORY", root)
        .env("KB_SYNC_EXTENSIONS", "md")
        .env("KB_SYNC_VERIFY_SEED", "7")
        .output()
        .await
}

fn stdout_json(output: &Output) -> io::Result<Value> {
    serde_json::from_slice(&output.stdout).map_err(|error| {
        io::Error::other(format!(
            "stdout is not JSON ({error}): {}",
            String::from_utf8_lossy(&output.stdout)
        ))
    })
}

async fn mount_collection(qdrant: &MockServer, exists: bool) {
    let status = if exists { 200 } else { 404 };
    Mock::given(method("GET"))
        .and(path(format!("/collections/{COLLECTION}")))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({
            "result": { "status": "green" }, "status": "ok"
        })))
        .mount(qdrant)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/collections/{COLLECTION}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "result": true, "status": "ok" })),
        )
        .mount(qdrant)
        .await;
}

async fn mount_scroll(qdrant: &MockServer, points: Value) {
    Mock::given(method("POST"))
        .and(path(format!("/collections/{COLLECTION}/points/scroll")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": { "points": points, "next_page_offset": null },
            "status": "ok"
        })))
        .mount(qdrant)
        .await;
}

async fn mount_upsert(qdrant: &MockServer, expected_calls: u64) {
    Mock::given(method("PUT"))
        .and(path(format!("/collections/{COLLECTION}/points")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": { "operation_id": 1, "status": "completed" },
            "status": "ok"
        })))
        .expect(expected_calls)
        .mount(qdrant)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(format!("^/collections/{COLLECTION}/points/[0-9a-f-]+$")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": { "id": 1, "payload": {} }, "status": "ok"
        })))
        .mount(qdrant)
        .await;
}

async fn mount_embeddings(openai: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [ { "object": "embedding", "index": 0, "embedding": [0.1, 0.2, 0.3, 0.4] } ],
            "model": "text-embedding-3-small"
        })))
        .expect(expected_calls)
        .mount(openai)
        .await;
}

#[tokio::test]
async fn first_sync_creates_collection_and_uploads_every_file() -> io::Result<()> {
    let servers = Servers::start().await;
    mount_collection(&servers.qdrant, false).await;
    mount_scroll(&servers.qdrant, json!([])).await;
    mount_upsert(&servers.qdrant, 1).await;
    mount_embeddings(&servers.openai, 3).await;
    let kb = knowledge_base(&[
        ("welcome.md", "# Welcome"),
        ("guides/setup.md", "Install the tools."),
        ("guides/faq.md", "Questions and answers."),
        ("notes.txt", "not synced"),
    ])?;

    let output = run_cli(
        &servers,
        kb.path(),
        &["sync", "--output", "json", "--log-format", "json"],
    )
    .await?;

    assert_eq!(output.status.code(), Some(0), "{output:?}");
    let summary = stdout_json(&output)?;
    assert_eq!(summary["status"], "ok");
    assert_eq!(summary["kind"], "sync");
    assert_eq!(summary["discovered"], 3);
    assert_eq!(summary["created"], 3);
    assert_eq!(summary["uploaded"], 3);
    assert_eq!(summary["errored"], 0);
    assert_eq!(summary["verified"], 1);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("\"event\":\"sync.collection_created\""));
    assert!(stderr.contains("\"event\":\"sync.pass_completed\""));
    assert!(!stderr.contains("sk-e2e"));

    let created = servers
        .qdrant
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| {
            request.method.as_str() == "PUT"
                && request.url.path() == format!("/collections/{COLLECTION}")
        })
        .count();
    assert_eq!(created, 1);
    Ok(())
}

#[tokio::test]
async fn unchanged_files_are_skipped_without_embedding() -> io::Result<()> {
    let servers = Servers::start().await;
    mount_collection(&servers.qdrant, true).await;
    let body = "Same body everywhere.";
    mount_scroll(
        &servers.qdrant,
        json!([{
            "id": "0b6f3c3e-4a52-4c1e-9c43-0d3b6f1d2a10",
            "payload": { "contentHash": fingerprint(body.as_bytes()).as_str() }
        }]),
    )
    .await;
    mount_upsert(&servers.qdrant, 0).await;
    mount_embeddings(&servers.openai, 0).await;
    let kb = knowledge_base(&[("a.md", body), ("b.md", body)])?;

    let output = run_cli(&servers, kb.path(), &["sync", "--output", "json"]).await?;

    assert_eq!(output.status.code(), Some(0), "{output:?}");
    let summary = stdout_json(&output)?;
    assert_eq!(summary["skipped"], 2);
    assert_eq!(summary["uploaded"], 0);
    assert_eq!(summary["batches"], 0);
    Ok(())
}

#[tokio::test]
async fn unreachable_store_exits_with_remote_failure() -> io::Result<()> {
    let servers = Servers::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/collections/{COLLECTION}")))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&servers.qdrant)
        .await;
    mount_embeddings(&servers.openai, 0).await;
    let kb = knowledge_base(&[("a.md", "alpha")])?;

    let output = run_cli(&servers, kb.path(), &["sync", "--output", "json"]).await?;

    assert_eq!(output.status.code(), Some(4), "{output:?}");
    let body = stdout_json(&output)?;
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"]["code"], "vector:vdb_connection");
    assert_eq!(body["error"]["meta"]["collection"], COLLECTION);
    Ok(())
}

#[tokio::test]
async fn missing_directory_exits_with_io_failure() -> io::Result<()> {
    let servers = Servers::start().await;
    mount_collection(&servers.qdrant, true).await;
    let kb = knowledge_base(&[])?;
    let missing = kb.path().join("nope");

    let output = run_cli(&servers, &missing, &["sync", "--output", "ndjson"]).await?;

    assert_eq!(output.status.code(), Some(3), "{output:?}");
    let line: Value = serde_json::from_slice(&output.stdout).map_err(io::Error::other)?;
    assert_eq!(line["type"], "error");
    assert_eq!(line["error"]["code"], "sync:root_not_found");
    Ok(())
}

#[tokio::test]
async fn ensure_collection_reports_existing_collection() -> io::Result<()> {
    let servers = Servers::start().await;
    mount_collection(&servers.qdrant, true).await;
    let kb = knowledge_base(&[])?;

    let output = run_cli(&servers, kb.path(), &["ensure-collection"]).await?;

    assert_eq!(output.status.code(), Some(0), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("status: ok\nkind: ensureCollection\n"));
    assert!(stdout.contains("created: false\n"));
    assert!(stdout.contains("collection: handbook\n"));
    Ok(())
}
