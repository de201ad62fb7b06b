//! `sync` and `ensure-collection` handlers.

use super::cancel_on_ctrl_c;
use crate::error::CliError;
use crate::{CliOutput, Invocation, format_error_output, format_summary_output, log_info};
use kb_sync_app::{EnsureCollectionOutcome, SyncEngine};
use kb_sync_infra::{build_sync_engine, load_effective_config};
use kb_sync_ports::LoggerPort;
use kb_sync_shared::{ErrorEnvelope, RequestContext};
use std::sync::Arc;

fn load_engine(
    invocation: &Invocation<'_>,
    logger: Arc<dyn LoggerPort>,
) -> Result<SyncEngine, ErrorEnvelope> {
    let config = load_effective_config(
        invocation.env,
        invocation.config_path,
        invocation.overrides_json,
    )?;
    build_sync_engine(&config, Some(logger))
}

/// Run one pass. Per-file failures still exit 0; only a pass-fatal error
/// produces a non-zero exit.
pub async fn run_sync(
    invocation: &Invocation<'_>,
    logger: Arc<dyn LoggerPort>,
) -> Result<CliOutput, CliError> {
    let mode = invocation.mode;
    let engine = match load_engine(invocation, logger) {
        Ok(engine) => engine,
        Err(error) => return Ok(format_error_output(mode, &error)),
    };

    let ctx = RequestContext::new_request();
    let watcher = cancel_on_ctrl_c(&ctx);
    let result = engine.run_sync_pass(&ctx).await;
    watcher.abort();

    let summary = match result {
        Ok(summary) => summary,
        Err(error) => return Ok(format_error_output(mode, &error)),
    };
    let payload = serde_json::to_value(&summary)?;
    let status = if summary.cancelled { "cancelled" } else { "ok" };

    let mut output = format_summary_output(mode, status, "sync", payload)?;
    log_info(&mut output.stderr, "sync pass finished", mode.no_progress);
    Ok(output)
}

/// Create the collection if missing.
pub async fn run_ensure_collection(
    invocation: &Invocation<'_>,
    logger: Arc<dyn LoggerPort>,
) -> Result<CliOutput, CliError> {
    let mode = invocation.mode;
    let engine = match load_engine(invocation, logger) {
        Ok(engine) => engine,
        Err(error) => return Ok(format_error_output(mode, &error)),
    };

    let outcome = match engine.ensure_collection(&RequestContext::new_request()).await {
        Ok(outcome) => outcome,
        Err(error) => return Ok(format_error_output(mode, &error)),
    };
    let payload = serde_json::json!({
        "collection": engine.options().collection.as_str(),
        "vectorSize": engine.options().vector_size,
        "created": outcome == EnsureCollectionOutcome::Created,
    });
    format_summary_output(mode, "ok", "ensureCollection", payload)
}
