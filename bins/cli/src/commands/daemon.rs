//! `daemon` handler: scheduled passes until Ctrl-C.

use super::cancel_on_ctrl_c;
use crate::error::CliError;
use crate::{CliOutput, Invocation, format_error_output, format_summary_output, log_info};
use kb_sync_infra::{SyncScheduler, build_sync_engine, load_effective_config};
use kb_sync_ports::{LoggerPort, log_fields};
use kb_sync_shared::RequestContext;
use std::sync::Arc;
use std::time::Duration;

/// Run the scheduler until interrupted, then drain the in-flight pass.
pub async fn run_daemon(
    invocation: &Invocation<'_>,
    logger: Arc<dyn LoggerPort>,
) -> Result<CliOutput, CliError> {
    let mode = invocation.mode;
    let config = match load_effective_config(
        invocation.env,
        invocation.config_path,
        invocation.overrides_json,
    ) {
        Ok(config) => config,
        Err(error) => return Ok(format_error_output(mode, &error)),
    };
    let engine = match build_sync_engine(&config, Some(Arc::clone(&logger))) {
        Ok(engine) => Arc::new(engine),
        Err(error) => return Ok(format_error_output(mode, &error)),
    };

    let scheduler = SyncScheduler::new(engine).with_logger(Some(Arc::clone(&logger)));
    let ctx = RequestContext::new_request();
    let watcher = cancel_on_ctrl_c(&ctx);
    let report = scheduler
        .run(
            &ctx,
            Duration::from_secs(config.schedule.interval_secs),
            config.schedule.run_on_start,
        )
        .await;
    watcher.abort();

    logger.info(
        "daemon.stopped",
        "Daemon stopped",
        Some(log_fields([
            ("passes", report.passes),
            ("failed", report.failed),
            ("skipped", report.skipped),
        ])),
    );
    let payload = serde_json::json!({
        "passes": report.passes,
        "failed": report.failed,
        "skipped": report.skipped,
    });
    let mut output = format_summary_output(mode, "ok", "daemon", payload)?;
    log_info(&mut output.stderr, "daemon stopped", mode.no_progress);
    Ok(output)
}
