//! `config show` and `config check` handlers.

use crate::error::CliError;
use crate::{CliOutput, Invocation, format_error_output, format_summary_output, log_info};
use kb_sync_infra::{ConfigFormat, load_effective_config, render_effective_config};

/// Print the effective config with secrets redacted.
pub fn run_config_show(
    invocation: &Invocation<'_>,
    format: ConfigFormat,
) -> Result<CliOutput, CliError> {
    let mode = invocation.mode;
    let rendered = match load_effective_config(
        invocation.env,
        invocation.config_path,
        invocation.overrides_json,
    )
    .and_then(|config| render_effective_config(&config, format))
    {
        Ok(rendered) => rendered,
        Err(error) => return Ok(format_error_output(mode, &error)),
    };

    let mut output = if mode.is_json() || mode.is_ndjson() {
        let config = match format {
            ConfigFormat::Json => serde_json::from_str(rendered.trim())?,
            ConfigFormat::Toml => serde_json::Value::String(rendered),
        };
        let payload = serde_json::json!({
            "configPath": config_path_label(invocation),
            "effectiveConfig": config,
        });
        format_summary_output(mode, "ok", "config", payload)?
    } else {
        let mut stdout = String::from("status: ok\nconfig:\n");
        stdout.push_str(&rendered);
        CliOutput::ok(stdout)
    };
    log_info(&mut output.stderr, "config show completed", mode.no_progress);
    Ok(output)
}

/// Validate the effective config without printing it.
pub fn run_config_check(invocation: &Invocation<'_>) -> Result<CliOutput, CliError> {
    let mode = invocation.mode;
    let config = match load_effective_config(
        invocation.env,
        invocation.config_path,
        invocation.overrides_json,
    ) {
        Ok(config) => config,
        Err(error) => return Ok(format_error_output(mode, &error)),
    };

    let payload = serde_json::json!({
        "configPath": config_path_label(invocation),
        "collection": config.collection_name().as_str(),
        "directory": config.knowledge_base.directory.to_string_lossy(),
    });
    let mut output = format_summary_output(mode, "ok", "config", payload)?;
    log_info(&mut output.stderr, "config check completed", mode.no_progress);
    Ok(output)
}

fn config_path_label(invocation: &Invocation<'_>) -> Option<String> {
    invocation
        .config_path
        .map(|path| path.to_string_lossy().into_owned())
}
