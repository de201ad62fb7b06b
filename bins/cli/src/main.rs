//! CLI binary entrypoint.

mod commands;
mod error;
mod format;
mod logging;

use clap::{Parser, Subcommand, ValueEnum};
use commands::{run_config_check, run_config_show, run_daemon, run_ensure_collection, run_sync};
use error::{CliError, ExitCode};
use format::{OutputArgs, OutputMode};
use kb_sync_infra::{ConfigFormat, is_secret_key};
use kb_sync_shared::{ErrorEnvelope, REDACTED_VALUE};
use logging::{LogArgs, init_logging};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(
    name = "kb-sync",
    version,
    about = "Incremental sync of a local knowledge base into a vector store",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    output: OutputArgs,

    #[command(flatten)]
    log: LogArgs,

    /// Config file path (JSON/TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON overrides (partial config) applied over the config file.
    #[arg(long, global = true)]
    overrides_json: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ensure the collection and run one sync pass.
    Sync,
    /// Run sync passes on the configured interval until Ctrl-C.
    Daemon,
    /// Create the vector collection if it is missing.
    EnsureCollection,
    /// Config-related commands.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Show the effective config after env and overrides, secrets redacted.
    Show {
        /// Rendering of the config body.
        #[arg(long, value_enum, default_value_t = ShowFormat::Json)]
        format: ShowFormat,
    },
    /// Validate config loading, merging, and normalization.
    Check,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ShowFormat {
    Json,
    Toml,
}

impl From<ShowFormat> for ConfigFormat {
    fn from(value: ShowFormat) -> Self {
        match value {
            ShowFormat::Json => Self::Json,
            ShowFormat::Toml => Self::Toml,
        }
    }
}

/// Inputs shared by every command.
pub(crate) struct Invocation<'a> {
    pub(crate) mode: OutputMode,
    pub(crate) config_path: Option<&'a Path>,
    pub(crate) overrides_json: Option<&'a str>,
    pub(crate) env: &'a BTreeMap<String, String>,
}

pub(crate) struct CliOutput {
    stdout: String,
    stderr: String,
    exit_code: ExitCode,
}

impl CliOutput {
    pub(crate) const fn ok(stdout: String) -> Self {
        Self {
            stdout,
            stderr: String::new(),
            exit_code: ExitCode::Ok,
        }
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let env = collect_env();
    let invocation = Invocation {
        mode: OutputMode::from_args(&cli.output),
        config_path: cli.config.as_deref(),
        overrides_json: cli.overrides_json.as_deref(),
        env: &env,
    };

    match run(&cli, &invocation).await {
        Ok(output) => match write_output(&output) {
            Ok(()) => std::process::ExitCode::from(output.exit_code.as_u8()),
            Err(error) => exit_with_error(&error),
        },
        Err(error) => exit_with_error(&error),
    }
}

fn exit_with_error(error: &CliError) -> std::process::ExitCode {
    let _ = writeln!(io::stderr(), "error: {error}");
    std::process::ExitCode::from(error.exit_code().as_u8())
}

async fn run(cli: &Cli, invocation: &Invocation<'_>) -> Result<CliOutput, CliError> {
    match &cli.command {
        Commands::Sync => run_sync(invocation, init_logging(&cli.log)).await,
        Commands::Daemon => run_daemon(invocation, init_logging(&cli.log)).await,
        Commands::EnsureCollection => {
            run_ensure_collection(invocation, init_logging(&cli.log)).await
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show { format } => run_config_show(invocation, (*format).into()),
            ConfigCommands::Check => run_config_check(invocation),
        },
    }
}

/// Render a successful command result. `payload` object fields are merged
/// next to `status` and `kind`.
pub(crate) fn format_summary_output(
    mode: OutputMode,
    status: &str,
    kind: &str,
    payload: Value,
) -> Result<CliOutput, CliError> {
    let mut fields = Map::new();
    if let Value::Object(map) = payload {
        fields = map;
    }

    let stdout = if mode.is_ndjson() {
        let mut line = Map::new();
        line.insert("type".to_owned(), Value::from("summary"));
        line.insert("status".to_owned(), Value::from(status));
        line.insert("kind".to_owned(), Value::from(kind));
        line.extend(fields);
        let mut out = serde_json::to_string(&Value::Object(line))?;
        out.push('\n');
        out
    } else if mode.is_json() {
        let mut body = Map::new();
        body.insert("status".to_owned(), Value::from(status));
        body.insert("kind".to_owned(), Value::from(kind));
        body.extend(fields);
        let mut out = serde_json::to_string_pretty(&Value::Object(body))?;
        out.push('\n');
        out
    } else {
        let mut out = format!("status: {status}\nkind: {kind}\n");
        for (key, value) in &fields {
            out.push_str(key);
            out.push_str(": ");
            match value {
                Value::String(text) => out.push_str(text),
                Value::Null => out.push('-'),
                other => out.push_str(&other.to_string()),
            }
            out.push('\n');
        }
        out
    };

    Ok(CliOutput::ok(stdout))
}

pub(crate) fn format_error_output(mode: OutputMode, error: &ErrorEnvelope) -> CliOutput {
    let exit_code = ExitCode::for_error(error);
    let payload = error_payload(error);

    let mut stderr = String::new();
    log_info(&mut stderr, "command failed", mode.no_progress);

    let stdout = if mode.is_ndjson() {
        let line = serde_json::json!({
            "type": "error",
            "status": "error",
            "error": payload,
        });
        let mut out = serde_json::to_string(&line).unwrap_or_else(|_| {
            "{\"type\":\"error\",\"status\":\"error\",\"error\":{\"code\":\"core:internal\",\"message\":\"internal error\"}}".to_string()
        });
        out.push('\n');
        out
    } else if mode.is_json() {
        let body = serde_json::json!({
            "status": "error",
            "error": payload,
        });
        // This is a CLI boundary, so JSON serialization errors are internal.
        let mut out = serde_json::to_string_pretty(&body).unwrap_or_else(|_| {
            "{\"status\":\"error\",\"error\":{\"code\":\"core:internal\",\"message\":\"internal error\"}}".to_string()
        });
        out.push('\n');
        out
    } else {
        format_error_text(error)
    };

    CliOutput {
        stdout,
        stderr,
        exit_code,
    }
}

fn sanitized_metadata(error: &ErrorEnvelope) -> BTreeMap<&str, &str> {
    error
        .metadata
        .iter()
        .map(|(key, value)| {
            let value = if is_secret_key(key) {
                REDACTED_VALUE
            } else {
                value.as_str()
            };
            (key.as_str(), value)
        })
        .collect()
}

fn error_payload(error: &ErrorEnvelope) -> Value {
    serde_json::json!({
        "code": error.code.to_string(),
        "message": error.message,
        "kind": error.kind.to_string(),
        "retriable": error.class.is_retriable(),
        "meta": sanitized_metadata(error),
    })
}

fn format_error_text(error: &ErrorEnvelope) -> String {
    let mut out = String::new();
    out.push_str("status: error\n");
    out.push_str(&format!("code: {}\n", error.code));
    out.push_str(&format!("message: {}\n", error.message));
    out.push_str(&format!("kind: {}\n", error.kind));

    let meta = sanitized_metadata(error);
    if !meta.is_empty() {
        out.push_str("meta:\n");
        for (key, value) in meta {
            out.push_str(&format!("  {key}: {value}\n"));
        }
    }
    out
}

pub(crate) fn log_info(stderr: &mut String, message: &str, no_progress: bool) {
    if no_progress {
        return;
    }
    stderr.push_str("info: ");
    stderr.push_str(message);
    stderr.push('\n');
}

fn write_output(output: &CliOutput) -> Result<(), CliError> {
    let mut stdout = io::stdout();
    stdout.write_all(output.stdout.as_bytes())?;
    stdout.flush()?;

    if !output.stderr.is_empty() {
        let mut stderr = io::stderr();
        stderr.write_all(output.stderr.as_bytes())?;
        stderr.flush()?;
    }

    Ok(())
}

/// Process environment, skipping entries that are not valid UTF-8.
fn collect_env() -> BTreeMap<String, String> {
    std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::OutputFormat;
    use clap::CommandFactory;
    use kb_sync_shared::{ErrorClass, ErrorCode};

    fn mode(format: OutputFormat) -> OutputMode {
        OutputMode {
            format,
            no_progress: true,
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_the_subcommand() -> Result<(), clap::Error> {
        let cli = Cli::try_parse_from([
            "kb-sync",
            "sync",
            "--output",
            "ndjson",
            "--log-format",
            "json",
            "--log-level",
            "debug",
            "--config",
            "kb.toml",
        ])?;

        assert!(matches!(cli.command, Commands::Sync));
        assert_eq!(cli.output.output, OutputFormat::Ndjson);
        assert_eq!(cli.log.log_format, logging::LogFormat::Json);
        assert_eq!(cli.config.as_deref(), Some(Path::new("kb.toml")));
        Ok(())
    }

    #[test]
    fn config_show_accepts_toml() -> Result<(), clap::Error> {
        let cli = Cli::try_parse_from(["kb-sync", "config", "show", "--format", "toml"])?;

        assert!(matches!(
            cli.command,
            Commands::Config {
                command: ConfigCommands::Show {
                    format: ShowFormat::Toml
                }
            }
        ));
        Ok(())
    }

    #[test]
    fn exit_codes_follow_error_origin() {
        let cases = [
            (ErrorCode::new("config", "invalid_json"), ExitCode::InvalidInput),
            (ErrorCode::new("config", "config_file_not_found"), ExitCode::Io),
            (ErrorCode::invalid_input(), ExitCode::InvalidInput),
            (ErrorCode::new("sync", "root_not_found"), ExitCode::Io),
            (ErrorCode::new("sync", "lookup_failures_exceeded"), ExitCode::Remote),
            (ErrorCode::new("vector", "vdb_connection"), ExitCode::Remote),
            (ErrorCode::new("embedding", "retries_exhausted"), ExitCode::Remote),
            (ErrorCode::internal(), ExitCode::Internal),
        ];

        for (code, expected) in cases {
            let error = ErrorEnvelope::unexpected(code.clone(), "boom", ErrorClass::NonRetriable);
            assert_eq!(ExitCode::for_error(&error), expected, "code {code}");
        }
    }

    #[test]
    fn error_output_redacts_secret_metadata() {
        let error = ErrorEnvelope::expected(ErrorCode::new("vector", "vdb_auth"), "denied")
            .with_metadata("api_key", "sk-live")
            .with_metadata("collection", "handbook");

        let output = format_error_output(mode(OutputFormat::Json), &error);

        assert_eq!(output.exit_code, ExitCode::Remote);
        assert!(!output.stdout.contains("sk-live"));
        assert!(output.stdout.contains("handbook"));
        assert!(output.stdout.contains("\"vector:vdb_auth\""));
    }

    #[test]
    fn text_summary_lists_payload_fields() -> Result<(), CliError> {
        let payload = serde_json::json!({ "uploaded": 3, "passId": "pass_1" });

        let output = format_summary_output(mode(OutputFormat::Text), "ok", "sync", payload)?;

        assert!(output.stdout.starts_with("status: ok\nkind: sync\n"));
        assert!(output.stdout.contains("uploaded: 3\n"));
        assert!(output.stdout.contains("passId: pass_1\n"));
        Ok(())
    }

    #[test]
    fn ndjson_summary_is_one_line() -> Result<(), CliError> {
        let payload = serde_json::json!({ "passes": 2 });

        let output = format_summary_output(mode(OutputFormat::Ndjson), "ok", "daemon", payload)?;

        assert_eq!(output.stdout.lines().count(), 1);
        let line: Value = serde_json::from_str(output.stdout.trim())?;
        assert_eq!(line["type"], "summary");
        assert_eq!(line["passes"], 2);
        Ok(())
    }

    #[test]
    fn log_info_respects_no_progress() {
        let mut stderr = String::new();
        log_info(&mut stderr, "message", true);
        assert!(stderr.is_empty());
    }
}
