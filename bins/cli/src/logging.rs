//! Logger selection for CLI runs.
//!
//! `text` installs a `tracing-subscriber` fmt layer on stderr and routes port
//! events through [`TracingLogger`]. `json` writes one redacted JSON line per
//! event to stderr via [`JsonLogger`] and installs no subscriber.

use clap::{Args, ValueEnum};
use kb_sync_adapters::{JsonLogger, StderrLogSink, TracingLogger};
use kb_sync_ports::{LogLevel, LoggerPort};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Log line encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// `tracing` fmt output.
    Text,
    /// One JSON object per line.
    Json,
}

/// Minimum level for emitted logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliLogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl CliLogLevel {
    const fn as_log_level(self) -> LogLevel {
        match self {
            Self::Debug => LogLevel::Debug,
            Self::Info => LogLevel::Info,
            Self::Warn => LogLevel::Warn,
            Self::Error => LogLevel::Error,
        }
    }
}

/// Logging-related CLI flags.
#[derive(Debug, Args)]
pub struct LogArgs {
    /// Log encoding on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
    /// Minimum log level. `RUST_LOG` takes precedence for text logs.
    #[arg(long, global = true, value_enum, default_value_t = CliLogLevel::Info)]
    pub log_level: CliLogLevel,
}

/// Build the filter for text logs: `RUST_LOG` when set, else the flag level.
fn env_filter(level: CliLogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_log_level().as_str()))
}

/// Install logging and return the port logger for the engine.
pub fn init_logging(args: &LogArgs) -> Arc<dyn LoggerPort> {
    match args.log_format {
        LogFormat::Text => {
            // A second init (tests, embedding) keeps the first subscriber.
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter(args.log_level))
                .with_writer(std::io::stderr)
                .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
                .with_target(false)
                .try_init();
            Arc::new(TracingLogger::new())
        },
        LogFormat::Json => Arc::new(
            JsonLogger::new(Arc::new(StderrLogSink))
                .with_min_level(args.log_level.as_log_level()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_levels_map_to_port_levels() {
        assert_eq!(CliLogLevel::Debug.as_log_level(), LogLevel::Debug);
        assert_eq!(CliLogLevel::Warn.as_log_level().as_str(), "warn");
    }
}
