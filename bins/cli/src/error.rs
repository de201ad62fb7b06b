use kb_sync_shared::{ErrorCode, ErrorEnvelope};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Ok = 0,
    Internal = 1,
    InvalidInput = 2,
    Io = 3,
    Remote = 4,
}

impl ExitCode {
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Map a failure envelope to the process exit code.
    pub fn for_error(error: &ErrorEnvelope) -> Self {
        let code = &error.code;
        match code.namespace() {
            "config" => match code.code() {
                "config_file_io" | "config_file_not_found" | "config_file_permission_denied" => {
                    Self::Io
                },
                _ => Self::InvalidInput,
            },
            "vector" | "embedding" => Self::Remote,
            "sync" => match code.code() {
                "root_not_found" => Self::Io,
                _ => Self::Remote,
            },
            _ if *code == ErrorCode::invalid_input() => Self::InvalidInput,
            _ if *code == ErrorCode::io() || *code == ErrorCode::not_found() => Self::Io,
            _ if *code == ErrorCode::timeout()
                || *code == ErrorCode::rate_limited()
                || *code == ErrorCode::dependency_unavailable()
                || *code == ErrorCode::permission_denied() =>
            {
                Self::Remote
            },
            _ => Self::Internal,
        }
    }
}

#[derive(Debug)]
pub enum CliError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
}

impl CliError {
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::Io(_) => ExitCode::Io,
            Self::Serialization(_) => ExitCode::Internal,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(error) => write!(formatter, "io error: {error}"),
            Self::Serialization(error) => write!(formatter, "serialization error: {error}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error)
    }
}
