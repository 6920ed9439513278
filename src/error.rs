use std::time::Duration;

use thiserror::Error;

/// Failure of a single sandboxed execution attempt.
///
/// A target command that exits non-zero is not represented here; that is an
/// ordinary [`ExecutionResult`](crate::sandbox::ExecutionResult).
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Sandbox timed out after {limit:?} (elapsed {elapsed:?}) running `{command}`")]
    Timeout {
        /// Wall time measured from spawn to the moment the deadline fired.
        /// Never less than `limit`, and exceeds it only by scheduling delay.
        elapsed: Duration,
        /// The configured timeout
        limit: Duration,
        command: String,
    },

    #[error("Failed to launch sandbox for `{command}`: {cause}")]
    SpawnFailure { command: String, cause: String },

    #[error("Isolation backend '{backend}' is unavailable: {cause}")]
    IsolationBackendUnavailable { backend: String, cause: String },
}

impl SandboxError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[derive(Error, Debug)]
pub enum SandcellError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // Caller errors
    #[error("Command must contain at least one argument")]
    EmptyCommand,

    // Sandbox errors
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SandcellError>;
