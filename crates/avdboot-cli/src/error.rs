//! Error handling for the avdboot CLI

use std::path::PathBuf;

use avdboot_core::FailureReason;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Boot supervisor error: {0}")]
    Core(#[from] avdboot_core::AvdBootError),

    #[error("Device query error: {0}")]
    Query(#[from] avdboot_core::QueryError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Android SDK not found: {0}")]
    SdkNotFound(String),

    #[error("{tool} not found under {}", root.display())]
    ToolNotFound { tool: &'static str, root: PathBuf },

    #[error("Failed to parse {what} flags: {flags:?}")]
    FlagParse { what: &'static str, flags: String },

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} produced no output for {seconds}s")]
    Silence { program: String, seconds: u64 },

    #[error("{program} did not finish within {seconds}s")]
    Timeout { program: String, seconds: u64 },

    #[error("{program} exited with {status}, output: {output}")]
    CommandFailed {
        program: String,
        status: String,
        output: String,
    },

    #[error("Phase '{phase}' failed after {attempts} attempts: {source}")]
    PhaseFailed {
        phase: String,
        attempts: u32,
        #[source]
        source: Box<CliError>,
    },

    #[error("Emulator failed to boot ({reason}): {detail}")]
    BootFailed {
        reason: FailureReason,
        detail: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
