//! Error types for the emulator boot supervisor
//!
//! Each collaborator the supervisor talks to has its own error enum so callers
//! can tell a flaky device bridge apart from a broken emulator installation.
//! `AvdBootError` unifies them for code that does not care which one failed.

use std::io;
use std::time::Duration;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Failures listing devices through the device bridge
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` exited with {status}: {output}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },
    #[error("`{command}` did not answer within {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

/// Failures starting or stopping the device bridge server
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Device bridge {action} failed: {source}")]
    Query {
        action: &'static str,
        #[source]
        source: QueryError,
    },
    #[error("Device bridge {action} failed: {reason}")]
    Other { action: &'static str, reason: String },
}

/// Failures spawning the emulator process
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("Emulator process {program} has no {stream} pipe")]
    MissingPipe {
        program: String,
        stream: &'static str,
    },
}

/// Invalid supervisor configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Error type unifying every failure domain of the crate
#[derive(Debug, thiserror::Error)]
pub enum AvdBootError {
    #[error("Device query error: {0}")]
    Query(#[from] QueryError),

    #[error("Device bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Emulator launch error: {0}")]
    Launch(#[from] LaunchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for avdboot operations
pub type Result<T> = std::result::Result<T, AvdBootError>;
