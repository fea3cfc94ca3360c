//! avdboot CLI library
//!
//! Command-line front end for the boot supervisor: configuration layering,
//! Android SDK discovery and the sdkmanager/avdmanager phases that prepare an
//! AVD before it is booted.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod phases;
pub mod sdk;

pub use cli::{Cli, Commands, CreateArgs, StartArgs};
pub use commands::CommandDispatcher;
pub use config::AppConfig;
pub use error::{CliError, Result};
pub use sdk::AndroidSdk;
