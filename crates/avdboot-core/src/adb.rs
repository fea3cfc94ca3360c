//! adb-backed device registry and bridge control

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::bridge::BridgeHealth;
use crate::devices::{DeviceRegistry, DeviceSnapshot};
use crate::errors::{BridgeError, QueryError};

/// Longest a single adb invocation may take before it is killed
pub const DEFAULT_ADB_TIMEOUT: Duration = Duration::from_secs(10);

/// Thin wrapper around the `adb` binary of an Android SDK
#[derive(Debug, Clone)]
pub struct AdbClient {
    binary: PathBuf,
    timeout: Duration,
}

impl AdbClient {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: DEFAULT_ADB_TIMEOUT,
        }
    }

    /// Kill any adb invocation still running after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `adb` inside `<android_home>/platform-tools`
    pub fn from_android_home(android_home: impl AsRef<Path>) -> Self {
        Self::new(android_home.as_ref().join("platform-tools").join("adb"))
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run `adb <args>` and return its trimmed combined output
    ///
    /// A hung adb is killed once the client timeout expires and reported as
    /// [`QueryError::TimedOut`].
    pub async fn run(&self, args: &[&str]) -> Result<String, QueryError> {
        let command_line = format!("{} {}", self.binary.display(), args.join(" "));
        // `devices` runs on every poll
        if args.first() == Some(&"devices") {
            debug!("$ {}", command_line);
        } else {
            info!("$ {}", command_line);
        }

        let mut command = Command::new(&self.binary);
        command.args(args).kill_on_drop(true);
        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result.map_err(|source| QueryError::Spawn {
                command: command_line.clone(),
                source,
            })?,
            Err(_) => {
                return Err(QueryError::TimedOut {
                    command: command_line,
                    timeout: self.timeout,
                })
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim().to_string();
        debug!("{}", combined);

        if !output.status.success() {
            return Err(QueryError::CommandFailed {
                command: command_line,
                status: output.status.to_string(),
                output: combined,
            });
        }

        Ok(combined)
    }
}

#[async_trait]
impl DeviceRegistry for AdbClient {
    async fn snapshot(&self) -> Result<DeviceSnapshot, QueryError> {
        let output = self.run(&["devices"]).await?;
        Ok(DeviceSnapshot::parse(&output))
    }
}

#[async_trait]
impl BridgeHealth for AdbClient {
    async fn start(&self) -> Result<(), BridgeError> {
        self.run(&["start-server"])
            .await
            .map(drop)
            .map_err(|source| BridgeError::Query {
                action: "start",
                source,
            })
    }

    async fn stop(&self) -> Result<(), BridgeError> {
        self.run(&["kill-server"])
            .await
            .map(drop)
            .map_err(|source| BridgeError::Query {
                action: "stop",
                source,
            })
    }
}
