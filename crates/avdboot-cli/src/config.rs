//! avdboot CLI Configuration Management
//!
//! Configuration is layered, highest priority first:
//! - Command line arguments
//! - Environment variables (ANDROID_HOME, ANDROID_SDK_ROOT)
//! - Configuration file (`--config avdboot.toml`)
//! - Defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use avdboot_core::{
    BridgeRestartPolicy, LaunchOptions, SupervisorConfig, DEFAULT_ADB_TIMEOUT,
    DEFAULT_FAULT_SIGNATURES,
};

use crate::cli::{CreateArgs, StartArgs};
use crate::error::{CliError, Result};

const VALID_TAGS: &[&str] = &[
    "google_apis",
    "google_apis_playstore",
    "android-wear",
    "android-tv",
    "default",
];
const VALID_ABIS: &[&str] = &["x86", "x86_64", "armeabi-v7a", "arm64-v8a"];
const VALID_CHANNELS: &[&str] = &["0", "1", "2", "3"];

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sdk: SdkConfig,
    pub emulator: EmulatorConfig,
    pub boot: BootConfig,
    pub avd: AvdConfig,
}

/// Android SDK location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    pub android_home: Option<PathBuf>,
    pub android_sdk_root: Option<PathBuf>,
}

/// How the emulator is launched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// AVD name
    pub id: String,
    pub gpu: String,
    /// Extra flags appended to the emulator command line
    pub start_flags: String,
    pub wipe_data: bool,
}

/// Boot supervision tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    pub max_attempts: u32,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
    pub exit_grace_ms: u64,
    /// Longest a single adb call may run before it is killed
    pub adb_timeout_secs: u64,
    /// Restart the device bridge after this many empty polls; 0 disables
    pub bridge_restart_every: u32,
    pub reset_on_query_error: bool,
    pub fault_signatures: Vec<String>,
}

/// AVD creation through sdkmanager and avdmanager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvdConfig {
    pub api_level: u32,
    pub tag: String,
    pub abi: String,
    pub profile: String,
    pub channel: String,
    pub create_flags: String,
    pub silence_timeout_secs: u64,
    pub phase_timeout_secs: u64,
    pub phase_attempts: u32,
}

// ----------------------------------------------------------------------------
// Default Implementations
// ----------------------------------------------------------------------------

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            id: "emulator".to_string(),
            gpu: avdboot_core::launcher::DEFAULT_GPU.to_string(),
            start_flags: String::new(),
            wipe_data: true,
        }
    }
}

impl Default for BootConfig {
    fn default() -> Self {
        let policy = BridgeRestartPolicy::default();
        Self {
            max_attempts: 5,
            poll_interval_secs: 5,
            timeout_secs: 300,
            exit_grace_ms: 500,
            adb_timeout_secs: DEFAULT_ADB_TIMEOUT.as_secs(),
            bridge_restart_every: policy.every_n_polls,
            reset_on_query_error: policy.reset_on_query_error,
            fault_signatures: DEFAULT_FAULT_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for AvdConfig {
    fn default() -> Self {
        Self {
            api_level: 26,
            tag: "google_apis".to_string(),
            abi: "x86".to_string(),
            profile: "pixel".to_string(),
            channel: "0".to_string(),
            create_flags: String::new(),
            silence_timeout_secs: 30,
            phase_timeout_secs: 1200,
            phase_attempts: 3,
        }
    }
}

// ----------------------------------------------------------------------------
// Loading and Overrides
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a TOML file; missing keys take their defaults
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CliError::Config(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// SDK locations from flags or the environment win over the file
    pub fn apply_sdk_overrides(
        &mut self,
        android_home: Option<PathBuf>,
        android_sdk_root: Option<PathBuf>,
    ) {
        if let Some(path) = android_home {
            debug!("ANDROID_HOME override: {}", path.display());
            self.sdk.android_home = Some(path);
        }
        if let Some(path) = android_sdk_root {
            debug!("ANDROID_SDK_ROOT override: {}", path.display());
            self.sdk.android_sdk_root = Some(path);
        }
    }

    pub fn apply_start_args(&mut self, args: &StartArgs) {
        if let Some(id) = &args.emulator_id {
            self.emulator.id = id.clone();
        }
        if let Some(flags) = &args.start_flags {
            self.emulator.start_flags = flags.clone();
        }
        if let Some(gpu) = &args.gpu {
            self.emulator.gpu = gpu.clone();
        }
        if args.keep_data {
            self.emulator.wipe_data = false;
        }
        if let Some(timeout) = args.timeout {
            self.boot.timeout_secs = timeout;
        }
        if let Some(max_attempts) = args.max_attempts {
            self.boot.max_attempts = max_attempts;
        }
        if let Some(interval) = args.poll_interval {
            self.boot.poll_interval_secs = interval;
        }
    }

    pub fn apply_create_args(&mut self, args: &CreateArgs) {
        if let Some(id) = &args.emulator_id {
            self.emulator.id = id.clone();
        }
        if let Some(api_level) = args.api_level {
            self.avd.api_level = api_level;
        }
        if let Some(tag) = &args.tag {
            self.avd.tag = tag.clone();
        }
        if let Some(abi) = &args.abi {
            self.avd.abi = abi.clone();
        }
        if let Some(profile) = &args.profile {
            self.avd.profile = profile.clone();
        }
        if let Some(channel) = &args.channel {
            self.avd.channel = channel.clone();
        }
        if let Some(flags) = &args.create_flags {
            self.avd.create_flags = flags.clone();
        }
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        if self.emulator.id.trim().is_empty() {
            return Err(CliError::Config("Emulator id must not be empty".to_string()));
        }
        if self.emulator.gpu.trim().is_empty() {
            return Err(CliError::Config("GPU mode must not be empty".to_string()));
        }

        if !VALID_TAGS.contains(&self.avd.tag.as_str()) {
            return Err(CliError::Config(format!(
                "Unknown system image tag: {} (expected one of {:?})",
                self.avd.tag, VALID_TAGS
            )));
        }
        if !VALID_ABIS.contains(&self.avd.abi.as_str()) {
            return Err(CliError::Config(format!(
                "Unknown ABI: {} (expected one of {:?})",
                self.avd.abi, VALID_ABIS
            )));
        }
        if !VALID_CHANNELS.contains(&self.avd.channel.as_str()) {
            return Err(CliError::Config(format!(
                "Unknown emulator channel: {} (expected 0-3)",
                self.avd.channel
            )));
        }
        if self.avd.profile.trim().is_empty() {
            return Err(CliError::Config("Device profile must not be empty".to_string()));
        }
        if self.avd.silence_timeout_secs == 0 || self.avd.phase_timeout_secs == 0 {
            return Err(CliError::Config(
                "Phase timeouts must be greater than 0".to_string(),
            ));
        }
        if self.boot.adb_timeout_secs == 0 {
            return Err(CliError::Config(
                "adb timeout must be greater than 0".to_string(),
            ));
        }
        if self.avd.phase_attempts == 0 {
            return Err(CliError::Config(
                "Phase attempts must be greater than 0".to_string(),
            ));
        }

        // Also rejects unparsable flag strings early
        self.start_flags()?;
        self.create_flags()?;

        self.supervisor_config()
            .validate()
            .map_err(|e| CliError::Config(e.to_string()))
    }

    pub fn start_flags(&self) -> Result<Vec<String>> {
        split_flags("start", &self.emulator.start_flags)
    }

    pub fn create_flags(&self) -> Result<Vec<String>> {
        split_flags("create", &self.avd.create_flags)
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::default()
            .with_max_attempts(self.boot.max_attempts)
            .with_poll_interval(Duration::from_secs(self.boot.poll_interval_secs))
            .with_boot_timeout(Duration::from_secs(self.boot.timeout_secs))
            .with_exit_grace(Duration::from_millis(self.boot.exit_grace_ms))
            .with_bridge_restart(BridgeRestartPolicy {
                every_n_polls: self.boot.bridge_restart_every,
                reset_on_query_error: self.boot.reset_on_query_error,
            })
            .with_fault_signatures(self.boot.fault_signatures.iter().cloned())
    }

    pub fn adb_timeout(&self) -> Duration {
        Duration::from_secs(self.boot.adb_timeout_secs)
    }

    pub fn launch_options(&self) -> Result<LaunchOptions> {
        let mut options = LaunchOptions::new(self.emulator.id.clone())
            .with_gpu(self.emulator.gpu.clone())
            .with_extra(self.start_flags()?);
        options.wipe_data = self.emulator.wipe_data;
        Ok(options)
    }

    /// `system-images;android-<api>;<tag>;<abi>`
    pub fn system_image_package(&self) -> String {
        format!(
            "system-images;android-{};{};{}",
            self.avd.api_level, self.avd.tag, self.avd.abi
        )
    }
}

fn split_flags(what: &'static str, flags: &str) -> Result<Vec<String>> {
    shlex::split(flags).ok_or_else(|| CliError::FlagParse {
        what,
        flags: flags.to_string(),
    })
}
