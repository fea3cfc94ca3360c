//! Emulator command line construction and spawning

use std::path::{Path, PathBuf};

use tracing::info;

use crate::errors::LaunchError;
use crate::process::ProcessHandle;

/// GPU backend that works on headless CI hosts
pub const DEFAULT_GPU: &str = "swiftshader_indirect";

/// Flags passed to the emulator binary for a single boot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub avd_id: String,
    pub gpu: String,
    pub verbose: bool,
    pub show_kernel: bool,
    pub no_audio: bool,
    pub no_window: bool,
    pub no_boot_anim: bool,
    /// Value for `-netdelay`; `None` omits the flag
    pub netdelay: Option<String>,
    pub no_snapshot: bool,
    pub wipe_data: bool,
    /// Appended verbatim after the built-in flags
    pub extra: Vec<String>,
}

impl LaunchOptions {
    /// Headless, snapshot-free boot of `avd_id` with a fresh data partition
    pub fn new(avd_id: impl Into<String>) -> Self {
        Self {
            avd_id: avd_id.into(),
            gpu: DEFAULT_GPU.to_string(),
            verbose: true,
            show_kernel: true,
            no_audio: true,
            no_window: true,
            no_boot_anim: true,
            netdelay: Some("none".to_string()),
            no_snapshot: true,
            wipe_data: true,
            extra: Vec::new(),
        }
    }

    pub fn with_gpu(mut self, gpu: impl Into<String>) -> Self {
        self.gpu = gpu.into();
        self
    }

    pub fn with_extra<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra.extend(extra.into_iter().map(Into::into));
        self
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![format!("@{}", self.avd_id)];

        let switches = [
            (self.verbose, "-verbose"),
            (self.show_kernel, "-show-kernel"),
            (self.no_audio, "-no-audio"),
            (self.no_window, "-no-window"),
            (self.no_boot_anim, "-no-boot-anim"),
        ];
        args.extend(
            switches
                .iter()
                .filter(|(enabled, _)| *enabled)
                .map(|(_, flag)| flag.to_string()),
        );

        if let Some(delay) = &self.netdelay {
            args.push("-netdelay".to_string());
            args.push(delay.clone());
        }
        if self.no_snapshot {
            args.push("-no-snapshot".to_string());
        }
        if self.wipe_data {
            args.push("-wipe-data".to_string());
        }

        args.push("-gpu".to_string());
        args.push(self.gpu.clone());
        args.extend(self.extra.iter().cloned());
        args
    }
}

/// Starts one emulator process per boot attempt
pub trait Launcher: Send + Sync {
    fn launch(&self, attempt: u32) -> Result<ProcessHandle, LaunchError>;
}

/// Launches the SDK's emulator binary with fixed arguments
#[derive(Debug, Clone)]
pub struct EmulatorLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl EmulatorLauncher {
    pub fn new(program: impl Into<PathBuf>, options: &LaunchOptions) -> Self {
        Self {
            program: program.into(),
            args: options.to_args(),
        }
    }

    /// `emulator` inside `<android_home>/emulator`
    pub fn from_android_home(android_home: impl AsRef<Path>, options: &LaunchOptions) -> Self {
        Self::new(
            android_home.as_ref().join("emulator").join("emulator"),
            options,
        )
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl Launcher for EmulatorLauncher {
    fn launch(&self, attempt: u32) -> Result<ProcessHandle, LaunchError> {
        info!("Launching emulator (attempt {})", attempt);
        info!("$ {}", self.command_line());
        ProcessHandle::spawn(&self.program, &self.args)
    }
}
