//! Android SDK layout

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::SdkConfig;
use crate::error::{CliError, Result};

/// A located Android SDK root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndroidSdk {
    root: PathBuf,
}

impl AndroidSdk {
    /// Use `root` if it is an existing directory
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let resolved = root
            .canonicalize()
            .map_err(|e| CliError::SdkNotFound(format!("{}: {}", root.display(), e)))?;
        if !resolved.is_dir() {
            return Err(CliError::SdkNotFound(format!(
                "{} is not a directory",
                resolved.display()
            )));
        }
        Ok(Self { root: resolved })
    }

    /// ANDROID_HOME first, then ANDROID_SDK_ROOT, then the SDK owning the
    /// `adb` found on PATH
    pub fn locate(config: &SdkConfig) -> Result<Self> {
        let mut problems = Vec::new();

        let candidates = [
            ("ANDROID_HOME", &config.android_home),
            ("ANDROID_SDK_ROOT", &config.android_sdk_root),
        ];
        for (name, candidate) in candidates {
            match candidate {
                Some(path) => match Self::new(path) {
                    Ok(sdk) => {
                        info!("Using Android SDK from {}: {}", name, sdk.root.display());
                        return Ok(sdk);
                    }
                    Err(e) => {
                        warn!("Ignoring {}: {}", name, e);
                        problems.push(format!("{}: {}", name, e));
                    }
                },
                None => problems.push(format!("{} is unset", name)),
            }
        }

        match which::which("adb") {
            Ok(adb) => {
                let root = Self::root_from_adb(&adb).ok_or_else(|| {
                    CliError::SdkNotFound(format!(
                        "adb at {} is not inside platform-tools",
                        adb.display()
                    ))
                })?;
                let sdk = Self::new(root)?;
                info!("Using Android SDK owning {}: {}", adb.display(), sdk.root.display());
                Ok(sdk)
            }
            Err(e) => {
                problems.push(format!("adb not on PATH: {}", e));
                Err(CliError::SdkNotFound(problems.join("; ")))
            }
        }
    }

    /// `<root>/platform-tools/adb` → `<root>`
    fn root_from_adb(adb: &Path) -> Option<PathBuf> {
        let adb = adb.canonicalize().unwrap_or_else(|_| adb.to_path_buf());
        let platform_tools = adb.parent()?;
        if platform_tools.file_name()? != OsStr::new("platform-tools") {
            return None;
        }
        platform_tools.parent().map(Path::to_path_buf)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn adb(&self) -> PathBuf {
        self.root.join("platform-tools").join("adb")
    }

    pub fn emulator(&self) -> PathBuf {
        self.root.join("emulator").join("emulator")
    }

    /// Directory holding sdkmanager and avdmanager
    pub fn cmdline_tools(&self) -> Result<PathBuf> {
        let latest = self.root.join("cmdline-tools").join("latest").join("bin");
        if latest.is_dir() {
            return Ok(latest);
        }

        // Any versioned cmdline-tools install, in name order
        if let Ok(entries) = std::fs::read_dir(self.root.join("cmdline-tools")) {
            let mut versions: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path().join("bin"))
                .filter(|bin| bin.is_dir())
                .collect();
            versions.sort();
            if let Some(bin) = versions.into_iter().next() {
                return Ok(bin);
            }
        }

        for legacy in [self.root.join("tools").join("bin"), self.root.join("tools")] {
            if legacy.is_dir() {
                debug!("Falling back to legacy SDK tools at {}", legacy.display());
                return Ok(legacy);
            }
        }

        Err(CliError::ToolNotFound {
            tool: "cmdline-tools",
            root: self.root.clone(),
        })
    }

    pub fn sdkmanager(&self) -> Result<PathBuf> {
        Ok(self.cmdline_tools()?.join("sdkmanager"))
    }

    pub fn avdmanager(&self) -> Result<PathBuf> {
        Ok(self.cmdline_tools()?.join("avdmanager"))
    }
}
