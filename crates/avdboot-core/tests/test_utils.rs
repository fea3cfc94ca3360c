//! Test utilities for driving the boot supervisor without an Android SDK
//!
//! Emulators are stood in for by `sh -c` scripts, and the device bridge by
//! registries and bridges that replay a fixed script.

#![allow(dead_code)]

use async_trait::async_trait;
use avdboot_core::{
    BridgeError, BridgeHealth, DeviceRegistry, DeviceSnapshot, DeviceState, LaunchError, Launcher,
    ProcessHandle, QueryError, SupervisorConfig,
};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ----------------------------------------------------------------------------
// Snapshots
// ----------------------------------------------------------------------------

pub fn baseline() -> DeviceSnapshot {
    DeviceSnapshot::from_entries([("emulator-5554", DeviceState::Device)])
}

/// Baseline plus `emulator-5556` in `state`
pub fn with_new(state: DeviceState) -> DeviceSnapshot {
    DeviceSnapshot::from_entries([
        ("emulator-5554", DeviceState::Device),
        ("emulator-5556", state),
    ])
}

/// Fast timings so scenarios finish in well under a second
pub fn fast_config() -> SupervisorConfig {
    SupervisorConfig::default()
        .with_poll_interval(Duration::from_millis(20))
        .with_boot_timeout(Duration::from_secs(10))
        .with_exit_grace(Duration::from_millis(200))
}

// ----------------------------------------------------------------------------
// Scripted Registry
// ----------------------------------------------------------------------------

/// Replays snapshots in order and then repeats the last entry forever.
/// `None` entries fail the query.
pub struct ScriptedRegistry {
    script: Mutex<VecDeque<Option<DeviceSnapshot>>>,
    queries: AtomicU32,
}

impl ScriptedRegistry {
    pub fn new(script: Vec<Option<DeviceSnapshot>>) -> Self {
        assert!(!script.is_empty(), "registry script must not be empty");
        Self {
            script: Mutex::new(script.into()),
            queries: AtomicU32::new(0),
        }
    }

    pub fn queries(&self) -> u32 {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceRegistry for ScriptedRegistry {
    async fn snapshot(&self) -> Result<DeviceSnapshot, QueryError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        };
        next.ok_or_else(|| QueryError::CommandFailed {
            command: "adb devices".to_string(),
            status: "exit status: 1".to_string(),
            output: "error: could not connect to daemon".to_string(),
        })
    }
}

// ----------------------------------------------------------------------------
// Counting Bridge
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct CountingBridge {
    pub broken: bool,
    starts: AtomicU32,
    stops: AtomicU32,
}

impl CountingBridge {
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Default::default()
        }
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BridgeHealth for CountingBridge {
    async fn start(&self) -> Result<(), BridgeError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(BridgeError::Other {
                action: "start",
                reason: "cannot bind to port 5037".to_string(),
            });
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), BridgeError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Script Launcher
// ----------------------------------------------------------------------------

/// Launches `sh -c <script>`; attempt N runs script N, the last one repeats
pub struct ScriptLauncher {
    scripts: Vec<String>,
    launches: AtomicU32,
}

impl ScriptLauncher {
    pub fn new<S: Into<String>>(script: S) -> Self {
        Self::per_attempt(vec![script.into()])
    }

    pub fn per_attempt(scripts: Vec<String>) -> Self {
        assert!(!scripts.is_empty(), "launcher needs at least one script");
        Self {
            scripts,
            launches: AtomicU32::new(0),
        }
    }

    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }
}

impl Launcher for ScriptLauncher {
    fn launch(&self, attempt: u32) -> Result<ProcessHandle, LaunchError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let index = (attempt as usize - 1).min(self.scripts.len() - 1);
        ProcessHandle::spawn("sh", ["-c", self.scripts[index].as_str()])
    }
}

// ----------------------------------------------------------------------------
// Log Capture
// ----------------------------------------------------------------------------

/// Collects formatted tracing output for the current thread
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Route this thread's events here until the guard is dropped.
    /// Tests on the current-thread runtime see their spawned tasks too.
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let logs = Self::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
