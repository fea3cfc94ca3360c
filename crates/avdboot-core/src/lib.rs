//! avdboot Core
//!
//! Boots an Android emulator for automated test runs and decides, from the
//! process lifetime, its log output and the device bridge's device list,
//! whether a new device came up.
//!
//! ```text
//!                BootSupervisor
//!      ┌───────────┬────┴──────┬─────────────┐
//!   Launcher   OutputMonitor  DevicePoller  deadline
//!      │           │             │
//! ProcessHandle FaultScanner  DeviceRegistry + BridgeHealth (adb)
//! ```

pub mod adb;
pub mod bridge;
pub mod config;
pub mod devices;
pub mod errors;
pub mod fault;
pub mod launcher;
pub mod monitor;
pub mod poller;
pub mod process;
pub mod supervisor;

pub use adb::{AdbClient, DEFAULT_ADB_TIMEOUT};
pub use bridge::{ensure_started, BridgeHealth};
pub use config::SupervisorConfig;
pub use devices::{DeviceRegistry, DeviceSnapshot, DeviceState, NewDevice};
pub use errors::{AvdBootError, BridgeError, ConfigError, LaunchError, QueryError, Result};
pub use fault::{FaultScanner, DEFAULT_FAULT_SIGNATURES};
pub use launcher::{EmulatorLauncher, LaunchOptions, Launcher};
pub use monitor::{ConsoleSink, MonitorReport, NullConsole, OutputLine, OutputMonitor, StdConsole};
pub use poller::{BridgeRestartPolicy, DevicePoller};
pub use process::{OutputStreams, ProcessHandle, StreamKind};
pub use supervisor::{BootOutcome, BootSupervisor, FailureReason, RetryCause, SupervisorState};
