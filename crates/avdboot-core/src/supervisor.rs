//! Boot Supervisor
//!
//! Drives the emulator through bounded boot attempts. Each attempt races four
//! signals against one another:
//! - the global boot deadline
//! - a fault line in the emulator output
//! - the emulator process exiting
//! - the device poller reporting the new serial as `device`
//!
//! The first signal decides the attempt. Everything spawned for an attempt is
//! cancelled and joined before the next one starts.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bridge::{self, BridgeHealth};
use crate::config::SupervisorConfig;
use crate::devices::{DeviceRegistry, DeviceSnapshot};
use crate::errors::Result;
use crate::fault::FaultScanner;
use crate::launcher::Launcher;
use crate::monitor::{ConsoleSink, OutputMonitor, StdConsole};
use crate::poller::DevicePoller;
use crate::process::ProcessHandle;

// ----------------------------------------------------------------------------
// Outcome Types
// ----------------------------------------------------------------------------

/// Why an attempt ended without a booted device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryCause {
    /// The emulator printed a fault line
    Fault(String),
    /// The emulator exited on its own; carries the exit status
    Exited(String),
}

impl fmt::Display for RetryCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryCause::Fault(line) => write!(f, "fault detected: {}", line),
            RetryCause::Exited(status) => write!(f, "emulator exited: {}", status),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// The boot deadline elapsed
    Timeout,
    /// Every attempt ended in a fault
    FaultExhausted,
    /// The last attempt ended with the emulator exiting
    ProcessExitedUnexpectedly,
    /// The baseline device list could not be taken
    QueryError,
    /// The emulator binary could not be started
    LaunchFailed,
    /// The device bridge could not be started
    BridgeUnavailable,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::Timeout => "timed out waiting for the emulator to boot",
            FailureReason::FaultExhausted => "emulator faulted on every attempt",
            FailureReason::ProcessExitedUnexpectedly => "emulator exited unexpectedly",
            FailureReason::QueryError => "failed to query the device list",
            FailureReason::LaunchFailed => "failed to launch the emulator",
            FailureReason::BridgeUnavailable => "device bridge is unavailable",
        };
        f.write_str(text)
    }
}

/// Result of one supervisor run
#[derive(Debug)]
pub enum BootOutcome {
    /// The new emulator is ready; the process is left running
    Booted {
        serial: String,
        process: ProcessHandle,
    },
    Failed {
        reason: FailureReason,
        /// Human readable description of the last error
        detail: String,
        /// Output captured during the last attempt
        log: Vec<u8>,
    },
}

impl BootOutcome {
    pub fn is_booted(&self) -> bool {
        matches!(self, BootOutcome::Booted { .. })
    }

    pub fn serial(&self) -> Option<&str> {
        match self {
            BootOutcome::Booted { serial, .. } => Some(serial),
            BootOutcome::Failed { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            BootOutcome::Booted { .. } => None,
            BootOutcome::Failed { reason, .. } => Some(*reason),
        }
    }
}

/// Where the supervisor currently is in its run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Attempting { attempt: u32 },
    RetryPending { attempt: u32, cause: RetryCause },
    Booted { serial: String },
    Failed { reason: FailureReason },
}

// ----------------------------------------------------------------------------
// Attempt Events
// ----------------------------------------------------------------------------

/// The signal that decided an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
enum AttemptEvent {
    Deadline,
    Fault(String),
    Exited(String),
    Ready(String),
}

/// A ready device only counts if nothing fatal happened alongside it; fault
/// beats exit beats ready.
fn resolve(event: AttemptEvent, fault: Option<String>, exit_status: Option<String>) -> AttemptEvent {
    match event {
        AttemptEvent::Ready(serial) => match (fault, exit_status) {
            (Some(line), _) => AttemptEvent::Fault(line),
            (None, Some(status)) => AttemptEvent::Exited(status),
            (None, None) => AttemptEvent::Ready(serial),
        },
        other => other,
    }
}

enum AttemptResult {
    Booted {
        serial: String,
        process: ProcessHandle,
    },
    Retry {
        cause: RetryCause,
        log: Vec<u8>,
    },
    TimedOut {
        log: Vec<u8>,
    },
}

// ----------------------------------------------------------------------------
// Boot Supervisor
// ----------------------------------------------------------------------------

pub struct BootSupervisor {
    config: SupervisorConfig,
    scanner: FaultScanner,
    launcher: Arc<dyn Launcher>,
    registry: Arc<dyn DeviceRegistry>,
    bridge: Arc<dyn BridgeHealth>,
    console: Arc<dyn ConsoleSink>,
    state_tx: watch::Sender<SupervisorState>,
}

impl BootSupervisor {
    /// Create a supervisor writing emulator output to the process console
    pub fn new(
        config: SupervisorConfig,
        launcher: Arc<dyn Launcher>,
        registry: Arc<dyn DeviceRegistry>,
        bridge: Arc<dyn BridgeHealth>,
    ) -> Result<Self> {
        config.validate()?;
        let (state_tx, _) = watch::channel(SupervisorState::Idle);

        Ok(Self {
            scanner: config.fault_scanner(),
            config,
            launcher,
            registry,
            bridge,
            console: Arc::new(StdConsole),
            state_tx,
        })
    }

    pub fn with_console(mut self, console: Arc<dyn ConsoleSink>) -> Self {
        self.console = console;
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn state(&self) -> SupervisorState {
        self.state_tx.borrow().clone()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    /// Make sure the device bridge runs, record which emulators already
    /// exist, then boot a new one.
    pub async fn boot(&self) -> BootOutcome {
        self.set_state(SupervisorState::Idle);

        if let Err(e) = bridge::ensure_started(self.bridge.as_ref()).await {
            error!("Device bridge unavailable: {}", e);
            return self.fail(FailureReason::BridgeUnavailable, e.to_string(), Vec::new());
        }

        let baseline = match self.registry.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Failed to list devices before boot: {}", e);
                return self.fail(FailureReason::QueryError, e.to_string(), Vec::new());
            }
        };

        info!("{} emulator(s) already running", baseline.len());
        for (serial, state) in baseline.iter() {
            debug!("  {} {}", serial, state);
        }

        self.run(Arc::new(baseline)).await
    }

    /// Attempt loop against an already captured baseline
    pub async fn run(&self, baseline: Arc<DeviceSnapshot>) -> BootOutcome {
        let deadline = Instant::now() + self.config.boot_timeout;
        let mut last_log = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;

            if Instant::now() >= deadline {
                error!(
                    "Boot deadline of {:?} passed before attempt {}",
                    self.config.boot_timeout, attempt
                );
                return self.fail(
                    FailureReason::Timeout,
                    format!("no ready emulator within {:?}", self.config.boot_timeout),
                    last_log,
                );
            }

            self.set_state(SupervisorState::Attempting { attempt });
            info!("Boot attempt {}/{}", attempt, self.config.max_attempts);

            let started = Instant::now();
            let process = match self.launcher.launch(attempt) {
                Ok(process) => process,
                Err(e) => {
                    error!("{}", e);
                    return self.fail(FailureReason::LaunchFailed, e.to_string(), last_log);
                }
            };

            match self.run_attempt(process, &baseline, deadline).await {
                AttemptResult::Booted { serial, process } => {
                    info!(
                        "Emulator {} booted on attempt {} after {:?}",
                        serial,
                        attempt,
                        started.elapsed()
                    );
                    self.set_state(SupervisorState::Booted {
                        serial: serial.clone(),
                    });
                    return BootOutcome::Booted { serial, process };
                }
                AttemptResult::TimedOut { log } => {
                    error!(
                        "Timed out after {:?} (attempt {} ran {:?})",
                        self.config.boot_timeout,
                        attempt,
                        started.elapsed()
                    );
                    return self.fail(
                        FailureReason::Timeout,
                        format!("no ready emulator within {:?}", self.config.boot_timeout),
                        log,
                    );
                }
                AttemptResult::Retry { cause, log } => {
                    warn!(
                        "Attempt {} failed after {:?}: {}",
                        attempt,
                        started.elapsed(),
                        cause
                    );

                    if attempt >= self.config.max_attempts {
                        let reason = match cause {
                            RetryCause::Fault(_) => FailureReason::FaultExhausted,
                            RetryCause::Exited(_) => FailureReason::ProcessExitedUnexpectedly,
                        };
                        error!("Giving up after {} attempts", attempt);
                        return self.fail(reason, cause.to_string(), log);
                    }

                    self.set_state(SupervisorState::RetryPending { attempt, cause });
                    last_log = log;
                    warn!("Retrying...");
                }
            }
        }
    }

    async fn run_attempt(
        &self,
        mut process: ProcessHandle,
        baseline: &Arc<DeviceSnapshot>,
        deadline: Instant,
    ) -> AttemptResult {
        let cancel = CancellationToken::new();

        let streams = match process.take_output() {
            Some(streams) => streams,
            None => {
                // Launchers hand over fresh handles, so this is a launcher bug
                error!("Emulator process has no output streams");
                kill(&mut process).await;
                return AttemptResult::Retry {
                    cause: RetryCause::Exited("output streams unavailable".to_string()),
                    log: Vec::new(),
                };
            }
        };

        let mut monitor = OutputMonitor::start(
            streams,
            self.scanner.clone(),
            self.console.clone(),
            cancel.child_token(),
        );

        let poller = DevicePoller::new(
            self.registry.clone(),
            self.bridge.clone(),
            baseline.clone(),
            self.config.poll_interval,
            self.config.bridge_restart.clone(),
        );
        let (poll_handle, mut ready_rx) = poller.spawn(cancel.child_token());

        let event = tokio::select! {
            biased;
            _ = tokio::time::sleep_until(deadline) => AttemptEvent::Deadline,
            line = monitor.fault_detected() => AttemptEvent::Fault(line),
            status = process.exited() => AttemptEvent::Exited(match status {
                Ok(status) => status.to_string(),
                Err(e) => format!("wait failed: {}", e),
            }),
            Some(serial) = ready_rx.recv() => AttemptEvent::Ready(serial),
        };

        let exit_status = match process.try_exit_status() {
            Ok(status) => status.map(|s| s.to_string()),
            Err(e) => Some(format!("wait failed: {}", e)),
        };
        let event = resolve(event, monitor.fault(), exit_status);
        debug!("Attempt decided by {:?}", event);

        match event {
            AttemptEvent::Ready(serial) => {
                stop_poller(&cancel, poll_handle).await;
                let report = monitor.shutdown().await;
                if let Some(output) = report.output {
                    process.restore_output(output);
                }
                AttemptResult::Booted { serial, process }
            }
            AttemptEvent::Fault(line) => {
                stop_poller(&cancel, poll_handle).await;
                kill(&mut process).await;
                let report = monitor.shutdown().await;
                AttemptResult::Retry {
                    cause: RetryCause::Fault(line),
                    log: report.log,
                }
            }
            AttemptEvent::Exited(status) => {
                // Output may still be in flight; collect it before stopping
                let report = monitor.finish(self.config.exit_grace).await;
                stop_poller(&cancel, poll_handle).await;
                kill(&mut process).await;

                // A fault line that arrived with the exit explains it
                let cause = match report.fault {
                    Some(line) => RetryCause::Fault(line),
                    None => RetryCause::Exited(status),
                };
                AttemptResult::Retry {
                    cause,
                    log: report.log,
                }
            }
            AttemptEvent::Deadline => {
                stop_poller(&cancel, poll_handle).await;
                kill(&mut process).await;
                let report = monitor.shutdown().await;
                AttemptResult::TimedOut { log: report.log }
            }
        }
    }

    fn set_state(&self, state: SupervisorState) {
        debug!("Supervisor state: {:?}", state);
        self.state_tx.send_replace(state);
    }

    fn fail(&self, reason: FailureReason, detail: String, log: Vec<u8>) -> BootOutcome {
        self.set_state(SupervisorState::Failed { reason });
        BootOutcome::Failed {
            reason,
            detail,
            log,
        }
    }
}

async fn stop_poller(cancel: &CancellationToken, handle: JoinHandle<()>) {
    cancel.cancel();
    if let Err(e) = handle.await {
        warn!("Device poller task failed: {}", e);
    }
}

async fn kill(process: &mut ProcessHandle) {
    if let Err(e) = process.kill().await {
        warn!("Failed to kill {}: {}", process.program(), e);
    }
}
