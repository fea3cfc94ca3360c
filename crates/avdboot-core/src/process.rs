//! Emulator process handle

use std::ffi::OsStr;
use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::errors::LaunchError;

/// Which pipe a line of output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => f.write_str("stdout"),
            StreamKind::Stderr => f.write_str("stderr"),
        }
    }
}

/// Line readers over a process's two output pipes
pub struct OutputStreams<O = ChildStdout, E = ChildStderr> {
    pub stdout: Lines<BufReader<O>>,
    pub stderr: Lines<BufReader<E>>,
}

/// A running (or exited) emulator process.
///
/// Dropping the handle does not kill the process; a booted emulator is meant
/// to outlive the tool that started it.
pub struct ProcessHandle {
    program: String,
    child: Child,
    exit_status: Option<ExitStatus>,
    output: Option<OutputStreams>,
}

impl ProcessHandle {
    /// Spawn `program` with piped stdout/stderr
    pub fn spawn<P, I, S>(program: P, args: I) -> Result<Self, LaunchError>
    where
        P: AsRef<OsStr>,
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program_name = program.as_ref().to_string_lossy().into_owned();

        let mut child = Command::new(program.as_ref())
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: program_name.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| LaunchError::MissingPipe {
            program: program_name.clone(),
            stream: "stdout",
        })?;
        let stderr = child.stderr.take().ok_or_else(|| LaunchError::MissingPipe {
            program: program_name.clone(),
            stream: "stderr",
        })?;

        info!("Started {} (pid {:?})", program_name, child.id());

        Ok(Self {
            program: program_name,
            child,
            exit_status: None,
            output: Some(OutputStreams {
                stdout: BufReader::new(stdout).lines(),
                stderr: BufReader::new(stderr).lines(),
            }),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// OS process id, `None` once the process has been reaped
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Move the output streams out; they must be drained by the caller
    pub fn take_output(&mut self) -> Option<OutputStreams> {
        self.output.take()
    }

    pub fn restore_output(&mut self, output: OutputStreams) {
        self.output = Some(output);
    }

    /// Wait for the process to terminate. Cancel safe; the status is cached so
    /// later calls return immediately.
    pub async fn exited(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        let status = self.child.wait().await?;
        debug!("{} exited with {}", self.program, status);
        self.exit_status = Some(status);
        Ok(status)
    }

    /// Non-blocking exit check
    pub fn try_exit_status(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.exit_status.is_none() {
            self.exit_status = self.child.try_wait()?;
        }
        Ok(self.exit_status)
    }

    /// Force-terminate and reap the process. No-op if it already exited.
    pub async fn kill(&mut self) -> io::Result<()> {
        if self.try_exit_status()?.is_some() {
            return Ok(());
        }

        warn!("Killing {} (pid {:?})", self.program, self.child.id());
        self.child.kill().await?;
        self.exit_status = self.child.try_wait()?;
        Ok(())
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("program", &self.program)
            .field("pid", &self.child.id())
            .field("exit_status", &self.exit_status)
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessHandle {
        ProcessHandle::spawn("sh", ["-c", script]).unwrap()
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let err = ProcessHandle::spawn("/nonexistent/emulator", ["-version"]).unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_streams_are_line_oriented() {
        let mut process = sh("echo one; echo two >&2; echo three");
        let mut output = process.take_output().unwrap();

        assert_eq!(output.stdout.next_line().await.unwrap().as_deref(), Some("one"));
        assert_eq!(output.stdout.next_line().await.unwrap().as_deref(), Some("three"));
        assert_eq!(output.stdout.next_line().await.unwrap(), None);
        assert_eq!(output.stderr.next_line().await.unwrap().as_deref(), Some("two"));

        assert!(process.exited().await.unwrap().success());
        assert!(process.take_output().is_none());
    }

    #[tokio::test]
    async fn test_exit_status_is_cached() {
        let mut process = sh("exit 3");
        let first = process.exited().await.unwrap();
        let second = process.exited().await.unwrap();

        assert_eq!(first.code(), Some(3));
        assert_eq!(first, second);
        assert_eq!(process.try_exit_status().unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_kill_is_idempotent() {
        let mut process = sh("sleep 30");
        assert_eq!(process.try_exit_status().unwrap(), None);

        process.kill().await.unwrap();
        assert!(process.try_exit_status().unwrap().is_some());

        process.kill().await.unwrap();
        assert!(!process.exited().await.unwrap().success());
    }
}
