//! Output monitor: drains emulator output to the console and scans it for faults
//!
//! Each pipe gets its own drain task so a quiet stderr never stalls stdout.
//! Lines are funneled over an unbounded channel into a single consumer, which
//! keeps the emulator from ever blocking on a full pipe. All three tasks share
//! one cancellation token; once it fires no further line is delivered.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, BufReader, Lines};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fault::FaultScanner;
use crate::process::{OutputStreams, StreamKind};

/// Marker the emulator prints once the guest reports boot completion
pub const BOOT_COMPLETED_MARKER: &str = "boot completed";

/// A single line of emulator output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub text: String,
}

/// Operator-visible destination for emulator output
pub trait ConsoleSink: Send + Sync + 'static {
    fn write_line(&self, line: &OutputLine);
}

/// Writes stdout lines to stdout and stderr lines to stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct StdConsole;

impl ConsoleSink for StdConsole {
    fn write_line(&self, line: &OutputLine) {
        match line.stream {
            StreamKind::Stdout => println!("{}", line.text),
            StreamKind::Stderr => eprintln!("{}", line.text),
        }
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConsole;

impl ConsoleSink for NullConsole {
    fn write_line(&self, _line: &OutputLine) {}
}

/// What the monitor collected by the time it was torn down
pub struct MonitorReport<O = ChildStdout, E = ChildStderr> {
    /// Every delivered line, newline-terminated, in arrival order
    pub log: Vec<u8>,
    /// The first line that matched a fault signature
    pub fault: Option<String>,
    /// Unread remainder of the streams; `None` if a drain task panicked
    pub output: Option<OutputStreams<O, E>>,
}

pub struct OutputMonitor<O = ChildStdout, E = ChildStderr> {
    cancel: CancellationToken,
    fault_rx: watch::Receiver<Option<String>>,
    stdout_task: JoinHandle<Lines<BufReader<O>>>,
    stderr_task: JoinHandle<Lines<BufReader<E>>>,
    consumer_task: JoinHandle<Vec<u8>>,
}

impl<O, E> OutputMonitor<O, E>
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    /// Start draining `streams`. The monitor stops when `cancel` fires or on
    /// teardown. Must be called from within a tokio runtime.
    pub fn start(
        streams: OutputStreams<O, E>,
        scanner: FaultScanner,
        console: Arc<dyn ConsoleSink>,
        cancel: CancellationToken,
    ) -> Self {
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (fault_tx, fault_rx) = watch::channel(None);

        let stdout_task = tokio::spawn(drain(
            streams.stdout,
            StreamKind::Stdout,
            line_tx.clone(),
            cancel.clone(),
        ));
        let stderr_task = tokio::spawn(drain(
            streams.stderr,
            StreamKind::Stderr,
            line_tx,
            cancel.clone(),
        ));
        let consumer_task = tokio::spawn(consume(
            line_rx,
            scanner,
            console,
            fault_tx,
            cancel.clone(),
        ));

        Self {
            cancel,
            fault_rx,
            stdout_task,
            stderr_task,
            consumer_task,
        }
    }

    /// Resolves with the first fault line. Pends forever if the streams end
    /// without one. Cancel safe.
    pub async fn fault_detected(&mut self) -> String {
        loop {
            if let Some(line) = self.fault_rx.borrow_and_update().clone() {
                return line;
            }
            if self.fault_rx.changed().await.is_err() {
                // Consumer is gone and never saw a fault
                std::future::pending::<()>().await;
            }
        }
    }

    /// The fault line, if one has been observed so far
    pub fn fault(&self) -> Option<String> {
        self.fault_rx.borrow().clone()
    }

    /// Stop immediately
    pub async fn shutdown(self) -> MonitorReport<O, E> {
        self.finish(Duration::ZERO).await
    }

    /// Give the streams up to `grace` to reach end-of-file so trailing output
    /// of an exited process is not lost, then stop.
    pub async fn finish(mut self, grace: Duration) -> MonitorReport<O, E> {
        let consumer_result = if grace.is_zero() {
            None
        } else {
            tokio::time::timeout(grace, &mut self.consumer_task).await.ok()
        };

        self.cancel.cancel();

        let log = match consumer_result {
            Some(result) => result,
            None => self.consumer_task.await,
        }
        .unwrap_or_else(|e| {
            warn!("Output consumer task failed: {}", e);
            Vec::new()
        });

        let stdout = self.stdout_task.await;
        let stderr = self.stderr_task.await;
        let output = match (stdout, stderr) {
            (Ok(stdout), Ok(stderr)) => Some(OutputStreams { stdout, stderr }),
            _ => {
                warn!("Output drain task failed");
                None
            }
        };

        let fault = self.fault_rx.borrow().clone();
        MonitorReport { log, fault, output }
    }
}

async fn drain<R>(
    mut lines: Lines<BufReader<R>>,
    stream: StreamKind,
    tx: mpsc::UnboundedSender<OutputLine>,
    cancel: CancellationToken,
) -> Lines<BufReader<R>>
where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = lines.next_line() => next,
        };

        match next {
            Ok(Some(text)) => {
                if tx.send(OutputLine { stream, text }).is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!("Emulator {} closed", stream);
                break;
            }
            Err(e) => {
                warn!("Failed to read emulator {}: {}", stream, e);
                break;
            }
        }
    }
    lines
}

async fn consume(
    mut rx: mpsc::UnboundedReceiver<OutputLine>,
    scanner: FaultScanner,
    console: Arc<dyn ConsoleSink>,
    fault_tx: watch::Sender<Option<String>>,
    cancel: CancellationToken,
) -> Vec<u8> {
    let mut log = Vec::new();

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        console.write_line(&line);
        log.extend_from_slice(line.text.as_bytes());
        log.push(b'\n');

        if let Some(signature) = scanner.matching_signature(&line.text) {
            if fault_tx.borrow().is_none() {
                warn!("Emulator log contains fault ({:?}): {}", signature, line.text);
                fault_tx.send_replace(Some(line.text.clone()));
            } else {
                debug!("Ignoring further fault line: {}", line.text);
            }
        } else if line.text.contains(BOOT_COMPLETED_MARKER) {
            info!("Emulator log reports boot completed");
        }
    }

    log
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, DuplexStream};

    #[derive(Default)]
    struct CapturedConsole {
        lines: Mutex<Vec<OutputLine>>,
    }

    impl ConsoleSink for CapturedConsole {
        fn write_line(&self, line: &OutputLine) {
            self.lines.lock().unwrap().push(line.clone());
        }
    }

    fn streams(stdout: &'static [u8], stderr: &'static [u8]) -> OutputStreams<&'static [u8], &'static [u8]> {
        OutputStreams {
            stdout: BufReader::new(stdout).lines(),
            stderr: BufReader::new(stderr).lines(),
        }
    }

    #[tokio::test]
    async fn test_lines_reach_console_with_origin() {
        let console = Arc::new(CapturedConsole::default());
        let monitor = OutputMonitor::start(
            streams(b"a\nb\n", b"x\n"),
            FaultScanner::default(),
            console.clone(),
            CancellationToken::new(),
        );

        let report = monitor.finish(Duration::from_secs(5)).await;
        let lines = console.lines.lock().unwrap().clone();

        let stdout: Vec<_> = lines
            .iter()
            .filter(|l| l.stream == StreamKind::Stdout)
            .map(|l| l.text.as_str())
            .collect();
        let stderr: Vec<_> = lines
            .iter()
            .filter(|l| l.stream == StreamKind::Stderr)
            .map(|l| l.text.as_str())
            .collect();

        assert_eq!(stdout, vec!["a", "b"]);
        assert_eq!(stderr, vec!["x"]);
        assert_eq!(report.log.len(), "a\nb\nx\n".len());
        assert!(report.fault.is_none());
    }

    #[tokio::test]
    async fn test_first_fault_is_reported_once() {
        let mut monitor = OutputMonitor::start(
            streams(b"booting\nKernel panic - first\n BUG: second\n", b""),
            FaultScanner::default(),
            Arc::new(NullConsole),
            CancellationToken::new(),
        );

        let fault = monitor.fault_detected().await;
        assert_eq!(fault, "Kernel panic - first");

        let report = monitor.finish(Duration::from_secs(5)).await;
        assert_eq!(report.fault.as_deref(), Some("Kernel panic - first"));
    }

    #[tokio::test]
    async fn test_no_delivery_after_shutdown() {
        let console = Arc::new(CapturedConsole::default());
        let (mut writer, reader): (DuplexStream, DuplexStream) = tokio::io::duplex(1024);
        let monitor = OutputMonitor::start(
            OutputStreams {
                stdout: BufReader::new(reader).lines(),
                stderr: BufReader::new(&b""[..]).lines(),
            },
            FaultScanner::default(),
            console.clone(),
            CancellationToken::new(),
        );

        writer.write_all(b"before\n").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while console.lines.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let report = monitor.shutdown().await;
        writer.write_all(b"after\nKernel panic\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let lines = console.lines.lock().unwrap().clone();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "before");
        assert!(report.fault.is_none());

        // The unread remainder is handed back to the caller
        let mut output = report.output.unwrap();
        assert_eq!(output.stdout.next_line().await.unwrap().as_deref(), Some("after"));
    }
}
