//! SDK tool phases: sdkmanager installs and avdmanager creation
//!
//! The SDK tools prompt for license acceptance and hardware profiles, and
//! occasionally hang on network stalls. Each phase therefore gets scripted
//! answers on stdin, a silence timeout that resets on every output line, an
//! overall timeout, and a small retry budget.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::sdk::AndroidSdk;

/// Answers fed to a tool that may ask questions
pub fn answers(answer: &str) -> String {
    format!("{}\n", answer).repeat(20)
}

/// Silence and overall limits plus the attempt budget for a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseLimits {
    pub silence: Duration,
    pub overall: Duration,
    pub attempts: u32,
}

impl PhaseLimits {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            silence: Duration::from_secs(config.avd.silence_timeout_secs),
            overall: Duration::from_secs(config.avd.phase_timeout_secs),
            attempts: config.avd.phase_attempts,
        }
    }
}

/// One SDK tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub stdin: String,
}

impl Phase {
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Run with retries; the last failure is reported
    pub async fn run(&self, limits: PhaseLimits) -> Result<String> {
        let mut last_error = None;

        for attempt in 1..=limits.attempts {
            if attempt == 1 {
                info!("{}", self.name);
            } else {
                warn!("Retrying: {} (attempt {}/{})", self.name, attempt, limits.attempts);
            }
            info!("$ {}", self.command_line());

            match run_with_hang_timeout(&self.program, &self.args, &self.stdin, limits).await {
                Ok(output) => return Ok(output),
                Err(e) => {
                    warn!("{} failed: {}", self.name, e);
                    last_error = Some(e);
                }
            }
        }

        let source = last_error.unwrap_or_else(|| {
            CliError::Config(format!("phase '{}' has no attempts configured", self.name))
        });
        Err(CliError::PhaseFailed {
            phase: self.name.clone(),
            attempts: limits.attempts,
            source: Box::new(source),
        })
    }
}

/// Phases that install the emulator and system image, then create the AVD
pub fn create_phases(sdk: &AndroidSdk, config: &AppConfig) -> Result<Vec<Phase>> {
    let sdkmanager = sdk.sdkmanager()?;
    let avdmanager = sdk.avdmanager()?;
    let package = config.system_image_package();

    let mut create_args: Vec<String> = [
        "--verbose",
        "create",
        "avd",
        "--force",
        "--name",
        config.emulator.id.as_str(),
        "--device",
        config.avd.profile.as_str(),
        "--package",
        package.as_str(),
        "--tag",
        config.avd.tag.as_str(),
        "--abi",
        config.avd.abi.as_str(),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    create_args.extend(config.create_flags()?);

    Ok(vec![
        Phase {
            name: "Updating emulator".to_string(),
            program: sdkmanager.clone(),
            args: vec![
                "--verbose".to_string(),
                format!("--channel={}", config.avd.channel),
                "emulator".to_string(),
            ],
            stdin: answers("yes"),
        },
        Phase {
            name: "Updating system-image packages".to_string(),
            program: sdkmanager,
            args: vec!["--verbose".to_string(), package.clone()],
            stdin: answers("yes"),
        },
        Phase {
            name: "Creating device".to_string(),
            program: avdmanager,
            args: create_args,
            // Decline a custom hardware profile
            stdin: answers("no"),
        },
    ])
}

/// Run `program`, killing it if it stays silent for `limits.silence` or runs
/// longer than `limits.overall`. Returns the combined output.
pub async fn run_with_hang_timeout(
    program: &Path,
    args: &[String],
    stdin: &str,
    limits: PhaseLimits,
) -> Result<String> {
    let program_name = program.display().to_string();

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| CliError::Spawn {
            program: program_name.clone(),
            source,
        })?;

    if let Some(mut child_stdin) = child.stdin.take() {
        let answers = stdin.to_string();
        tokio::spawn(async move {
            // The tool may exit without reading every answer
            if let Err(e) = child_stdin.write_all(answers.as_bytes()).await {
                debug!("Stopped feeding stdin: {}", e);
            }
        });
    }

    let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
    let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());

    let overall = sleep(limits.overall);
    let silence = sleep(limits.silence);
    tokio::pin!(overall);
    tokio::pin!(silence);

    let mut output = String::new();

    while stdout.is_some() || stderr.is_some() {
        let line = tokio::select! {
            biased;
            _ = &mut overall => {
                warn!("{} timed out after {:?}", program_name, limits.overall);
                kill(&mut child, &program_name).await;
                return Err(CliError::Timeout {
                    program: program_name,
                    seconds: limits.overall.as_secs(),
                });
            }
            _ = &mut silence => {
                warn!("{} produced no output for {:?}", program_name, limits.silence);
                kill(&mut child, &program_name).await;
                return Err(CliError::Silence {
                    program: program_name,
                    seconds: limits.silence.as_secs(),
                });
            }
            line = next_line(&mut stdout) => line,
            line = next_line(&mut stderr) => line,
        };

        if let Some(line) = line {
            silence.as_mut().reset(Instant::now() + limits.silence);
            debug!("{}", line);
            progress_dot();
            output.push_str(&line);
            output.push('\n');
        }
    }
    finish_progress();

    let status = tokio::select! {
        biased;
        _ = &mut overall => {
            kill(&mut child, &program_name).await;
            return Err(CliError::Timeout {
                program: program_name,
                seconds: limits.overall.as_secs(),
            });
        }
        status = child.wait() => status?,
    };

    if !status.success() {
        return Err(CliError::CommandFailed {
            program: program_name,
            status: status.to_string(),
            output: output.trim().to_string(),
        });
    }

    Ok(output)
}

/// Next line of an open stream; a closed stream is set to `None` and then
/// never resolves again
async fn next_line<R>(lines: &mut Option<tokio::io::Lines<BufReader<R>>>) -> Option<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(reader) = lines.as_mut() else {
        return std::future::pending().await;
    };

    match reader.next_line().await {
        Ok(Some(line)) => Some(line),
        Ok(None) => {
            *lines = None;
            None
        }
        Err(e) => {
            warn!("Failed to read tool output: {}", e);
            *lines = None;
            None
        }
    }
}

async fn kill(child: &mut tokio::process::Child, program: &str) {
    if let Err(e) = child.kill().await {
        warn!("Failed to terminate {}: {}", program, e);
    }
}

fn progress_dot() {
    let mut stdout = std::io::stdout();
    let _ = write!(stdout, ".");
    let _ = stdout.flush();
}

fn finish_progress() {
    println!();
}

/// Print `emulator -version` to the console; failure is only a warning
pub async fn print_emulator_version(emulator: &Path) {
    info!("Emulator version:");
    info!("$ {} -version", emulator.display());

    match Command::new(emulator).arg("-version").status().await {
        Ok(status) if status.success() => {}
        Ok(status) => warn!("Failed to print emulator version: {}", status),
        Err(e) => warn!("Failed to print emulator version: {}", e),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn limits(silence_ms: u64, overall_ms: u64, attempts: u32) -> PhaseLimits {
        PhaseLimits {
            silence: Duration::from_millis(silence_ms),
            overall: Duration::from_millis(overall_ms),
            attempts,
        }
    }

    fn sh(script: &str) -> (PathBuf, Vec<String>) {
        (
            PathBuf::from("sh"),
            vec!["-c".to_string(), script.to_string()],
        )
    }

    #[test]
    fn test_answers() {
        assert_eq!(answers("yes").lines().count(), 20);
        assert!(answers("no").lines().all(|l| l == "no"));
    }

    #[tokio::test]
    async fn test_output_and_stdin_answers() {
        let (program, args) = sh("read a; echo \"got $a\"; echo warn >&2");
        let output = run_with_hang_timeout(&program, &args, &answers("yes"), limits(2000, 5000, 1))
            .await
            .unwrap();

        assert!(output.contains("got yes"));
        assert!(output.contains("warn"));
    }

    #[tokio::test]
    async fn test_silent_tool_is_killed() {
        let (program, args) = sh("echo start; sleep 30");
        let err = run_with_hang_timeout(&program, &args, "", limits(200, 10_000, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Silence { .. }));
    }

    #[tokio::test]
    async fn test_chatty_tool_hits_overall_timeout() {
        let (program, args) = sh("while true; do echo tick; sleep 0.05; done");
        let err = run_with_hang_timeout(&program, &args, "", limits(1000, 300, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_reported() {
        let (program, args) = sh("echo 'Error: package not found'; exit 1");
        let err = run_with_hang_timeout(&program, &args, "", limits(2000, 5000, 1))
            .await
            .unwrap_err();
        match err {
            CliError::CommandFailed { output, .. } => assert!(output.contains("package not found")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_phase_retries_until_success() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("attempted");
        // Fails on the first run, succeeds once the marker exists
        let script = format!(
            "if [ -f '{m}' ]; then echo ok; else touch '{m}'; exit 1; fi",
            m = marker.display()
        );
        let (program, args) = sh(&script);
        let phase = Phase {
            name: "Flaky phase".to_string(),
            program,
            args,
            stdin: String::new(),
        };

        let output = phase.run(limits(2000, 5000, 3)).await.unwrap();
        assert!(output.contains("ok"));
    }

    #[tokio::test]
    async fn test_phase_gives_up_after_attempts() {
        let (program, args) = sh("exit 2");
        let phase = Phase {
            name: "Broken phase".to_string(),
            program,
            args,
            stdin: String::new(),
        };

        let err = phase.run(limits(2000, 5000, 3)).await.unwrap_err();
        assert!(matches!(err, CliError::PhaseFailed { attempts: 3, .. }));
    }

    #[test]
    fn test_create_phases_layout() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("cmdline-tools/latest/bin")).unwrap();
        let sdk = AndroidSdk::new(dir.path()).unwrap();

        let mut config = AppConfig::default();
        config.emulator.id = "ci".to_string();
        config.avd.create_flags = "--sdcard 512M".to_string();

        let phases = create_phases(&sdk, &config).unwrap();
        assert_eq!(phases.len(), 3);

        assert!(phases[0].program.ends_with("sdkmanager"));
        assert_eq!(phases[0].args, ["--verbose", "--channel=0", "emulator"]);
        assert!(phases[0].stdin.starts_with("yes\n"));

        assert_eq!(
            phases[1].args,
            ["--verbose", "system-images;android-26;google_apis;x86"]
        );

        assert!(phases[2].program.ends_with("avdmanager"));
        assert!(phases[2].stdin.starts_with("no\n"));
        assert_eq!(&phases[2].args[..6], ["--verbose", "create", "avd", "--force", "--name", "ci"]);
        assert_eq!(&phases[2].args[phases[2].args.len() - 2..], ["--sdcard", "512M"]);
    }
}
