//! Command handlers for the avdboot CLI

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{error, info};

use avdboot_core::{AdbClient, BootOutcome, BootSupervisor, DeviceRegistry, EmulatorLauncher};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::phases::{create_phases, print_emulator_version, PhaseLimits};
use crate::sdk::AndroidSdk;

/// Line printed on success for CI scripts to pick up
pub const SERIAL_OUTPUT_KEY: &str = "EMULATOR_SERIAL";

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Apply command overrides to `config`, validate it and run the command
    pub async fn execute(cli: Cli, mut config: AppConfig) -> Result<()> {
        config.apply_sdk_overrides(cli.android_home, cli.android_sdk_root);

        match cli.command {
            Commands::Start(args) => {
                config.apply_start_args(&args);
                config.validate()?;
                Self::handle_start_command(&config, args.serial_file.as_deref()).await
            }
            Commands::Create(args) => {
                config.apply_create_args(&args);
                config.validate()?;
                Self::handle_create_command(&config).await
            }
            Commands::Devices { json } => {
                config.validate()?;
                Self::handle_devices_command(&config, json).await
            }
        }
    }

    /// Boot the configured AVD and report its serial
    async fn handle_start_command(config: &AppConfig, serial_file: Option<&Path>) -> Result<()> {
        let sdk = AndroidSdk::locate(&config.sdk)?;
        print_emulator_version(&sdk.emulator()).await;

        let launcher = Arc::new(EmulatorLauncher::new(
            sdk.emulator(),
            &config.launch_options()?,
        ));
        let adb = Arc::new(AdbClient::new(sdk.adb()).with_timeout(config.adb_timeout()));
        let supervisor =
            BootSupervisor::new(config.supervisor_config(), launcher, adb.clone(), adb)?;

        info!("Starting device {}", config.emulator.id);
        match supervisor.boot().await {
            BootOutcome::Booted { serial, process } => {
                println!("{}={}", SERIAL_OUTPUT_KEY, serial);
                if let Some(path) = serial_file {
                    tokio::fs::write(path, format!("{}\n", serial)).await?;
                    info!("Wrote serial to {}", path.display());
                }
                info!(
                    "Device with serial {} started (pid {:?})",
                    serial,
                    process.id()
                );
                Ok(())
            }
            BootOutcome::Failed {
                reason,
                detail,
                log,
            } => {
                dump_emulator_log(&log);
                error!("{}: {}", reason, detail);
                Err(CliError::BootFailed { reason, detail })
            }
        }
    }

    /// Install packages and create the AVD
    async fn handle_create_command(config: &AppConfig) -> Result<()> {
        let sdk = AndroidSdk::locate(&config.sdk)?;
        let limits = PhaseLimits::from_config(config);

        for phase in create_phases(&sdk, config)? {
            phase.run(limits).await?;
        }

        info!("Created AVD {}", config.emulator.id);
        Ok(())
    }

    /// Print the emulators the device bridge knows about
    async fn handle_devices_command(config: &AppConfig, json: bool) -> Result<()> {
        let sdk = AndroidSdk::locate(&config.sdk)?;
        let adb = AdbClient::new(sdk.adb()).with_timeout(config.adb_timeout());
        let snapshot = adb.snapshot().await?;

        if json {
            let devices: Map<String, Value> = snapshot
                .iter()
                .map(|(serial, state)| (serial.to_string(), Value::from(state.as_str())))
                .collect();
            println!("{}", serde_json::to_string_pretty(&devices)?);
        } else if snapshot.is_empty() {
            println!("No emulators running");
        } else {
            for (serial, state) in snapshot.iter() {
                println!("{}\t{}", serial, state);
            }
        }
        Ok(())
    }
}

/// Emulator output of the failed attempt, written once to stderr
fn dump_emulator_log(log: &[u8]) {
    if log.is_empty() {
        return;
    }
    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "Emulator log:");
    let _ = stderr.write_all(log);
    let _ = stderr.flush();
}
