//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Android SDK root (preferred over ANDROID_SDK_ROOT)
    #[arg(long, env = "ANDROID_HOME", global = true)]
    pub android_home: Option<PathBuf>,

    /// Android SDK root used when ANDROID_HOME is unset or invalid
    #[arg(long, env = "ANDROID_SDK_ROOT", global = true)]
    pub android_sdk_root: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Boot an existing AVD and print its serial
    Start(StartArgs),
    /// Install the emulator and system image, then create the AVD
    Create(CreateArgs),
    /// List running emulators
    Devices {
        /// Print the device list as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct StartArgs {
    /// Name of the AVD to boot
    #[arg(long)]
    pub emulator_id: Option<String>,

    /// Extra emulator flags, split shell-style
    #[arg(long, allow_hyphen_values = true)]
    pub start_flags: Option<String>,

    /// GPU emulation mode
    #[arg(long)]
    pub gpu: Option<String>,

    /// Boot deadline in seconds, shared by all attempts
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Emulator launches before giving up
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Seconds between device list polls
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Keep user data instead of passing -wipe-data
    #[arg(long)]
    pub keep_data: bool,

    /// Also write the booted serial to this file
    #[arg(long)]
    pub serial_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct CreateArgs {
    /// Name of the AVD to create
    #[arg(long)]
    pub emulator_id: Option<String>,

    /// Android API level of the system image
    #[arg(long)]
    pub api_level: Option<u32>,

    /// System image tag (google_apis, google_apis_playstore, android-wear, android-tv, default)
    #[arg(long)]
    pub tag: Option<String>,

    /// System image ABI (x86, x86_64, armeabi-v7a, arm64-v8a)
    #[arg(long)]
    pub abi: Option<String>,

    /// Hardware profile passed to avdmanager --device
    #[arg(long)]
    pub profile: Option<String>,

    /// sdkmanager channel for the emulator package (0 stable .. 3 canary)
    #[arg(long)]
    pub channel: Option<String>,

    /// Extra avdmanager flags, split shell-style
    #[arg(long, allow_hyphen_values = true)]
    pub create_flags: Option<String>,
}
